use clap::Parser;
use maskmul_worker::{DotProduct, Worker, WorkerError};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fields loaded from the command line when launching a worker.
#[derive(Clone, Debug, Parser)]
#[command(name = "maskmul-worker", version, about)]
struct CliFields {
    /// Base URL of the coordinator; "/ws" is appended
    #[arg(long, default_value = "ws://localhost:8080")]
    server: String,

    /// Worker id sent when registering
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli_fields = CliFields::parse();

    let mut builder = Worker::builder();
    builder.url(format!("{}/ws", cli_fields.server.trim_end_matches('/')));
    if let Some(id) = cli_fields.id {
        builder.worker_id(id);
    }
    let worker = builder.build()?;

    let report = worker.run(&DotProduct).await?;
    info!(
        worker_id = worker.worker_id(),
        tasks_completed = report.tasks_completed,
        "Worker finished"
    );

    Ok(())
}
