use clap::Parser;
use eyre::eyre;
use maskmul_coordinator::{
    init_tracing, log_outcome, run_coordinator, CliFields, CoordinatorError,
    CoordinatorProperties,
};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<(), CoordinatorError> {
    // Load command line arguments
    let cli_fields = CliFields::parse();

    let config = CoordinatorProperties::new(&cli_fields)
        .map_err(|err| eyre!("Failed to load config: {}", err))?;

    // Set up tracing for logging
    init_tracing(&config.log).map_err(|err| eyre!("Failed to set up tracing: {err}"))?;

    debug!("Coordinator config loaded: \n{}", config);

    // Run the coordinator
    let outcome = run_coordinator(&config).await?;

    log_outcome(&outcome);

    Ok(())
}
