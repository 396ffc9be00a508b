use axum::{
    extract::Request,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use eyre::eyre;
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::rt::TokioIo;
use maskmul_core::{AggregationSession, Operands, Outcome};
use rand::rngs::OsRng;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::{net::TcpListener, time::Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_service::Service;
use tracing::{debug, error, info, warn};

use crate::{
    config::CoordinatorProperties,
    error::CoordinatorError,
    service::{server_info, upgrade_protocol},
    types::CoordinatorGlobals,
    util::load_operands,
};

/// A coordinator bound to its listening address, with its tasks ready.
pub struct Coordinator {
    listener: TcpListener,
    session: AggregationSession,
    concurrency: usize,
}

impl Coordinator {
    /// Sets up the aggregation session for `operands` and binds the listener.
    #[tracing::instrument(skip_all)]
    pub async fn bind(
        config: &CoordinatorProperties,
        operands: Operands,
    ) -> Result<Self, CoordinatorError> {
        let session = build_session(config, &operands)?;

        let address = SocketAddr::new(
            IpAddr::V4(config.host.parse().map_err(|err| {
                eyre!("Failed to parse coordinator host address from config: {err}")
            })?),
            config.port,
        );
        let listener = TcpListener::bind(address)
            .await
            .map_err(|err| eyre!("Failed to bind server address to tcp listener: {err}"))?;

        info!("Listening for TCP traffic at {}", address);

        Ok(Self {
            listener,
            session,
            concurrency: config.concurrency,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, CoordinatorError> {
        self.listener
            .local_addr()
            .map_err(|err| eyre!("Failed to get local address: {err}").into())
    }

    /// Serves workers until aggregation settles or times out, then closes
    /// every worker session and returns the best-effort result.
    pub async fn run(self) -> Result<Outcome, CoordinatorError> {
        let Self {
            listener,
            mut session,
            concurrency,
        } = self;

        let shutdown = CancellationToken::new();
        let globals = CoordinatorGlobals::new(session.handle(), concurrency, shutdown.clone());

        let router = Router::new()
            .route(
                "/healthcheck",
                get(|| async move { (StatusCode::OK, "Ok").into_response() }),
            )
            .route("/info", get(server_info))
            .route("/ws", get(upgrade_protocol))
            .layer(CorsLayer::permissive())
            .with_state(globals);

        let server = tokio::spawn(serve(listener, router, shutdown.clone()));

        let started = Instant::now();
        let status = session.aggregate().await;

        shutdown.cancel();
        if let Err(err) = server.await {
            error!("Server task failed: {err}");
        }

        let outcome = session.finalize();
        info!(
            elapsed = ?started.elapsed(),
            ?status,
            unresolved = outcome.unresolved_count(),
            violations = outcome.violations.len(),
            "Aggregation done"
        );

        Ok(outcome)
    }
}

/// Loads the operands named in `config` and runs one coordinator to the end.
#[tracing::instrument(skip(config))]
pub async fn run_coordinator(config: &CoordinatorProperties) -> Result<Outcome, CoordinatorError> {
    let operands = load_operands(&config.operands)?;
    Coordinator::bind(config, operands).await?.run().await
}

/// Logs the result matrix row by row, followed by every unresolved cell and
/// every rejected result.
pub fn log_outcome(outcome: &Outcome) {
    info!("Result C:");
    for line in outcome.matrix.to_string().lines() {
        info!("{line}");
    }

    let unresolved = outcome.unresolved_cells();
    if !unresolved.is_empty() {
        let cells = unresolved
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            unresolved = unresolved.len(),
            failed = outcome.failed_cells.len(),
            "Unresolved cells: {cells}"
        );
    }

    for (task_id, err) in &outcome.violations {
        warn!(%task_id, "Rejected result: {err}");
    }
    let omitted = outcome
        .rejected_results
        .saturating_sub(outcome.violations.len());
    if omitted > 0 {
        warn!(omitted, "More rejected results were not recorded");
    }
}

fn build_session(
    config: &CoordinatorProperties,
    operands: &Operands,
) -> Result<AggregationSession, CoordinatorError> {
    let session_config = config.aggregation.session_config()?;
    Ok(AggregationSession::new(
        operands,
        &session_config,
        &mut OsRng,
        &mut rand::rng(),
    )?)
}

async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    let protocol = Arc::new(http1::Builder::new());

    loop {
        // Ensure that all operations inside are infallible to prevent bringing
        // down the server
        let stream = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Stopped accepting worker connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    error!("{}", CoordinatorError::Connection(err.to_string()));
                    continue;
                }
            },
        };
        debug!("Received a worker's TCP connection");

        let tower_service = router.clone();
        let protocol = protocol.clone();

        // Spawn a new async task to handle the new connection
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
                tower_service.clone().call(request)
            });
            // use with_upgrades so that websocket upgrades are handed to the
            // router's handler
            let _ = protocol
                .serve_connection(io, hyper_service)
                .with_upgrades()
                .await;
        });
    }
}
