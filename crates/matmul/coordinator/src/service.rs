pub mod websocket;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, info};

use crate::{
    error::CoordinatorError,
    service::websocket::websocket_session,
    types::{CoordinatorGlobals, InfoResponse},
};

/// Handler to upgrade a worker connection to websocket.
pub async fn upgrade_protocol(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(globals): State<CoordinatorGlobals>,
) -> Response {
    info!("Received websocket upgrade request");

    if globals.shutdown.is_cancelled() {
        return CoordinatorError::ShuttingDown.into_response();
    }

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| websocket_session(socket, globals)),
        Err(err) => {
            error!("Malformed websocket upgrade request: {err}");
            CoordinatorError::BadWorkerRequest(err.to_string()).into_response()
        }
    }
}

/// Handler of the /info API.
pub async fn server_info(State(globals): State<CoordinatorGlobals>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(InfoResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            privacy: globals.session.is_masked(),
            workers: globals.registry.worker_ids(),
            pending_tasks: globals.session.pending_tasks(),
        }),
    )
}
