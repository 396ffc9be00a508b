use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eyre::Report;
use maskmul_common::MessageError;
use maskmul_core::{DimensionError, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Unexpected(#[from] Report),
    #[error("Failed to connect to worker: {0}")]
    Connection(String),
    #[error("Invalid request from worker: {0}")]
    BadWorkerRequest(String),
    #[error("Worker limit of {0} reached")]
    TooManyWorkers(usize),
    #[error("Worker {0} is already registered")]
    DuplicateWorker(String),
    #[error("Coordinator is shutting down")]
    ShuttingDown,
    #[error("Invalid operands: {0}")]
    Operands(#[from] DimensionError),
    #[error("Aggregation session error: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Trait implementation to convert this error into an axum http response
impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        match self {
            bad_request_error @ CoordinatorError::BadWorkerRequest(_) => {
                (StatusCode::BAD_REQUEST, bad_request_error.to_string()).into_response()
            }
            shutting_down @ CoordinatorError::ShuttingDown => {
                (StatusCode::SERVICE_UNAVAILABLE, shutting_down.to_string()).into_response()
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something wrong happened.",
            )
                .into_response(),
        }
    }
}
