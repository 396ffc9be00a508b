//! Worker client.
//!
//! This module connects to a coordinator over websocket, registers and then
//! pulls tasks until the coordinator closes the connection.

use std::{io, time::Duration};

use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    tungstenite::{self, error::ProtocolError, Message as WsMessage},
    WebSocketStream,
};
use futures::StreamExt;
use maskmul_common::{Message, Registration, ResultPayload};
use maskmul_core::Task;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    compute::ComputeUnit,
    error::{ErrorKind, WorkerError},
};

type Socket = WebSocketStream<ConnectStream>;

/// Summary of a finished worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Tasks computed and answered.
    pub tasks_completed: usize,
    /// Tasks dropped because they could not be computed.
    pub tasks_failed: usize,
    /// `no_task` replies received.
    pub idle_polls: usize,
}

/// Worker that pulls tasks from a coordinator.
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(build_fn(error = "WorkerError"))]
pub struct Worker {
    /// Websocket URL of the coordinator, e.g. "ws://localhost:8080/ws".
    #[builder(setter(into))]
    url: String,
    /// Name sent when registering.
    #[builder(setter(into), default = "Uuid::new_v4().to_string()")]
    worker_id: String,
    /// Time to wait before asking again after a `no_task` reply.
    #[builder(default = "Duration::from_millis(50)")]
    idle_backoff: Duration,
}

impl Worker {
    /// Creates a new builder for `Worker`.
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::default()
    }

    /// Returns the worker id.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Runs the worker until the coordinator closes the connection.
    #[instrument(skip(self, compute), fields(worker_id = %self.worker_id))]
    pub async fn run<C: ComputeUnit + ?Sized>(
        &self,
        compute: &C,
    ) -> Result<WorkerReport, WorkerError> {
        debug!(url = %self.url, "Connecting to coordinator...");

        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| WorkerError::new(ErrorKind::Connection, Some(Box::new(err))))?;

        let registration = Message::Register(Registration {
            worker_id: Some(self.worker_id.clone()),
        });
        if !send(&mut socket, &registration).await? {
            return Ok(WorkerReport::default());
        }
        info!("Registered");

        let mut report = WorkerReport::default();
        loop {
            if !send(&mut socket, &Message::RequestTask).await? {
                break;
            }

            let Some(reply) = recv(&mut socket).await? else {
                break;
            };

            match reply {
                Message::Task(payload) => {
                    let task = Task::from(payload);
                    debug!(task_id = %task.id, len = task.x.len(), "Got task");

                    let dot = match compute.compute(&task.x, &task.y) {
                        Ok(dot) => dot,
                        Err(err) => {
                            error!(task_id = %task.id, "Dropping task: {err}");
                            report.tasks_failed += 1;
                            continue;
                        }
                    };

                    let result = Message::Result(ResultPayload {
                        task_id: task.id,
                        dot,
                    });
                    if !send(&mut socket, &result).await? {
                        break;
                    }
                    report.tasks_completed += 1;
                    debug!(task_id = %task.id, "Sent result");
                }
                Message::NoTask => {
                    report.idle_polls += 1;
                    sleep(self.idle_backoff).await;
                }
                other => {
                    debug!(kind = other.kind(), "Ignoring unexpected message");
                }
            }
        }

        info!(
            tasks_completed = report.tasks_completed,
            "Coordinator closed the connection"
        );

        Ok(report)
    }
}

/// Sends `message`, returning `false` if the coordinator has already closed
/// the connection.
async fn send(socket: &mut Socket, message: &Message) -> Result<bool, WorkerError> {
    let text = message
        .to_json()
        .map_err(|err| WorkerError::new(ErrorKind::Protocol, Some(Box::new(err))))?;

    match socket.send(WsMessage::Text(text)).await {
        Ok(()) => Ok(true),
        Err(err) if is_closed(&err) => Ok(false),
        Err(err) => Err(WorkerError::new(ErrorKind::Connection, Some(Box::new(err)))),
    }
}

/// Receives the next message, or `None` once the coordinator has closed the
/// connection.
async fn recv(socket: &mut Socket) -> Result<Option<Message>, WorkerError> {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                return Message::from_json(&text)
                    .map(Some)
                    .map_err(|err| WorkerError::new(ErrorKind::Protocol, Some(Box::new(err))));
            }
            Ok(WsMessage::Close(frame)) => {
                debug!(?frame, "Received close frame");
                return Ok(None);
            }
            Ok(other) => {
                warn!("Ignoring non-text frame: {other:?}");
            }
            Err(err) if is_closed(&err) => return Ok(None),
            Err(err) => return Err(WorkerError::new(ErrorKind::Connection, Some(Box::new(err)))),
        }
    }

    Ok(None)
}

/// Returns `true` if `err` means the coordinator went away. The coordinator
/// drops its end right after sending the close frame, so a reset counts too.
fn is_closed(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(err) => matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
