use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use maskmul_common::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::CoordinatorError,
    types::{CoordinatorGlobals, Registration},
};

/// What a worker session observed on its connection.
enum Event {
    Shutdown,
    Frame(Option<Result<WsMessage, axum::Error>>),
}

/// Counters of one worker session.
#[derive(Debug, Default)]
struct Served {
    tasks: usize,
    results: usize,
}

/// Serve one worker over an established websocket connection.
pub async fn websocket_session(mut socket: WebSocket, globals: CoordinatorGlobals) {
    debug!("Upgraded to websocket connection");

    let registration = match register(&mut socket, &globals).await {
        Ok(registration) => registration,
        Err(err) => {
            warn!("Rejected worker connection: {err}");
            close(&mut socket, close_code::POLICY, err.to_string()).await;
            return;
        }
    };
    let worker_id = registration.worker_id().to_string();
    info!(%worker_id, workers = globals.registry.len(), "Worker registered");

    let mut served = Served::default();
    match serve_worker(&mut socket, &globals, &worker_id, &mut served).await {
        Ok(()) => {
            info!(%worker_id, tasks = served.tasks, results = served.results, "Worker session ended");
        }
        Err(err) => {
            info!(
                %worker_id,
                tasks = served.tasks,
                results = served.results,
                "Worker disconnected: {err}"
            );
        }
    }

    drop(registration);
    debug!(%worker_id, workers = globals.registry.len(), "Worker deregistered");
}

/// Waits for the `register` frame that must open every connection.
async fn register(
    socket: &mut WebSocket,
    globals: &CoordinatorGlobals,
) -> Result<Registration, CoordinatorError> {
    let frame = match next_event(socket, globals).await {
        Event::Shutdown => return Err(CoordinatorError::ShuttingDown),
        Event::Frame(frame) => frame,
    };

    let text = match frame {
        Some(Ok(WsMessage::Text(text))) => text,
        Some(Ok(other)) => {
            return Err(CoordinatorError::BadWorkerRequest(format!(
                "expected a register text frame, got {other:?}"
            )))
        }
        Some(Err(err)) => return Err(CoordinatorError::Connection(err.to_string())),
        None => {
            return Err(CoordinatorError::Connection(
                "connection closed before registering".to_string(),
            ))
        }
    };

    let Message::Register(registration) = Message::from_json(text.as_str())? else {
        return Err(CoordinatorError::BadWorkerRequest(
            "first message must be register".to_string(),
        ));
    };

    let worker_id = registration
        .worker_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    globals.registry.register(worker_id)
}

/// Answers task requests and forwards results until the worker leaves or the
/// coordinator shuts down.
async fn serve_worker(
    socket: &mut WebSocket,
    globals: &CoordinatorGlobals,
    worker_id: &str,
    served: &mut Served,
) -> Result<(), CoordinatorError> {
    loop {
        let frame = match next_event(socket, globals).await {
            Event::Shutdown => {
                debug!(%worker_id, "Closing worker session");
                close(socket, close_code::NORMAL, "aggregation finished").await;
                return Ok(());
            }
            Event::Frame(frame) => frame,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(CoordinatorError::Connection(err.to_string())),
        };

        let message = match Message::from_json(text.as_str()) {
            Ok(message) => message,
            Err(err) => {
                warn!(%worker_id, "Ignoring malformed message: {err}");
                continue;
            }
        };

        match message {
            Message::RequestTask => {
                let reply = match globals.session.next_task() {
                    Some(task) => {
                        debug!(%worker_id, task_id = %task.id, "Sending task");
                        served.tasks += 1;
                        Message::Task(task.into())
                    }
                    None => Message::NoTask,
                };
                socket
                    .send(WsMessage::Text(reply.to_json()?.into()))
                    .await
                    .map_err(|err| CoordinatorError::Connection(err.to_string()))?;
            }
            Message::Result(payload) => {
                debug!(%worker_id, task_id = %payload.task_id, "Received result");
                served.results += 1;
                globals
                    .session
                    .submit_result(payload.task_id, payload.dot)?;
            }
            other => {
                debug!(%worker_id, kind = other.kind(), "Ignoring unexpected message");
            }
        }
    }
}

async fn next_event(socket: &mut WebSocket, globals: &CoordinatorGlobals) -> Event {
    tokio::select! {
        _ = globals.shutdown.cancelled() => Event::Shutdown,
        frame = socket.recv() => Event::Frame(frame),
    }
}

async fn close(socket: &mut WebSocket, code: u16, reason: impl Into<String>) {
    let frame = CloseFrame {
        code,
        reason: reason.into().into(),
    };
    if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
        error!("Failed to send close frame: {err}");
    }
}
