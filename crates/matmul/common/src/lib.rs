//! Messages exchanged between the maskmul coordinator and its workers.
//!
//! Every websocket text frame carries one JSON object of the form
//! `{"type": <kind>, "body": <object>}`. Kinds without a payload omit `body`.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod decimal;

use maskmul_core::{Task, TaskId, TaskResult};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Error for a frame that is not a valid message.
#[derive(Debug, thiserror::Error)]
#[error("malformed message: {0}")]
pub struct MessageError(#[from] serde_json::Error);

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Message {
    /// First frame of every worker connection.
    Register(Registration),
    /// A worker asks for work.
    RequestTask,
    /// The coordinator hands out a task.
    Task(TaskPayload),
    /// The task pool is empty.
    NoTask,
    /// A worker returns a computed dot product.
    Result(ResultPayload),
}

impl Message {
    /// Encodes the message as a JSON text frame.
    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a JSON text frame.
    pub fn from_json(s: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Returns the `type` tag of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register(_) => "register",
            Message::RequestTask => "request_task",
            Message::Task(_) => "task",
            Message::NoTask => "no_task",
            Message::Result(_) => "result",
        }
    }
}

/// Body of a `register` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Self-chosen worker name. The coordinator assigns one if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// Body of a `task` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Task id in its string form.
    pub task_id: TaskId,
    /// Left operand.
    #[serde(with = "decimal::vec")]
    pub vector_x: Vec<BigInt>,
    /// Right operand.
    #[serde(with = "decimal::vec")]
    pub vector_y: Vec<BigInt>,
}

impl From<Task> for TaskPayload {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            vector_x: task.x,
            vector_y: task.y,
        }
    }
}

impl From<TaskPayload> for Task {
    fn from(payload: TaskPayload) -> Self {
        Self {
            id: payload.task_id,
            x: payload.vector_x,
            y: payload.vector_y,
        }
    }
}

/// Body of a `result` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Id of the computed task.
    pub task_id: TaskId,
    /// The dot product.
    #[serde(with = "decimal")]
    pub dot: BigInt,
}

impl From<TaskResult> for ResultPayload {
    fn from(result: TaskResult) -> Self {
        Self {
            task_id: result.id,
            dot: result.dot,
        }
    }
}

impl From<ResultPayload> for TaskResult {
    fn from(payload: ResultPayload) -> Self {
        Self {
            id: payload.task_id,
            dot: payload.dot,
        }
    }
}
