//! Worker errors.
//!
//! This module handles errors that might occur while connecting to the
//! coordinator and exchanging messages with it.

use derive_builder::UninitializedFieldError;
use std::{error::Error, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ErrorKind {
    Builder,
    Connection,
    Protocol,
}

#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub struct WorkerError {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl WorkerError {
    pub(crate) fn new(kind: ErrorKind, source: Option<Box<dyn Error + Send + Sync>>) -> Self {
        Self { kind, source }
    }

    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker error: {:?}, source: {:?}",
            self.kind, self.source
        )
    }
}

impl From<UninitializedFieldError> for WorkerError {
    fn from(ufe: UninitializedFieldError) -> Self {
        WorkerError::new(ErrorKind::Builder, Some(Box::new(ufe)))
    }
}
