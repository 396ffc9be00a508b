//! Worker for distributed masked matrix multiplication.
//!
//! A worker connects to a coordinator, registers and then repeatedly asks for
//! a dot-product task, computes it and sends the result back. It never learns
//! which cell a masked share belongs to beyond the task id.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

mod client;
mod compute;
mod error;

pub use client::{Worker, WorkerBuilder, WorkerReport};
pub use compute::{ComputeError, ComputeUnit, DotProduct};
pub use error::{ErrorKind, WorkerError};
