//! Masked matrix multiplication over untrusted workers.
//!
//! A matrix product `C = A·B` is split into one dot-product task per output
//! cell. With privacy enabled each cell is instead split into a pair of
//! masked shares: a worker holding the `+` share sees `(x + r, y + s)` and a
//! worker holding the `-` share sees `(x - r, y - s)`, where `r` and `s` are
//! secret mask vectors. Adding both dot products and subtracting the
//! precomputed `2·(r·s)` recovers `2·(x·y)`.
//!
//! The crate contains the algebra and the bookkeeping only. Transport lives
//! in `maskmul-coordinator` and `maskmul-worker`.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod decompose;
pub mod mask;
pub mod matrix;
pub mod pool;
pub mod reconstruct;
pub mod session;
pub mod task;
pub mod vector;

pub use decompose::{build_tasks, DecomposeError};
pub use mask::{MaskError, MaskSet, OffsetTable};
pub use matrix::{Cell, DimensionError, Matrix, Operands, ResultMatrix};
pub use pool::TaskPool;
pub use reconstruct::{IntegrityError, Reconstructor, Submission};
pub use session::{
    AggregationSession, AggregationStatus, Outcome, SessionConfig, SessionConfigBuilder,
    SessionConfigBuilderError, SessionError, SessionHandle,
};
pub use task::{Sign, Task, TaskId, TaskIdParseError, TaskResult};

pub use num_bigint::BigInt;
