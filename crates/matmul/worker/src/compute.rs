//! The computation a worker performs for each task.

use maskmul_core::vector;
use num_bigint::BigInt;

/// Errors raised while computing a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComputeError {
    /// The two operands have different lengths.
    #[error("operand lengths differ: {x} != {y}")]
    LengthMismatch {
        /// Length of the left operand.
        x: usize,
        /// Length of the right operand.
        y: usize,
    },
}

/// A stateless function from two integer vectors to an integer.
pub trait ComputeUnit: Send + Sync {
    /// Computes the result for operands `x` and `y`.
    fn compute(&self, x: &[BigInt], y: &[BigInt]) -> Result<BigInt, ComputeError>;
}

/// Computes the exact dot product.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProduct;

impl ComputeUnit for DotProduct {
    fn compute(&self, x: &[BigInt], y: &[BigInt]) -> Result<BigInt, ComputeError> {
        if x.len() != y.len() {
            return Err(ComputeError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        Ok(vector::dot(x, y))
    }
}
