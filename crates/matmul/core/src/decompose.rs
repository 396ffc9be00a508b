//! Decomposition of a matrix product into dot-product tasks.

use rand::{seq::SliceRandom, Rng};
use tracing::debug;

use crate::{
    mask::MaskSet,
    matrix::Operands,
    task::{Sign, Task, TaskId},
    vector,
};

/// Errors that prevent tasks from being built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecomposeError {
    /// The masks do not have the dimensionality of the operand vectors.
    #[error("mask vectors have {masks} components but operand vectors have {operands}")]
    MaskDimension {
        /// Dimensionality of the masks.
        masks: usize,
        /// Dimensionality of the operands, `k`.
        operands: usize,
    },
}

/// Builds the shuffled task multiset for `operands`.
///
/// Without masks one task is emitted per cell. With masks every cell gets a
/// `+` and a `-` share over independently drawn mask indices `ri, rj`.
pub fn build_tasks<R: Rng + ?Sized>(
    operands: &Operands,
    masks: Option<&MaskSet>,
    rng: &mut R,
) -> Result<Vec<Task>, DecomposeError> {
    let mut tasks = match masks {
        None => plain_tasks(operands),
        Some(masks) => masked_tasks(operands, masks, rng)?,
    };

    tasks.shuffle(rng);

    debug!(tasks = tasks.len(), masked = masks.is_some(), "built tasks");

    Ok(tasks)
}

fn plain_tasks(operands: &Operands) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(operands.rows().len() * operands.columns().len());
    for (i, row) in operands.rows().iter().enumerate() {
        for (j, col) in operands.columns().iter().enumerate() {
            tasks.push(Task {
                id: TaskId::Plain { i, j },
                x: row.clone(),
                y: col.clone(),
            });
        }
    }
    tasks
}

fn masked_tasks<R: Rng + ?Sized>(
    operands: &Operands,
    masks: &MaskSet,
    rng: &mut R,
) -> Result<Vec<Task>, DecomposeError> {
    if masks.dim() != operands.inner_dim() {
        return Err(DecomposeError::MaskDimension {
            masks: masks.dim(),
            operands: operands.inner_dim(),
        });
    }

    let size = masks.size();
    let mut tasks = Vec::with_capacity(2 * operands.rows().len() * operands.columns().len());
    for (i, row) in operands.rows().iter().enumerate() {
        for (j, col) in operands.columns().iter().enumerate() {
            let ri = rng.random_range(0..size);
            let rj = rng.random_range(0..size);

            let (r, s) = masks.pair(ri, rj);

            tasks.push(Task {
                id: TaskId::Masked {
                    i,
                    j,
                    sign: Sign::Plus,
                    ri,
                    rj,
                },
                x: vector::add(row, r),
                y: vector::add(col, s),
            });
            tasks.push(Task {
                id: TaskId::Masked {
                    i,
                    j,
                    sign: Sign::Minus,
                    ri,
                    rj,
                },
                x: vector::sub(row, r),
                y: vector::sub(col, s),
            });
        }
    }

    Ok(tasks)
}
