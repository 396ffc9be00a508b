//! Reconstruction of result cells from worker results.
//!
//! Each cell moves `EMPTY -> ONE_HALF -> RESOLVED` in a masked run and
//! `EMPTY -> RESOLVED` in a plain run. For shares over masks `r` and `s`:
//!
//! ```text
//! plus  = (x + r)·(y + s) = x·y + x·s + r·y + r·s
//! minus = (x - r)·(y - s) = x·y - x·s - r·y + r·s
//! plus + minus - 2·(r·s) = 2·(x·y)
//! ```
//!
//! so the halved sum is exact, and an odd sum means one of the inputs was
//! wrong.

use std::collections::{BTreeSet, HashMap};

use num_bigint::BigInt;
use num_integer::Integer;
use tracing::{debug, trace, warn};

use crate::{
    mask::OffsetTable,
    matrix::{Cell, ResultMatrix},
    task::{Sign, TaskId},
};

/// A result that contradicts the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// The result names a cell outside the product.
    #[error("cell {cell} is outside the result matrix")]
    CellOutOfRange {
        /// The named cell.
        cell: Cell,
    },
    /// The result names a mask index outside `[0, S)`.
    #[error("mask indices ({ri}, {rj}) are outside a mask set of size {size}")]
    MaskIndexOutOfRange {
        /// Row mask index.
        ri: usize,
        /// Column mask index.
        rj: usize,
        /// Size of the mask set.
        size: usize,
    },
    /// The two halves of a cell name different mask indices.
    #[error("cell {cell} is pending with mask indices {expected:?}, got {actual:?}")]
    MismatchedMaskIndices {
        /// The cell.
        cell: Cell,
        /// Indices carried by the half already received.
        expected: (usize, usize),
        /// Indices carried by the rejected half.
        actual: (usize, usize),
    },
    /// The shares of a cell do not reconstruct to an integer.
    #[error("shares of cell {cell} leave a non-zero remainder")]
    OddReconstruction {
        /// The cell.
        cell: Cell,
    },
    /// A masked share arrived in a plain run.
    #[error("masked share for cell {cell} in a plain run")]
    UnexpectedShare {
        /// The cell.
        cell: Cell,
    },
    /// A plain result arrived in a masked run.
    #[error("plain result for cell {cell} in a masked run")]
    UnexpectedPlainResult {
        /// The cell.
        cell: Cell,
    },
}

/// What a submitted result did to its cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The cell was resolved to `value`.
    Resolved {
        /// The resolved cell.
        cell: Cell,
        /// Its value.
        value: BigInt,
    },
    /// The share was stored and the cell waits for the other half.
    AwaitingPair {
        /// The cell.
        cell: Cell,
    },
    /// The result was already seen, or its cell is already settled. Nothing
    /// changed.
    Duplicate,
}

#[derive(Debug)]
struct PendingCell {
    ri: usize,
    rj: usize,
    plus: Option<BigInt>,
    minus: Option<BigInt>,
}

impl PendingCell {
    fn new(ri: usize, rj: usize) -> Self {
        Self {
            ri,
            rj,
            plus: None,
            minus: None,
        }
    }
}

/// Collects results and fills in the [`ResultMatrix`].
#[derive(Debug)]
pub struct Reconstructor {
    matrix: ResultMatrix,
    offsets: Option<OffsetTable>,
    pending_cells: HashMap<Cell, PendingCell>,
    failed: BTreeSet<Cell>,
    pending: usize,
}

impl Reconstructor {
    /// Creates a reconstructor for a product of shape `(n, m)`.
    ///
    /// `offsets` is the offset table of a masked run, or `None` for a plain
    /// run.
    pub fn new(shape: (usize, usize), offsets: Option<OffsetTable>) -> Self {
        let (n, m) = shape;
        Self {
            matrix: ResultMatrix::new(n, m),
            offsets,
            pending_cells: HashMap::new(),
            failed: BTreeSet::new(),
            pending: n * m,
        }
    }

    /// Feeds one worker result.
    pub fn submit(&mut self, id: &TaskId, dot: BigInt) -> Result<Submission, IntegrityError> {
        let cell = id.cell();
        if !self.matrix.contains(cell) {
            return Err(IntegrityError::CellOutOfRange { cell });
        }

        if self.matrix.is_resolved(cell) || self.failed.contains(&cell) {
            trace!(%id, "discarding result for settled cell");
            return Ok(Submission::Duplicate);
        }

        match *id {
            TaskId::Plain { .. } => self.submit_plain(cell, dot),
            TaskId::Masked { sign, ri, rj, .. } => self.submit_share(cell, sign, ri, rj, dot),
        }
    }

    /// Returns the number of cells not yet resolved.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Returns the cells whose shares failed to reconstruct.
    pub fn failed_cells(&self) -> &BTreeSet<Cell> {
        &self.failed
    }

    /// Returns `true` once every cell is either resolved or failed, i.e. no
    /// further result can change the matrix.
    pub fn is_settled(&self) -> bool {
        self.pending == self.failed.len()
    }

    /// Returns the matrix as resolved so far.
    pub fn matrix(&self) -> &ResultMatrix {
        &self.matrix
    }

    /// Consumes the reconstructor, returning the matrix and the failed cells.
    pub fn finalize(self) -> (ResultMatrix, BTreeSet<Cell>) {
        (self.matrix, self.failed)
    }

    fn submit_plain(&mut self, cell: Cell, dot: BigInt) -> Result<Submission, IntegrityError> {
        if self.offsets.is_some() {
            return Err(IntegrityError::UnexpectedPlainResult { cell });
        }

        Ok(self.resolve(cell, dot))
    }

    fn submit_share(
        &mut self,
        cell: Cell,
        sign: Sign,
        ri: usize,
        rj: usize,
        dot: BigInt,
    ) -> Result<Submission, IntegrityError> {
        let Some(offsets) = &self.offsets else {
            return Err(IntegrityError::UnexpectedShare { cell });
        };
        let offset = offsets
            .get(ri, rj)
            .ok_or(IntegrityError::MaskIndexOutOfRange {
                ri,
                rj,
                size: offsets.size(),
            })?
            .clone();

        let entry = self
            .pending_cells
            .entry(cell)
            .or_insert_with(|| PendingCell::new(ri, rj));

        if (entry.ri, entry.rj) != (ri, rj) {
            return Err(IntegrityError::MismatchedMaskIndices {
                cell,
                expected: (entry.ri, entry.rj),
                actual: (ri, rj),
            });
        }

        let slot = match sign {
            Sign::Plus => &mut entry.plus,
            Sign::Minus => &mut entry.minus,
        };
        if slot.is_some() {
            trace!(%cell, ?sign, "discarding repeated share");
            return Ok(Submission::Duplicate);
        }
        *slot = Some(dot);

        let doubled = match (&entry.plus, &entry.minus) {
            (Some(plus), Some(minus)) => plus + minus - BigInt::from(2) * offset,
            _ => return Ok(Submission::AwaitingPair { cell }),
        };
        self.pending_cells.remove(&cell);

        if doubled.is_odd() {
            warn!(%cell, "shares do not reconstruct to an integer");
            self.failed.insert(cell);
            return Err(IntegrityError::OddReconstruction { cell });
        }

        Ok(self.resolve(cell, doubled.div_floor(&BigInt::from(2))))
    }

    fn resolve(&mut self, cell: Cell, value: BigInt) -> Submission {
        if self.matrix.set(cell, value.clone()) {
            self.pending -= 1;
            debug!(%cell, pending = self.pending, "cell resolved");
        }
        Submission::Resolved { cell, value }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        mask::MaskSet,
        matrix::{Matrix, Operands},
        vector::{self, from_i64s},
    };
    use rand::{seq::SliceRandom, Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;
    use rstest::rstest;

    fn example() -> Operands {
        Operands::new(
            Matrix::new(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap(),
            Matrix::new(vec![vec![7, 8], vec![9, 10], vec![11, 12]]).unwrap(),
        )
        .unwrap()
    }

    fn fixed_masks() -> MaskSet {
        MaskSet::from_vectors(
            vec![from_i64s(&[3, 1, 4]), from_i64s(&[1, 5, 9])],
            vec![from_i64s(&[2, 6, 5]), from_i64s(&[3, 5, 8])],
        )
        .unwrap()
    }

    /// Computes the `+` and `-` partial dot products a worker would return.
    fn shares(
        operands: &Operands,
        masks: &MaskSet,
        cell: Cell,
        ri: usize,
        rj: usize,
    ) -> (BigInt, BigInt) {
        let x = &operands.rows()[cell.row];
        let y = &operands.columns()[cell.col];
        let (r, s) = masks.pair(ri, rj);

        let plus = vector::dot(&vector::add(x, r), &vector::add(y, s));
        let minus = vector::dot(&vector::sub(x, r), &vector::sub(y, s));
        (plus, minus)
    }

    fn masked(cell: Cell, sign: Sign, ri: usize, rj: usize) -> TaskId {
        TaskId::Masked {
            i: cell.row,
            j: cell.col,
            sign,
            ri,
            rj,
        }
    }

    fn expected_example() -> Vec<Vec<Option<BigInt>>> {
        vec![
            vec![Some(58.into()), Some(64.into())],
            vec![Some(139.into()), Some(154.into())],
        ]
    }

    #[test]
    fn test_plain_round_trip() {
        let operands = example();
        let mut reconstructor = Reconstructor::new(operands.shape(), None);

        for i in 0..2 {
            for j in 0..2 {
                let dot = vector::dot(&operands.rows()[i], &operands.columns()[j]);
                let submission = reconstructor
                    .submit(&TaskId::Plain { i, j }, dot.clone())
                    .unwrap();
                assert_eq!(
                    submission,
                    Submission::Resolved {
                        cell: Cell::new(i, j),
                        value: dot
                    }
                );
            }
        }

        assert!(reconstructor.is_settled());
        assert_eq!(reconstructor.pending(), 0);
        assert_eq!(reconstructor.matrix().to_rows(), expected_example());
    }

    #[rstest]
    #[case::plus_first(Sign::Plus)]
    #[case::minus_first(Sign::Minus)]
    fn test_masked_round_trip_any_order(#[case] first: Sign) {
        let operands = example();
        let masks = fixed_masks();
        let mut reconstructor = Reconstructor::new(operands.shape(), Some(masks.offset_table()));

        let second = match first {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        };

        for (idx, cell) in [(0, 0), (0, 1), (1, 0), (1, 1)]
            .map(|(i, j)| Cell::new(i, j))
            .into_iter()
            .enumerate()
        {
            let (ri, rj) = (idx % 2, (idx / 2) % 2);
            let (plus, minus) = shares(&operands, &masks, cell, ri, rj);
            let value = |sign| match sign {
                Sign::Plus => plus.clone(),
                Sign::Minus => minus.clone(),
            };

            assert_eq!(
                reconstructor
                    .submit(&masked(cell, first, ri, rj), value(first))
                    .unwrap(),
                Submission::AwaitingPair { cell }
            );
            assert!(matches!(
                reconstructor
                    .submit(&masked(cell, second, ri, rj), value(second))
                    .unwrap(),
                Submission::Resolved { .. }
            ));
            assert_eq!(reconstructor.pending(), 3 - idx);
        }

        assert!(reconstructor.is_settled());
        assert_eq!(reconstructor.matrix().to_rows(), expected_example());
    }

    #[test]
    fn test_masked_negative_and_wide_values() {
        let wide = i64::MAX / 4;
        let operands = Operands::new(
            Matrix::new(vec![vec![-wide, 3, -7], vec![0, -1, 2]]).unwrap(),
            Matrix::new(vec![vec![wide], vec![-2], vec![5]]).unwrap(),
        )
        .unwrap();
        let max = u32::MAX as i64;
        let masks = MaskSet::from_vectors(
            vec![from_i64s(&[max, max, max])],
            vec![from_i64s(&[max, 1, max])],
        )
        .unwrap();
        let mut reconstructor = Reconstructor::new(operands.shape(), Some(masks.offset_table()));

        for row in 0..2 {
            let cell = Cell::new(row, 0);
            let (plus, minus) = shares(&operands, &masks, cell, 0, 0);
            assert!(plus.bits() > 64);

            reconstructor
                .submit(&masked(cell, Sign::Minus, 0, 0), minus)
                .unwrap();
            reconstructor
                .submit(&masked(cell, Sign::Plus, 0, 0), plus)
                .unwrap();
        }

        let expected_first = BigInt::from(-wide) * BigInt::from(wide) - 6 - 35;
        assert!(expected_first < BigInt::default());
        assert_eq!(reconstructor.matrix().get(Cell::new(0, 0)), Some(&expected_first));
        assert_eq!(
            reconstructor.matrix().get(Cell::new(1, 0)),
            Some(&BigInt::from(12))
        );
    }

    #[test]
    fn test_random_matrices_reconstruct_under_any_interleaving() {
        let mut rng = ChaCha12Rng::seed_from_u64(42);

        for _ in 0..16 {
            let (n, k, m) = (
                rng.random_range(1..5),
                rng.random_range(1..6),
                rng.random_range(1..5),
            );
            let mut matrix = |rows: usize, cols: usize| {
                let entries: Vec<Vec<i64>> = (0..rows)
                    .map(|_| (0..cols).map(|_| rng.random_range(-1000..1000)).collect())
                    .collect();
                Matrix::new(entries).unwrap()
            };
            let operands = Operands::new(matrix(n, k), matrix(k, m)).unwrap();

            let masks = MaskSet::generate(&mut rng, 3, k).unwrap();
            let tasks = crate::build_tasks(&operands, Some(&masks), &mut rng).unwrap();

            let mut results: Vec<(TaskId, BigInt)> = tasks
                .iter()
                .map(|task| (task.id, vector::dot(&task.x, &task.y)))
                .collect();
            results.shuffle(&mut rng);

            let mut reconstructor =
                Reconstructor::new(operands.shape(), Some(masks.offset_table()));
            for (resolved, (id, dot)) in results.into_iter().enumerate() {
                reconstructor.submit(&id, dot).unwrap();
                assert_eq!(
                    reconstructor.pending(),
                    n * m - reconstructor.matrix().resolved_count(),
                    "pending count drifted after {resolved} results"
                );
            }

            assert!(reconstructor.is_settled());
            for i in 0..n {
                for j in 0..m {
                    let expected = vector::dot(&operands.rows()[i], &operands.columns()[j]);
                    assert_eq!(reconstructor.matrix().get(Cell::new(i, j)), Some(&expected));
                }
            }
        }
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let operands = example();
        let masks = fixed_masks();
        let mut reconstructor = Reconstructor::new(operands.shape(), Some(masks.offset_table()));
        let cell = Cell::new(1, 0);
        let (plus, minus) = shares(&operands, &masks, cell, 1, 0);

        reconstructor
            .submit(&masked(cell, Sign::Plus, 1, 0), plus.clone())
            .unwrap();
        // A replayed half before the pair completes.
        assert_eq!(
            reconstructor
                .submit(&masked(cell, Sign::Plus, 1, 0), BigInt::from(0))
                .unwrap(),
            Submission::Duplicate
        );
        reconstructor
            .submit(&masked(cell, Sign::Minus, 1, 0), minus.clone())
            .unwrap();
        assert_eq!(reconstructor.pending(), 3);

        // Replays after resolution.
        for (sign, value) in [(Sign::Plus, plus), (Sign::Minus, BigInt::from(-1))] {
            assert_eq!(
                reconstructor
                    .submit(&masked(cell, sign, 1, 0), value)
                    .unwrap(),
                Submission::Duplicate
            );
        }

        assert_eq!(reconstructor.pending(), 3);
        assert_eq!(reconstructor.matrix().get(cell), Some(&BigInt::from(139)));
    }

    #[test]
    fn test_plain_duplicate() {
        let mut reconstructor = Reconstructor::new((1, 1), None);
        let id = TaskId::Plain { i: 0, j: 0 };

        reconstructor.submit(&id, 5.into()).unwrap();
        assert_eq!(
            reconstructor.submit(&id, 6.into()).unwrap(),
            Submission::Duplicate
        );
        assert_eq!(reconstructor.pending(), 0);
        assert_eq!(reconstructor.matrix().get(Cell::new(0, 0)), Some(&5.into()));
    }

    #[test]
    fn test_odd_reconstruction_fails_cell() {
        let operands = example();
        let masks = fixed_masks();
        let mut reconstructor = Reconstructor::new(operands.shape(), Some(masks.offset_table()));
        let cell = Cell::new(0, 1);
        let (plus, minus) = shares(&operands, &masks, cell, 0, 1);

        reconstructor
            .submit(&masked(cell, Sign::Plus, 0, 1), plus + 1)
            .unwrap();
        assert_eq!(
            reconstructor
                .submit(&masked(cell, Sign::Minus, 0, 1), minus.clone())
                .unwrap_err(),
            IntegrityError::OddReconstruction { cell }
        );

        assert!(reconstructor.failed_cells().contains(&cell));
        assert_eq!(reconstructor.pending(), 4);
        assert_eq!(
            reconstructor
                .submit(&masked(cell, Sign::Minus, 0, 1), minus)
                .unwrap(),
            Submission::Duplicate
        );
        assert!(reconstructor.matrix().get(cell).is_none());
    }

    #[test]
    fn test_failed_cells_settle() {
        let mut reconstructor = Reconstructor::new(
            (1, 1),
            Some(
                MaskSet::from_vectors(vec![from_i64s(&[1])], vec![from_i64s(&[1])])
                    .unwrap()
                    .offset_table(),
            ),
        );
        let cell = Cell::new(0, 0);

        reconstructor
            .submit(&masked(cell, Sign::Plus, 0, 0), 1.into())
            .unwrap();
        assert!(!reconstructor.is_settled());
        reconstructor
            .submit(&masked(cell, Sign::Minus, 0, 0), 0.into())
            .unwrap_err();

        assert!(reconstructor.is_settled());
        let (matrix, failed) = reconstructor.finalize();
        assert_eq!(matrix.unresolved_cells(), vec![cell]);
        assert!(failed.contains(&cell));
    }

    #[test]
    fn test_integrity_errors() {
        let operands = example();
        let masks = fixed_masks();
        let mut masked_run = Reconstructor::new(operands.shape(), Some(masks.offset_table()));
        let mut plain_run = Reconstructor::new(operands.shape(), None);
        let cell = Cell::new(0, 0);

        assert_eq!(
            masked_run
                .submit(&masked(cell, Sign::Plus, 2, 0), 1.into())
                .unwrap_err(),
            IntegrityError::MaskIndexOutOfRange {
                ri: 2,
                rj: 0,
                size: 2
            }
        );
        assert_eq!(
            masked_run
                .submit(&masked(Cell::new(2, 0), Sign::Plus, 0, 0), 1.into())
                .unwrap_err(),
            IntegrityError::CellOutOfRange {
                cell: Cell::new(2, 0)
            }
        );
        assert_eq!(
            masked_run
                .submit(&TaskId::Plain { i: 0, j: 0 }, 58.into())
                .unwrap_err(),
            IntegrityError::UnexpectedPlainResult { cell }
        );
        assert_eq!(
            plain_run
                .submit(&masked(cell, Sign::Plus, 0, 0), 1.into())
                .unwrap_err(),
            IntegrityError::UnexpectedShare { cell }
        );

        masked_run
            .submit(&masked(cell, Sign::Plus, 0, 1), 1.into())
            .unwrap();
        assert_eq!(
            masked_run
                .submit(&masked(cell, Sign::Minus, 1, 1), 1.into())
                .unwrap_err(),
            IntegrityError::MismatchedMaskIndices {
                cell,
                expected: (0, 1),
                actual: (1, 1)
            }
        );

        // Rejected results leave every cell pending.
        assert_eq!(masked_run.pending(), 4);
        assert!(masked_run.failed_cells().is_empty());
        assert_eq!(plain_run.pending(), 4);
    }
}
