//! Operand and result matrices.

use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// Errors for malformed operand matrices.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DimensionError {
    /// The matrix has no rows or no columns.
    #[error("matrix must have at least one row and one column")]
    Empty,
    /// A row has a different length than the first row.
    #[error("row {row} has {len} entries, expected {expected}")]
    Ragged {
        /// Index of the offending row.
        row: usize,
        /// Length of the offending row.
        len: usize,
        /// Length of the first row.
        expected: usize,
    },
    /// The multiplicand's row length differs from the multiplier's column height.
    #[error("cannot multiply a {a_rows}x{a_cols} matrix by a {b_rows}x{b_cols} matrix")]
    Mismatch {
        /// Rows of the multiplicand.
        a_rows: usize,
        /// Columns of the multiplicand.
        a_cols: usize,
        /// Rows of the multiplier.
        b_rows: usize,
        /// Columns of the multiplier.
        b_cols: usize,
    },
}

/// A rectangular, row-major integer matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: Vec<Vec<BigInt>>,
    cols: usize,
}

impl Matrix {
    /// Creates a new matrix from its rows.
    pub fn new<T: Into<BigInt>>(rows: Vec<Vec<T>>) -> Result<Self, DimensionError> {
        let rows: Vec<Vec<BigInt>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();

        let cols = rows.first().map(Vec::len).unwrap_or_default();
        if cols == 0 {
            return Err(DimensionError::Empty);
        }

        if let Some((row, len)) = rows
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != cols)
        {
            return Err(DimensionError::Ragged {
                row,
                len,
                expected: cols,
            });
        }

        Ok(Self { rows, cols })
    }

    /// Returns the number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Returns the number of columns.
    pub fn num_cols(&self) -> usize {
        self.cols
    }

    /// Returns the rows.
    pub fn rows(&self) -> &[Vec<BigInt>] {
        &self.rows
    }

    /// Returns the columns, extracted column-major.
    pub fn columns(&self) -> Vec<Vec<BigInt>> {
        (0..self.cols)
            .map(|j| self.rows.iter().map(|row| row[j].clone()).collect())
            .collect()
    }
}

/// The validated operands of a product `A·B`.
///
/// The multiplicand is held as rows and the multiplier as columns, which is
/// the form the decomposer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operands {
    rows: Vec<Vec<BigInt>>,
    columns: Vec<Vec<BigInt>>,
}

impl Operands {
    /// Creates the operands of `a·b`.
    pub fn new(a: Matrix, b: Matrix) -> Result<Self, DimensionError> {
        if a.num_cols() != b.num_rows() {
            return Err(DimensionError::Mismatch {
                a_rows: a.num_rows(),
                a_cols: a.num_cols(),
                b_rows: b.num_rows(),
                b_cols: b.num_cols(),
            });
        }

        Ok(Self {
            columns: b.columns(),
            rows: a.rows,
        })
    }

    /// Returns the rows of the multiplicand.
    pub fn rows(&self) -> &[Vec<BigInt>] {
        &self.rows
    }

    /// Returns the columns of the multiplier.
    pub fn columns(&self) -> &[Vec<BigInt>] {
        &self.columns
    }

    /// Returns the length of every row and column, `k`.
    pub fn inner_dim(&self) -> usize {
        self.rows[0].len()
    }

    /// Returns the shape `(n, m)` of the product.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }
}

/// Position of one entry of the result matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Row index, `i`.
    pub row: usize,
    /// Column index, `j`.
    pub col: usize,
}

impl Cell {
    /// Creates a new cell.
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// The product matrix, filled in as cells resolve.
///
/// Every cell is written at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMatrix {
    cells: Vec<Option<BigInt>>,
    rows: usize,
    cols: usize,
}

impl ResultMatrix {
    /// Creates an `rows × cols` matrix with every cell unresolved.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: vec![None; rows * cols],
            rows,
            cols,
        }
    }

    /// Returns the shape `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns `true` if `cell` lies inside the matrix.
    pub fn contains(&self, cell: Cell) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    /// Returns the value of `cell` if it has been resolved.
    pub fn get(&self, cell: Cell) -> Option<&BigInt> {
        self.index(cell).and_then(|idx| self.cells[idx].as_ref())
    }

    /// Returns `true` if `cell` has been resolved.
    pub fn is_resolved(&self, cell: Cell) -> bool {
        self.get(cell).is_some()
    }

    /// Returns the number of resolved cells.
    pub fn resolved_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Returns the cells that have not been resolved, in row-major order.
    pub fn unresolved_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_none())
            .map(|(idx, _)| Cell::new(idx / self.cols, idx % self.cols))
            .collect()
    }

    /// Returns the matrix as nested rows.
    pub fn to_rows(&self) -> Vec<Vec<Option<BigInt>>> {
        if self.cols == 0 {
            return vec![Vec::new(); self.rows];
        }
        self.cells.chunks(self.cols).map(<[_]>::to_vec).collect()
    }

    /// Writes `value` into `cell`.
    ///
    /// Returns `false` without writing if the cell is already resolved or out
    /// of range.
    pub(crate) fn set(&mut self, cell: Cell, value: BigInt) -> bool {
        match self.index(cell) {
            Some(idx) if self.cells[idx].is_none() => {
                self.cells[idx] = Some(value);
                true
            }
            _ => false,
        }
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        self.contains(cell).then(|| cell.row * self.cols + cell.col)
    }
}

impl fmt::Display for ResultMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.to_rows().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let line = row
                .iter()
                .map(|value| match value {
                    Some(value) => value.to_string(),
                    None => "-".to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            write!(f, "{line}")?;
        }
        Ok(())
    }
}
