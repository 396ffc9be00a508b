//! Mask vectors and the offset table used to cancel them.
//!
//! A [`MaskSet`] holds `S` mask vectors for the rows (`masks_a`) and `S` for
//! the columns (`masks_b`). The [`OffsetTable`] stores every pairwise dot
//! product `masks_a[r]·masks_b[c]` and never leaves the coordinator.

use num_bigint::BigInt;
use rand::{TryCryptoRng, TryRngCore};
use tracing::debug;

use crate::vector::dot;

/// Errors that can occur while setting up masks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaskError {
    /// The randomness source failed.
    #[error("randomness source failed: {0}")]
    Randomness(String),
    /// A mask set must contain at least one vector per side.
    #[error("mask set must contain at least one vector")]
    EmptyMaskSet,
    /// `masks_a` and `masks_b` have different lengths.
    #[error("mask set sides differ in size: {a} vs {b}")]
    SizeMismatch {
        /// Number of row masks.
        a: usize,
        /// Number of column masks.
        b: usize,
    },
    /// A mask vector has the wrong dimensionality.
    #[error("mask vector has {actual} components, expected {expected}")]
    Dimension {
        /// Dimensionality of the first mask vector.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },
}

/// Secret mask vectors for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSet {
    masks_a: Vec<Vec<BigInt>>,
    masks_b: Vec<Vec<BigInt>>,
}

impl MaskSet {
    /// Draws `size` row masks and `size` column masks of `dim` components.
    ///
    /// Every component is uniform in `[0, 2^32 - 1]`.
    pub fn generate<R>(rng: &mut R, size: usize, dim: usize) -> Result<Self, MaskError>
    where
        R: TryRngCore + TryCryptoRng + ?Sized,
    {
        if size == 0 {
            return Err(MaskError::EmptyMaskSet);
        }

        let draw = |rng: &mut R| -> Result<Vec<Vec<BigInt>>, MaskError> {
            (0..size)
                .map(|_| {
                    (0..dim)
                        .map(|_| {
                            rng.try_next_u32()
                                .map(BigInt::from)
                                .map_err(|err| MaskError::Randomness(err.to_string()))
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect()
        };

        let masks_a = draw(rng)?;
        let masks_b = draw(rng)?;

        debug!(size, dim, "generated mask set");

        Ok(Self { masks_a, masks_b })
    }

    /// Creates a mask set from fixed vectors.
    pub fn from_vectors(
        masks_a: Vec<Vec<BigInt>>,
        masks_b: Vec<Vec<BigInt>>,
    ) -> Result<Self, MaskError> {
        if masks_a.is_empty() || masks_b.is_empty() {
            return Err(MaskError::EmptyMaskSet);
        }
        if masks_a.len() != masks_b.len() {
            return Err(MaskError::SizeMismatch {
                a: masks_a.len(),
                b: masks_b.len(),
            });
        }

        let expected = masks_a[0].len();
        if let Some(actual) = masks_a
            .iter()
            .chain(&masks_b)
            .map(Vec::len)
            .find(|len| *len != expected)
        {
            return Err(MaskError::Dimension { expected, actual });
        }

        Ok(Self { masks_a, masks_b })
    }

    /// Returns the number of masks per side, `S`.
    pub fn size(&self) -> usize {
        self.masks_a.len()
    }

    /// Returns the dimensionality of every mask vector.
    pub fn dim(&self) -> usize {
        self.masks_a[0].len()
    }

    /// Returns the row mask with index `idx`.
    pub fn mask_a(&self, idx: usize) -> Option<&[BigInt]> {
        self.masks_a.get(idx).map(Vec::as_slice)
    }

    /// Returns the column mask with index `idx`.
    pub fn mask_b(&self, idx: usize) -> Option<&[BigInt]> {
        self.masks_b.get(idx).map(Vec::as_slice)
    }

    // Callers draw both indices below `size()`.
    pub(crate) fn pair(&self, ri: usize, rj: usize) -> (&[BigInt], &[BigInt]) {
        (&self.masks_a[ri], &self.masks_b[rj])
    }

    /// Computes the offset table of this mask set.
    pub fn offset_table(&self) -> OffsetTable {
        let offsets = self
            .masks_a
            .iter()
            .map(|a| self.masks_b.iter().map(|b| dot(a, b)).collect())
            .collect();

        OffsetTable { offsets }
    }
}

/// Pairwise dot products of a mask set, `offset[r][c] = masks_a[r]·masks_b[c]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    offsets: Vec<Vec<BigInt>>,
}

impl OffsetTable {
    /// Returns `offset[r][c]`, or `None` if either index is out of range.
    pub fn get(&self, r: usize, c: usize) -> Option<&BigInt> {
        self.offsets.get(r).and_then(|row| row.get(c))
    }

    /// Returns `S`.
    pub fn size(&self) -> usize {
        self.offsets.len()
    }
}
