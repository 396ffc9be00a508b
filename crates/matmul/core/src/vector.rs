//! Component-wise integer vector arithmetic.
//!
//! Masked operands exceed the bit width of the original entries, so every
//! value is a [`BigInt`].

use num_bigint::BigInt;

/// Returns the dot product `x·y`.
///
/// Extra components of the longer vector are ignored; callers are expected
/// to pass vectors of equal length.
pub fn dot(x: &[BigInt], y: &[BigInt]) -> BigInt {
    x.iter()
        .zip(y)
        .fold(BigInt::default(), |acc, (a, b)| acc + a * b)
}

/// Returns `x + y`.
pub fn add(x: &[BigInt], y: &[BigInt]) -> Vec<BigInt> {
    x.iter().zip(y).map(|(a, b)| a + b).collect()
}

/// Returns `x - y`.
pub fn sub(x: &[BigInt], y: &[BigInt]) -> Vec<BigInt> {
    x.iter().zip(y).map(|(a, b)| a - b).collect()
}

/// Converts a slice of machine integers into a vector of [`BigInt`].
pub fn from_i64s(values: &[i64]) -> Vec<BigInt> {
    values.iter().copied().map(BigInt::from).collect()
}
