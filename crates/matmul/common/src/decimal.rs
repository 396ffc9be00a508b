//! Serde helpers that carry integers as decimal strings.
//!
//! Masked operands and their dot products routinely exceed 64 bits, so every
//! integer on the wire is a string. Plain JSON integers are accepted on input
//! as well.

use std::fmt;

use num_bigint::BigInt;
use serde::{
    de::{self, SeqAccess, Visitor},
    ser::SerializeSeq,
    Deserializer, Serializer,
};

/// Serializes `value` as a decimal string.
pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Deserializes a decimal string or a JSON integer.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
    deserializer.deserialize_any(DecimalVisitor)
}

struct DecimalVisitor;

impl<'de> Visitor<'de> for DecimalVisitor {
    type Value = BigInt;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal integer string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.trim()
            .parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(v.into())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v.into())
    }
}

/// The same encoding applied to every element of a vector.
pub mod vec {
    use super::*;

    /// Serializes `values` as an array of decimal strings.
    pub fn serialize<S: Serializer>(values: &[BigInt], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }

    /// Deserializes an array of decimal strings or JSON integers.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<BigInt>, D::Error> {
        deserializer.deserialize_seq(DecimalSeqVisitor)
    }

    struct DecimalSeqVisitor;

    impl<'de> Visitor<'de> for DecimalSeqVisitor {
        type Value = Vec<BigInt>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an array of decimal integer strings")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            while let Some(Decimal(value)) = seq.next_element()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    struct Decimal(BigInt);

    impl<'de> serde::Deserialize<'de> for Decimal {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            super::deserialize(deserializer).map(Decimal)
        }
    }
}
