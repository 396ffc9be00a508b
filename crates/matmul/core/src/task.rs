//! Dot-product tasks and their results.

use std::{fmt, str::FromStr};

use num_bigint::BigInt;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::matrix::Cell;

/// Which share of a masked pair a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    /// Operands `(x + r, y + s)`.
    Plus,
    /// Operands `(x - r, y - s)`.
    Minus,
}

impl Sign {
    fn as_str(&self) -> &'static str {
        match self {
            Sign::Plus => "+",
            Sign::Minus => "-",
        }
    }
}

/// Identifies what a task computes and where its result goes.
///
/// On the wire the id is a string: `"i_j"` for plain tasks and
/// `"i_j_+_ri_rj"` or `"i_j_-_ri_rj"` for masked shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    /// Unmasked `rows[i]·cols[j]`.
    Plain {
        /// Row index.
        i: usize,
        /// Column index.
        j: usize,
    },
    /// One share of a masked pair for cell `(i, j)`.
    Masked {
        /// Row index.
        i: usize,
        /// Column index.
        j: usize,
        /// Share carried by the task.
        sign: Sign,
        /// Index of the row mask.
        ri: usize,
        /// Index of the column mask.
        rj: usize,
    },
}

impl TaskId {
    /// Returns the result cell this task contributes to.
    pub fn cell(&self) -> Cell {
        match *self {
            TaskId::Plain { i, j } | TaskId::Masked { i, j, .. } => Cell::new(i, j),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Plain { i, j } => write!(f, "{i}_{j}"),
            TaskId::Masked { i, j, sign, ri, rj } => {
                write!(f, "{i}_{j}_{}_{ri}_{rj}", sign.as_str())
            }
        }
    }
}

/// Error for a task id string that does not follow either form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed task id: {0:?}")]
pub struct TaskIdParseError(String);

impl FromStr for TaskId {
    type Err = TaskIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TaskIdParseError(s.to_string());
        // Digits without a sign or leading zeros, so every id has exactly one
        // string form.
        let index = |part: &str| {
            let canonical = part.bytes().all(|b| b.is_ascii_digit())
                && !part.is_empty()
                && (part == "0" || !part.starts_with('0'));
            if !canonical {
                return Err(err());
            }
            part.parse::<usize>().map_err(|_| err())
        };

        let parts: Vec<&str> = s.split('_').collect();
        match parts.as_slice() {
            [i, j] => Ok(TaskId::Plain {
                i: index(i)?,
                j: index(j)?,
            }),
            [i, j, sign, ri, rj] => {
                let sign = match *sign {
                    "+" => Sign::Plus,
                    "-" => Sign::Minus,
                    _ => return Err(err()),
                };
                Ok(TaskId::Masked {
                    i: index(i)?,
                    j: index(j)?,
                    sign,
                    ri: index(ri)?,
                    rj: index(rj)?,
                })
            }
            _ => Err(err()),
        }
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A dot product to be computed by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Task id.
    pub id: TaskId,
    /// Left operand.
    pub x: Vec<BigInt>,
    /// Right operand.
    pub y: Vec<BigInt>,
}

/// The dot product a worker returned for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    /// Id of the task that was computed.
    pub id: TaskId,
    /// The claimed value of `x·y`.
    pub dot: BigInt,
}
