use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QueryError, QueryResult};

/// Query operators and their circuit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    Noop,
    Eq,
    Lt,
    Gt,
    In,
    Nin,
    Ne,
    Lte,
    Gte,
    Between,
    NonBetween,
    Exists,
    Sd,
    Nullify,
}

/// How many values an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    Two,
    /// One up to the circuit's value array size.
    Many,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Noop,
        Operator::Eq,
        Operator::Lt,
        Operator::Gt,
        Operator::In,
        Operator::Nin,
        Operator::Ne,
        Operator::Lte,
        Operator::Gte,
        Operator::Between,
        Operator::NonBetween,
        Operator::Exists,
        Operator::Sd,
        Operator::Nullify,
    ];

    pub fn code(&self) -> u64 {
        match self {
            Operator::Noop => 0,
            Operator::Eq => 1,
            Operator::Lt => 2,
            Operator::Gt => 3,
            Operator::In => 4,
            Operator::Nin => 5,
            Operator::Ne => 6,
            Operator::Lte => 7,
            Operator::Gte => 8,
            Operator::Between => 9,
            Operator::NonBetween => 10,
            Operator::Exists => 11,
            Operator::Sd => 16,
            Operator::Nullify => 17,
        }
    }

    pub fn from_code(code: u64) -> QueryResult<Self> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.code() == code)
            .ok_or_else(|| QueryError::UnknownOperator(code.to_string()))
    }

    /// Key used in a query's `credentialSubject` (`$eq`, `$lt`, ...).
    /// `Noop` and `Sd` have no key: they are expressed by omission.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Operator::Noop | Operator::Sd => None,
            Operator::Eq => Some("$eq"),
            Operator::Lt => Some("$lt"),
            Operator::Gt => Some("$gt"),
            Operator::In => Some("$in"),
            Operator::Nin => Some("$nin"),
            Operator::Ne => Some("$ne"),
            Operator::Lte => Some("$lte"),
            Operator::Gte => Some("$gte"),
            Operator::Between => Some("$between"),
            Operator::NonBetween => Some("$nonbetween"),
            Operator::Exists => Some("$exists"),
            Operator::Nullify => Some("$nullify"),
        }
    }

    pub fn from_key(key: &str) -> QueryResult<Self> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.key() == Some(key))
            .ok_or_else(|| QueryError::UnknownOperator(key.to_string()))
    }

    pub fn arity(&self) -> Arity {
        match self {
            Operator::Noop | Operator::Sd | Operator::Nullify => Arity::None,
            Operator::Between | Operator::NonBetween => Arity::Two,
            Operator::In | Operator::Nin => Arity::Many,
            _ => Arity::One,
        }
    }

    /// Check a value count against this operator's arity.
    pub fn check_values_len(&self, count: usize, max: usize) -> QueryResult<()> {
        let (ok, expected) = match self.arity() {
            Arity::None => (count == 0, "expected none".to_string()),
            Arity::One => (count == 1, "expected exactly 1".to_string()),
            Arity::Two => (count == 2, "expected exactly 2".to_string()),
            Arity::Many => (
                count >= 1 && count <= max,
                format!("expected between 1 and {}", max),
            ),
        };
        if ok {
            Ok(())
        } else {
            Err(QueryError::InvalidValuesArraySize {
                operator: self.to_string(),
                count,
                expected,
            })
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Noop => "NOOP",
            Operator::Eq => "EQ",
            Operator::Lt => "LT",
            Operator::Gt => "GT",
            Operator::In => "IN",
            Operator::Nin => "NIN",
            Operator::Ne => "NE",
            Operator::Lte => "LTE",
            Operator::Gte => "GTE",
            Operator::Between => "BETWEEN",
            Operator::NonBetween => "NONBETWEEN",
            Operator::Exists => "EXISTS",
            Operator::Sd => "SD",
            Operator::Nullify => "NULLIFY",
        };
        f.write_str(name)
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| QueryError::UnknownOperator(s.to_string()))
    }
}
