use tessera_claim::ClaimError;
use tessera_core::{CircuitId, CoreError};
use thiserror::Error;

/// Error type for the tessera-query crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("operator {operator} is not supported by {circuit}")]
    UnsupportedOperator { operator: String, circuit: CircuitId },

    #[error("{circuit} accepts at most {max} queries, got {count}")]
    TooManyQueries {
        circuit: CircuitId,
        max: usize,
        count: usize,
    },

    #[error("operator {operator} got {count} values: {expected}")]
    InvalidValuesArraySize {
        operator: String,
        count: usize,
        expected: String,
    },

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type QueryResult<T> = Result<T, QueryError>;
