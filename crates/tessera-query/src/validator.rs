//! Static per-circuit limits: how many queries a circuit proves at once,
//! which operators it understands and how wide its value array is.

use tessera_core::CircuitId;

use crate::error::{QueryError, QueryResult};
use crate::operator::Operator;

/// Width of the `value` signal array of every query circuit.
pub const VALUE_ARRAY_SIZE: usize = 64;

const V2_OPERATORS: &[Operator] = &[
    Operator::Noop,
    Operator::Eq,
    Operator::Lt,
    Operator::Gt,
    Operator::In,
    Operator::Nin,
    Operator::Ne,
    Operator::Sd,
];

const ALL_OPERATORS: &[Operator] = &Operator::ALL;

const NO_OPERATORS: &[Operator] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitValidator {
    pub max_queries: usize,
    pub supported_operators: &'static [Operator],
    pub value_array_size: usize,
}

pub const fn circuit_validator(circuit: CircuitId) -> CircuitValidator {
    match circuit {
        CircuitId::AtomicQueryMtpV2
        | CircuitId::AtomicQueryMtpV2OnChain
        | CircuitId::AtomicQuerySigV2
        | CircuitId::AtomicQuerySigV2OnChain => CircuitValidator {
            max_queries: 1,
            supported_operators: V2_OPERATORS,
            value_array_size: VALUE_ARRAY_SIZE,
        },
        CircuitId::AtomicQueryV3 | CircuitId::AtomicQueryV3OnChain => CircuitValidator {
            max_queries: 1,
            supported_operators: ALL_OPERATORS,
            value_array_size: VALUE_ARRAY_SIZE,
        },
        CircuitId::LinkedMultiQuery10 => CircuitValidator {
            max_queries: 10,
            supported_operators: ALL_OPERATORS,
            value_array_size: VALUE_ARRAY_SIZE,
        },
        CircuitId::AuthV2 | CircuitId::StateTransition => CircuitValidator {
            max_queries: 0,
            supported_operators: NO_OPERATORS,
            value_array_size: 0,
        },
    }
}

impl CircuitValidator {
    pub fn supports(&self, operator: Operator) -> bool {
        self.supported_operators.contains(&operator)
    }
}

/// Check a set of operators against what `circuit` can prove.
pub fn validate_operators(circuit: CircuitId, operators: &[Operator]) -> QueryResult<()> {
    let v = circuit_validator(circuit);
    if operators.len() > v.max_queries {
        return Err(QueryError::TooManyQueries {
            circuit,
            max: v.max_queries,
            count: operators.len(),
        });
    }
    if let Some(op) = operators.iter().find(|op| !v.supports(**op)) {
        return Err(QueryError::UnsupportedOperator {
            operator: op.to_string(),
            circuit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_lacks_extended_operators() {
        let v = circuit_validator(CircuitId::AtomicQuerySigV2);
        assert!(v.supports(Operator::Sd));
        assert!(!v.supports(Operator::Between));
        assert!(!v.supports(Operator::Exists));
        assert!(circuit_validator(CircuitId::AtomicQueryV3).supports(Operator::Nullify));
    }

    #[test]
    fn test_validate_operators() {
        assert!(validate_operators(CircuitId::AtomicQueryMtpV2, &[Operator::Lt]).is_ok());
        assert!(matches!(
            validate_operators(CircuitId::AtomicQueryMtpV2, &[Operator::Lt, Operator::Gt]),
            Err(QueryError::TooManyQueries { max: 1, count: 2, .. })
        ));
        assert!(matches!(
            validate_operators(CircuitId::AtomicQuerySigV2OnChain, &[Operator::Lte]),
            Err(QueryError::UnsupportedOperator { .. })
        ));
        let ten = [Operator::Eq; 10];
        assert!(validate_operators(CircuitId::LinkedMultiQuery10, &ten).is_ok());
        assert!(validate_operators(CircuitId::AuthV2, &[Operator::Eq]).is_err());
    }
}
