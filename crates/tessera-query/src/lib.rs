//! Query metadata for the Tessera identity engine.
//!
//! Turns a verifier's [`ProofQuery`] into circuit terms: which claim slot or
//! Merkle path a field lives at, which operator applies and which field
//! elements it compares against. Also evaluates queries off-chain so a
//! holder can pick the credential to prove with.

pub mod error;
pub mod matching;
pub mod operator;
pub mod query;
pub mod validator;

pub use error::{QueryError, QueryResult};
pub use matching::{credential_matches, evaluate, filter_credentials, lookup_field};
pub use operator::{Arity, Operator};
pub use query::{parse_query, parse_query_metadata, FieldQuery, ProofQuery, QueryMetadata};
pub use validator::{circuit_validator, validate_operators, CircuitValidator, VALUE_ARRAY_SIZE};
