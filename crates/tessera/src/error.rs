use tessera_core::ErrorCategory;
use thiserror::Error;

use crate::transition::TransitionContext;

/// Error type of the Tessera engine, aggregating the errors of every
/// workspace crate.
#[derive(Debug, Error)]
pub enum TesseraError {
    #[error("core error: {0}")]
    Core(#[from] tessera_core::CoreError),

    #[error("merkle error: {0}")]
    Merkle(#[from] tessera_merkle::MerkleError),

    #[error("claim error: {0}")]
    Claim(#[from] tessera_claim::ClaimError),

    #[error("query error: {0}")]
    Query(#[from] tessera_query::QueryError),

    #[error("proof error: {0}")]
    Proof(#[from] tessera_proof::ProofError),

    /// Every submission attempt failed. Local tree writes are kept.
    #[error("state transition failed after {attempts} attempts ({context}): {last_error}")]
    TransitionExhausted {
        attempts: u32,
        context: TransitionContext,
        last_error: String,
    },

    #[error("all auth credentials of {0} are revoked")]
    AllAuthCredentialsRevoked(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TesseraError {
    fn from(e: toml::de::Error) -> Self {
        TesseraError::Config(format!("TOML parse error: {}", e))
    }
}

impl TesseraError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TesseraError::Proof(e) => e.category(),
            TesseraError::Claim(tessera_claim::ClaimError::ProofClaimMismatch) => {
                ErrorCategory::BindingMismatch
            }
            TesseraError::Query(_) | TesseraError::InvalidRequest(_) => ErrorCategory::Validation,
            TesseraError::TransitionExhausted { .. } => ErrorCategory::State,
            TesseraError::AllAuthCredentialsRevoked(_) => ErrorCategory::Revocation,
            TesseraError::NotFound(_) => ErrorCategory::NotFound,
            TesseraError::Core(_)
            | TesseraError::Merkle(_)
            | TesseraError::Claim(_)
            | TesseraError::Storage(_)
            | TesseraError::Config(_)
            | TesseraError::Io(_)
            | TesseraError::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

pub type TesseraResult<T> = Result<T, TesseraError>;
