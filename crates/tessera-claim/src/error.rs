use tessera_core::CoreError;
use tessera_merkle::MerkleError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("core claim in proof does not match the credential")]
    ProofClaimMismatch,

    #[error("invalid slot: {0}")]
    InvalidSlot(String),

    #[error("invalid JSON-LD context: {0}")]
    InvalidContext(String),

    #[error("context document not found: {0}")]
    ContextNotFound(String),

    #[error("type not found in context: {0}")]
    TypeNotFound(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("credential has no {0} proof")]
    MissingProof(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type ClaimResult<T> = Result<T, ClaimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ClaimError::MissingProof("BJJSignature2021".into()).to_string(),
            "credential has no BJJSignature2021 proof"
        );
        let e: ClaimError = MerkleError::ReachedMaxLevel.into();
        assert_eq!(e.to_string(), "reached maximum tree depth");
    }
}
