use tessera_core::CoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("no trees for identifier: {0}")]
    TreeNotFound(String),

    #[error("trees already exist for identifier: {0}")]
    TreesAlreadyExist(String),

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("entry index already exists")]
    EntryIndexAlreadyExists,

    #[error("reached maximum tree depth")]
    ReachedMaxLevel,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("invalid tree state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type MerkleResult<T> = Result<T, MerkleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MerkleError::TreeNotFound("did:x".into()).to_string(),
            "no trees for identifier: did:x"
        );
        let core: MerkleError = CoreError::InvalidPoint.into();
        assert_eq!(core.to_string(), "invalid curve point");
    }
}
