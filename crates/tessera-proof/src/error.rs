use tessera_claim::ClaimError;
use tessera_core::{CircuitId, CoreError, ErrorCategory};
use tessera_merkle::MerkleError;
use tessera_query::QueryError;
use thiserror::Error;

/// Error type for the tessera-proof crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    // -- request shape ------------------------------------------------------
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("challenge is required for {0}")]
    ChallengeRequired(CircuitId),

    // -- missing sub-proofs -------------------------------------------------
    #[error("claim inclusion proof is empty")]
    EmptyClaimProof,

    #[error("claim signature is empty")]
    EmptyClaimSignature,

    #[error("claim non-revocation proof is empty")]
    EmptyClaimNonRevProof,

    #[error("issuer auth claim proof is empty")]
    EmptyIssuerAuthClaimProof,

    #[error("issuer auth claim non-revocation proof is empty")]
    EmptyIssuerAuthClaimNonRevProof,

    #[error("auth claim inclusion proof is empty")]
    EmptyAuthClaimProof,

    #[error("auth claim non-revocation proof is empty")]
    EmptyAuthClaimNonRevProof,

    #[error("challenge signature is empty")]
    EmptyChallengeSignature,

    #[error("GIST proof is empty")]
    EmptyGistProof,

    #[error("tree state is empty")]
    EmptyTreeState,

    // -- signals ------------------------------------------------------------
    #[error("{circuit} expects {expected} public signals, got {got}")]
    SignalCountMismatch {
        circuit: CircuitId,
        expected: usize,
        got: usize,
    },

    #[error("invalid public signal {name}: {reason}")]
    InvalidSignal { name: &'static str, reason: String },

    // -- verification -------------------------------------------------------
    #[error("proof is invalid")]
    InvalidProof,

    #[error("schema of the proof does not match the query")]
    SchemaMismatch,

    #[error("circuit query hash does not match the query")]
    QueryHashMismatch,

    #[error("query requires a revocation check")]
    RevocationCheckRequired,

    #[error("proof is not bound to the queried field: {0}")]
    FieldBindingMismatch(String),

    #[error("operator does not match the query")]
    OperatorMismatch,

    #[error("values do not match the query")]
    ValueMismatch,

    #[error("selectively disclosed value does not match the presentation: {0}")]
    DisclosureMismatch(String),

    #[error("proof type does not match the query")]
    ProofTypeMismatch,

    #[error("issuer {0} is not allowed by the query")]
    IssuerNotAllowed(String),

    #[error("proof generated at {generated} is older than {max_age_secs}s")]
    ProofOutdated { generated: u64, max_age_secs: u64 },

    #[error("state {0} is not registered")]
    StateNotRegistered(String),

    #[error("state {state} was replaced {age_secs}s ago, over {max_age_secs}s")]
    StateOutdated {
        state: String,
        age_secs: u64,
        max_age_secs: u64,
    },

    #[error("GIST root {0} is not known")]
    GistRootNotFound(String),

    #[error("id ownership check failed: {0}")]
    IdOwnershipFailed(String),

    #[error("link id is required for grouped queries")]
    LinkIdRequired,

    #[error("proofs of group {group_id} carry different link ids")]
    LinkIdMismatch { group_id: u64 },

    #[error("nullifier check failed: {0}")]
    NullifierMismatch(String),

    #[error("generic state transition is only for ethereum-controlled identities")]
    NotEthereumIdentity,

    // -- collaborators ------------------------------------------------------
    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("state oracle error: {0}")]
    Oracle(String),

    #[error("verification key not found for {0}")]
    KeyNotFound(CircuitId),

    #[error("revocation status unavailable: {0}")]
    RevocationStatus(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type ProofResult<T> = Result<T, ProofError>;

impl ProofError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProofError::InvalidRequest(_)
            | ProofError::ChallengeRequired(_)
            | ProofError::NotEthereumIdentity
            | ProofError::Query(_) => ErrorCategory::Validation,

            ProofError::Claim(ClaimError::ProofClaimMismatch) => ErrorCategory::BindingMismatch,

            ProofError::StateNotRegistered(_)
            | ProofError::StateOutdated { .. }
            | ProofError::GistRootNotFound(_)
            | ProofError::EmptyTreeState => ErrorCategory::State,

            ProofError::RevocationStatus(_) => ErrorCategory::Revocation,

            ProofError::EmptyClaimProof
            | ProofError::EmptyClaimSignature
            | ProofError::EmptyClaimNonRevProof
            | ProofError::EmptyIssuerAuthClaimProof
            | ProofError::EmptyIssuerAuthClaimNonRevProof
            | ProofError::EmptyAuthClaimProof
            | ProofError::EmptyAuthClaimNonRevProof
            | ProofError::EmptyChallengeSignature
            | ProofError::EmptyGistProof
            | ProofError::SignalCountMismatch { .. }
            | ProofError::InvalidSignal { .. }
            | ProofError::InvalidProof
            | ProofError::SchemaMismatch
            | ProofError::QueryHashMismatch
            | ProofError::RevocationCheckRequired
            | ProofError::FieldBindingMismatch(_)
            | ProofError::OperatorMismatch
            | ProofError::ValueMismatch
            | ProofError::DisclosureMismatch(_)
            | ProofError::ProofTypeMismatch
            | ProofError::IssuerNotAllowed(_)
            | ProofError::ProofOutdated { .. }
            | ProofError::IdOwnershipFailed(_)
            | ProofError::LinkIdRequired
            | ProofError::LinkIdMismatch { .. }
            | ProofError::NullifierMismatch(_)
            | ProofError::ProofGenerationFailed(_) => ErrorCategory::Proof,

            ProofError::Oracle(_)
            | ProofError::KeyNotFound(_)
            | ProofError::Claim(_)
            | ProofError::Merkle(_)
            | ProofError::Core(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ProofError::SignalCountMismatch {
            circuit: CircuitId::AuthV2,
            expected: 3,
            got: 2,
        };
        assert_eq!(e.to_string(), "authV2 expects 3 public signals, got 2");
        assert_eq!(
            ProofError::ChallengeRequired(CircuitId::AtomicQueryV3OnChain).to_string(),
            "challenge is required for credentialAtomicQueryV3OnChain-beta.1"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(ProofError::SchemaMismatch.category(), ErrorCategory::Proof);
        assert_eq!(
            ProofError::StateNotRegistered("1".into()).category(),
            ErrorCategory::State
        );
        assert_eq!(
            ProofError::Claim(ClaimError::ProofClaimMismatch).category(),
            ErrorCategory::BindingMismatch
        );
        assert_eq!(
            ProofError::Query(QueryError::InvalidQuery("x".into())).category(),
            ErrorCategory::Validation
        );
    }
}
