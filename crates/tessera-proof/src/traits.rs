use async_trait::async_trait;
use tessera_claim::CredentialStatus;
use tessera_core::{CircuitId, Did, Fr, Id, LedgerSigner};

use crate::error::ProofResult;
use crate::types::{
    CircuitInputs, GistProof, GistRootInfo, RevocationStatus, StateInfo, StateTransitionInfo,
    ZkProof,
};

// ---------------------------------------------------------------------------
// Prover -- groth16 witness calculation, proving and verification
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Prover: Send + Sync {
    async fn generate(&self, inputs: &CircuitInputs) -> ProofResult<ZkProof>;

    async fn verify(
        &self,
        proof: &ZkProof,
        circuit: CircuitId,
        verification_key: &[u8],
    ) -> ProofResult<bool>;
}

// ---------------------------------------------------------------------------
// StateOracle -- the ledger holding identity states and the GIST
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StateOracle: Send + Sync {
    /// `None` when the ledger has no record of `state` for `id`.
    async fn get_state_info_by_id_and_state(
        &self,
        id: &Id,
        state: &Fr,
    ) -> ProofResult<Option<StateInfo>>;

    /// `None` when `root` was never a GIST root.
    async fn get_gist_root_info(&self, root: &Fr, id: &Id) -> ProofResult<Option<GistRootInfo>>;

    async fn get_gist_proof(&self, id: &Id) -> ProofResult<GistProof>;

    /// Submit a `StateTransition` proof; returns the transaction hash.
    async fn publish_state(&self, proof: &ZkProof, signer: &dyn LedgerSigner)
        -> ProofResult<String>;

    /// Submit a generic transition record; returns the transaction hash.
    async fn publish_state_generic(
        &self,
        signer: &dyn LedgerSigner,
        info: &StateTransitionInfo,
    ) -> ProofResult<String>;
}

// ---------------------------------------------------------------------------
// KeyLoader -- verification keys per circuit
// ---------------------------------------------------------------------------

pub trait KeyLoader: Send + Sync {
    fn verification_key(&self, circuit: CircuitId) -> ProofResult<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// RevocationStatusResolver -- non-revocation proofs for a credential status
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RevocationStatusResolver: Send + Sync {
    async fn resolve(&self, issuer: &Did, status: &CredentialStatus)
        -> ProofResult<RevocationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_prover_object_safe(_: &dyn Prover) {}
    fn _assert_oracle_object_safe(_: &dyn StateOracle) {}
    fn _assert_key_loader_object_safe(_: &dyn KeyLoader) {}
    fn _assert_resolver_object_safe(_: &dyn RevocationStatusResolver) {}
}
