//! State transition protocol: moves an identity from its current ledger state
//! to the state of its local trees.
//!
//! Identities with a BabyJubJub auth key sign `Poseidon(oldState, newState)`
//! and prove a `StateTransition` circuit; identities controlled by an
//! Ethereum account submit a generic transition record instead. Submission
//! is retried per [`RetryPolicy`]. Local tree writes are never rolled back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tessera_core::field::fr_to_decimal;
use tessera_core::{poseidon_hash, CircuitId, Fr, LedgerSigner};
use tessera_merkle::{MerkleIdentityStore, TreeKind, TreeState};
use tessera_proof::{
    generate_inputs, AuthProofData, CircuitRequest, ProofResult, Prover, StateOracle,
    StateTransitionInfo, StateTransitionRequest, ETH_STATE_TRANSITION_METHOD_ID,
};
use tracing::{debug, info, warn};

use crate::error::{TesseraError, TesseraResult};
use crate::store::{AuthCredential, IdentityRecord};

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the `retry`-th retry (1-based), capped at `max_delay_ms`.
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(ms.min(self.max_delay_ms as f64) as u64)
    }
}

/// What a failed transition was about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionContext {
    pub did: String,
    pub old_state: String,
    /// Auth credential that signed the transition; empty for generic ones.
    pub credential_id: String,
}

impl fmt::Display for TransitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "did={} oldState={} credentialId={}",
            self.did, self.old_state, self.credential_id
        )
    }
}

/// Run `submit` until it succeeds or the policy's attempts are used up.
pub async fn submit_with_retry<F, Fut>(
    policy: &RetryPolicy,
    context: &TransitionContext,
    mut submit: F,
) -> TesseraResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProofResult<String>>,
{
    let attempts = policy.attempts();
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match submit().await {
            Ok(tx) => {
                info!(did = %context.did, attempt, tx = %tx, "state transition submitted");
                return Ok(tx);
            }
            Err(e) => {
                warn!(did = %context.did, attempt, attempts, error = %e, "state transition submission failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }
    Err(TesseraError::TransitionExhausted {
        attempts,
        context: context.clone(),
        last_error,
    })
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Old and new state of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub old_state: Fr,
    pub old_tree: TreeState,
    pub new_tree: TreeState,
    pub is_old_state_genesis: bool,
}

/// A transition the ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedState {
    pub tx_id: String,
    pub tree_state: TreeState,
}

pub struct StateTransitioner {
    trees: Arc<MerkleIdentityStore>,
    oracle: Arc<dyn StateOracle>,
    prover: Arc<dyn Prover>,
    policy: RetryPolicy,
}

impl StateTransitioner {
    pub fn new(
        trees: Arc<MerkleIdentityStore>,
        oracle: Arc<dyn StateOracle>,
        prover: Arc<dyn Prover>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            trees,
            oracle,
            prover,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Commit the current claims root to the Roots tree and compute the state
    /// the identity moves to.
    pub fn plan(&self, record: &IdentityRecord) -> TesseraResult<TransitionPlan> {
        let identifier = record.did.to_string();
        if self.trees.publish_claims_root(&identifier)? {
            debug!(did = %record.did, "claims root added to roots tree");
        }
        let new_tree = self.trees.tree_state(&identifier)?;
        if new_tree.state() == record.current_state {
            return Err(TesseraError::InvalidRequest(format!(
                "{} has no changes to publish",
                record.did
            )));
        }
        Ok(TransitionPlan {
            old_state: record.current_state,
            old_tree: record.tree_state,
            new_tree,
            is_old_state_genesis: record.is_genesis,
        })
    }

    /// Inputs of the `StateTransition` circuit for `plan`, signed with `auth`.
    pub fn request(
        &self,
        record: &IdentityRecord,
        plan: &TransitionPlan,
        auth: &AuthCredential,
    ) -> TesseraResult<StateTransitionRequest> {
        let identifier = record.did.to_string();
        let (hi, _) = auth.claim.hi_hv()?;
        let old = plan.old_tree;
        let new = plan.new_tree;

        let inclusion = self.trees.generate_proof(
            &identifier,
            TreeKind::Claims,
            &hi,
            Some(&old.claims_root()),
        )?;
        let non_revocation = self.trees.generate_proof(
            &identifier,
            TreeKind::Revocations,
            &Fr::from(auth.revocation_nonce()),
            Some(&old.revocation_root()),
        )?;
        let new_state_inclusion = self.trees.generate_proof(
            &identifier,
            TreeKind::Claims,
            &hi,
            Some(&new.claims_root()),
        )?;
        let signature = auth
            .key
            .sign_poseidon(&poseidon_hash(&[old.state(), new.state()])?)?;

        Ok(StateTransitionRequest {
            id: record.did.id,
            is_old_state_genesis: plan.is_old_state_genesis,
            auth: AuthProofData {
                auth_claim: auth.claim.clone(),
                tree_state: old,
                inclusion: Some(inclusion),
                non_revocation: Some(non_revocation),
            },
            new_state: new,
            new_state_inclusion: Some(new_state_inclusion),
            signature: Some(signature),
        })
    }

    /// Publish the identity's local trees. `auth` signs the transition and
    /// may be `None` only for Ethereum-controlled identities.
    pub async fn transit(
        &self,
        record: &IdentityRecord,
        auth: Option<&AuthCredential>,
        signer: &dyn LedgerSigner,
    ) -> TesseraResult<PublishedState> {
        let plan = self.plan(record)?;
        let context = TransitionContext {
            did: record.did.to_string(),
            old_state: fr_to_decimal(&plan.old_state),
            credential_id: auth.map(|a| a.id.clone()).unwrap_or_default(),
        };
        info!(
            did = %record.did,
            old_state = %context.old_state,
            new_state = %fr_to_decimal(&plan.new_tree.state()),
            genesis = plan.is_old_state_genesis,
            "publishing state"
        );

        let tx_id = if record.is_ethereum_controlled() {
            let info = StateTransitionInfo {
                user_id: record.did.id.to_fr(),
                old_user_state: plan.old_state,
                new_user_state: plan.new_tree.state(),
                is_old_state_genesis: plan.is_old_state_genesis,
                method_id: ETH_STATE_TRANSITION_METHOD_ID,
            };
            submit_with_retry(&self.policy, &context, || {
                self.oracle.publish_state_generic(signer, &info)
            })
            .await?
        } else {
            let auth = auth
                .ok_or_else(|| TesseraError::AllAuthCredentialsRevoked(record.did.to_string()))?;
            let request = self.request(record, &plan, auth)?;
            let inputs = generate_inputs(
                CircuitId::StateTransition,
                &CircuitRequest::StateTransition(request),
            )?;
            let proof = self.prover.generate(&inputs).await?;
            submit_with_retry(&self.policy, &context, || {
                self.oracle.publish_state(&proof, signer)
            })
            .await?
        };

        Ok(PublishedState {
            tx_id,
            tree_state: plan.new_tree,
        })
    }
}
