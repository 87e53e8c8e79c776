//! Tessera Engine
//!
//! The holder, issuer and publisher side of the Tessera identity engine,
//! built on the workspace crates:
//!
//! - `tessera-core`: field elements, hashing, keys, identifiers and DIDs
//! - `tessera-merkle`: sparse Merkle trees and the per-identity tree store
//! - `tessera-claim`: W3C credentials and the core claims they bind to
//! - `tessera-query`: proof queries and their circuit metadata
//! - `tessera-proof`: circuit inputs, public signals and the verifier
//!
//! # Architecture
//!
//! An [`IdentityWallet`] owns the identities, their trees and the stored
//! credentials ([`WalletStorage`]). It issues credentials, revokes them and
//! publishes new identity states through the [`StateTransitioner`], which
//! retries ledger submission per the configured [`RetryPolicy`].
//!
//! A [`ProofService`] answers verifiers: it selects a credential for each
//! [`ZeroKnowledgeProofRequest`], collects the proofs the circuit needs and
//! runs the prover. Verification itself lives in `tessera_proof::Verifier`.

pub mod config;
pub mod error;
pub mod proof_service;
pub mod store;
pub mod transition;
pub mod wallet;

pub use config::{EngineConfig, IdentityConfig, TransitionConfig, VerifierConfig};
pub use error::{TesseraError, TesseraResult};
pub use proof_service::{ProofContext, ProofService, ZeroKnowledgeProofRequest};
pub use store::{
    AuthCredential, CredentialStorage, IdentityRecord, IdentityStorage, InMemoryCredentialStorage,
    InMemoryIdentityStorage, Profile, WalletStorage,
};
pub use transition::{
    submit_with_retry, PublishedState, RetryPolicy, StateTransitioner, TransitionContext,
    TransitionPlan,
};
pub use wallet::{CredentialRequest, IdentityWallet, GENESIS_AUTH_NONCE};
