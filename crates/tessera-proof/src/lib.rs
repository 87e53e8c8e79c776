//! Zero-knowledge proof plumbing for the Tessera identity engine.
//!
//! Two directions meet here. Holders turn a prepared credential and a query
//! into the named input map of a circuit ([`generate_inputs`]) and hand it to
//! a [`Prover`]. Verifiers take the ordered public signals of a proof, parse
//! them along the circuit's layout ([`PubSignals`]) and check them against
//! the request they issued and the ledger ([`Verifier`]).

pub mod circuit_query;
pub mod error;
pub mod inputs;
pub mod signals;
#[cfg(any(test, feature = "testutils"))]
pub mod testing;
pub mod traits;
pub mod types;
pub mod verifier;

pub use circuit_query::{
    linked_query_hash, query_hash_v2, query_hash_v3, CircuitQuery, QueryHashInput, ValueProof,
};
pub use error::{ProofError, ProofResult};
pub use inputs::{
    generate_inputs, AuthProofData, AuthRequest, CircuitRequest, IdentityNonces,
    InclusionProofData, LinkedRequest, NonRevocationProof, PreparedCredential, ProofBranch,
    QueryRequest, SignatureProofData, StateTransitionRequest, UserAuth,
};
pub use signals::{layout, signal_count, NamedSignals, PubSignals, LINKED_QUERY_COUNT};
pub use traits::{KeyLoader, Prover, RevocationStatusResolver, StateOracle};
pub use types::{
    CircuitInputs, GistProof, GistRootInfo, Groth16Proof, PresentedCredential, RevocationStatus,
    StateInfo, StateTransitionInfo, VerifiablePresentation, ZkProof, ZkProofResponse,
    ETH_STATE_TRANSITION_METHOD_ID,
};
pub use verifier::{
    check_group_links, StateCheck, StateRole, StateTrust, VerificationOutcome, VerifyContext,
    VerifyOptions, Verifier,
};
