//! Credentials and the core claims they bind to.
//!
//! A [`W3CCredential`] is issued over an iden3 [`CoreClaim`]: a fixed
//! eight-slot record whose data slots either carry selected subject fields
//! directly or the root of the merklized credential.

pub mod claim;
pub mod codec;
pub mod context;
pub mod credential;
pub mod error;
pub mod merklize;

pub use claim::{CoreClaim, MerklizedRootPosition, SubjectPosition};
pub use codec::{
    auth_claim, auth_public_key, core_claim_for_type, to_core_claim, verify_core_claim_match,
    verify_signature_proof, CoreClaimOptions, AUTH_BJJ_SCHEMA_HASH,
};
pub use context::{
    resolve_type, ContextLoader, Datatype, FieldDefinition, InMemoryContextLoader, SchemaContext,
    SerializationSpec, TypeDefinition,
};
pub use credential::{
    BjjSignatureProof, CredentialProof, CredentialSchema, CredentialStatus, CredentialStatusType,
    Iden3SparseMerkleTreeProof, IssuerData, IssuerState, W3CCredential,
};
pub use error::{ClaimError, ClaimResult};
pub use merklize::{hash_value, Merklizer, Path, PathPart};
