//! Tessera Merkle identity store.
//!
//! iden3-compatible sparse Merkle trees over content-addressed node storage,
//! plus the per-identity Claims / Revocations / Roots trees whose roots make
//! up an identity's [`TreeState`].

pub mod error;
pub mod node;
pub mod proof;
pub mod smt;
pub mod storage;
pub mod store;

pub use error::{MerkleError, MerkleResult};
pub use node::Node;
pub use proof::{root_from_proof, verify_proof, AuxSignals, NodeAux, Proof};
pub use smt::SparseMerkleTree;
pub use storage::{InMemoryNodeStore, NodeStorage};
pub use store::{MerkleIdentityStore, TreeKind, TreeState};

/// Max depth of identity trees (Claims, Revocations, Roots).
pub const IDENTITY_TREE_DEPTH: usize = 40;
/// Max depth of the tree a merklized credential commits to.
pub const CREDENTIAL_TREE_DEPTH: usize = 32;
/// Max depth of the global identity state tree.
pub const GIST_DEPTH: usize = 64;
