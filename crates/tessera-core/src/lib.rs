//! Shared primitives for the Tessera identity engine: BN254 field elements,
//! Poseidon and keccak hashing, BabyJubJub keys, identifiers and DIDs, and
//! the small set of enums every other crate speaks.

pub mod babyjub;
pub mod crypto;
pub mod error;
pub mod field;
pub mod id;
pub mod traits;
pub mod types;

pub use babyjub::{BjjPoint, BjjPrivateKey, BjjPublicKey, BjjSignature};
pub use crypto::*;
pub use error::*;
pub use field::Fr;
pub use id::{Blockchain, Did, DidMethod, DidType, Id, Network};
pub use traits::*;
pub use types::*;
