use ark_ff::Zero;
use tessera_core::{poseidon_hash, Fr};

use crate::error::MerkleResult;

/// A sparse Merkle tree node. Nodes are addressed by their own hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Empty,
    Leaf { key: Fr, value: Fr },
    Middle { left: Fr, right: Fr },
}

impl Node {
    pub fn hash(&self) -> MerkleResult<Fr> {
        match self {
            Node::Empty => Ok(Fr::zero()),
            Node::Leaf { key, value } => leaf_hash(key, value),
            Node::Middle { left, right } => Ok(poseidon_hash(&[*left, *right])?),
        }
    }
}

/// `Poseidon(key, value, 1)`.
pub fn leaf_hash(key: &Fr, value: &Fr) -> MerkleResult<Fr> {
    Ok(poseidon_hash(&[*key, *value, Fr::from(1u64)])?)
}

/// Bit `level` of the little-endian encoding of `key`; selects the right child when set.
pub fn path_bit(key: &Fr, level: usize) -> bool {
    let le = tessera_core::field::fr_to_le_bytes(key);
    level < 256 && (le[level / 8] >> (level % 8)) & 1 == 1
}
