use ark_ff::Zero;
use serde::{Deserialize, Serialize};
use tessera_core::field::{serde_decimal, serde_decimal_vec};
use tessera_core::{poseidon_hash, Fr};

use crate::error::{MerkleError, MerkleResult};
use crate::node::{leaf_hash, path_bit};

/// The leaf met on the path of a key that is absent from the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAux {
    #[serde(with = "serde_decimal")]
    pub key: Fr,
    #[serde(with = "serde_decimal")]
    pub value: Fr,
}

/// Inclusion or exclusion proof. `siblings[i]` is the sibling at depth `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub existence: bool,
    #[serde(with = "serde_decimal_vec")]
    pub siblings: Vec<Fr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_aux: Option<NodeAux>,
}

/// `auxHi`, `auxHv`, `noAux` as the circuits take them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxSignals {
    pub key: Fr,
    pub value: Fr,
    pub no_aux: Fr,
}

impl Proof {
    /// Proof against an empty tree.
    pub fn empty() -> Self {
        Self {
            existence: false,
            siblings: Vec::new(),
            node_aux: None,
        }
    }

    /// Siblings right-padded with zeros to the circuit depth.
    pub fn circuit_siblings(&self, depth: usize) -> MerkleResult<Vec<Fr>> {
        if self.siblings.len() > depth {
            return Err(MerkleError::InvalidProof(format!(
                "{} siblings exceed circuit depth {}",
                self.siblings.len(),
                depth
            )));
        }
        let mut out = self.siblings.clone();
        out.resize(depth, Fr::zero());
        Ok(out)
    }

    pub fn aux_signals(&self) -> AuxSignals {
        match (self.existence, self.node_aux) {
            (true, _) => AuxSignals {
                key: Fr::zero(),
                value: Fr::zero(),
                no_aux: Fr::zero(),
            },
            (false, Some(aux)) => AuxSignals {
                key: aux.key,
                value: aux.value,
                no_aux: Fr::zero(),
            },
            (false, None) => AuxSignals {
                key: Fr::zero(),
                value: Fr::zero(),
                no_aux: Fr::from(1u64),
            },
        }
    }

    /// Rebuild a proof from its circuit encoding. Trailing zero siblings are
    /// padding: the last real sibling of a compressed tree is never empty.
    pub fn from_circuit(siblings: &[Fr], aux: &AuxSignals, existence: bool) -> Self {
        let real = siblings
            .iter()
            .rposition(|s| !s.is_zero())
            .map(|i| i + 1)
            .unwrap_or(0);
        let node_aux = if existence || !aux.no_aux.is_zero() {
            None
        } else {
            Some(NodeAux {
                key: aux.key,
                value: aux.value,
            })
        };
        Self {
            existence,
            siblings: siblings[..real].to_vec(),
            node_aux,
        }
    }
}

/// Recompute the root a proof commits to for `(key, value)`.
///
/// For an exclusion proof `value` is ignored; the starting node is the aux
/// leaf, or empty when there is none.
pub fn root_from_proof(proof: &Proof, key: &Fr, value: &Fr) -> MerkleResult<Fr> {
    let mut node = if proof.existence {
        leaf_hash(key, value)?
    } else {
        match proof.node_aux {
            Some(aux) if aux.key == *key => {
                return Err(MerkleError::InvalidProof(
                    "exclusion proof aux leaf has the queried key".into(),
                ))
            }
            Some(aux) => leaf_hash(&aux.key, &aux.value)?,
            None => Fr::zero(),
        }
    };

    for (level, sibling) in proof.siblings.iter().enumerate().rev() {
        node = if path_bit(key, level) {
            poseidon_hash(&[*sibling, node])?
        } else {
            poseidon_hash(&[node, *sibling])?
        };
    }
    Ok(node)
}

pub fn verify_proof(root: &Fr, proof: &Proof, key: &Fr, value: &Fr) -> MerkleResult<bool> {
    Ok(root_from_proof(proof, key, value)? == *root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree_exclusion() {
        let proof = Proof::empty();
        assert!(verify_proof(&Fr::zero(), &proof, &Fr::from(5u64), &Fr::zero()).unwrap());
        assert_eq!(proof.aux_signals().no_aux, Fr::from(1u64));
    }

    #[test]
    fn test_single_leaf_inclusion() {
        let key = Fr::from(5u64);
        let value = Fr::from(6u64);
        let root = leaf_hash(&key, &value).unwrap();
        let proof = Proof {
            existence: true,
            siblings: vec![],
            node_aux: None,
        };
        assert!(verify_proof(&root, &proof, &key, &value).unwrap());
        assert!(!verify_proof(&root, &proof, &key, &Fr::from(7u64)).unwrap());
    }

    #[test]
    fn test_aux_with_same_key_rejected() {
        let key = Fr::from(5u64);
        let proof = Proof {
            existence: false,
            siblings: vec![],
            node_aux: Some(NodeAux {
                key,
                value: Fr::from(1u64),
            }),
        };
        assert!(matches!(
            root_from_proof(&proof, &key, &Fr::zero()),
            Err(MerkleError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_circuit_siblings_padding() {
        let proof = Proof {
            existence: true,
            siblings: vec![Fr::from(1u64), Fr::from(2u64)],
            node_aux: None,
        };
        let padded = proof.circuit_siblings(4).unwrap();
        assert_eq!(padded.len(), 4);
        assert_eq!(padded[3], Fr::zero());
        assert!(proof.circuit_siblings(1).is_err());
    }

    #[test]
    fn test_aux_signals_for_aux_leaf() {
        let proof = Proof {
            existence: false,
            siblings: vec![],
            node_aux: Some(NodeAux {
                key: Fr::from(2u64),
                value: Fr::from(3u64),
            }),
        };
        let aux = proof.aux_signals();
        assert_eq!(aux.key, Fr::from(2u64));
        assert_eq!(aux.value, Fr::from(3u64));
        assert_eq!(aux.no_aux, Fr::zero());
    }

    #[test]
    fn test_proof_json_shape() {
        let proof = Proof {
            existence: false,
            siblings: vec![Fr::from(0u64), Fr::from(9u64)],
            node_aux: Some(NodeAux {
                key: Fr::from(2u64),
                value: Fr::from(3u64),
            }),
        };
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["siblings"][1], "9");
        assert_eq!(json["node_aux"]["key"], "2");
        let back: Proof = serde_json::from_value(json).unwrap();
        assert_eq!(back, proof);
    }

    #[test]
    fn test_from_circuit_trims_padding() {
        let proof = Proof {
            existence: false,
            siblings: vec![Fr::from(0u64), Fr::from(9u64)],
            node_aux: Some(NodeAux {
                key: Fr::from(2u64),
                value: Fr::from(3u64),
            }),
        };
        let padded = proof.circuit_siblings(40).unwrap();
        let back = Proof::from_circuit(&padded, &proof.aux_signals(), false);
        assert_eq!(back, proof);

        let empty = Proof::from_circuit(&[Fr::zero(); 8], &Proof::empty().aux_signals(), false);
        assert_eq!(empty, Proof::empty());
    }
}
