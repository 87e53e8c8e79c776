use ark_ff::Zero;
use std::sync::Arc;
use tessera_core::field::fr_to_decimal;
use tessera_core::Fr;

use crate::error::{MerkleError, MerkleResult};
use crate::node::{path_bit, Node};
use crate::proof::{NodeAux, Proof};
use crate::storage::{InMemoryNodeStore, NodeStorage};

/// A sparse Merkle tree identified by `tree_id` inside a shared node store.
pub struct SparseMerkleTree {
    storage: Arc<dyn NodeStorage>,
    tree_id: String,
    max_levels: usize,
}

impl SparseMerkleTree {
    /// Open `tree_id`, creating it with an empty root if it does not exist.
    pub fn create(
        storage: Arc<dyn NodeStorage>,
        tree_id: impl Into<String>,
        max_levels: usize,
    ) -> MerkleResult<Self> {
        let tree_id = tree_id.into();
        if storage.get_root(&tree_id)?.is_none() {
            storage.set_root(&tree_id, Fr::zero())?;
        }
        Ok(Self {
            storage,
            tree_id,
            max_levels,
        })
    }

    /// Open an existing tree.
    pub fn open(
        storage: Arc<dyn NodeStorage>,
        tree_id: impl Into<String>,
        max_levels: usize,
    ) -> MerkleResult<Self> {
        let tree_id = tree_id.into();
        if storage.get_root(&tree_id)?.is_none() {
            return Err(MerkleError::TreeNotFound(tree_id));
        }
        Ok(Self {
            storage,
            tree_id,
            max_levels,
        })
    }

    /// A standalone tree backed by its own in-memory store.
    pub fn in_memory(max_levels: usize) -> MerkleResult<Self> {
        Self::create(Arc::new(InMemoryNodeStore::new()), "tree", max_levels)
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    pub fn root(&self) -> MerkleResult<Fr> {
        self.storage
            .get_root(&self.tree_id)?
            .ok_or_else(|| MerkleError::TreeNotFound(self.tree_id.clone()))
    }

    fn node(&self, hash: &Fr) -> MerkleResult<Node> {
        self.storage
            .get_node(hash)?
            .ok_or_else(|| MerkleError::NodeNotFound(fr_to_decimal(hash)))
    }

    /// Insert a new leaf and return the new root.
    pub fn add(&self, key: &Fr, value: &Fr) -> MerkleResult<Fr> {
        let root = self.root()?;
        let leaf = Node::Leaf {
            key: *key,
            value: *value,
        };
        let new_root = self.add_leaf(leaf, key, &root, 0)?;
        self.storage.set_root(&self.tree_id, new_root)?;
        Ok(new_root)
    }

    fn add_leaf(&self, leaf: Node, key: &Fr, current: &Fr, level: usize) -> MerkleResult<Fr> {
        if level + 1 > self.max_levels {
            return Err(MerkleError::ReachedMaxLevel);
        }
        match self.node(current)? {
            Node::Empty => self.storage.put_node(leaf),
            Node::Leaf {
                key: old_key,
                value: _,
            } => {
                if old_key == *key {
                    return Err(MerkleError::EntryIndexAlreadyExists);
                }
                let new_hash = self.storage.put_node(leaf)?;
                self.push_leaf(key, &new_hash, &old_key, current, level)
            }
            Node::Middle { left, right } => {
                let middle = if path_bit(key, level) {
                    Node::Middle {
                        left,
                        right: self.add_leaf(leaf, key, &right, level + 1)?,
                    }
                } else {
                    Node::Middle {
                        left: self.add_leaf(leaf, key, &left, level + 1)?,
                        right,
                    }
                };
                self.storage.put_node(middle)
            }
        }
    }

    /// Push two leaves down until their paths diverge.
    fn push_leaf(
        &self,
        new_key: &Fr,
        new_hash: &Fr,
        old_key: &Fr,
        old_hash: &Fr,
        level: usize,
    ) -> MerkleResult<Fr> {
        if level + 2 > self.max_levels {
            return Err(MerkleError::ReachedMaxLevel);
        }
        let new_bit = path_bit(new_key, level);
        let old_bit = path_bit(old_key, level);
        let middle = if new_bit == old_bit {
            let child = self.push_leaf(new_key, new_hash, old_key, old_hash, level + 1)?;
            if new_bit {
                Node::Middle {
                    left: Fr::zero(),
                    right: child,
                }
            } else {
                Node::Middle {
                    left: child,
                    right: Fr::zero(),
                }
            }
        } else if new_bit {
            Node::Middle {
                left: *old_hash,
                right: *new_hash,
            }
        } else {
            Node::Middle {
                left: *new_hash,
                right: *old_hash,
            }
        };
        self.storage.put_node(middle)
    }

    /// Value stored under `key` in the current tree.
    pub fn get(&self, key: &Fr) -> MerkleResult<Option<Fr>> {
        let root = self.root()?;
        Ok(self.generate_proof(key, Some(&root))?.1)
    }

    /// Inclusion or exclusion proof for `key` against `root` (the current
    /// root when `None`). Returns the stored value when the key exists.
    pub fn generate_proof(&self, key: &Fr, root: Option<&Fr>) -> MerkleResult<(Proof, Option<Fr>)> {
        let mut current = match root {
            Some(r) => *r,
            None => self.root()?,
        };
        let mut siblings = Vec::new();

        for level in 0..self.max_levels {
            match self.node(&current)? {
                Node::Empty => {
                    return Ok((
                        Proof {
                            existence: false,
                            siblings,
                            node_aux: None,
                        },
                        None,
                    ))
                }
                Node::Leaf {
                    key: leaf_key,
                    value,
                } => {
                    if leaf_key == *key {
                        return Ok((
                            Proof {
                                existence: true,
                                siblings,
                                node_aux: None,
                            },
                            Some(value),
                        ));
                    }
                    return Ok((
                        Proof {
                            existence: false,
                            siblings,
                            node_aux: Some(NodeAux {
                                key: leaf_key,
                                value,
                            }),
                        },
                        None,
                    ));
                }
                Node::Middle { left, right } => {
                    if path_bit(key, level) {
                        siblings.push(left);
                        current = right;
                    } else {
                        siblings.push(right);
                        current = left;
                    }
                }
            }
        }
        Err(MerkleError::ReachedMaxLevel)
    }

    /// `true` when `root` is or was the root of this tree.
    pub fn knows_root(&self, root: &Fr) -> MerkleResult<bool> {
        self.storage.has_root(&self.tree_id, root)
    }
}
