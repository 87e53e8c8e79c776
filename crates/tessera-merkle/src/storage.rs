use ark_ff::Zero;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tessera_core::Fr;

use crate::error::{MerkleError, MerkleResult};
use crate::node::Node;

// ---------------------------------------------------------------------------
// NodeStorage -- content-addressed node store plus named roots
//
// Nodes are keyed by their hash and never deleted, so every root that was
// ever current stays walkable. Roots are keyed by tree id, and each tree keeps
// the set of roots it has had.
// ---------------------------------------------------------------------------

pub trait NodeStorage: Send + Sync {
    fn get_node(&self, hash: &Fr) -> MerkleResult<Option<Node>>;
    /// Store a node and return its hash.
    fn put_node(&self, node: Node) -> MerkleResult<Fr>;

    fn get_root(&self, tree_id: &str) -> MerkleResult<Option<Fr>>;
    /// Make `root` current for `tree_id` and record it in the tree's history.
    fn set_root(&self, tree_id: &str, root: Fr) -> MerkleResult<()>;
    /// `true` when `root` is or was the root of `tree_id`.
    fn has_root(&self, tree_id: &str, root: &Fr) -> MerkleResult<bool>;
    /// Move the current root and root history of `old` to `new`.
    fn rename_tree(&self, old: &str, new: &str) -> MerkleResult<bool>;
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<Fr, Node>,
    roots: HashMap<String, Fr>,
    history: HashMap<String, HashSet<Fr>>,
}

/// In-memory node storage.
#[derive(Default)]
pub struct InMemoryNodeStore {
    inner: Mutex<Inner>,
}

fn lock_inner(mutex: &Mutex<Inner>) -> MerkleResult<MutexGuard<'_, Inner>> {
    mutex
        .lock()
        .map_err(|e| MerkleError::Storage(format!("lock poisoned: {}", e)))
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes (for testing/inspection).
    pub fn node_count(&self) -> usize {
        lock_inner(&self.inner).map(|i| i.nodes.len()).unwrap_or(0)
    }
}

impl NodeStorage for InMemoryNodeStore {
    fn get_node(&self, hash: &Fr) -> MerkleResult<Option<Node>> {
        if hash.is_zero() {
            return Ok(Some(Node::Empty));
        }
        let inner = lock_inner(&self.inner)?;
        Ok(inner.nodes.get(hash).copied())
    }

    fn put_node(&self, node: Node) -> MerkleResult<Fr> {
        let hash = node.hash()?;
        if node == Node::Empty {
            return Ok(hash);
        }
        let mut inner = lock_inner(&self.inner)?;
        inner.nodes.entry(hash).or_insert(node);
        Ok(hash)
    }

    fn get_root(&self, tree_id: &str) -> MerkleResult<Option<Fr>> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner.roots.get(tree_id).copied())
    }

    fn set_root(&self, tree_id: &str, root: Fr) -> MerkleResult<()> {
        let mut inner = lock_inner(&self.inner)?;
        inner.roots.insert(tree_id.to_string(), root);
        inner
            .history
            .entry(tree_id.to_string())
            .or_default()
            .insert(root);
        Ok(())
    }

    fn has_root(&self, tree_id: &str, root: &Fr) -> MerkleResult<bool> {
        let inner = lock_inner(&self.inner)?;
        Ok(inner
            .history
            .get(tree_id)
            .map(|roots| roots.contains(root))
            .unwrap_or(false))
    }

    fn rename_tree(&self, old: &str, new: &str) -> MerkleResult<bool> {
        let mut inner = lock_inner(&self.inner)?;
        let Some(root) = inner.roots.remove(old) else {
            return Ok(false);
        };
        let history = inner.history.remove(old).unwrap_or_default();
        inner.roots.insert(new.to_string(), root);
        inner.history.insert(new.to_string(), history);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn NodeStorage) {}

    #[test]
    fn test_put_get_node() {
        let store = InMemoryNodeStore::new();
        let leaf = Node::Leaf {
            key: Fr::from(3u64),
            value: Fr::from(4u64),
        };
        let hash = store.put_node(leaf).unwrap();
        assert_eq!(store.get_node(&hash).unwrap(), Some(leaf));
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn test_zero_hash_is_empty_node() {
        let store = InMemoryNodeStore::new();
        assert_eq!(store.get_node(&Fr::zero()).unwrap(), Some(Node::Empty));
        store.put_node(Node::Empty).unwrap();
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn test_unknown_node() {
        let store = InMemoryNodeStore::new();
        assert_eq!(store.get_node(&Fr::from(99u64)).unwrap(), None);
    }

    #[test]
    fn test_roots() {
        let store = InMemoryNodeStore::new();
        assert_eq!(store.get_root("a").unwrap(), None);
        store.set_root("a", Fr::from(1u64)).unwrap();
        store.set_root("a", Fr::from(2u64)).unwrap();
        assert_eq!(store.get_root("a").unwrap(), Some(Fr::from(2u64)));
        assert!(store.has_root("a", &Fr::from(1u64)).unwrap());
        assert!(!store.has_root("b", &Fr::from(1u64)).unwrap());
    }

    #[test]
    fn test_rename_moves_history() {
        let store = InMemoryNodeStore::new();
        store.set_root("tmp", Fr::from(1u64)).unwrap();
        store.set_root("tmp", Fr::from(2u64)).unwrap();
        assert!(store.rename_tree("tmp", "final").unwrap());
        assert!(!store.rename_tree("tmp", "final").unwrap());

        assert_eq!(store.get_root("tmp").unwrap(), None);
        assert!(!store.has_root("tmp", &Fr::from(1u64)).unwrap());
        assert_eq!(store.get_root("final").unwrap(), Some(Fr::from(2u64)));
        assert!(store.has_root("final", &Fr::from(1u64)).unwrap());
    }
}
