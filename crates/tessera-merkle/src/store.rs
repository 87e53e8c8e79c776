use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tessera_core::field::serde_decimal;
use tessera_core::{poseidon_hash, Fr};

use crate::error::{MerkleError, MerkleResult};
use crate::proof::Proof;
use crate::smt::SparseMerkleTree;
use crate::storage::{InMemoryNodeStore, NodeStorage};
use crate::IDENTITY_TREE_DEPTH;

// ---------------------------------------------------------------------------
// TreeKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    Claims,
    Revocations,
    Roots,
}

impl TreeKind {
    pub const ALL: [TreeKind; 3] = [TreeKind::Claims, TreeKind::Revocations, TreeKind::Roots];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Claims => "claims",
            TreeKind::Revocations => "revocations",
            TreeKind::Roots => "roots",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn tree_id(identifier: &str, kind: TreeKind) -> String {
    format!("{}:{}", identifier, kind.as_str())
}

// ---------------------------------------------------------------------------
// TreeState -- snapshot of the three roots and the state they hash to
// ---------------------------------------------------------------------------

/// Immutable identity state snapshot. Construction always goes through
/// [`TreeState::new`] or validated deserialization, so `state` is
/// `Poseidon(claims_root, revocation_root, root_of_roots)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TreeStateJson", into = "TreeStateJson")]
pub struct TreeState {
    state: Fr,
    claims_root: Fr,
    revocation_root: Fr,
    root_of_roots: Fr,
}

impl TreeState {
    pub fn new(claims_root: Fr, revocation_root: Fr, root_of_roots: Fr) -> MerkleResult<Self> {
        let state = poseidon_hash(&[claims_root, revocation_root, root_of_roots])?;
        Ok(Self {
            state,
            claims_root,
            revocation_root,
            root_of_roots,
        })
    }

    pub fn state(&self) -> Fr {
        self.state
    }

    pub fn claims_root(&self) -> Fr {
        self.claims_root
    }

    pub fn revocation_root(&self) -> Fr {
        self.revocation_root
    }

    pub fn root_of_roots(&self) -> Fr {
        self.root_of_roots
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeStateJson {
    #[serde(with = "serde_decimal")]
    state: Fr,
    #[serde(with = "serde_decimal")]
    claims_tree_root: Fr,
    #[serde(with = "serde_decimal")]
    revocation_tree_root: Fr,
    #[serde(with = "serde_decimal")]
    root_of_roots: Fr,
}

impl TryFrom<TreeStateJson> for TreeState {
    type Error = MerkleError;

    fn try_from(json: TreeStateJson) -> MerkleResult<Self> {
        let ts = TreeState::new(
            json.claims_tree_root,
            json.revocation_tree_root,
            json.root_of_roots,
        )?;
        if ts.state != json.state {
            return Err(MerkleError::InvalidState(
                "state does not hash the given roots".into(),
            ));
        }
        Ok(ts)
    }
}

impl From<TreeState> for TreeStateJson {
    fn from(ts: TreeState) -> Self {
        Self {
            state: ts.state,
            claims_tree_root: ts.claims_root,
            revocation_tree_root: ts.revocation_root,
            root_of_roots: ts.root_of_roots,
        }
    }
}

// ---------------------------------------------------------------------------
// MerkleIdentityStore -- Claims / Revocations / Roots trees per identifier
// ---------------------------------------------------------------------------

pub struct MerkleIdentityStore {
    storage: Arc<dyn NodeStorage>,
    max_levels: usize,
}

impl MerkleIdentityStore {
    pub fn new(storage: Arc<dyn NodeStorage>) -> Self {
        Self::with_depth(storage, IDENTITY_TREE_DEPTH)
    }

    pub fn with_depth(storage: Arc<dyn NodeStorage>, max_levels: usize) -> Self {
        Self {
            storage,
            max_levels,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryNodeStore::new()))
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    fn tree(&self, identifier: &str, kind: TreeKind) -> MerkleResult<SparseMerkleTree> {
        SparseMerkleTree::open(
            self.storage.clone(),
            tree_id(identifier, kind),
            self.max_levels,
        )
        .map_err(|e| match e {
            MerkleError::TreeNotFound(_) => MerkleError::TreeNotFound(identifier.to_string()),
            other => other,
        })
    }

    pub fn has_trees(&self, identifier: &str) -> MerkleResult<bool> {
        Ok(self
            .storage
            .get_root(&tree_id(identifier, TreeKind::Claims))?
            .is_some())
    }

    /// Create the three empty trees for `identifier`.
    pub fn create_identity_trees(&self, identifier: &str) -> MerkleResult<()> {
        if self.has_trees(identifier)? {
            return Err(MerkleError::TreesAlreadyExist(identifier.to_string()));
        }
        for kind in TreeKind::ALL {
            SparseMerkleTree::create(
                self.storage.clone(),
                tree_id(identifier, kind),
                self.max_levels,
            )?;
        }
        tracing::debug!(identifier, "created identity trees");
        Ok(())
    }

    /// Re-key trees created under a temporary alias to their final identifier.
    pub fn bind_identifier(&self, old: &str, new: &str) -> MerkleResult<()> {
        if !self.has_trees(old)? {
            return Err(MerkleError::TreeNotFound(old.to_string()));
        }
        if self.has_trees(new)? {
            return Err(MerkleError::TreesAlreadyExist(new.to_string()));
        }
        for kind in TreeKind::ALL {
            self.storage
                .rename_tree(&tree_id(old, kind), &tree_id(new, kind))?;
        }
        tracing::debug!(old, new, "bound identity trees");
        Ok(())
    }

    pub fn add_entry(
        &self,
        identifier: &str,
        kind: TreeKind,
        key: &Fr,
        value: &Fr,
    ) -> MerkleResult<Fr> {
        let root = self.tree(identifier, kind)?.add(key, value)?;
        tracing::debug!(identifier, tree = %kind, "added tree entry");
        Ok(root)
    }

    pub fn root(&self, identifier: &str, kind: TreeKind) -> MerkleResult<Fr> {
        self.tree(identifier, kind)?.root()
    }

    /// Proof for `key` against `root`, or the current root when `None`.
    /// `root` may be any root the tree has ever had.
    pub fn generate_proof(
        &self,
        identifier: &str,
        kind: TreeKind,
        key: &Fr,
        root: Option<&Fr>,
    ) -> MerkleResult<Proof> {
        let tree = self.tree(identifier, kind)?;
        if let Some(r) = root {
            if !tree.knows_root(r)? {
                return Err(MerkleError::ProofGenerationFailed(format!(
                    "root {} unknown to {} tree of {}",
                    tessera_core::field::fr_to_decimal(r),
                    kind,
                    identifier
                )));
            }
        }
        let (proof, _) = tree
            .generate_proof(key, root)
            .map_err(|e| MerkleError::ProofGenerationFailed(e.to_string()))?;
        Ok(proof)
    }

    /// Current aggregate state, recomputed from the three roots.
    pub fn tree_state(&self, identifier: &str) -> MerkleResult<TreeState> {
        TreeState::new(
            self.root(identifier, TreeKind::Claims)?,
            self.root(identifier, TreeKind::Revocations)?,
            self.root(identifier, TreeKind::Roots)?,
        )
    }

    /// Add the current claims root to the Roots tree unless already there.
    /// Returns `true` when a new entry was written.
    pub fn publish_claims_root(&self, identifier: &str) -> MerkleResult<bool> {
        let claims_root = self.root(identifier, TreeKind::Claims)?;
        let roots = self.tree(identifier, TreeKind::Roots)?;
        if roots.get(&claims_root)?.is_some() {
            return Ok(false);
        }
        roots.add(&claims_root, &Fr::from(0u64))?;
        Ok(true)
    }
}
