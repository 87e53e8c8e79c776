//! Wallet records and the storage traits that hold them.
//!
//! Trees live in [`MerkleIdentityStore`]; identities, profiles, auth keys
//! and credentials live behind [`IdentityStorage`] and [`CredentialStorage`],
//! each with an in-memory backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_claim::{CoreClaim, W3CCredential};
use tessera_core::field::serde_decimal;
use tessera_core::{BjjPrivateKey, Did, Fr, Id};
use tessera_merkle::{InMemoryNodeStore, MerkleIdentityStore, TreeState};

use crate::error::{TesseraError, TesseraResult};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An identity the wallet controls.
///
/// `tree_state` holds the roots behind `current_state`, the last state the
/// ledger knows about (or the genesis state). The trees may already be ahead
/// of it; only a state transition moves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub did: Did,
    #[serde(with = "serde_decimal")]
    pub genesis_state: Fr,
    #[serde(with = "serde_decimal")]
    pub current_state: Fr,
    pub tree_state: TreeState,
    pub is_genesis: bool,
    pub is_published: bool,
}

impl IdentityRecord {
    /// Identities created from an Ethereum account publish without a
    /// state-transition proof.
    pub fn is_ethereum_controlled(&self) -> bool {
        self.did.id.eth_address().is_some()
    }
}

/// A profile derived from a genesis identity for one verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub did: Did,
    #[serde(with = "serde_decimal")]
    pub nonce: Fr,
    pub genesis_identifier: Did,
    pub verifier: String,
}

/// A BabyJubJub auth key and the auth claim committing it.
#[derive(Debug, Clone)]
pub struct AuthCredential {
    pub id: String,
    pub did: Did,
    pub claim: CoreClaim,
    pub key: BjjPrivateKey,
}

impl AuthCredential {
    pub fn revocation_nonce(&self) -> u64 {
        self.claim.revocation_nonce()
    }
}

// ---------------------------------------------------------------------------
// IdentityStorage
// ---------------------------------------------------------------------------

pub trait IdentityStorage: Send + Sync {
    /// Insert or replace the record for `record.did`.
    fn save_identity(&self, record: &IdentityRecord) -> TesseraResult<()>;
    fn get_identity(&self, did: &Did) -> TesseraResult<Option<IdentityRecord>>;

    fn save_profile(&self, profile: &Profile) -> TesseraResult<()>;
    fn get_profile(&self, did: &Did) -> TesseraResult<Option<Profile>>;
    fn profiles_of(&self, genesis: &Did) -> TesseraResult<Vec<Profile>>;

    /// Auth credentials of `did`, in the order they were added.
    fn save_auth_credential(&self, credential: &AuthCredential) -> TesseraResult<()>;
    fn auth_credentials(&self, did: &Did) -> TesseraResult<Vec<AuthCredential>>;
}

#[derive(Default)]
struct Identities {
    records: HashMap<Id, IdentityRecord>,
    profiles: HashMap<Id, Profile>,
    auth: HashMap<Id, Vec<AuthCredential>>,
}

#[derive(Default)]
pub struct InMemoryIdentityStorage {
    inner: RwLock<Identities>,
}

fn read<T>(lock: &RwLock<T>) -> TesseraResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|e| TesseraError::Storage(format!("lock poisoned: {}", e)))
}

fn write<T>(lock: &RwLock<T>) -> TesseraResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|e| TesseraError::Storage(format!("lock poisoned: {}", e)))
}

impl InMemoryIdentityStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStorage for InMemoryIdentityStorage {
    fn save_identity(&self, record: &IdentityRecord) -> TesseraResult<()> {
        write(&self.inner)?
            .records
            .insert(record.did.id, record.clone());
        Ok(())
    }

    fn get_identity(&self, did: &Did) -> TesseraResult<Option<IdentityRecord>> {
        Ok(read(&self.inner)?.records.get(&did.id).cloned())
    }

    fn save_profile(&self, profile: &Profile) -> TesseraResult<()> {
        write(&self.inner)?
            .profiles
            .insert(profile.did.id, profile.clone());
        Ok(())
    }

    fn get_profile(&self, did: &Did) -> TesseraResult<Option<Profile>> {
        Ok(read(&self.inner)?.profiles.get(&did.id).cloned())
    }

    fn profiles_of(&self, genesis: &Did) -> TesseraResult<Vec<Profile>> {
        Ok(read(&self.inner)?
            .profiles
            .values()
            .filter(|p| p.genesis_identifier.id == genesis.id)
            .cloned()
            .collect())
    }

    fn save_auth_credential(&self, credential: &AuthCredential) -> TesseraResult<()> {
        let mut inner = write(&self.inner)?;
        let list = inner.auth.entry(credential.did.id).or_default();
        match list.iter_mut().find(|c| c.id == credential.id) {
            Some(existing) => *existing = credential.clone(),
            None => list.push(credential.clone()),
        }
        Ok(())
    }

    fn auth_credentials(&self, did: &Did) -> TesseraResult<Vec<AuthCredential>> {
        Ok(read(&self.inner)?
            .auth
            .get(&did.id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// CredentialStorage
// ---------------------------------------------------------------------------

pub trait CredentialStorage: Send + Sync {
    /// Insert or replace by credential id.
    fn save_credential(&self, credential: &W3CCredential) -> TesseraResult<()>;
    fn get_credential(&self, id: &str) -> TesseraResult<Option<W3CCredential>>;
    /// All credentials, in insertion order.
    fn list_credentials(&self) -> TesseraResult<Vec<W3CCredential>>;
    fn remove_credential(&self, id: &str) -> TesseraResult<bool>;
}

#[derive(Default)]
pub struct InMemoryCredentialStorage {
    inner: RwLock<Vec<W3CCredential>>,
}

impl InMemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for InMemoryCredentialStorage {
    fn save_credential(&self, credential: &W3CCredential) -> TesseraResult<()> {
        let mut inner = write(&self.inner)?;
        match inner.iter_mut().find(|c| c.id == credential.id) {
            Some(existing) => *existing = credential.clone(),
            None => inner.push(credential.clone()),
        }
        Ok(())
    }

    fn get_credential(&self, id: &str) -> TesseraResult<Option<W3CCredential>> {
        Ok(read(&self.inner)?.iter().find(|c| c.id == id).cloned())
    }

    fn list_credentials(&self) -> TesseraResult<Vec<W3CCredential>> {
        Ok(read(&self.inner)?.clone())
    }

    fn remove_credential(&self, id: &str) -> TesseraResult<bool> {
        let mut inner = write(&self.inner)?;
        let before = inner.len();
        inner.retain(|c| c.id != id);
        Ok(inner.len() != before)
    }
}

// ---------------------------------------------------------------------------
// WalletStorage
// ---------------------------------------------------------------------------

/// The three stores a wallet works against.
#[derive(Clone)]
pub struct WalletStorage {
    pub trees: Arc<MerkleIdentityStore>,
    pub identities: Arc<dyn IdentityStorage>,
    pub credentials: Arc<dyn CredentialStorage>,
}

impl WalletStorage {
    pub fn in_memory(tree_depth: usize) -> Self {
        Self {
            trees: Arc::new(MerkleIdentityStore::with_depth(
                Arc::new(InMemoryNodeStore::new()),
                tree_depth,
            )),
            identities: Arc::new(InMemoryIdentityStorage::new()),
            credentials: Arc::new(InMemoryCredentialStorage::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::{Blockchain, DidMethod, DidType, Network};

    fn _assert_identity_storage_object_safe(_: &dyn IdentityStorage) {}
    fn _assert_credential_storage_object_safe(_: &dyn CredentialStorage) {}

    fn did(seed: u64) -> Did {
        let t = DidType::new(DidMethod::Iden3, Blockchain::Polygon, Network::Amoy).unwrap();
        Did::genesis_from_state(t, &Fr::from(seed)).unwrap()
    }

    fn credential(id: &str, val: i64) -> W3CCredential {
        serde_json::from_value(json!({
            "id": id,
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "type": ["VerifiableCredential", "EmployeeCredential"],
            "credentialSubject": {"val": val},
            "credentialStatus": {
                "id": "urn:status:1",
                "type": "SparseMerkleTreeProof",
                "revocationNonce": 1
            },
            "issuer": did(1).to_string(),
            "credentialSchema": {"id": "https://example.com/schema.json", "type": "JsonSchema2023"}
        }))
        .unwrap()
    }

    #[test]
    fn test_identity_roundtrip() {
        let storage = InMemoryIdentityStorage::new();
        let d = did(7);
        let ts = TreeState::new(Fr::from(1u64), Fr::from(0u64), Fr::from(0u64)).unwrap();
        let mut record = IdentityRecord {
            did: d,
            genesis_state: ts.state(),
            current_state: ts.state(),
            tree_state: ts,
            is_genesis: true,
            is_published: false,
        };
        storage.save_identity(&record).unwrap();
        assert_eq!(storage.get_identity(&d).unwrap(), Some(record.clone()));

        record.is_published = true;
        storage.save_identity(&record).unwrap();
        assert!(storage.get_identity(&d).unwrap().unwrap().is_published);
        assert!(storage.get_identity(&did(8)).unwrap().is_none());
        assert!(!record.is_ethereum_controlled());
    }

    #[test]
    fn test_identity_record_serializes_states_as_decimal() {
        let d = did(7);
        let ts = TreeState::new(Fr::from(0u64), Fr::from(0u64), Fr::from(0u64)).unwrap();
        let record = IdentityRecord {
            did: d,
            genesis_state: Fr::from(5u64),
            current_state: Fr::from(5u64),
            tree_state: ts,
            is_genesis: true,
            is_published: false,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["genesisState"], json!("5"));
        assert_eq!(value["isGenesis"], json!(true));
        let back: IdentityRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_profiles_by_genesis() {
        let storage = InMemoryIdentityStorage::new();
        let genesis = did(1);
        for n in 1..=2u64 {
            storage
                .save_profile(&Profile {
                    did: genesis.profile(&Fr::from(n)).unwrap(),
                    nonce: Fr::from(n),
                    genesis_identifier: genesis,
                    verifier: format!("verifier-{}", n),
                })
                .unwrap();
        }
        assert_eq!(storage.profiles_of(&genesis).unwrap().len(), 2);
        assert!(storage.profiles_of(&did(2)).unwrap().is_empty());
    }

    #[test]
    fn test_auth_credentials_keep_order() {
        let storage = InMemoryIdentityStorage::new();
        let d = did(3);
        for (i, seed) in [b"first".as_slice(), b"second".as_slice()].iter().enumerate() {
            let key = BjjPrivateKey::from_seed(seed);
            let claim = tessera_claim::auth_claim(&key.public_key(), i as u64).unwrap();
            storage
                .save_auth_credential(&AuthCredential {
                    id: format!("urn:auth:{}", i),
                    did: d,
                    claim,
                    key,
                })
                .unwrap();
        }
        let list = storage.auth_credentials(&d).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "urn:auth:0");
        assert_eq!(list[1].revocation_nonce(), 1);
    }

    #[test]
    fn test_credential_upsert_and_remove() {
        let storage = InMemoryCredentialStorage::new();
        storage.save_credential(&credential("urn:1", 10)).unwrap();
        storage.save_credential(&credential("urn:2", 20)).unwrap();
        storage.save_credential(&credential("urn:1", 11)).unwrap();

        let all = storage.list_credentials().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].credential_subject["val"], json!(11));

        assert!(storage.remove_credential("urn:2").unwrap());
        assert!(!storage.remove_credential("urn:2").unwrap());
        assert!(storage.get_credential("urn:2").unwrap().is_none());
    }
}
