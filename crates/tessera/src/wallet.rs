//! Identity wallet.
//!
//! Owns the identities it creates: their Claims / Revocations / Roots trees,
//! their BabyJubJub auth keys and their profiles. Issues credentials with a
//! `BJJSignature2021` proof, adds claims and revocations to the trees, and
//! publishes the resulting state through the [`StateTransitioner`].
//!
//! Every proof the wallet hands out (auth claim inclusion, revocation status,
//! claim MTPs) is taken against the identity's *committed* tree state: the
//! genesis state or the last published one.

use std::sync::Arc;

use ark_ff::Zero;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tessera_claim::credential::{
    JSON_SCHEMA_TYPE, VERIFIABLE_CREDENTIAL_TYPE, W3C_CREDENTIALS_CONTEXT,
};
use tessera_claim::{
    auth_claim, to_core_claim, BjjSignatureProof, ContextLoader, CoreClaim, CoreClaimOptions,
    CredentialProof, CredentialSchema, CredentialStatus, CredentialStatusType,
    Iden3SparseMerkleTreeProof, IssuerData, IssuerState, W3CCredential,
};
use tessera_core::{BjjPrivateKey, Did, DidType, Fr, Id, LedgerSigner, ProofType};
use tessera_merkle::{MerkleError, SparseMerkleTree, TreeKind, TreeState};
use tessera_proof::{
    AuthProofData, ProofError, ProofResult, Prover, RevocationStatus, RevocationStatusResolver,
    StateOracle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{TesseraError, TesseraResult};
use crate::store::{AuthCredential, IdentityRecord, Profile, WalletStorage};
use crate::transition::{PublishedState, StateTransitioner};

/// Revocation nonce of the auth claim a new identity starts with.
pub const GENESIS_AUTH_NONCE: u64 = 0;

/// What an issuer puts into a new credential.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRequest {
    pub schema_url: String,
    pub context_url: String,
    pub credential_type: String,
    /// Subject fields; `id` holds the subject DID.
    pub subject: Map<String, Value>,
    pub expiration: Option<DateTime<Utc>>,
    /// Random when `None`.
    pub revocation_nonce: Option<u64>,
    pub status_type: CredentialStatusType,
    pub id: Option<String>,
}

impl CredentialRequest {
    pub fn new(
        schema_url: impl Into<String>,
        context_url: impl Into<String>,
        credential_type: impl Into<String>,
        subject: Map<String, Value>,
    ) -> Self {
        Self {
            schema_url: schema_url.into(),
            context_url: context_url.into(),
            credential_type: credential_type.into(),
            subject,
            expiration: None,
            revocation_nonce: None,
            status_type: CredentialStatusType::SparseMerkleTreeProof,
            id: None,
        }
    }

    pub fn with_revocation_nonce(mut self, nonce: u64) -> Self {
        self.revocation_nonce = Some(nonce);
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

pub struct IdentityWallet {
    storage: WalletStorage,
    loader: Arc<dyn ContextLoader>,
    oracle: Arc<dyn StateOracle>,
    transitioner: StateTransitioner,
    did_type: DidType,
}

fn credential_status(issuer: &Did, nonce: u64, status_type: CredentialStatusType) -> CredentialStatus {
    CredentialStatus {
        id: format!("{}/credentialStatus?revocationNonce={}", issuer, nonce),
        status_type,
        revocation_nonce: nonce,
    }
}

impl IdentityWallet {
    pub fn new(
        storage: WalletStorage,
        oracle: Arc<dyn StateOracle>,
        prover: Arc<dyn Prover>,
        loader: Arc<dyn ContextLoader>,
        config: &EngineConfig,
    ) -> TesseraResult<Self> {
        config.validate()?;
        let transitioner = StateTransitioner::new(
            storage.trees.clone(),
            oracle.clone(),
            prover,
            config.retry_policy(),
        );
        Ok(Self {
            storage,
            loader,
            oracle,
            transitioner,
            did_type: config.did_type()?,
        })
    }

    pub fn storage(&self) -> &WalletStorage {
        &self.storage
    }

    pub fn loader(&self) -> &Arc<dyn ContextLoader> {
        &self.loader
    }

    pub fn oracle(&self) -> &Arc<dyn StateOracle> {
        &self.oracle
    }

    pub fn did_type(&self) -> DidType {
        self.did_type
    }

    // -- identities -----------------------------------------------------------

    pub fn identity(&self, did: &Did) -> TesseraResult<IdentityRecord> {
        self.storage
            .identities
            .get_identity(did)?
            .ok_or_else(|| TesseraError::NotFound(format!("identity {}", did)))
    }

    /// The genesis identity behind `did` and the profile nonce `did` uses
    /// (zero for the genesis DID itself).
    pub fn resolve_identity(&self, did: &Did) -> TesseraResult<(IdentityRecord, Fr)> {
        if let Some(record) = self.storage.identities.get_identity(did)? {
            return Ok((record, Fr::zero()));
        }
        match self.storage.identities.get_profile(did)? {
            Some(profile) => Ok((self.identity(&profile.genesis_identifier)?, profile.nonce)),
            None => Err(TesseraError::NotFound(format!("identity or profile {}", did))),
        }
    }

    /// Create an identity controlled by the BabyJubJub key derived from
    /// `seed`. Its DID derives from the genesis state: the auth claim alone
    /// in the Claims tree.
    pub fn create_identity(&self, seed: &[u8]) -> TesseraResult<IdentityRecord> {
        let key = BjjPrivateKey::from_seed(seed);
        let claim = auth_claim(&key.public_key(), GENESIS_AUTH_NONCE)?;
        let (hi, hv) = claim.hi_hv()?;
        let trees = &self.storage.trees;

        let scratch = SparseMerkleTree::in_memory(trees.max_levels())?;
        let genesis = TreeState::new(scratch.add(&hi, &hv)?, Fr::zero(), Fr::zero())?;
        let did = Did::genesis_from_state(self.did_type, &genesis.state())?;
        let identifier = did.to_string();
        if trees.has_trees(&identifier)? {
            return Err(TesseraError::InvalidRequest(format!(
                "identity {} already exists",
                did
            )));
        }

        trees.create_identity_trees(&identifier)?;
        trees.add_entry(&identifier, TreeKind::Claims, &hi, &hv)?;
        let tree_state = trees.tree_state(&identifier)?;
        if tree_state != genesis {
            return Err(TesseraError::Storage(format!(
                "genesis trees of {} do not match the derived state",
                did
            )));
        }

        let record = IdentityRecord {
            did,
            genesis_state: tree_state.state(),
            current_state: tree_state.state(),
            tree_state,
            is_genesis: true,
            is_published: false,
        };
        self.storage.identities.save_identity(&record)?;
        self.storage.identities.save_auth_credential(&AuthCredential {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            did,
            claim,
            key,
        })?;
        info!(did = %did, "identity created");
        Ok(record)
    }

    /// Create an identity whose id embeds an Ethereum account. It starts at
    /// the zero state with empty trees and publishes through generic
    /// transitions signed by that account.
    pub fn create_ethereum_identity(&self, address: &[u8; 20]) -> TesseraResult<IdentityRecord> {
        let id = Id::from_eth_address(self.did_type.to_bytes()?, address);
        let did = Did::from_id(id)?;
        let identifier = did.to_string();
        if self.storage.trees.has_trees(&identifier)? {
            return Err(TesseraError::InvalidRequest(format!(
                "identity {} already exists",
                did
            )));
        }
        self.storage.trees.create_identity_trees(&identifier)?;
        let record = IdentityRecord {
            did,
            genesis_state: Fr::zero(),
            current_state: Fr::zero(),
            tree_state: self.storage.trees.tree_state(&identifier)?,
            is_genesis: true,
            is_published: false,
        };
        self.storage.identities.save_identity(&record)?;
        info!(did = %did, "ethereum-controlled identity created");
        Ok(record)
    }

    /// Add another auth key. It can sign once a published state includes it.
    pub fn add_auth_key(&self, did: &Did, seed: &[u8], nonce: u64) -> TesseraResult<AuthCredential> {
        self.identity(did)?;
        let key = BjjPrivateKey::from_seed(seed);
        let claim = auth_claim(&key.public_key(), nonce)?;
        let (hi, hv) = claim.hi_hv()?;
        self.storage
            .trees
            .add_entry(&did.to_string(), TreeKind::Claims, &hi, &hv)
            .map_err(|e| match e {
                MerkleError::EntryIndexAlreadyExists => {
                    TesseraError::InvalidRequest(format!("auth key already added to {}", did))
                }
                other => other.into(),
            })?;
        let credential = AuthCredential {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            did: *did,
            claim,
            key,
        };
        self.storage.identities.save_auth_credential(&credential)?;
        info!(did = %did, nonce, "auth key added");
        Ok(credential)
    }

    pub fn create_profile(&self, did: &Did, nonce: Fr, verifier: &str) -> TesseraResult<Profile> {
        if nonce.is_zero() {
            return Err(TesseraError::InvalidRequest(
                "profile nonce must be nonzero".into(),
            ));
        }
        self.identity(did)?;
        let profile_did = did.profile(&nonce)?;
        if self.storage.identities.get_profile(&profile_did)?.is_some() {
            return Err(TesseraError::InvalidRequest(format!(
                "profile {} already exists",
                profile_did
            )));
        }
        let profile = Profile {
            did: profile_did,
            nonce,
            genesis_identifier: *did,
            verifier: verifier.to_string(),
        };
        self.storage.identities.save_profile(&profile)?;
        info!(did = %did, profile = %profile_did, verifier, "profile created");
        Ok(profile)
    }

    /// First auth credential included in the committed state and not
    /// revoked by it.
    pub fn get_actual_auth_credential(&self, did: &Did) -> TesseraResult<AuthCredential> {
        let record = self.identity(did)?;
        let candidates = self.storage.identities.auth_credentials(did)?;
        if candidates.is_empty() {
            return Err(TesseraError::NotFound(format!("auth credentials of {}", did)));
        }
        let mut revoked = 0;
        for auth in candidates {
            let data = self.auth_proof_data(&record, &auth)?;
            if !data.inclusion.as_ref().map(|p| p.existence).unwrap_or(false) {
                debug!(did = %did, credential = %auth.id, "auth credential not yet published");
                continue;
            }
            if data.non_revocation.as_ref().map(|p| p.existence).unwrap_or(true) {
                revoked += 1;
                continue;
            }
            return Ok(auth);
        }
        if revoked > 0 {
            Err(TesseraError::AllAuthCredentialsRevoked(did.to_string()))
        } else {
            Err(TesseraError::NotFound(format!(
                "published auth credential of {}",
                did
            )))
        }
    }

    /// Inclusion and non-revocation of `auth` against the committed state.
    pub fn auth_proof_data(
        &self,
        record: &IdentityRecord,
        auth: &AuthCredential,
    ) -> TesseraResult<AuthProofData> {
        let identifier = record.did.to_string();
        let (hi, _) = auth.claim.hi_hv()?;
        let inclusion = self.storage.trees.generate_proof(
            &identifier,
            TreeKind::Claims,
            &hi,
            Some(&record.tree_state.claims_root()),
        )?;
        let non_revocation = self.storage.trees.generate_proof(
            &identifier,
            TreeKind::Revocations,
            &Fr::from(auth.revocation_nonce()),
            Some(&record.tree_state.revocation_root()),
        )?;
        Ok(AuthProofData {
            auth_claim: auth.claim.clone(),
            tree_state: record.tree_state,
            inclusion: Some(inclusion),
            non_revocation: Some(non_revocation),
        })
    }

    // -- issuance -------------------------------------------------------------

    /// Issue a credential signed with the issuer's actual auth key.
    pub fn issue_credential(
        &self,
        issuer: &Did,
        request: &CredentialRequest,
    ) -> TesseraResult<W3CCredential> {
        let record = self.identity(issuer)?;
        let auth = self.get_actual_auth_credential(issuer)?;
        let nonce = request.revocation_nonce.unwrap_or_else(rand::random);

        let mut subject = request.subject.clone();
        subject.insert(
            "type".into(),
            Value::String(request.credential_type.clone()),
        );
        let mut credential = W3CCredential {
            id: request
                .id
                .clone()
                .unwrap_or_else(|| format!("urn:uuid:{}", Uuid::new_v4())),
            context: vec![
                W3C_CREDENTIALS_CONTEXT.to_string(),
                request.context_url.clone(),
            ],
            types: vec![
                VERIFIABLE_CREDENTIAL_TYPE.to_string(),
                request.credential_type.clone(),
            ],
            expiration_date: request.expiration,
            issuance_date: Some(Utc::now()),
            credential_subject: subject,
            credential_status: credential_status(issuer, nonce, request.status_type),
            issuer: issuer.to_string(),
            credential_schema: CredentialSchema {
                id: request.schema_url.clone(),
                schema_type: JSON_SCHEMA_TYPE.to_string(),
            },
            proof: Vec::new(),
        };

        let claim = to_core_claim(&credential, self.loader.as_ref(), &CoreClaimOptions::default())?;
        let signature = auth.key.sign_poseidon(&claim.hash()?)?;
        let auth_data = self.auth_proof_data(&record, &auth)?;

        credential.proof.push(CredentialProof::BjjSignature(BjjSignatureProof {
            issuer_data: IssuerData {
                id: *issuer,
                state: IssuerState::from_tree_state(&record.tree_state),
                auth_core_claim: Some(auth.claim.to_hex()),
                mtp: auth_data.inclusion,
                credential_status: Some(credential_status(
                    issuer,
                    auth.revocation_nonce(),
                    request.status_type,
                )),
            },
            core_claim: claim.to_hex(),
            signature: signature.to_hex(),
        }));
        info!(
            issuer = %issuer,
            credential = %credential.id,
            credential_type = %request.credential_type,
            nonce,
            "credential issued"
        );
        Ok(credential)
    }

    /// The core claim a credential was issued over.
    pub fn core_claim_of(&self, credential: &W3CCredential) -> TesseraResult<CoreClaim> {
        for proof_type in [ProofType::BjjSignature, ProofType::Iden3SparseMerkleTreeProof] {
            if credential.has_proof(proof_type) {
                return Ok(credential.core_claim_from_proof(proof_type)?);
            }
        }
        Ok(to_core_claim(
            credential,
            self.loader.as_ref(),
            &CoreClaimOptions::default(),
        )?)
    }

    /// Add the claims of `credentials` to the issuer's Claims tree. Returns
    /// the local, unpublished tree state.
    pub fn add_credentials_to_merkle_tree(
        &self,
        issuer: &Did,
        credentials: &[W3CCredential],
    ) -> TesseraResult<TreeState> {
        self.identity(issuer)?;
        let identifier = issuer.to_string();
        for credential in credentials {
            let (hi, hv) = self.core_claim_of(credential)?.hi_hv()?;
            self.storage
                .trees
                .add_entry(&identifier, TreeKind::Claims, &hi, &hv)?;
            debug!(issuer = %issuer, credential = %credential.id, "claim added to claims tree");
        }
        Ok(self.storage.trees.tree_state(&identifier)?)
    }

    /// Attach an `Iden3SparseMerkleTreeProof` against the committed state to
    /// each credential, replacing any earlier one.
    pub fn generate_iden3_sparse_merkle_tree_proof(
        &self,
        issuer: &Did,
        credentials: &[W3CCredential],
        tx_id: Option<String>,
    ) -> TesseraResult<Vec<W3CCredential>> {
        let record = self.identity(issuer)?;
        let identifier = issuer.to_string();
        let mut state = IssuerState::from_tree_state(&record.tree_state);
        state.tx_id = tx_id;

        let mut out = Vec::with_capacity(credentials.len());
        for credential in credentials {
            let claim = self.core_claim_of(credential)?;
            let (hi, _) = claim.hi_hv()?;
            let mtp = self.storage.trees.generate_proof(
                &identifier,
                TreeKind::Claims,
                &hi,
                Some(&record.tree_state.claims_root()),
            )?;
            if !mtp.existence {
                return Err(TesseraError::NotFound(format!(
                    "claim of {} in the published claims tree of {}",
                    credential.id, issuer
                )));
            }
            let mut updated = credential.clone();
            updated
                .proof
                .retain(|p| p.proof_type() != ProofType::Iden3SparseMerkleTreeProof);
            updated
                .proof
                .push(CredentialProof::Iden3SparseMerkleTree(Iden3SparseMerkleTreeProof {
                    issuer_data: IssuerData {
                        id: *issuer,
                        state: state.clone(),
                        auth_core_claim: None,
                        mtp: None,
                        credential_status: None,
                    },
                    core_claim: claim.to_hex(),
                    mtp,
                }));
            out.push(updated);
        }
        info!(issuer = %issuer, count = out.len(), "merkle tree proofs attached");
        Ok(out)
    }

    // -- revocation -----------------------------------------------------------

    /// Add `nonce` to the issuer's Revocations tree. Takes effect for
    /// verifiers once the state is published.
    pub fn revoke_credential(&self, issuer: &Did, nonce: u64) -> TesseraResult<TreeState> {
        self.identity(issuer)?;
        let identifier = issuer.to_string();
        self.storage
            .trees
            .add_entry(&identifier, TreeKind::Revocations, &Fr::from(nonce), &Fr::zero())
            .map_err(|e| match e {
                MerkleError::EntryIndexAlreadyExists => {
                    TesseraError::InvalidRequest(format!("nonce {} already revoked", nonce))
                }
                other => other.into(),
            })?;
        info!(issuer = %issuer, nonce, "revocation nonce added");
        Ok(self.storage.trees.tree_state(&identifier)?)
    }

    /// Revocation proof for `nonce` against the issuer's committed state.
    pub fn get_revocation_status(&self, issuer: &Did, nonce: u64) -> TesseraResult<RevocationStatus> {
        let record = self.identity(issuer)?;
        let mtp = self.storage.trees.generate_proof(
            &issuer.to_string(),
            TreeKind::Revocations,
            &Fr::from(nonce),
            Some(&record.tree_state.revocation_root()),
        )?;
        Ok(RevocationStatus {
            issuer: record.tree_state,
            mtp,
        })
    }

    // -- publication ----------------------------------------------------------

    /// Publish the identity's local trees. On failure the local writes stay
    /// and the record keeps its committed state.
    pub async fn publish_state(
        &self,
        did: &Did,
        signer: &dyn LedgerSigner,
    ) -> TesseraResult<PublishedState> {
        let mut record = self.identity(did)?;
        let auth = if record.is_ethereum_controlled() {
            None
        } else {
            Some(self.get_actual_auth_credential(did)?)
        };
        let published = match self.transitioner.transit(&record, auth.as_ref(), signer).await {
            Ok(p) => p,
            Err(e) => {
                warn!(did = %did, error = %e, "state not published");
                return Err(e);
            }
        };
        record.current_state = published.tree_state.state();
        record.tree_state = published.tree_state;
        record.is_genesis = false;
        record.is_published = true;
        self.storage.identities.save_identity(&record)?;
        info!(did = %did, tx = %published.tx_id, "identity state published");
        Ok(published)
    }
}

#[async_trait]
impl RevocationStatusResolver for IdentityWallet {
    async fn resolve(&self, issuer: &Did, status: &CredentialStatus) -> ProofResult<RevocationStatus> {
        self.get_revocation_status(issuer, status.revocation_nonce)
            .map_err(|e| ProofError::RevocationStatus(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;
    use tessera_claim::InMemoryContextLoader;
    use tessera_proof::testing::{InMemoryStateOracle, SimulatedProver};

    pub const EMPLOYEE_URL: &str = "https://example.com/employee-v1.jsonld";
    pub const MEMBERSHIP_URL: &str = "https://example.com/membership-v1.jsonld";
    pub const SCHEMA_URL: &str = "https://example.com/schemas/employee-v1.json";

    /// Slot-based type: `val` in index slot A, `level` in value slot A.
    pub fn employee_context() -> Value {
        json!({
            "@context": [{
                "id": "@id",
                "type": "@type",
                "EmployeeCredential": {
                    "@id": "https://example.com/employee-v1#EmployeeCredential",
                    "@context": {
                        "iden3_serialization": "iden3:v1:slotIndexA=val&slotValueA=level",
                        "xsd": "http://www.w3.org/2001/XMLSchema#",
                        "emp": "https://example.com/employee-vocab#",
                        "val": {"@id": "emp:val", "@type": "xsd:integer"},
                        "level": {"@id": "emp:level", "@type": "xsd:integer"}
                    }
                }
            }]
        })
    }

    /// Merklized type.
    pub fn membership_context() -> Value {
        json!({
            "@context": [{
                "id": "@id",
                "type": "@type",
                "MembershipCredential": {
                    "@id": "https://example.com/membership-v1#MembershipCredential",
                    "@context": {
                        "xsd": "http://www.w3.org/2001/XMLSchema#",
                        "mem": "https://example.com/membership-vocab#",
                        "val": {"@id": "mem:val", "@type": "xsd:integer"},
                        "name": {"@id": "mem:name", "@type": "xsd:string"},
                        "active": {"@id": "mem:active", "@type": "xsd:boolean"}
                    }
                }
            }]
        })
    }

    pub struct Account(pub [u8; 20]);

    impl LedgerSigner for Account {
        fn address(&self) -> [u8; 20] {
            self.0
        }
    }

    pub struct TestEnv {
        pub wallet: Arc<IdentityWallet>,
        pub oracle: Arc<InMemoryStateOracle>,
        pub prover: Arc<SimulatedProver>,
        pub loader: Arc<InMemoryContextLoader>,
    }

    pub fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.transition.initial_delay_ms = 1;
        config.transition.max_delay_ms = 5;
        config
    }

    pub fn env() -> TestEnv {
        let config = fast_config();
        let loader = Arc::new(InMemoryContextLoader::new());
        loader.insert(EMPLOYEE_URL, employee_context());
        loader.insert(MEMBERSHIP_URL, membership_context());
        let oracle = Arc::new(InMemoryStateOracle::new());
        let prover = Arc::new(SimulatedProver::new());
        let wallet = IdentityWallet::new(
            WalletStorage::in_memory(config.identity.tree_depth),
            oracle.clone(),
            prover.clone(),
            loader.clone(),
            &config,
        )
        .unwrap();
        TestEnv {
            wallet: Arc::new(wallet),
            oracle,
            prover,
            loader,
        }
    }

    pub fn employee_request(holder: &Did, val: i64) -> CredentialRequest {
        let subject = json!({"id": holder.to_string(), "val": val, "level": 3});
        CredentialRequest::new(
            SCHEMA_URL,
            EMPLOYEE_URL,
            "EmployeeCredential",
            subject.as_object().cloned().unwrap(),
        )
    }

    pub fn membership_request(holder: &Did, val: i64, name: &str) -> CredentialRequest {
        let subject = json!({"id": holder.to_string(), "val": val, "name": name, "active": true});
        CredentialRequest::new(
            SCHEMA_URL,
            MEMBERSHIP_URL,
            "MembershipCredential",
            subject.as_object().cloned().unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tessera_claim::{verify_core_claim_match, verify_signature_proof};

    #[test]
    fn test_create_identity_derives_did_from_genesis_state() {
        let env = env();
        let record = env.wallet.create_identity(b"issuer").unwrap();
        assert!(record.is_genesis);
        assert!(!record.is_published);
        assert_eq!(record.genesis_state, record.tree_state.state());
        assert!(record.did.id.is_genesis_state(&record.genesis_state));

        let auth = env.wallet.get_actual_auth_credential(&record.did).unwrap();
        assert_eq!(auth.revocation_nonce(), GENESIS_AUTH_NONCE);
    }

    #[test]
    fn test_create_identity_twice_fails() {
        let env = env();
        env.wallet.create_identity(b"same-seed").unwrap();
        assert!(matches!(
            env.wallet.create_identity(b"same-seed"),
            Err(TesseraError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_profiles() {
        let env = env();
        let holder = env.wallet.create_identity(b"holder").unwrap().did;

        assert!(matches!(
            env.wallet.create_profile(&holder, Fr::zero(), "verifier"),
            Err(TesseraError::InvalidRequest(_))
        ));
        let profile = env
            .wallet
            .create_profile(&holder, Fr::from(5u64), "https://verifier.example")
            .unwrap();
        assert_ne!(profile.did, holder);
        assert!(matches!(
            env.wallet.create_profile(&holder, Fr::from(5u64), "again"),
            Err(TesseraError::InvalidRequest(_))
        ));

        let (record, nonce) = env.wallet.resolve_identity(&profile.did).unwrap();
        assert_eq!(record.did, holder);
        assert_eq!(nonce, Fr::from(5u64));
        let (_, nonce) = env.wallet.resolve_identity(&holder).unwrap();
        assert!(nonce.is_zero());
    }

    #[test]
    fn test_issue_credential_is_signed_and_bound() {
        let env = env();
        let issuer = env.wallet.create_identity(b"issuer").unwrap().did;
        let holder = env.wallet.create_identity(b"holder").unwrap().did;

        let credential = env
            .wallet
            .issue_credential(&issuer, &employee_request(&holder, 10).with_revocation_nonce(42))
            .unwrap();
        assert_eq!(credential.revocation_nonce(), 42);
        assert_eq!(credential.subject_did().unwrap(), Some(holder));
        assert_eq!(credential.credential_type().unwrap(), "EmployeeCredential");

        let proof = match credential.get_proof(ProofType::BjjSignature) {
            Some(CredentialProof::BjjSignature(p)) => p.clone(),
            other => panic!("unexpected proof: {:?}", other),
        };
        assert!(verify_signature_proof(&proof).unwrap());
        assert_eq!(proof.issuer_data.id, issuer);
        assert!(proof.issuer_data.mtp.as_ref().unwrap().existence);

        let claim = credential
            .core_claim_from_proof(ProofType::BjjSignature)
            .unwrap();
        verify_core_claim_match(&claim, &credential, env.loader.as_ref()).unwrap();
        assert_eq!(claim.subject_id().unwrap(), Some(holder.id));
    }

    #[tokio::test]
    async fn test_revocation_takes_effect_on_publication() {
        let env = env();
        let issuer = env.wallet.create_identity(b"issuer").unwrap().did;

        assert!(!env.wallet.get_revocation_status(&issuer, 42).unwrap().is_revoked());
        env.wallet.revoke_credential(&issuer, 42).unwrap();
        // committed state still the genesis one
        assert!(!env.wallet.get_revocation_status(&issuer, 42).unwrap().is_revoked());
        assert!(matches!(
            env.wallet.revoke_credential(&issuer, 42),
            Err(TesseraError::InvalidRequest(_))
        ));

        env.wallet
            .publish_state(&issuer, &Account([1; 20]))
            .await
            .unwrap();
        let status = env.wallet.get_revocation_status(&issuer, 42).unwrap();
        assert!(status.is_revoked());
        assert_eq!(status.issuer, env.wallet.identity(&issuer).unwrap().tree_state);
    }

    #[tokio::test]
    async fn test_publish_state_moves_committed_state() {
        let env = env();
        let issuer = env.wallet.create_identity(b"issuer").unwrap();
        let holder = env.wallet.create_identity(b"holder").unwrap().did;
        let credential = env
            .wallet
            .issue_credential(&issuer.did, &employee_request(&holder, 7))
            .unwrap();
        let local = env
            .wallet
            .add_credentials_to_merkle_tree(&issuer.did, &[credential])
            .unwrap();
        assert_ne!(local, issuer.tree_state);

        let published = env
            .wallet
            .publish_state(&issuer.did, &Account([1; 20]))
            .await
            .unwrap();
        assert!(published.tx_id.starts_with("0x"));

        let record = env.wallet.identity(&issuer.did).unwrap();
        assert!(record.is_published);
        assert!(!record.is_genesis);
        assert_eq!(record.current_state, published.tree_state.state());
        assert_eq!(
            env.oracle.latest_state(&issuer.did.id).unwrap(),
            Some(record.current_state)
        );

        assert!(matches!(
            env.wallet.publish_state(&issuer.did, &Account([1; 20])).await,
            Err(TesseraError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_merkle_tree_proof_requires_published_claim() {
        let env = env();
        let issuer = env.wallet.create_identity(b"issuer").unwrap().did;
        let holder = env.wallet.create_identity(b"holder").unwrap().did;
        let credential = env
            .wallet
            .issue_credential(&issuer, &employee_request(&holder, 7))
            .unwrap();
        env.wallet
            .add_credentials_to_merkle_tree(&issuer, std::slice::from_ref(&credential))
            .unwrap();

        assert!(matches!(
            env.wallet
                .generate_iden3_sparse_merkle_tree_proof(&issuer, std::slice::from_ref(&credential), None),
            Err(TesseraError::NotFound(_))
        ));

        let published = env
            .wallet
            .publish_state(&issuer, &Account([1; 20]))
            .await
            .unwrap();
        let updated = env
            .wallet
            .generate_iden3_sparse_merkle_tree_proof(
                &issuer,
                &[credential],
                Some(published.tx_id.clone()),
            )
            .unwrap();
        let proof = match updated[0].get_proof(ProofType::Iden3SparseMerkleTreeProof) {
            Some(CredentialProof::Iden3SparseMerkleTree(p)) => p.clone(),
            other => panic!("unexpected proof: {:?}", other),
        };
        assert!(proof.mtp.existence);
        assert_eq!(proof.issuer_data.state.tx_id, Some(published.tx_id));
        assert_eq!(
            proof.issuer_data.state.tree_state().unwrap(),
            published.tree_state
        );
        assert!(updated[0].has_proof(ProofType::BjjSignature));
    }

    #[test]
    fn test_pending_auth_key_is_not_actual() {
        let env = env();
        let did = env.wallet.create_identity(b"issuer").unwrap().did;
        let first = env.wallet.get_actual_auth_credential(&did).unwrap();
        env.wallet.add_auth_key(&did, b"second", 1).unwrap();
        assert_eq!(env.wallet.get_actual_auth_credential(&did).unwrap().id, first.id);
        assert!(matches!(
            env.wallet.add_auth_key(&did, b"second", 1),
            Err(TesseraError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_ethereum_identity_starts_at_zero_state() {
        let env = env();
        let record = env.wallet.create_ethereum_identity(&[9u8; 20]).unwrap();
        assert!(record.is_ethereum_controlled());
        assert!(record.current_state.is_zero());
        assert_eq!(record.did.id.eth_address(), Some([9u8; 20]));
        assert!(matches!(
            env.wallet.get_actual_auth_credential(&record.did),
            Err(TesseraError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_identity() {
        let env = env();
        let stranger = Did::genesis_from_state(env.wallet.did_type(), &Fr::from(99u64)).unwrap();
        let err = env.wallet.identity(&stranger).unwrap_err();
        assert_eq!(err.category(), tessera_core::ErrorCategory::NotFound);
    }
}
