//! End-to-end journeys from a verifier's request to its verdict.
//!
//! 1. A signature credential is proven while the issuer is still at genesis,
//!    then revoked; old proofs stay acceptable only while the replaced
//!    non-revocation state is fresh
//! 2. Proofs of one group share a link id; a proof over another credential
//!    breaks the group
//! 3. Verifiers reject proofs for another schema and stale proofs
//! 4. Optional requests the holder cannot answer are left out
//! 5. Several field queries over one credential are proven at once and
//!    linked to a single-query proof of the same group
//! 6. A holder authenticates; verifiers accept the GIST root only while it
//!    is current or recently replaced
//! 7. On-chain query proofs sign the verifier's challenge; V3 proofs bind a
//!    nullifier to the verifier's session
//! 8. An issuer's state transition proofs, from genesis and from a
//!    published state
//!
//! Clocks are pinned: proofs carry explicit timestamps and the in-memory
//! ledger runs on a set time.

use serde_json::{json, Value};
use std::sync::Arc;

use tessera::{
    CredentialRequest, EngineConfig, IdentityWallet, ProofContext, ProofService, RetryPolicy,
    StateTransitioner, TesseraError, WalletStorage, ZeroKnowledgeProofRequest,
};
use tessera_claim::InMemoryContextLoader;
use tessera_core::{CircuitId, Did, ErrorCategory, Fr, LedgerSigner};
use tessera_proof::testing::{InMemoryStateOracle, SimulatedKeys, SimulatedProver};
use tessera_proof::{
    generate_inputs, CircuitRequest, NamedSignals, ProofError, Prover, PubSignals, StateRole,
    StateTrust, Verifier, VerifyContext, ZkProof, ZkProofResponse,
};
use tessera_query::ProofQuery;

const KYC_URL: &str = "https://example.com/kyc-v1.jsonld";
const CLUB_URL: &str = "https://example.com/club-v1.jsonld";
const SCHEMA_URL: &str = "https://example.com/schemas/kyc-v1.json";

const T0: u64 = 1_700_000_000;
const HOUR: u64 = 3_600;

/// Slot type; `KYCAgeCredential` and `KYCCountryCredential` share a layout.
fn kyc_context() -> Value {
    let fields = json!({
        "iden3_serialization": "iden3:v1:slotIndexA=birthday&slotIndexB=documentType",
        "xsd": "http://www.w3.org/2001/XMLSchema#",
        "kyc": "https://example.com/kyc-vocab#",
        "birthday": {"@id": "kyc:birthday", "@type": "xsd:integer"},
        "documentType": {"@id": "kyc:documentType", "@type": "xsd:integer"}
    });
    json!({
        "@context": [{
            "id": "@id",
            "type": "@type",
            "KYCAgeCredential": {
                "@id": "https://example.com/kyc-v1#KYCAgeCredential",
                "@context": fields.clone()
            },
            "KYCCountryCredential": {
                "@id": "https://example.com/kyc-v1#KYCCountryCredential",
                "@context": fields
            }
        }]
    })
}

/// Merklized type.
fn club_context() -> Value {
    json!({
        "@context": [{
            "id": "@id",
            "type": "@type",
            "ClubCredential": {
                "@id": "https://example.com/club-v1#ClubCredential",
                "@context": {
                    "xsd": "http://www.w3.org/2001/XMLSchema#",
                    "club": "https://example.com/club-vocab#",
                    "tier": {"@id": "club:tier", "@type": "xsd:integer"},
                    "member": {"@id": "club:member", "@type": "xsd:boolean"}
                }
            }
        }]
    })
}

struct Account([u8; 20]);

impl LedgerSigner for Account {
    fn address(&self) -> [u8; 20] {
        self.0
    }
}

struct World {
    wallet: Arc<IdentityWallet>,
    oracle: Arc<InMemoryStateOracle>,
    prover: Arc<SimulatedProver>,
    service: ProofService,
    verifier: Verifier,
    issuer: Did,
    holder: Did,
}

fn world() -> World {
    let mut config = EngineConfig::default();
    config.transition.initial_delay_ms = 1;
    config.transition.max_delay_ms = 4;

    let loader = Arc::new(InMemoryContextLoader::new());
    loader.insert(KYC_URL, kyc_context());
    loader.insert(CLUB_URL, club_context());
    let oracle = Arc::new(InMemoryStateOracle::new());
    oracle.set_time(T0).unwrap();
    let prover = Arc::new(SimulatedProver::new());
    let wallet = Arc::new(
        IdentityWallet::new(
            WalletStorage::in_memory(config.identity.tree_depth),
            oracle.clone(),
            prover.clone(),
            loader.clone(),
            &config,
        )
        .unwrap(),
    );
    let issuer = wallet.create_identity(b"kyc-issuer").unwrap().did;
    let holder = wallet.create_identity(b"alice").unwrap().did;
    let service = ProofService::new(wallet.clone(), prover.clone(), wallet.clone());
    let verifier = Verifier::new(oracle.clone(), loader, prover.clone(), Arc::new(SimulatedKeys));
    World {
        wallet,
        oracle,
        prover,
        service,
        verifier,
        issuer,
        holder,
    }
}

impl World {
    fn issue(&self, request: CredentialRequest) {
        let credential = self.wallet.issue_credential(&self.issuer, &request).unwrap();
        self.wallet
            .storage()
            .credentials
            .save_credential(&credential)
            .unwrap();
    }

    fn kyc(&self, type_name: &str, birthday: i64, nonce: u64) -> CredentialRequest {
        let subject = json!({
            "id": self.holder.to_string(),
            "birthday": birthday,
            "documentType": 2
        });
        CredentialRequest::new(
            SCHEMA_URL,
            KYC_URL,
            type_name,
            subject.as_object().cloned().unwrap(),
        )
        .with_revocation_nonce(nonce)
    }

    fn club(&self, tier: i64) -> CredentialRequest {
        let subject = json!({"id": self.holder.to_string(), "tier": tier, "member": true});
        CredentialRequest::new(
            SCHEMA_URL,
            CLUB_URL,
            "ClubCredential",
            subject.as_object().cloned().unwrap(),
        )
    }
}

fn query(url: &str, type_name: &str, subject: Value) -> ProofQuery {
    ProofQuery::new(url, type_name).with_subject(subject).unwrap()
}

fn verify_at(query: &ProofQuery, challenge: Option<Fr>, now: u64) -> VerifyContext {
    let mut ctx = VerifyContext::for_query(query.clone());
    ctx.challenge = challenge;
    ctx.options.now = Some(now);
    ctx
}

/// `signals` with some named signals rewritten.
fn rewrite(circuit: CircuitId, signals: &[Fr], edit: impl FnOnce(&mut NamedSignals)) -> Vec<Fr> {
    let mut named = NamedSignals::from_ordered(circuit, signals).unwrap();
    edit(&mut named);
    named.to_ordered(circuit).unwrap()
}

fn response(id: u32, circuit: CircuitId, zk_proof: ZkProof) -> ZkProofResponse {
    ZkProofResponse {
        id,
        circuit_id: circuit,
        zk_proof,
        vp: None,
    }
}

fn is_revocation_checked(response: &ZkProofResponse) -> bool {
    match PubSignals::parse(response.circuit_id, &response.zk_proof.pub_signals).unwrap() {
        PubSignals::QueryV2(s) => s.is_revocation_checked,
        PubSignals::QueryV3(s) => s.is_revocation_checked,
        other => panic!("unexpected signals: {:?}", other),
    }
}

// ============================================================================
// Journey 1: revocation after proving
// ============================================================================

#[tokio::test]
async fn journey_1_revoked_after_proving() {
    let w = world();
    w.issue(w.kyc("KYCAgeCredential", 19960424, 42));

    let q = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}}));
    let request = ZeroKnowledgeProofRequest::new(7, CircuitId::AtomicQuerySigV2, q.clone());
    let challenge = Fr::from(123_456u64);
    let mut ctx = ProofContext::new(w.holder)
        .with_challenge(challenge)
        .with_timestamp(T0);
    let response = w.service.generate_zk_proof(&request, &mut ctx).await.unwrap();
    assert!(is_revocation_checked(&response));

    // The issuer never published: both issuer states are accepted as genesis
    let outcome = w
        .verifier
        .verify_response(&response, &verify_at(&q, Some(challenge), T0 + 60))
        .await
        .unwrap();
    assert_eq!(outcome.user_id, Some(w.holder.id));
    assert_eq!(outcome.states.len(), 2);
    assert!(outcome.states.iter().all(|c| c.trust == StateTrust::Genesis));

    // Wrong challenge
    let err = w
        .verifier
        .verify_response(&response, &verify_at(&q, Some(Fr::from(1u64)), T0 + 60))
        .await
        .unwrap_err();
    assert!(matches!(err, ProofError::IdOwnershipFailed(_)));

    // Revocation reaches verifiers with the next published state
    w.wallet.revoke_credential(&w.issuer, 42).unwrap();
    let replaced_at = T0 + 100;
    w.oracle.set_time(replaced_at).unwrap();
    w.wallet
        .publish_state(&w.issuer, &Account([9; 20]))
        .await
        .unwrap();
    assert!(w.wallet.get_revocation_status(&w.issuer, 42).unwrap().is_revoked());

    // The old non-revocation state was replaced half an hour ago: still fine
    let outcome = w
        .verifier
        .verify_response(&response, &verify_at(&q, Some(challenge), replaced_at + HOUR / 2))
        .await
        .unwrap();
    let non_rev = outcome
        .states
        .iter()
        .find(|c| c.role == StateRole::NonRevocation)
        .unwrap();
    assert_eq!(
        non_rev.trust,
        StateTrust::Registered {
            replaced_at: Some(replaced_at)
        }
    );

    // Two hours later it is outdated
    let err = w
        .verifier
        .verify_response(&response, &verify_at(&q, Some(challenge), replaced_at + 2 * HOUR))
        .await
        .unwrap_err();
    assert!(matches!(err, ProofError::StateOutdated { .. }));
    assert_eq!(err.category(), ErrorCategory::State);

    // The holder cannot produce a new proof from the revoked credential
    let err = w
        .service
        .generate_zk_proof(&request, &mut ProofContext::new(w.holder).with_timestamp(T0))
        .await
        .unwrap_err();
    assert!(matches!(err, TesseraError::NotFound(_)));
}

// ============================================================================
// Journey 2: linked proofs
// ============================================================================

#[tokio::test]
async fn journey_2_group_links() {
    let w = world();
    w.issue(w.kyc("KYCAgeCredential", 19960424, 1));
    w.issue(w.club(3));

    let mut age_lt = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}}));
    age_lt.group_id = Some(7);
    let mut doc_eq = query(KYC_URL, "KYCAgeCredential", json!({"documentType": {"$eq": 2}}));
    doc_eq.group_id = Some(7);
    let mut tier = query(CLUB_URL, "ClubCredential", json!({"tier": {"$gt": 1}}));
    tier.group_id = Some(7);

    let requests = vec![
        ZeroKnowledgeProofRequest::new(1, CircuitId::AtomicQueryV3, age_lt.clone()),
        ZeroKnowledgeProofRequest::new(2, CircuitId::AtomicQueryV3, doc_eq.clone()),
        ZeroKnowledgeProofRequest::new(3, CircuitId::AtomicQueryV3, tier.clone()),
    ];
    let nonce = Fr::from(987_654_321u64);
    let mut ctx = ProofContext::new(w.holder)
        .with_timestamp(T0)
        .with_link_nonce(7, nonce);
    let responses = w.service.process_requests(&requests, &mut ctx).await.unwrap();
    assert_eq!(responses.len(), 3);
    assert_eq!(ctx.link_nonce(7).unwrap(), nonce);

    let same_credential = vec![
        (responses[0].clone(), verify_at(&age_lt, None, T0 + 60)),
        (responses[1].clone(), verify_at(&doc_eq, None, T0 + 60)),
    ];
    let outcomes = w.verifier.verify_responses(&same_credential).await.unwrap();
    assert_eq!(outcomes[0].link_id, outcomes[1].link_id);
    assert!(outcomes[0].link_id.is_some());
    assert_eq!(outcomes[0].group_id, Some(7));

    // Same nonce, different claim: a different link id
    let mixed = vec![
        (responses[0].clone(), verify_at(&age_lt, None, T0 + 60)),
        (responses[2].clone(), verify_at(&tier, None, T0 + 60)),
    ];
    let err = w.verifier.verify_responses(&mixed).await.unwrap_err();
    assert_eq!(err, ProofError::LinkIdMismatch { group_id: 7 });

    // A group query answered without linking is rejected
    let mut unlinked = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}}));
    let plain = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(4, CircuitId::AtomicQueryV3, unlinked.clone()),
            &mut ProofContext::new(w.holder).with_timestamp(T0),
        )
        .await
        .unwrap();
    unlinked.group_id = Some(7);
    assert_eq!(
        w.verifier
            .verify_response(&plain, &verify_at(&unlinked, None, T0 + 60))
            .await
            .unwrap_err(),
        ProofError::LinkIdRequired
    );
}

// ============================================================================
// Journey 3: wrong schema, stale proof
// ============================================================================

#[tokio::test]
async fn journey_3_schema_and_freshness() {
    let w = world();
    w.issue(w.kyc("KYCAgeCredential", 19960424, 1));

    let asked = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}}));
    let response = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(5, CircuitId::AtomicQueryV3, asked.clone()),
            &mut ProofContext::new(w.holder).with_timestamp(T0),
        )
        .await
        .unwrap();

    // Same layout, different type IRI
    let other = query(KYC_URL, "KYCCountryCredential", json!({"birthday": {"$lt": 20000101}}));
    let err = w
        .verifier
        .verify_response(&response, &verify_at(&other, None, T0 + 60))
        .await
        .unwrap_err();
    assert_eq!(err, ProofError::SchemaMismatch);

    // Within a day the proof holds, after it is outdated
    assert!(w
        .verifier
        .verify_response(&response, &verify_at(&asked, None, T0 + 23 * HOUR))
        .await
        .is_ok());
    let err = w
        .verifier
        .verify_response(&response, &verify_at(&asked, None, T0 + 25 * HOUR))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProofError::ProofOutdated {
            generated: T0,
            max_age_secs: 86_400
        }
    ));
}

// ============================================================================
// Journey 4: optional requests
// ============================================================================

#[tokio::test]
async fn journey_4_optional_requests() {
    let w = world();
    w.issue(w.club(3));

    let requests = vec![
        ZeroKnowledgeProofRequest::new(
            1,
            CircuitId::AtomicQueryV3,
            query(CLUB_URL, "ClubCredential", json!({"member": {"$eq": true}})),
        ),
        // nothing answers this one
        ZeroKnowledgeProofRequest::new(
            2,
            CircuitId::AtomicQuerySigV2,
            query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}})),
        )
        .optional(),
        ZeroKnowledgeProofRequest::new(
            3,
            CircuitId::AtomicQueryV3,
            query(CLUB_URL, "ClubCredential", json!({"tier": {"$in": [1, 2, 3]}})),
        ),
    ];
    let mut ctx = ProofContext::new(w.holder).with_timestamp(T0);
    let responses = w.service.process_requests(&requests, &mut ctx).await.unwrap();
    let ids: Vec<u32> = responses.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 3]);

    let mut strict = requests;
    strict[1].optional = false;
    let err = w
        .service
        .process_requests(&strict, &mut ProofContext::new(w.holder).with_timestamp(T0))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
}

// ============================================================================
// Journey 5: linked multi-query proofs
// ============================================================================

#[tokio::test]
async fn journey_5_linked_multi_query() {
    let w = world();
    w.issue(w.kyc("KYCAgeCredential", 19960424, 1));

    let mut both = query(
        KYC_URL,
        "KYCAgeCredential",
        json!({"birthday": {"$lt": 20000101}, "documentType": {"$eq": 2}}),
    );
    both.group_id = Some(7);
    let mut age_lt = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}}));
    age_lt.group_id = Some(7);

    let nonce = Fr::from(555u64);
    let mut ctx = ProofContext::new(w.holder)
        .with_timestamp(T0)
        .with_link_nonce(7, nonce);
    let linked = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(1, CircuitId::LinkedMultiQuery10, both.clone()),
            &mut ctx,
        )
        .await
        .unwrap();
    let single = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(2, CircuitId::AtomicQueryV3, age_lt.clone()),
            &mut ctx,
        )
        .await
        .unwrap();

    // The linked proof and the single query share the group's link id
    let outcomes = w
        .verifier
        .verify_responses(&[
            (linked.clone(), verify_at(&both, None, T0 + 60)),
            (single.clone(), verify_at(&age_lt, None, T0 + 60)),
        ])
        .await
        .unwrap();
    assert_eq!(outcomes[0].circuit, CircuitId::LinkedMultiQuery10);
    assert!(outcomes[0].link_id.is_some());
    assert_eq!(outcomes[0].link_id, outcomes[1].link_id);

    // Query hashes are matched regardless of their order
    let signals = &linked.zk_proof.pub_signals;
    let reordered = rewrite(CircuitId::LinkedMultiQuery10, signals, |named| {
        let mut hashes = named.all("circuitQueryHash").unwrap();
        let mut outputs = named.all("operatorOutput").unwrap();
        hashes.reverse();
        outputs.reverse();
        named.set_all("circuitQueryHash", hashes);
        named.set_all("operatorOutput", outputs);
    });
    assert_ne!(&reordered, signals);
    assert!(w
        .verifier
        .verify_signals(CircuitId::LinkedMultiQuery10, &reordered, &verify_at(&both, None, T0 + 60))
        .await
        .is_ok());

    // A hash the request does not produce is rejected
    let tampered = rewrite(CircuitId::LinkedMultiQuery10, signals, |named| {
        let mut hashes = named.all("circuitQueryHash").unwrap();
        hashes[0] = Fr::from(1u64);
        named.set_all("circuitQueryHash", hashes);
    });
    assert_eq!(
        w.verifier
            .verify_signals(CircuitId::LinkedMultiQuery10, &tampered, &verify_at(&both, None, T0 + 60))
            .await
            .unwrap_err(),
        ProofError::QueryHashMismatch
    );
    let mut forged = linked.clone();
    forged.zk_proof.pub_signals = tampered;
    assert_eq!(
        w.verifier
            .verify_response(&forged, &verify_at(&both, None, T0 + 60))
            .await
            .unwrap_err(),
        ProofError::InvalidProof
    );

    // So is a proof for other values
    let mut other_doc = query(
        KYC_URL,
        "KYCAgeCredential",
        json!({"birthday": {"$lt": 20000101}, "documentType": {"$eq": 3}}),
    );
    other_doc.group_id = Some(7);
    assert_eq!(
        w.verifier
            .verify_response(&linked, &verify_at(&other_doc, None, T0 + 60))
            .await
            .unwrap_err(),
        ProofError::QueryHashMismatch
    );

    // A linked proof made with another nonce does not join the group
    let mut other_ctx = ProofContext::new(w.holder)
        .with_timestamp(T0)
        .with_link_nonce(7, Fr::from(556u64));
    let relinked = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(3, CircuitId::LinkedMultiQuery10, both.clone()),
            &mut other_ctx,
        )
        .await
        .unwrap();
    let err = w
        .verifier
        .verify_responses(&[
            (relinked, verify_at(&both, None, T0 + 60)),
            (single, verify_at(&age_lt, None, T0 + 60)),
        ])
        .await
        .unwrap_err();
    assert_eq!(err, ProofError::LinkIdMismatch { group_id: 7 });

    // Linked proofs only answer group queries
    let mut ungrouped = both.clone();
    ungrouped.group_id = None;
    assert!(matches!(
        w.service
            .generate_zk_proof(
                &ZeroKnowledgeProofRequest::new(4, CircuitId::LinkedMultiQuery10, ungrouped),
                &mut ProofContext::new(w.holder).with_timestamp(T0),
            )
            .await,
        Err(TesseraError::InvalidRequest(_))
    ));
}

// ============================================================================
// Journey 6: authentication and GIST freshness
// ============================================================================

#[tokio::test]
async fn journey_6_auth_and_gist_freshness() {
    let w = world();
    let challenge = Fr::from(31_337u64);
    let proof = w
        .service
        .generate_auth_proof(&ProofContext::new(w.holder).with_challenge(challenge))
        .await
        .unwrap();
    let auth = response(1, CircuitId::AuthV2, proof);

    let mut ctx = VerifyContext::default();
    ctx.challenge = Some(challenge);
    ctx.sender = Some(w.holder);
    ctx.options.now = Some(T0 + 10);
    let outcome = w.verifier.verify_response(&auth, &ctx).await.unwrap();
    assert_eq!(outcome.user_id, Some(w.holder.id));
    assert_eq!(outcome.states.len(), 1);
    assert_eq!(outcome.states[0].role, StateRole::Gist);
    assert_eq!(
        outcome.states[0].trust,
        StateTrust::Registered { replaced_at: None }
    );

    // Another challenge, another sender
    let mut wrong = ctx.clone();
    wrong.challenge = Some(Fr::from(1u64));
    assert!(matches!(
        w.verifier.verify_response(&auth, &wrong).await,
        Err(ProofError::IdOwnershipFailed(_))
    ));
    let mut impostor = ctx.clone();
    impostor.sender = Some(w.issuer);
    assert!(matches!(
        w.verifier.verify_response(&auth, &impostor).await,
        Err(ProofError::IdOwnershipFailed(_))
    ));

    // A root the ledger never had
    let unknown = rewrite(CircuitId::AuthV2, &auth.zk_proof.pub_signals, |named| {
        named.set("gistRoot", Fr::from(4_242u64));
    });
    assert!(matches!(
        w.verifier.verify_signals(CircuitId::AuthV2, &unknown, &ctx).await,
        Err(ProofError::GistRootNotFound(_))
    ));

    // The issuer publishes and the holder's GIST root is replaced
    let replaced_at = T0 + 100;
    w.oracle.set_time(replaced_at).unwrap();
    w.wallet
        .publish_state(&w.issuer, &Account([3; 20]))
        .await
        .unwrap();

    let mut recent = ctx.clone();
    recent.options.now = Some(replaced_at + 120);
    let outcome = w.verifier.verify_response(&auth, &recent).await.unwrap();
    assert_eq!(
        outcome.states[0].trust,
        StateTrust::Registered {
            replaced_at: Some(replaced_at)
        }
    );

    let mut late = ctx.clone();
    late.options.now = Some(replaced_at + 600);
    assert!(matches!(
        w.verifier.verify_response(&auth, &late).await,
        Err(ProofError::StateOutdated {
            age_secs: 600,
            max_age_secs: 300,
            ..
        })
    ));

    // A fresh proof is made against the current root
    let proof = w
        .service
        .generate_auth_proof(&ProofContext::new(w.holder).with_challenge(challenge))
        .await
        .unwrap();
    let outcome = w
        .verifier
        .verify_response(&response(2, CircuitId::AuthV2, proof), &late)
        .await
        .unwrap();
    assert_eq!(
        outcome.states[0].trust,
        StateTrust::Registered { replaced_at: None }
    );
}

// ============================================================================
// Journey 7: on-chain queries and nullifiers
// ============================================================================

#[tokio::test]
async fn journey_7_on_chain_and_nullifiers() {
    let w = world();
    w.issue(w.kyc("KYCAgeCredential", 19960424, 1));
    let verifier_did = w.wallet.create_identity(b"verifier").unwrap().did;
    let challenge = Fr::from(8_080u64);
    let age_lt = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20000101}}));

    // V2 on-chain: the query is committed to by its hash
    let sig_v2 = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(11, CircuitId::AtomicQuerySigV2OnChain, age_lt.clone()),
            &mut ProofContext::new(w.holder)
                .with_challenge(challenge)
                .with_timestamp(T0),
        )
        .await
        .unwrap();
    let outcome = w
        .verifier
        .verify_response(&sig_v2, &verify_at(&age_lt, Some(challenge), T0 + 60))
        .await
        .unwrap();
    assert_eq!(outcome.user_id, Some(w.holder.id));
    assert!(outcome.states.iter().any(|c| c.role == StateRole::Gist));

    assert!(matches!(
        w.verifier
            .verify_response(&sig_v2, &verify_at(&age_lt, Some(Fr::from(1u64)), T0 + 60))
            .await,
        Err(ProofError::IdOwnershipFailed(_))
    ));
    let later_birthday = query(KYC_URL, "KYCAgeCredential", json!({"birthday": {"$lt": 20100101}}));
    assert_eq!(
        w.verifier
            .verify_response(&sig_v2, &verify_at(&later_birthday, Some(challenge), T0 + 60))
            .await
            .unwrap_err(),
        ProofError::QueryHashMismatch
    );

    // On-chain circuits sign a challenge
    assert!(matches!(
        w.service
            .generate_zk_proof(
                &ZeroKnowledgeProofRequest::new(12, CircuitId::AtomicQuerySigV2OnChain, age_lt.clone()),
                &mut ProofContext::new(w.holder).with_timestamp(T0),
            )
            .await,
        Err(TesseraError::Proof(ProofError::ChallengeRequired(
            CircuitId::AtomicQuerySigV2OnChain
        )))
    ));

    // V3 off-chain with a nullifier for the verifier's session
    let session = Fr::from(2_024u64);
    let v3 = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(13, CircuitId::AtomicQueryV3, age_lt.clone())
                .with_nullifier_session(session),
            &mut ProofContext::new(w.holder)
                .with_verifier(verifier_did)
                .with_timestamp(T0),
        )
        .await
        .unwrap();
    let mut nullified = verify_at(&age_lt, None, T0 + 60);
    nullified.verifier_did = Some(verifier_did);
    nullified.nullifier_session_id = Some(session);
    w.verifier.verify_response(&v3, &nullified).await.unwrap();
    match PubSignals::parse(CircuitId::AtomicQueryV3, &v3.zk_proof.pub_signals).unwrap() {
        PubSignals::QueryV3(s) => assert_ne!(s.nullifier, Fr::from(0u64)),
        other => panic!("unexpected signals: {:?}", other),
    }

    let mut other_session = nullified.clone();
    other_session.nullifier_session_id = Some(Fr::from(2_025u64));
    assert!(matches!(
        w.verifier.verify_response(&v3, &other_session).await,
        Err(ProofError::NullifierMismatch(_))
    ));
    let mut other_verifier = nullified.clone();
    other_verifier.verifier_did = Some(w.issuer);
    assert!(matches!(
        w.verifier.verify_response(&v3, &other_verifier).await,
        Err(ProofError::NullifierMismatch(_))
    ));

    // V3 on-chain: challenge, verifier and session all enter the query hash
    let v3_on_chain = w
        .service
        .generate_zk_proof(
            &ZeroKnowledgeProofRequest::new(14, CircuitId::AtomicQueryV3OnChain, age_lt.clone())
                .with_nullifier_session(session),
            &mut ProofContext::new(w.holder)
                .with_challenge(challenge)
                .with_verifier(verifier_did)
                .with_timestamp(T0),
        )
        .await
        .unwrap();
    let mut on_chain = verify_at(&age_lt, Some(challenge), T0 + 60);
    on_chain.verifier_did = Some(verifier_did);
    on_chain.nullifier_session_id = Some(session);
    let outcome = w.verifier.verify_response(&v3_on_chain, &on_chain).await.unwrap();
    assert!(outcome.states.iter().any(|c| c.role == StateRole::Gist));

    let mut wrong_session = on_chain.clone();
    wrong_session.nullifier_session_id = Some(Fr::from(2_025u64));
    assert_eq!(
        w.verifier
            .verify_response(&v3_on_chain, &wrong_session)
            .await
            .unwrap_err(),
        ProofError::QueryHashMismatch
    );
    let mut wrong_challenge = on_chain.clone();
    wrong_challenge.challenge = Some(Fr::from(1u64));
    assert!(matches!(
        w.verifier.verify_response(&v3_on_chain, &wrong_challenge).await,
        Err(ProofError::IdOwnershipFailed(_))
    ));
}

// ============================================================================
// Journey 8: state transition proofs
// ============================================================================

#[tokio::test]
async fn journey_8_state_transitions() {
    let w = world();
    let transitioner = StateTransitioner::new(
        w.wallet.storage().trees.clone(),
        w.oracle.clone(),
        w.prover.clone(),
        RetryPolicy::default(),
    );
    let transition_proof = |did: &Did| {
        let record = w.wallet.identity(did).unwrap();
        let auth = w.wallet.get_actual_auth_credential(did).unwrap();
        let plan = transitioner.plan(&record).unwrap();
        let request = transitioner.request(&record, &plan, &auth).unwrap();
        (
            plan,
            generate_inputs(
                CircuitId::StateTransition,
                &CircuitRequest::StateTransition(request),
            )
            .unwrap(),
        )
    };
    let mut ctx = VerifyContext::default();
    ctx.sender = Some(w.issuer);
    ctx.options.now = Some(T0 + 10);

    // From genesis: the ledger does not know the old state yet
    let (plan, inputs) = transition_proof(&w.issuer);
    assert!(plan.is_old_state_genesis);
    let proof = w.prover.generate(&inputs).await.unwrap();
    let outcome = w
        .verifier
        .verify_response(&response(1, CircuitId::StateTransition, proof), &ctx)
        .await
        .unwrap();
    assert_eq!(outcome.states[0].trust, StateTrust::Genesis);

    w.wallet
        .publish_state(&w.issuer, &Account([4; 20]))
        .await
        .unwrap();

    // From the published state
    let credential = w
        .wallet
        .issue_credential(&w.issuer, &w.kyc("KYCAgeCredential", 19960424, 1))
        .unwrap();
    w.wallet
        .add_credentials_to_merkle_tree(&w.issuer, &[credential])
        .unwrap();
    let (plan, inputs) = transition_proof(&w.issuer);
    assert!(!plan.is_old_state_genesis);
    let proof = w.prover.generate(&inputs).await.unwrap();
    let signals = proof.pub_signals.clone();
    let outcome = w
        .verifier
        .verify_response(&response(2, CircuitId::StateTransition, proof), &ctx)
        .await
        .unwrap();
    assert_eq!(outcome.user_id, Some(w.issuer.id));
    assert_eq!(outcome.states[0].role, StateRole::User);
    assert_eq!(outcome.states[0].state, plan.old_state);
    assert_eq!(
        outcome.states[0].trust,
        StateTrust::Registered { replaced_at: None }
    );

    // The genesis flag must agree with the old state
    let flipped = rewrite(CircuitId::StateTransition, &signals, |named| {
        named.set("isOldStateGenesis", Fr::from(1u64));
    });
    assert!(matches!(
        w.verifier
            .verify_signals(CircuitId::StateTransition, &flipped, &ctx)
            .await,
        Err(ProofError::InvalidSignal {
            name: "isOldStateGenesis",
            ..
        })
    ));

    // Only the identity itself may send its transition
    let mut other = ctx.clone();
    other.sender = Some(w.holder);
    assert!(matches!(
        w.verifier
            .verify_signals(CircuitId::StateTransition, &signals, &other)
            .await,
        Err(ProofError::IdOwnershipFailed(_))
    ));

    // An old state the ledger never saw
    let unknown = rewrite(CircuitId::StateTransition, &signals, |named| {
        named.set("oldUserState", Fr::from(99u64));
    });
    assert!(matches!(
        w.verifier
            .verify_signals(CircuitId::StateTransition, &unknown, &ctx)
            .await,
        Err(ProofError::StateNotRegistered(_))
    ));
}
