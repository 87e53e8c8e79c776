//! Proof service: answers a verifier's zero-knowledge proof requests with the
//! holder's credentials.
//!
//! For each request the service picks the first stored credential that
//! belongs to the holder (or one of its profiles), satisfies the query, has
//! not expired, carries a proof of the required type and is not revoked. It
//! then gathers the sub-proofs the circuit needs, generates the circuit
//! inputs and runs the prover.

use std::collections::BTreeMap;
use std::sync::Arc;

use ark_ff::Zero;
use chrono::{DateTime, Utc};
use rand::RngCore;
use tessera_claim::{verify_core_claim_match, CoreClaim, CredentialProof, Merklizer, W3CCredential};
use tessera_core::field::fr_from_le_bytes;
use tessera_core::{CircuitId, Did, ErrorCategory, Fr, Id, ProofType, Timestamp};
use tessera_proof::{
    generate_inputs, AuthRequest, CircuitQuery, CircuitRequest, IdentityNonces,
    InclusionProofData, LinkedRequest, NonRevocationProof, PreparedCredential, ProofBranch,
    Prover, QueryRequest, RevocationStatus, RevocationStatusResolver, SignatureProofData,
    UserAuth, VerifiablePresentation, ZkProof, ZkProofResponse,
};
use tessera_query::{filter_credentials, parse_query, Operator, ProofQuery};
use tracing::{debug, info, warn};

use crate::error::{TesseraError, TesseraResult};
use crate::store::IdentityRecord;
use crate::wallet::IdentityWallet;

/// One proof a verifier asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroKnowledgeProofRequest {
    pub id: u32,
    pub circuit_id: CircuitId,
    /// A failing optional request is left out of the batch.
    pub optional: bool,
    pub query: ProofQuery,
    pub nullifier_session_id: Option<Fr>,
}

impl ZeroKnowledgeProofRequest {
    pub fn new(id: u32, circuit_id: CircuitId, query: ProofQuery) -> Self {
        Self {
            id,
            circuit_id,
            optional: false,
            query,
            nullifier_session_id: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_nullifier_session(mut self, session_id: Fr) -> Self {
        self.nullifier_session_id = Some(session_id);
        self
    }
}

/// Holder-side context shared by the requests of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofContext {
    /// Genesis or profile DID the proofs are made for.
    pub holder: Did,
    /// `requestID` of off-chain circuits, signed challenge of on-chain ones.
    pub challenge: Option<Fr>,
    pub verifier_did: Option<Did>,
    /// Unix seconds; the wall clock when `None`.
    pub timestamp: Option<u64>,
    link_nonces: BTreeMap<u64, Fr>,
}

impl ProofContext {
    pub fn new(holder: Did) -> Self {
        Self {
            holder,
            challenge: None,
            verifier_did: None,
            timestamp: None,
            link_nonces: BTreeMap::new(),
        }
    }

    pub fn with_challenge(mut self, challenge: Fr) -> Self {
        self.challenge = Some(challenge);
        self
    }

    pub fn with_verifier(mut self, verifier: Did) -> Self {
        self.verifier_did = Some(verifier);
        self
    }

    pub fn with_timestamp(mut self, seconds: u64) -> Self {
        self.timestamp = Some(seconds);
        self
    }

    /// Pin the link nonce of a group instead of drawing a random one.
    pub fn with_link_nonce(mut self, group_id: u64, nonce: Fr) -> Self {
        self.link_nonces.insert(group_id, nonce);
        self
    }

    /// The link nonce of `group_id`, drawn on first use.
    pub fn link_nonce(&mut self, group_id: u64) -> TesseraResult<Fr> {
        if let Some(nonce) = self.link_nonces.get(&group_id) {
            return Ok(*nonce);
        }
        let nonce = random_nonce()?;
        self.link_nonces.insert(group_id, nonce);
        Ok(nonce)
    }

    fn now(&self) -> u64 {
        self.timestamp.unwrap_or_else(|| Timestamp::now().seconds())
    }
}

fn random_nonce() -> TesseraResult<Fr> {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 31];
        rng.fill_bytes(&mut bytes);
        let nonce = fr_from_le_bytes(&bytes)?;
        if !nonce.is_zero() {
            return Ok(nonce);
        }
    }
}

/// Failures an optional request may be dropped for.
fn is_skippable(error: &TesseraError) -> bool {
    matches!(error, TesseraError::AllAuthCredentialsRevoked(_))
        || error.category() == ErrorCategory::NotFound
}

/// A credential picked for a request, with its revocation status.
struct Selected {
    credential: W3CCredential,
    proof_type: ProofType,
    status: RevocationStatus,
}

fn usable_proof_type(credential: &W3CCredential, requested: Option<ProofType>) -> Option<ProofType> {
    match requested {
        Some(t) => credential.has_proof(t).then_some(t),
        None => [ProofType::BjjSignature, ProofType::Iden3SparseMerkleTreeProof]
            .into_iter()
            .find(|t| credential.has_proof(*t)),
    }
}

pub struct ProofService {
    wallet: Arc<IdentityWallet>,
    prover: Arc<dyn Prover>,
    resolver: Arc<dyn RevocationStatusResolver>,
}

impl ProofService {
    pub fn new(
        wallet: Arc<IdentityWallet>,
        prover: Arc<dyn Prover>,
        resolver: Arc<dyn RevocationStatusResolver>,
    ) -> Self {
        Self {
            wallet,
            prover,
            resolver,
        }
    }

    /// Answer every request in order. An optional request that finds no
    /// usable credential is skipped; any other failure fails the batch.
    pub async fn process_requests(
        &self,
        requests: &[ZeroKnowledgeProofRequest],
        ctx: &mut ProofContext,
    ) -> TesseraResult<Vec<ZkProofResponse>> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            match self.generate_zk_proof(request, ctx).await {
                Ok(response) => responses.push(response),
                Err(e) if request.optional && is_skippable(&e) => {
                    warn!(
                        id = request.id,
                        circuit = %request.circuit_id,
                        error = %e,
                        "optional proof request skipped"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }

    pub async fn generate_zk_proof(
        &self,
        request: &ZeroKnowledgeProofRequest,
        ctx: &mut ProofContext,
    ) -> TesseraResult<ZkProofResponse> {
        let circuit = request.circuit_id;
        if !circuit.is_query_circuit() {
            return Err(TesseraError::InvalidRequest(format!(
                "{} does not prove a credential query",
                circuit
            )));
        }
        let query = &request.query;
        let loader = self.wallet.loader().as_ref();
        let (holder, profile_nonce) = self.wallet.resolve_identity(&ctx.holder)?;

        let selected = self.select_credential(&holder, circuit, query, ctx.now()).await?;
        let claim = selected
            .credential
            .core_claim_from_proof(selected.proof_type)?;
        verify_core_claim_match(&claim, &selected.credential, loader)?;

        let def = query.type_definition(loader)?;
        let metas = parse_query(query, &def, circuit)?;
        let merklizer = if def.is_merklized() {
            Some(Merklizer::merklize(&selected.credential, &def)?)
        } else {
            None
        };
        let link_nonce = match query.group_id {
            Some(group_id) => ctx.link_nonce(group_id)?,
            None => Fr::zero(),
        };

        let (circuit_request, vp) = if circuit == CircuitId::LinkedMultiQuery10 {
            if query.group_id.is_none() {
                return Err(TesseraError::InvalidRequest(format!(
                    "{} needs a groupId",
                    circuit
                )));
            }
            let queries = metas
                .iter()
                .map(|m| CircuitQuery::from_metadata(m, &claim, merklizer.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            let linked = LinkedRequest {
                link_nonce,
                claim,
                queries,
            };
            (CircuitRequest::Linked(linked), None)
        } else {
            let meta = match metas.as_slice() {
                [meta] => meta,
                _ => {
                    return Err(TesseraError::InvalidRequest(format!(
                        "{} proves one field query, got {}",
                        circuit,
                        metas.len()
                    )))
                }
            };
            let circuit_query = CircuitQuery::from_metadata(meta, &claim, merklizer.as_ref())?;
            let vp = if meta.operator == Operator::Sd {
                Some(VerifiablePresentation::disclose(
                    &selected.credential,
                    &meta.field_name,
                )?)
            } else {
                None
            };
            let nonces = IdentityNonces {
                genesis_id: holder.did.id,
                profile_nonce,
                claim_subject_profile_nonce: self.subject_profile_nonce(&selected.credential)?,
            };
            let user = if circuit.is_on_chain() {
                Some(self.user_auth(&holder, ctx.challenge).await?)
            } else {
                None
            };
            let request_id = if circuit.is_on_chain() {
                Fr::from(request.id as u64)
            } else {
                ctx.challenge
                    .unwrap_or_else(|| Fr::from(request.id as u64))
            };
            let prepared = self.prepare_credential(&selected, claim).await?;
            let query_request = QueryRequest {
                request_id,
                nonces,
                credential: prepared,
                query: circuit_query,
                skip_revocation_check: query.skip_revocation_check(),
                timestamp: ctx.now(),
                user,
                link_nonce,
                verifier_id: ctx
                    .verifier_did
                    .map(|d| d.id.to_fr())
                    .unwrap_or_else(Fr::zero),
                nullifier_session_id: request.nullifier_session_id.unwrap_or_else(Fr::zero),
            };
            (CircuitRequest::Query(query_request), vp)
        };

        let inputs = generate_inputs(circuit, &circuit_request)?;
        let zk_proof = self.prover.generate(&inputs).await?;
        info!(
            id = request.id,
            circuit = %circuit,
            credential = %selected.credential.id,
            proof_type = %selected.proof_type,
            "proof generated"
        );
        Ok(ZkProofResponse {
            id: request.id,
            circuit_id: circuit,
            zk_proof,
            vp,
        })
    }

    /// `authV2` proof of control over `ctx.holder`, signing `ctx.challenge`.
    pub async fn generate_auth_proof(&self, ctx: &ProofContext) -> TesseraResult<ZkProof> {
        let (holder, profile_nonce) = self.wallet.resolve_identity(&ctx.holder)?;
        let request = AuthRequest {
            nonces: IdentityNonces {
                genesis_id: holder.did.id,
                profile_nonce,
                claim_subject_profile_nonce: Fr::zero(),
            },
            user: self.user_auth(&holder, ctx.challenge).await?,
        };
        let inputs = generate_inputs(CircuitId::AuthV2, &CircuitRequest::Auth(request))?;
        let proof = self.prover.generate(&inputs).await?;
        info!(did = %ctx.holder, "auth proof generated");
        Ok(proof)
    }

    // -- selection ------------------------------------------------------------

    async fn select_credential(
        &self,
        holder: &IdentityRecord,
        circuit: CircuitId,
        query: &ProofQuery,
        now: u64,
    ) -> TesseraResult<Selected> {
        let storage = self.wallet.storage();
        let mut subjects: Vec<Id> = vec![holder.did.id];
        subjects.extend(
            storage
                .identities
                .profiles_of(&holder.did)?
                .into_iter()
                .map(|p| p.did.id),
        );
        let owned: Vec<W3CCredential> = storage
            .credentials
            .list_credentials()?
            .into_iter()
            .filter(|c| matches!(c.subject_did(), Ok(Some(d)) if subjects.contains(&d.id)))
            .collect();

        let matching = filter_credentials(&owned, query, self.wallet.loader().as_ref())?;
        let now = DateTime::<Utc>::from_timestamp(now as i64, 0).unwrap_or_else(Utc::now);
        let requested = query.proof_type.or(circuit.fixed_proof_type());

        for credential in matching {
            if credential.is_expired(now) {
                debug!(credential = %credential.id, "credential expired");
                continue;
            }
            let Some(proof_type) = usable_proof_type(credential, requested) else {
                debug!(credential = %credential.id, "credential lacks the required proof");
                continue;
            };
            let status = self
                .resolver
                .resolve(&credential.issuer_did()?, &credential.credential_status)
                .await?;
            if status.is_revoked() && !query.skip_revocation_check() {
                warn!(credential = %credential.id, "credential revoked, skipped");
                continue;
            }
            return Ok(Selected {
                credential: credential.clone(),
                proof_type,
                status,
            });
        }
        Err(TesseraError::NotFound(format!(
            "credential of type {} answering the {} query",
            query.credential_type, circuit
        )))
    }

    /// Profile nonce of the DID the credential was issued to.
    fn subject_profile_nonce(&self, credential: &W3CCredential) -> TesseraResult<Fr> {
        let Some(subject) = credential.subject_did()? else {
            return Ok(Fr::zero());
        };
        Ok(self
            .wallet
            .storage()
            .identities
            .get_profile(&subject)?
            .map(|p| p.nonce)
            .unwrap_or_else(Fr::zero))
    }

    // -- preparation ----------------------------------------------------------

    async fn prepare_credential(
        &self,
        selected: &Selected,
        claim: CoreClaim,
    ) -> TesseraResult<PreparedCredential> {
        let issuer = selected.credential.issuer_did()?;
        let branch = match selected.credential.get_proof(selected.proof_type) {
            Some(CredentialProof::BjjSignature(p)) => {
                let auth_non_revocation = match &p.issuer_data.credential_status {
                    Some(status) => Some(self.resolver.resolve(&issuer, status).await?.mtp),
                    None => None,
                };
                ProofBranch::Signature(SignatureProofData {
                    signature: Some(p.signature()?),
                    issuer_auth_claim: p.auth_core_claim()?,
                    issuer_auth_state: p.issuer_data.state.tree_state()?,
                    issuer_auth_inclusion: p.issuer_data.mtp.clone(),
                    issuer_auth_non_revocation: auth_non_revocation,
                })
            }
            Some(CredentialProof::Iden3SparseMerkleTree(p)) => {
                ProofBranch::MerkleInclusion(InclusionProofData {
                    issuer_state: p.issuer_data.state.tree_state()?,
                    mtp: Some(p.mtp.clone()),
                })
            }
            None => {
                return Err(TesseraError::InvalidRequest(format!(
                    "credential {} has no {} proof",
                    selected.credential.id, selected.proof_type
                )))
            }
        };
        Ok(PreparedCredential {
            claim,
            issuer_id: issuer.id,
            branch,
            non_revocation: Some(NonRevocationProof {
                tree_state: selected.status.issuer,
                proof: selected.status.mtp.clone(),
            }),
        })
    }

    /// Auth claim proofs, challenge signature and GIST proof of the holder.
    async fn user_auth(
        &self,
        holder: &IdentityRecord,
        challenge: Option<Fr>,
    ) -> TesseraResult<UserAuth> {
        let auth = self.wallet.get_actual_auth_credential(&holder.did)?;
        let data = self.wallet.auth_proof_data(holder, &auth)?;
        let signature = challenge.map(|c| auth.key.sign_poseidon(&c)).transpose()?;
        let gist = self.wallet.oracle().get_gist_proof(&holder.did.id).await?;
        Ok(UserAuth {
            auth: data,
            challenge,
            signature,
            gist: Some(gist),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::fixtures::*;
    use serde_json::json;
    use tessera_proof::testing::{SimulatedKeys, SimulatedProver};
    use tessera_proof::{Verifier, VerifyContext};

    struct Harness {
        env: TestEnv,
        service: ProofService,
        issuer: Did,
        holder: Did,
    }

    fn harness() -> Harness {
        let env = env();
        let issuer = env.wallet.create_identity(b"issuer").unwrap().did;
        let holder = env.wallet.create_identity(b"holder").unwrap().did;
        let service = ProofService::new(
            env.wallet.clone(),
            Arc::new(SimulatedProver::new()),
            env.wallet.clone(),
        );
        Harness {
            env,
            service,
            issuer,
            holder,
        }
    }

    impl Harness {
        fn issue(&self, request: crate::wallet::CredentialRequest) -> W3CCredential {
            let credential = self.env.wallet.issue_credential(&self.issuer, &request).unwrap();
            self.env
                .wallet
                .storage()
                .credentials
                .save_credential(&credential)
                .unwrap();
            credential
        }

        fn verifier(&self) -> Verifier {
            Verifier::new(
                self.env.oracle.clone(),
                self.env.loader.clone(),
                self.env.prover.clone(),
                Arc::new(SimulatedKeys),
            )
        }
    }

    fn employee_query(subject: serde_json::Value) -> ProofQuery {
        ProofQuery::new(EMPLOYEE_URL, "EmployeeCredential")
            .with_subject(subject)
            .unwrap()
    }

    #[test]
    fn test_link_nonce_is_stable_per_group() {
        let holder = Did::genesis_from_state(
            crate::config::EngineConfig::default().did_type().unwrap(),
            &Fr::from(1u64),
        )
        .unwrap();
        let mut ctx = ProofContext::new(holder).with_link_nonce(7, Fr::from(99u64));
        assert_eq!(ctx.link_nonce(7).unwrap(), Fr::from(99u64));
        let drawn = ctx.link_nonce(8).unwrap();
        assert!(!drawn.is_zero());
        assert_eq!(ctx.link_nonce(8).unwrap(), drawn);
    }

    #[tokio::test]
    async fn test_sig_v2_proof_verifies() {
        let h = harness();
        h.issue(employee_request(&h.holder, 10));
        let query = employee_query(json!({"val": {"$eq": 10}}));
        let request = ZeroKnowledgeProofRequest::new(1, CircuitId::AtomicQuerySigV2, query.clone());
        let mut ctx = ProofContext::new(h.holder);

        let response = h.service.generate_zk_proof(&request, &mut ctx).await.unwrap();
        assert_eq!(response.circuit_id, CircuitId::AtomicQuerySigV2);
        assert!(response.vp.is_none());

        let mut verify_ctx = VerifyContext::for_query(query);
        verify_ctx.challenge = Some(Fr::from(1u64));
        let outcome = h.verifier().verify_response(&response, &verify_ctx).await.unwrap();
        assert_eq!(outcome.user_id, Some(h.holder.id));
    }

    #[tokio::test]
    async fn test_no_matching_credential() {
        let h = harness();
        h.issue(employee_request(&h.holder, 10));
        let request = ZeroKnowledgeProofRequest::new(
            1,
            CircuitId::AtomicQuerySigV2,
            employee_query(json!({"val": {"$eq": 11}})),
        );
        let err = h
            .service
            .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mtp_circuit_needs_published_claim() {
        let h = harness();
        h.issue(employee_request(&h.holder, 10));
        let request = ZeroKnowledgeProofRequest::new(
            1,
            CircuitId::AtomicQueryMtpV2,
            employee_query(json!({"val": {"$eq": 10}})),
        );
        // only a signature proof so far
        assert!(matches!(
            h.service
                .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
                .await,
            Err(TesseraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_optional_requests_are_skipped() {
        let h = harness();
        h.issue(employee_request(&h.holder, 10));
        let requests = vec![
            ZeroKnowledgeProofRequest::new(
                1,
                CircuitId::AtomicQuerySigV2,
                employee_query(json!({"val": {"$eq": 10}})),
            ),
            ZeroKnowledgeProofRequest::new(
                2,
                CircuitId::AtomicQuerySigV2,
                employee_query(json!({"val": {"$gt": 100}})),
            )
            .optional(),
        ];
        let responses = h
            .service
            .process_requests(&requests, &mut ProofContext::new(h.holder))
            .await
            .unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, 1);

        let mut required = requests.clone();
        required[1].optional = false;
        assert!(h
            .service
            .process_requests(&required, &mut ProofContext::new(h.holder))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_optional_request_with_bad_shape_fails_batch() {
        let h = harness();
        h.issue(employee_request(&h.holder, 10));
        let requests = vec![ZeroKnowledgeProofRequest::new(
            1,
            CircuitId::AuthV2,
            employee_query(json!({"val": {"$eq": 10}})),
        )
        .optional()];
        assert!(matches!(
            h.service
                .process_requests(&requests, &mut ProofContext::new(h.holder))
                .await,
            Err(TesseraError::InvalidRequest(_))
        ));
        assert!(is_skippable(&TesseraError::AllAuthCredentialsRevoked("x".into())));
        assert!(!is_skippable(&TesseraError::Config("x".into())));
    }

    #[tokio::test]
    async fn test_revoked_credential_is_not_selected() {
        let h = harness();
        h.issue(employee_request(&h.holder, 10).with_revocation_nonce(5));
        h.env.wallet.revoke_credential(&h.issuer, 5).unwrap();
        h.env
            .wallet
            .publish_state(&h.issuer, &Account([1; 20]))
            .await
            .unwrap();

        let query = employee_query(json!({"val": {"$eq": 10}}));
        let request = ZeroKnowledgeProofRequest::new(1, CircuitId::AtomicQuerySigV2, query.clone());
        assert!(matches!(
            h.service
                .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
                .await,
            Err(TesseraError::NotFound(_))
        ));

        let mut skipping = query;
        skipping.skip_claim_revocation_check = Some(true);
        let request = ZeroKnowledgeProofRequest::new(2, CircuitId::AtomicQuerySigV2, skipping);
        assert!(h
            .service
            .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_selective_disclosure_carries_presentation() {
        let h = harness();
        h.issue(membership_request(&h.holder, 10, "gold"));
        let query = ProofQuery::new(MEMBERSHIP_URL, "MembershipCredential")
            .with_subject(json!({"name": {}}))
            .unwrap();
        let request = ZeroKnowledgeProofRequest::new(3, CircuitId::AtomicQueryV3, query.clone());
        let response = h
            .service
            .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
            .await
            .unwrap();
        let vp = response.vp.clone().unwrap();
        assert_eq!(
            vp.verifiable_credential.credential_subject["name"],
            json!("gold")
        );
        h.verifier()
            .verify_response(&response, &VerifyContext::for_query(query))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_profile_credentials_are_found() {
        let h = harness();
        let profile = h
            .env
            .wallet
            .create_profile(&h.holder, Fr::from(3u64), "verifier")
            .unwrap();
        h.issue(employee_request(&profile.did, 10));
        let request = ZeroKnowledgeProofRequest::new(
            1,
            CircuitId::AtomicQueryV3,
            employee_query(json!({"val": {"$eq": 10}})),
        );
        let response = h
            .service
            .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
            .await
            .unwrap();
        assert_eq!(response.id, 1);
    }

    #[tokio::test]
    async fn test_auth_proof_rejects_missing_challenge() {
        let h = harness();
        let err = h
            .service
            .generate_auth_proof(&ProofContext::new(h.holder))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Proof(tessera_proof::ProofError::ChallengeRequired(CircuitId::AuthV2))
        ));

        let proof = h
            .service
            .generate_auth_proof(&ProofContext::new(h.holder).with_challenge(Fr::from(5u64)))
            .await
            .unwrap();
        assert!(!proof.pub_signals.is_empty());
    }

    #[tokio::test]
    async fn test_state_transition_circuit_is_rejected() {
        let h = harness();
        let request = ZeroKnowledgeProofRequest::new(
            1,
            CircuitId::StateTransition,
            employee_query(json!({})),
        );
        assert!(matches!(
            h.service
                .generate_zk_proof(&request, &mut ProofContext::new(h.holder))
                .await,
            Err(TesseraError::InvalidRequest(_))
        ));
    }
}
