//! Circuit input generation.
//!
//! [`generate_inputs`] dispatches on [`CircuitId`] to one pure marshaling
//! function per circuit. Sub-proofs the circuit needs are checked before any
//! signal is written and fail with a specific `Empty*` error. The branch of a
//! dual-proof circuit that is not in use is zero-filled on purpose: circuits
//! have a fixed arity and need every signal.

use ark_ff::Zero;
use tessera_claim::CoreClaim;
use tessera_core::{BjjSignature, CircuitId, Fr, Id, ProofType};
use tessera_merkle::{
    Proof, TreeState, CREDENTIAL_TREE_DEPTH, GIST_DEPTH, IDENTITY_TREE_DEPTH,
};
use tessera_query::QueryError;

use crate::circuit_query::CircuitQuery;
use crate::error::{ProofError, ProofResult};
use crate::signals::LINKED_QUERY_COUNT;
use crate::types::{CircuitInputs, GistProof};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A proof against an issuer tree state.
#[derive(Debug, Clone, PartialEq)]
pub struct NonRevocationProof {
    pub tree_state: TreeState,
    pub proof: Proof,
}

/// Issuer claim included in the issuer's claims tree.
#[derive(Debug, Clone, PartialEq)]
pub struct InclusionProofData {
    pub issuer_state: TreeState,
    pub mtp: Option<Proof>,
}

/// Issuer claim signed with the issuer's auth key.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureProofData {
    pub signature: Option<BjjSignature>,
    pub issuer_auth_claim: CoreClaim,
    pub issuer_auth_state: TreeState,
    pub issuer_auth_inclusion: Option<Proof>,
    pub issuer_auth_non_revocation: Option<Proof>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProofBranch {
    Signature(SignatureProofData),
    MerkleInclusion(InclusionProofData),
}

impl ProofBranch {
    pub fn proof_type(&self) -> ProofType {
        match self {
            ProofBranch::Signature(_) => ProofType::BjjSignature,
            ProofBranch::MerkleInclusion(_) => ProofType::Iden3SparseMerkleTreeProof,
        }
    }

    /// The issuer state the branch proves against.
    pub fn issuer_state(&self) -> &TreeState {
        match self {
            ProofBranch::Signature(s) => &s.issuer_auth_state,
            ProofBranch::MerkleInclusion(m) => &m.issuer_state,
        }
    }
}

/// A credential with everything a query circuit needs about it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCredential {
    pub claim: CoreClaim,
    pub issuer_id: Id,
    pub branch: ProofBranch,
    /// Non-revocation of the claim's nonce in the issuer's revocation tree.
    pub non_revocation: Option<NonRevocationProof>,
}

/// Which identity proves, and under which profiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityNonces {
    pub genesis_id: Id,
    pub profile_nonce: Fr,
    pub claim_subject_profile_nonce: Fr,
}

impl IdentityNonces {
    pub fn genesis(genesis_id: Id) -> Self {
        Self {
            genesis_id,
            profile_nonce: Fr::zero(),
            claim_subject_profile_nonce: Fr::zero(),
        }
    }
}

/// The holder's auth claim and its proofs against the holder's state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthProofData {
    pub auth_claim: CoreClaim,
    pub tree_state: TreeState,
    pub inclusion: Option<Proof>,
    pub non_revocation: Option<Proof>,
}

/// Holder authentication for `authV2` and on-chain query circuits.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAuth {
    pub auth: AuthProofData,
    pub challenge: Option<Fr>,
    pub signature: Option<BjjSignature>,
    pub gist: Option<GistProof>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub nonces: IdentityNonces,
    pub user: UserAuth,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateTransitionRequest {
    pub id: Id,
    pub is_old_state_genesis: bool,
    /// Auth claim proofs against the old state.
    pub auth: AuthProofData,
    pub new_state: TreeState,
    pub new_state_inclusion: Option<Proof>,
    /// Signature over `Poseidon(oldState, newState)`.
    pub signature: Option<BjjSignature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub request_id: Fr,
    pub nonces: IdentityNonces,
    pub credential: PreparedCredential,
    pub query: CircuitQuery,
    pub skip_revocation_check: bool,
    pub timestamp: u64,
    /// Required by on-chain circuits.
    pub user: Option<UserAuth>,
    pub link_nonce: Fr,
    pub verifier_id: Fr,
    pub nullifier_session_id: Fr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedRequest {
    pub link_nonce: Fr,
    pub claim: CoreClaim,
    pub queries: Vec<CircuitQuery>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitRequest {
    Auth(AuthRequest),
    StateTransition(StateTransitionRequest),
    Query(QueryRequest),
    Linked(LinkedRequest),
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn generate_inputs(circuit: CircuitId, request: &CircuitRequest) -> ProofResult<CircuitInputs> {
    let inputs = match (circuit, request) {
        (CircuitId::AuthV2, CircuitRequest::Auth(r)) => auth_v2(r)?,
        (CircuitId::StateTransition, CircuitRequest::StateTransition(r)) => state_transition(r)?,
        (CircuitId::AtomicQueryMtpV2, CircuitRequest::Query(r)) => mtp_v2(circuit, r)?,
        (CircuitId::AtomicQueryMtpV2OnChain, CircuitRequest::Query(r)) => {
            let mut inputs = mtp_v2(circuit, r)?;
            on_chain_auth(&mut inputs, circuit, r)?;
            inputs
        }
        (CircuitId::AtomicQuerySigV2, CircuitRequest::Query(r)) => sig_v2(circuit, r)?,
        (CircuitId::AtomicQuerySigV2OnChain, CircuitRequest::Query(r)) => {
            let mut inputs = sig_v2(circuit, r)?;
            on_chain_auth(&mut inputs, circuit, r)?;
            inputs
        }
        (CircuitId::AtomicQueryV3, CircuitRequest::Query(r)) => v3(circuit, r)?,
        (CircuitId::AtomicQueryV3OnChain, CircuitRequest::Query(r)) => {
            let mut inputs = v3(circuit, r)?;
            on_chain_auth(&mut inputs, circuit, r)?;
            inputs.set_bool("isBJJAuthEnabled", true);
            inputs
        }
        (CircuitId::LinkedMultiQuery10, CircuitRequest::Linked(r)) => linked_multi_query(r)?,
        (circuit, _) => {
            return Err(ProofError::InvalidRequest(format!(
                "request does not fit circuit {}",
                circuit
            )))
        }
    };
    tracing::debug!(circuit = %circuit, signals = inputs.signals.len(), "generated circuit inputs");
    Ok(inputs)
}

// ---------------------------------------------------------------------------
// Shared marshaling
// ---------------------------------------------------------------------------

fn set_claim(inputs: &mut CircuitInputs, name: &str, claim: &CoreClaim) {
    inputs.set_all(name, &claim.slots());
}

fn set_mtp(inputs: &mut CircuitInputs, name: &str, proof: &Proof, depth: usize) -> ProofResult<()> {
    inputs.set_all(name, &proof.circuit_siblings(depth)?);
    Ok(())
}

/// Siblings plus `AuxHi`/`AuxHv`/`NoAux` of an exclusion-capable proof.
fn set_mtp_with_aux(
    inputs: &mut CircuitInputs,
    name: &str,
    proof: &Proof,
    depth: usize,
) -> ProofResult<()> {
    set_mtp(inputs, name, proof, depth)?;
    let aux = proof.aux_signals();
    inputs.set(&format!("{}AuxHi", name), &aux.key);
    inputs.set(&format!("{}AuxHv", name), &aux.value);
    inputs.set(&format!("{}NoAux", name), &aux.no_aux);
    Ok(())
}

fn zero_mtp_with_aux(inputs: &mut CircuitInputs, name: &str, depth: usize) {
    inputs.set_all(name, &vec![Fr::zero(); depth]);
    inputs.set(&format!("{}AuxHi", name), &Fr::zero());
    inputs.set(&format!("{}AuxHv", name), &Fr::zero());
    inputs.set(&format!("{}NoAux", name), &Fr::zero());
}

fn set_roots(inputs: &mut CircuitInputs, names: [&str; 3], state: &TreeState) {
    inputs.set(names[0], &state.claims_root());
    inputs.set(names[1], &state.revocation_root());
    inputs.set(names[2], &state.root_of_roots());
}

fn set_signature(inputs: &mut CircuitInputs, prefix: &str, signature: &BjjSignature) {
    inputs.set(&format!("{}R8x", prefix), &signature.r8.x);
    inputs.set(&format!("{}R8y", prefix), &signature.r8.y);
    inputs.set(&format!("{}S", prefix), &signature.s_as_fr());
}

fn zero_signature(inputs: &mut CircuitInputs, prefix: &str) {
    for suffix in ["R8x", "R8y", "S"] {
        inputs.set(&format!("{}{}", prefix, suffix), &Fr::zero());
    }
}

fn require_challenge(circuit: CircuitId, user: &UserAuth) -> ProofResult<Fr> {
    user.challenge.ok_or(ProofError::ChallengeRequired(circuit))
}

/// Auth claim, challenge signature and GIST signals shared by `authV2` and
/// the on-chain query circuits.
fn user_auth_signals(
    inputs: &mut CircuitInputs,
    circuit: CircuitId,
    user: &UserAuth,
    root_names: [&str; 3],
    state_name: &str,
) -> ProofResult<()> {
    let challenge = require_challenge(circuit, user)?;
    let inclusion = user.auth.inclusion.as_ref().ok_or(ProofError::EmptyAuthClaimProof)?;
    let non_rev = user
        .auth
        .non_revocation
        .as_ref()
        .ok_or(ProofError::EmptyAuthClaimNonRevProof)?;
    let signature = user.signature.as_ref().ok_or(ProofError::EmptyChallengeSignature)?;
    let gist = user.gist.as_ref().ok_or(ProofError::EmptyGistProof)?;

    set_claim(inputs, "authClaim", &user.auth.auth_claim);
    set_mtp(inputs, "authClaimIncMtp", inclusion, IDENTITY_TREE_DEPTH)?;
    set_mtp_with_aux(inputs, "authClaimNonRevMtp", non_rev, IDENTITY_TREE_DEPTH)?;
    inputs.set("challenge", &challenge);
    set_signature(inputs, "challengeSignature", signature);
    set_roots(inputs, root_names, &user.auth.tree_state);
    inputs.set(state_name, &user.auth.tree_state.state());
    inputs.set("gistRoot", &gist.root);
    set_mtp_with_aux(inputs, "gistMtp", &gist.proof, GIST_DEPTH)?;
    Ok(())
}

fn on_chain_auth(inputs: &mut CircuitInputs, circuit: CircuitId, r: &QueryRequest) -> ProofResult<()> {
    let user = r.user.as_ref().ok_or(ProofError::ChallengeRequired(circuit))?;
    user_auth_signals(
        inputs,
        circuit,
        user,
        ["userClaimsTreeRoot", "userRevTreeRoot", "userRootsTreeRoot"],
        "userState",
    )
}

/// Claim non-revocation signals. With the revocation check skipped an
/// absent proof is replaced by an empty one against the branch's state.
fn non_revocation_signals(inputs: &mut CircuitInputs, r: &QueryRequest) -> ProofResult<()> {
    let fallback;
    let non_rev = match (&r.credential.non_revocation, r.skip_revocation_check) {
        (Some(nr), _) => nr,
        (None, true) => {
            fallback = NonRevocationProof {
                tree_state: *r.credential.branch.issuer_state(),
                proof: Proof::empty(),
            };
            &fallback
        }
        (None, false) => return Err(ProofError::EmptyClaimNonRevProof),
    };
    set_mtp_with_aux(inputs, "issuerClaimNonRevMtp", &non_rev.proof, IDENTITY_TREE_DEPTH)?;
    set_roots(
        inputs,
        [
            "issuerClaimNonRevClaimsTreeRoot",
            "issuerClaimNonRevRevTreeRoot",
            "issuerClaimNonRevRootsTreeRoot",
        ],
        &non_rev.tree_state,
    );
    inputs.set("issuerClaimNonRevState", &non_rev.tree_state.state());
    inputs.set_bool("isRevocationChecked", !r.skip_revocation_check);
    Ok(())
}

/// Claim path signals of a (possibly merklized) query.
fn claim_path_signals(inputs: &mut CircuitInputs, query: &CircuitQuery) -> ProofResult<()> {
    match &query.value_proof {
        Some(vp) => {
            set_mtp(inputs, "claimPathMtp", &vp.mtp, CREDENTIAL_TREE_DEPTH)?;
            let aux = vp.mtp.aux_signals();
            inputs.set("claimPathMtpNoAux", &aux.no_aux);
            inputs.set("claimPathMtpAuxHi", &aux.key);
            inputs.set("claimPathMtpAuxHv", &aux.value);
            inputs.set("claimPathValue", &vp.value.unwrap_or_else(Fr::zero));
        }
        None => {
            inputs.set_all("claimPathMtp", &vec![Fr::zero(); CREDENTIAL_TREE_DEPTH]);
            inputs.set("claimPathMtpNoAux", &Fr::zero());
            inputs.set("claimPathMtpAuxHi", &Fr::zero());
            inputs.set("claimPathMtpAuxHv", &Fr::zero());
            inputs.set("claimPathValue", &Fr::zero());
        }
    }
    inputs.set("claimPathKey", &query.claim_path_key);
    Ok(())
}

fn query_signals(inputs: &mut CircuitInputs, query: &CircuitQuery) -> ProofResult<()> {
    claim_path_signals(inputs, query)?;
    inputs.set_u64("operator", query.operator.code());
    inputs.set_u64("slotIndex", query.slot_index as u64);
    inputs.set_all("value", &query.circuit_values()?);
    Ok(())
}

fn common_query_signals(inputs: &mut CircuitInputs, r: &QueryRequest) {
    inputs.set("requestID", &r.request_id);
    inputs.set("userGenesisID", &r.nonces.genesis_id.to_fr());
    inputs.set("profileNonce", &r.nonces.profile_nonce);
    inputs.set("claimSubjectProfileNonce", &r.nonces.claim_subject_profile_nonce);
    inputs.set("issuerID", &r.credential.issuer_id.to_fr());
    set_claim(inputs, "issuerClaim", &r.credential.claim);
    inputs.set("claimSchema", &r.credential.claim.schema_hash().to_fr());
    inputs.set_u64("timestamp", r.timestamp);
}

fn mtp_branch_signals(inputs: &mut CircuitInputs, data: &InclusionProofData) -> ProofResult<()> {
    let mtp = data.mtp.as_ref().ok_or(ProofError::EmptyClaimProof)?;
    set_mtp(inputs, "issuerClaimMtp", mtp, IDENTITY_TREE_DEPTH)?;
    set_roots(
        inputs,
        [
            "issuerClaimClaimsTreeRoot",
            "issuerClaimRevTreeRoot",
            "issuerClaimRootsTreeRoot",
        ],
        &data.issuer_state,
    );
    inputs.set("issuerClaimIdenState", &data.issuer_state.state());
    Ok(())
}

fn zero_mtp_branch(inputs: &mut CircuitInputs) {
    inputs.set_all("issuerClaimMtp", &vec![Fr::zero(); IDENTITY_TREE_DEPTH]);
    for name in [
        "issuerClaimClaimsTreeRoot",
        "issuerClaimRevTreeRoot",
        "issuerClaimRootsTreeRoot",
        "issuerClaimIdenState",
    ] {
        inputs.set(name, &Fr::zero());
    }
}

fn sig_branch_signals(inputs: &mut CircuitInputs, data: &SignatureProofData) -> ProofResult<()> {
    let signature = data.signature.as_ref().ok_or(ProofError::EmptyClaimSignature)?;
    let inclusion = data
        .issuer_auth_inclusion
        .as_ref()
        .ok_or(ProofError::EmptyIssuerAuthClaimProof)?;
    let non_rev = data
        .issuer_auth_non_revocation
        .as_ref()
        .ok_or(ProofError::EmptyIssuerAuthClaimNonRevProof)?;

    set_signature(inputs, "issuerClaimSignature", signature);
    set_claim(inputs, "issuerAuthClaim", &data.issuer_auth_claim);
    set_mtp(inputs, "issuerAuthClaimMtp", inclusion, IDENTITY_TREE_DEPTH)?;
    set_mtp_with_aux(inputs, "issuerAuthClaimNonRevMtp", non_rev, IDENTITY_TREE_DEPTH)?;
    set_roots(
        inputs,
        [
            "issuerAuthClaimsTreeRoot",
            "issuerAuthRevTreeRoot",
            "issuerAuthRootsTreeRoot",
        ],
        &data.issuer_auth_state,
    );
    Ok(())
}

fn zero_sig_branch(inputs: &mut CircuitInputs) {
    zero_signature(inputs, "issuerClaimSignature");
    inputs.set_all("issuerAuthClaim", &[Fr::zero(); 8]);
    inputs.set_all("issuerAuthClaimMtp", &vec![Fr::zero(); IDENTITY_TREE_DEPTH]);
    zero_mtp_with_aux(inputs, "issuerAuthClaimNonRevMtp", IDENTITY_TREE_DEPTH);
    for name in [
        "issuerAuthClaimsTreeRoot",
        "issuerAuthRevTreeRoot",
        "issuerAuthRootsTreeRoot",
    ] {
        inputs.set(name, &Fr::zero());
    }
}

// ---------------------------------------------------------------------------
// Per-circuit marshaling
// ---------------------------------------------------------------------------

fn auth_v2(r: &AuthRequest) -> ProofResult<CircuitInputs> {
    let mut inputs = CircuitInputs::new(CircuitId::AuthV2);
    inputs.set("genesisID", &r.nonces.genesis_id.to_fr());
    inputs.set("profileNonce", &r.nonces.profile_nonce);
    user_auth_signals(
        &mut inputs,
        CircuitId::AuthV2,
        &r.user,
        ["claimsTreeRoot", "revTreeRoot", "rootsTreeRoot"],
        "state",
    )?;
    Ok(inputs)
}

fn state_transition(r: &StateTransitionRequest) -> ProofResult<CircuitInputs> {
    let inclusion = r.auth.inclusion.as_ref().ok_or(ProofError::EmptyAuthClaimProof)?;
    let non_rev = r
        .auth
        .non_revocation
        .as_ref()
        .ok_or(ProofError::EmptyAuthClaimNonRevProof)?;
    let new_inclusion = r.new_state_inclusion.as_ref().ok_or(ProofError::EmptyAuthClaimProof)?;
    let signature = r.signature.as_ref().ok_or(ProofError::EmptyChallengeSignature)?;

    let mut inputs = CircuitInputs::new(CircuitId::StateTransition);
    set_claim(&mut inputs, "authClaim", &r.auth.auth_claim);
    set_mtp(&mut inputs, "authClaimMtp", inclusion, IDENTITY_TREE_DEPTH)?;
    set_mtp_with_aux(&mut inputs, "authClaimNonRevMtp", non_rev, IDENTITY_TREE_DEPTH)?;
    set_mtp(&mut inputs, "authClaimNewStateIncMtp", new_inclusion, IDENTITY_TREE_DEPTH)?;
    inputs.set("userID", &r.id.to_fr());
    inputs.set("oldUserState", &r.auth.tree_state.state());
    inputs.set("newUserState", &r.new_state.state());
    inputs.set_bool("isOldStateGenesis", r.is_old_state_genesis);
    set_roots(
        &mut inputs,
        ["claimsTreeRoot", "revTreeRoot", "rootsTreeRoot"],
        &r.auth.tree_state,
    );
    set_roots(
        &mut inputs,
        ["newClaimsTreeRoot", "newRevTreeRoot", "newRootsTreeRoot"],
        &r.new_state,
    );
    set_signature(&mut inputs, "signature", signature);
    Ok(inputs)
}

fn mtp_v2(circuit: CircuitId, r: &QueryRequest) -> ProofResult<CircuitInputs> {
    let data = match &r.credential.branch {
        ProofBranch::MerkleInclusion(data) => data,
        ProofBranch::Signature(_) => {
            return Err(ProofError::InvalidRequest(format!(
                "{} needs an {} proof",
                circuit,
                ProofType::Iden3SparseMerkleTreeProof
            )))
        }
    };
    let mut inputs = CircuitInputs::new(circuit);
    common_query_signals(&mut inputs, r);
    mtp_branch_signals(&mut inputs, data)?;
    non_revocation_signals(&mut inputs, r)?;
    let query = r.query.for_v2();
    inputs.set_bool("claimPathNotExists", query.path_not_exists());
    query_signals(&mut inputs, &query)?;
    Ok(inputs)
}

fn sig_v2(circuit: CircuitId, r: &QueryRequest) -> ProofResult<CircuitInputs> {
    let data = match &r.credential.branch {
        ProofBranch::Signature(data) => data,
        ProofBranch::MerkleInclusion(_) => {
            return Err(ProofError::InvalidRequest(format!(
                "{} needs a {} proof",
                circuit,
                ProofType::BjjSignature
            )))
        }
    };
    let mut inputs = CircuitInputs::new(circuit);
    common_query_signals(&mut inputs, r);
    sig_branch_signals(&mut inputs, data)?;
    non_revocation_signals(&mut inputs, r)?;
    let query = r.query.for_v2();
    inputs.set_bool("claimPathNotExists", query.path_not_exists());
    query_signals(&mut inputs, &query)?;
    Ok(inputs)
}

fn v3(circuit: CircuitId, r: &QueryRequest) -> ProofResult<CircuitInputs> {
    let mut inputs = CircuitInputs::new(circuit);
    common_query_signals(&mut inputs, r);
    match &r.credential.branch {
        ProofBranch::Signature(data) => {
            sig_branch_signals(&mut inputs, data)?;
            zero_mtp_branch(&mut inputs);
        }
        ProofBranch::MerkleInclusion(data) => {
            mtp_branch_signals(&mut inputs, data)?;
            zero_sig_branch(&mut inputs);
        }
    }
    inputs.set_u64("proofType", r.credential.branch.proof_type().circuit_code());
    non_revocation_signals(&mut inputs, r)?;
    query_signals(&mut inputs, &r.query)?;
    inputs.set_u64("valueArraySize", r.query.values.len() as u64);
    inputs.set("linkNonce", &r.link_nonce);
    inputs.set("verifierID", &r.verifier_id);
    inputs.set("nullifierSessionID", &r.nullifier_session_id);
    Ok(inputs)
}

fn linked_multi_query(r: &LinkedRequest) -> ProofResult<CircuitInputs> {
    if r.queries.len() > LINKED_QUERY_COUNT {
        return Err(QueryError::TooManyQueries {
            circuit: CircuitId::LinkedMultiQuery10,
            max: LINKED_QUERY_COUNT,
            count: r.queries.len(),
        }
        .into());
    }
    let merklized = r.claim.merklized_root()?.is_some();
    let mut queries = r.queries.clone();
    queries.resize_with(LINKED_QUERY_COUNT, || CircuitQuery::noop(merklized));

    let mut path_not_exists = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut mtps = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut no_aux = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut aux_hi = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut aux_hv = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut keys = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut path_values = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut slots = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut operators = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut values = Vec::with_capacity(LINKED_QUERY_COUNT);
    let mut sizes = Vec::with_capacity(LINKED_QUERY_COUNT);

    for q in &queries {
        path_not_exists.push(Fr::from(q.path_not_exists() as u64));
        match &q.value_proof {
            Some(vp) => {
                mtps.push(vp.mtp.circuit_siblings(CREDENTIAL_TREE_DEPTH)?);
                let aux = vp.mtp.aux_signals();
                no_aux.push(aux.no_aux);
                aux_hi.push(aux.key);
                aux_hv.push(aux.value);
                path_values.push(vp.value.unwrap_or_else(Fr::zero));
            }
            None => {
                mtps.push(vec![Fr::zero(); CREDENTIAL_TREE_DEPTH]);
                no_aux.push(Fr::zero());
                aux_hi.push(Fr::zero());
                aux_hv.push(Fr::zero());
                path_values.push(Fr::zero());
            }
        }
        keys.push(q.claim_path_key);
        slots.push(Fr::from(q.slot_index as u64));
        operators.push(Fr::from(q.operator.code()));
        values.push(q.circuit_values()?);
        sizes.push(Fr::from(q.values.len() as u64));
    }

    let mut inputs = CircuitInputs::new(CircuitId::LinkedMultiQuery10);
    inputs.set("linkNonce", &r.link_nonce);
    set_claim(&mut inputs, "issuerClaim", &r.claim);
    inputs.set("claimSchema", &r.claim.schema_hash().to_fr());
    inputs.set_all("claimPathNotExists", &path_not_exists);
    inputs.set_nested("claimPathMtp", &mtps);
    inputs.set_all("claimPathMtpNoAux", &no_aux);
    inputs.set_all("claimPathMtpAuxHi", &aux_hi);
    inputs.set_all("claimPathMtpAuxHv", &aux_hv);
    inputs.set_all("claimPathKey", &keys);
    inputs.set_all("claimPathValue", &path_values);
    inputs.set_all("slotIndex", &slots);
    inputs.set_all("operator", &operators);
    inputs.set_nested("value", &values);
    inputs.set_all("valueArraySize", &sizes);
    Ok(inputs)
}
