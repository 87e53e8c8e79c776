//! Public-signal verification.
//!
//! [`Verifier::verify_signals`] parses the ordered public signals of a circuit
//! into a typed record and runs, in order: schema, revocation requiredness,
//! path or slot binding, operator and values, proof freshness, state
//! existence and freshness, id ownership, link requiredness and nullifier
//! checks. Every per-call input arrives in a [`VerifyContext`]; the verifier
//! keeps no per-call state and can be shared across tasks.

use ark_ff::Zero;
use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_claim::{hash_value, ContextLoader, Merklizer, TypeDefinition};
use tessera_core::field::{fr_to_biguint, fr_to_decimal};
use tessera_core::{CircuitId, Did, Fr, Id, ProofType, SchemaHash, Timestamp};
use tessera_merkle::verify_proof;
use tessera_query::{lookup_field, parse_query, Operator, ProofQuery, QueryMetadata, VALUE_ARRAY_SIZE};

use crate::circuit_query::{linked_query_hash, query_hash_v2, query_hash_v3, CircuitQuery, QueryHashInput};
use crate::error::{ProofError, ProofResult};
use crate::signals::{
    AuthV2Signals, LinkedMultiQuerySignals, PubSignals, QueryV2OnChainSignals, QueryV2Signals,
    QueryV3OnChainSignals, QueryV3Signals, StateTransitionSignals, LINKED_QUERY_COUNT,
};
use crate::traits::{KeyLoader, Prover, StateOracle};
use crate::types::{VerifiablePresentation, ZkProofResponse};

pub const DEFAULT_PROOF_MAX_AGE_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_GIST_ROOT_MAX_AGE_SECS: u64 = 5 * 60;
pub const DEFAULT_NON_REVOCATION_STATE_MAX_AGE_SECS: u64 = 60 * 60;

// ---------------------------------------------------------------------------
// Context and outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Verification time, unix seconds. Defaults to the wall clock.
    pub now: Option<u64>,
    pub proof_max_age_secs: u64,
    pub gist_root_max_age_secs: u64,
    pub non_revocation_state_max_age_secs: u64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            now: None,
            proof_max_age_secs: DEFAULT_PROOF_MAX_AGE_SECS,
            gist_root_max_age_secs: DEFAULT_GIST_ROOT_MAX_AGE_SECS,
            non_revocation_state_max_age_secs: DEFAULT_NON_REVOCATION_STATE_MAX_AGE_SECS,
        }
    }
}

/// Everything one verification needs besides the proof itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyContext {
    /// Required by query circuits.
    pub query: Option<ProofQuery>,
    /// Who sent the proof; checked against `userID`.
    pub sender: Option<Did>,
    /// Expected challenge (`requestID` of off-chain query circuits).
    pub challenge: Option<Fr>,
    pub verifier_did: Option<Did>,
    pub nullifier_session_id: Option<Fr>,
    /// Presentation backing a selective disclosure.
    pub presentation: Option<VerifiablePresentation>,
    pub options: VerifyOptions,
}

impl VerifyContext {
    pub fn for_query(query: ProofQuery) -> Self {
        Self {
            query: Some(query),
            ..Self::default()
        }
    }

    fn now(&self) -> u64 {
        self.options.now.unwrap_or_else(|| Timestamp::now().seconds())
    }

    fn query(&self, circuit: CircuitId) -> ProofResult<&ProofQuery> {
        self.query
            .as_ref()
            .ok_or_else(|| ProofError::InvalidRequest(format!("{} needs a query", circuit)))
    }
}

/// How a state was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTrust {
    /// Not on the ledger, but the identity id derives from it.
    Genesis,
    /// Known to the ledger; `replaced_at` is set once it was superseded.
    Registered { replaced_at: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRole {
    User,
    Issuer,
    NonRevocation,
    Gist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCheck {
    pub role: StateRole,
    pub state: Fr,
    pub trust: StateTrust,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub circuit: CircuitId,
    pub signals: PubSignals,
    pub user_id: Option<Id>,
    pub link_id: Option<Fr>,
    pub group_id: Option<u64>,
    pub states: Vec<StateCheck>,
}

/// Every proof of one group must carry the same nonzero link id.
pub fn check_group_links(outcomes: &[VerificationOutcome]) -> ProofResult<()> {
    let mut links: BTreeMap<u64, Fr> = BTreeMap::new();
    for outcome in outcomes {
        let Some(group_id) = outcome.group_id else {
            continue;
        };
        let link = outcome.link_id.unwrap_or_else(Fr::zero);
        if link.is_zero() {
            return Err(ProofError::LinkIdRequired);
        }
        match links.get(&group_id) {
            Some(existing) if *existing != link => {
                tracing::warn!(group_id, "link id mismatch inside group");
                return Err(ProofError::LinkIdMismatch { group_id });
            }
            Some(_) => {}
            None => {
                links.insert(group_id, link);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Schema and query metadata of the query a proof answers.
struct QueryScope<'a> {
    query: &'a ProofQuery,
    def: TypeDefinition,
    schema: Fr,
    metas: Vec<QueryMetadata>,
}

impl QueryScope<'_> {
    fn single(&self) -> ProofResult<&QueryMetadata> {
        self.metas
            .first()
            .ok_or_else(|| ProofError::InvalidRequest("query has no field queries".into()))
    }
}

pub struct Verifier {
    oracle: Arc<dyn StateOracle>,
    loader: Arc<dyn ContextLoader>,
    prover: Arc<dyn Prover>,
    keys: Arc<dyn KeyLoader>,
}

impl Verifier {
    pub fn new(
        oracle: Arc<dyn StateOracle>,
        loader: Arc<dyn ContextLoader>,
        prover: Arc<dyn Prover>,
        keys: Arc<dyn KeyLoader>,
    ) -> Self {
        Self {
            oracle,
            loader,
            prover,
            keys,
        }
    }

    /// Check the groth16 proof, then its public signals. A presentation in
    /// the response backs selective disclosure unless `ctx` carries one.
    pub async fn verify_response(
        &self,
        response: &ZkProofResponse,
        ctx: &VerifyContext,
    ) -> ProofResult<VerificationOutcome> {
        let key = self.keys.verification_key(response.circuit_id)?;
        if !self
            .prover
            .verify(&response.zk_proof, response.circuit_id, &key)
            .await?
        {
            tracing::warn!(circuit = %response.circuit_id, id = response.id, "groth16 proof rejected");
            return Err(ProofError::InvalidProof);
        }
        if ctx.presentation.is_none() && response.vp.is_some() {
            let ctx = VerifyContext {
                presentation: response.vp.clone(),
                ..ctx.clone()
            };
            return self
                .verify_signals(response.circuit_id, &response.zk_proof.pub_signals, &ctx)
                .await;
        }
        self.verify_signals(response.circuit_id, &response.zk_proof.pub_signals, ctx)
            .await
    }

    /// Verify a batch of responses and the link consistency of their groups.
    pub async fn verify_responses(
        &self,
        items: &[(ZkProofResponse, VerifyContext)],
    ) -> ProofResult<Vec<VerificationOutcome>> {
        let mut outcomes = Vec::with_capacity(items.len());
        for (response, ctx) in items {
            outcomes.push(self.verify_response(response, ctx).await?);
        }
        check_group_links(&outcomes)?;
        Ok(outcomes)
    }

    pub async fn verify_signals(
        &self,
        circuit: CircuitId,
        pub_signals: &[Fr],
        ctx: &VerifyContext,
    ) -> ProofResult<VerificationOutcome> {
        let signals = PubSignals::parse(circuit, pub_signals)?;
        let states = match &signals {
            PubSignals::AuthV2(s) => self.verify_auth_v2(s, ctx).await?,
            PubSignals::StateTransition(s) => self.verify_state_transition(s, ctx).await?,
            PubSignals::QueryV2(s) => self.verify_query_v2(circuit, s, ctx).await?,
            PubSignals::QueryV2OnChain(s) => self.verify_query_v2_on_chain(circuit, s, ctx).await?,
            PubSignals::QueryV3(s) => self.verify_query_v3(circuit, s, ctx).await?,
            PubSignals::QueryV3OnChain(s) => self.verify_query_v3_on_chain(circuit, s, ctx).await?,
            PubSignals::LinkedMultiQuery(s) => self.verify_linked(circuit, s, ctx)?,
        };
        let outcome = VerificationOutcome {
            circuit,
            user_id: signals.user_id(),
            link_id: signals.link_id(),
            group_id: ctx.query.as_ref().and_then(|q| q.group_id),
            signals,
            states,
        };
        tracing::info!(circuit = %circuit, states = outcome.states.len(), "proof verified");
        Ok(outcome)
    }

    // -- per circuit ----------------------------------------------------------

    async fn verify_auth_v2(
        &self,
        s: &AuthV2Signals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let gist = self.check_gist(&s.gist_root, &s.user_id, ctx).await?;
        check_ownership(&s.user_id, &s.challenge, ctx)?;
        Ok(vec![gist])
    }

    async fn verify_state_transition(
        &self,
        s: &StateTransitionSignals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let derives = s.user_id.is_genesis_state(&s.old_user_state);
        if s.is_old_state_genesis != derives {
            return Err(ProofError::InvalidSignal {
                name: "isOldStateGenesis",
                reason: format!(
                    "flag is {} but the old state {} the genesis state",
                    s.is_old_state_genesis,
                    if derives { "is" } else { "is not" }
                ),
            });
        }
        if let Some(sender) = &ctx.sender {
            if sender.id != s.user_id {
                return Err(ProofError::IdOwnershipFailed(format!(
                    "sender {} is not the proof's user",
                    sender
                )));
            }
        }
        let trust = self
            .check_state(&s.user_id, &s.old_user_state, None, ctx.now())
            .await?;
        Ok(vec![StateCheck {
            role: StateRole::User,
            state: s.old_user_state,
            trust,
        }])
    }

    async fn verify_query_v2(
        &self,
        circuit: CircuitId,
        s: &QueryV2Signals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let scope = self.scope(circuit, ctx)?;
        let meta = scope.single()?;
        check_proof_type(circuit, scope.query, None)?;
        check_allowed_issuer(scope.query, &s.issuer_id)?;

        // 1. schema
        if s.claim_schema != scope.schema {
            return Err(ProofError::SchemaMismatch);
        }
        // 2. revocation
        check_revocation_required(scope.query, s.is_revocation_checked)?;
        // 3. binding
        check_binding(meta, Some(s.merklized), &s.claim_path_key, s.slot_index)?;
        // 4. operator and values
        let (operator, values) = self.v2_expectation(&scope, meta, ctx)?;
        if s.operator != operator.code() {
            return Err(ProofError::OperatorMismatch);
        }
        if let Some(values) = values {
            if s.values != values {
                return Err(ProofError::ValueMismatch);
            }
        }
        // 5. freshness
        check_freshness(s.timestamp, ctx)?;
        // 6. states
        let states = self
            .check_issuer_states(
                &s.issuer_id,
                &s.issuer_state,
                &s.issuer_claim_non_rev_state,
                s.is_revocation_checked,
                ctx,
            )
            .await?;
        // 7. ownership
        check_ownership(&s.user_id, &s.request_id, ctx)?;
        // 8. link
        if scope.query.group_id.is_some() {
            return Err(ProofError::LinkIdRequired);
        }
        Ok(states)
    }

    async fn verify_query_v2_on_chain(
        &self,
        circuit: CircuitId,
        s: &QueryV2OnChainSignals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let scope = self.scope(circuit, ctx)?;
        let meta = scope.single()?;
        check_proof_type(circuit, scope.query, None)?;
        check_allowed_issuer(scope.query, &s.issuer_id)?;

        check_revocation_required(scope.query, s.is_revocation_checked)?;
        if !meta.field_name.is_empty() && s.merklized != meta.merklized {
            return Err(ProofError::FieldBindingMismatch("merklized flag".into()));
        }
        // schema, binding, operator and values are all committed by the hash
        let (operator, values) = self.v2_expectation(&scope, meta, ctx)?;
        let values = match values {
            Some(v) => v,
            None => return Err(ProofError::ValueMismatch),
        };
        let expected = query_hash_v2(
            &scope.schema,
            meta.slot_index as u64,
            operator.code(),
            &meta.claim_path_key,
            false,
            &values,
        )?;
        if expected != s.circuit_query_hash {
            return Err(ProofError::QueryHashMismatch);
        }
        check_freshness(s.timestamp, ctx)?;
        let mut states = self
            .check_issuer_states(
                &s.issuer_id,
                &s.issuer_state,
                &s.issuer_claim_non_rev_state,
                s.is_revocation_checked,
                ctx,
            )
            .await?;
        states.push(self.check_gist(&s.gist_root, &s.user_id, ctx).await?);
        check_ownership(&s.user_id, &s.challenge, ctx)?;
        if scope.query.group_id.is_some() {
            return Err(ProofError::LinkIdRequired);
        }
        Ok(states)
    }

    async fn verify_query_v3(
        &self,
        circuit: CircuitId,
        s: &QueryV3Signals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let scope = self.scope(circuit, ctx)?;
        let meta = scope.single()?;
        check_proof_type(circuit, scope.query, Some(s.proof_type))?;
        check_allowed_issuer(scope.query, &s.issuer_id)?;

        if s.claim_schema != scope.schema {
            return Err(ProofError::SchemaMismatch);
        }
        check_revocation_required(scope.query, s.is_revocation_checked)?;
        check_binding(meta, None, &s.claim_path_key, s.slot_index)?;

        if s.operator != meta.operator.code() {
            return Err(ProofError::OperatorMismatch);
        }
        if s.values != padded_values(meta)? || s.value_array_size != meta.values.len() as u64 {
            return Err(ProofError::ValueMismatch);
        }
        self.check_operator_output(&scope, meta, &s.operator_output, ctx)?;

        check_freshness(s.timestamp, ctx)?;
        let states = self
            .check_issuer_states(
                &s.issuer_id,
                &s.issuer_state,
                &s.issuer_claim_non_rev_state,
                s.is_revocation_checked,
                ctx,
            )
            .await?;
        check_ownership(&s.user_id, &s.request_id, ctx)?;
        check_link_present(scope.query, &s.link_id)?;
        check_nullifier(
            &s.nullifier,
            &s.verifier_id,
            &s.nullifier_session_id,
            ctx,
        )?;
        Ok(states)
    }

    async fn verify_query_v3_on_chain(
        &self,
        circuit: CircuitId,
        s: &QueryV3OnChainSignals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let scope = self.scope(circuit, ctx)?;
        let meta = scope.single()?;
        check_proof_type(circuit, scope.query, Some(s.proof_type))?;
        check_allowed_issuer(scope.query, &s.issuer_id)?;
        check_revocation_required(scope.query, s.is_revocation_checked)?;

        let verifier_id = ctx.verifier_did.map(|d| d.id.to_fr()).unwrap_or_else(Fr::zero);
        let session = ctx.nullifier_session_id.unwrap_or_else(Fr::zero);
        let expected = query_hash_v3(&QueryHashInput {
            schema: scope.schema,
            slot_index: meta.slot_index as u64,
            operator: meta.operator.code(),
            claim_path_key: meta.claim_path_key,
            merklized: meta.merklized,
            values: &meta.values,
            value_array_size: meta.values.len() as u64,
            is_revocation_checked: !scope.query.skip_revocation_check(),
            verifier_id,
            nullifier_session_id: session,
        })?;
        if expected != s.circuit_query_hash {
            return Err(ProofError::QueryHashMismatch);
        }
        self.check_operator_output(&scope, meta, &s.operator_output, ctx)?;

        check_freshness(s.timestamp, ctx)?;
        let mut states = self
            .check_issuer_states(
                &s.issuer_id,
                &s.issuer_state,
                &s.issuer_claim_non_rev_state,
                s.is_revocation_checked,
                ctx,
            )
            .await?;
        if s.is_bjj_auth_enabled {
            states.push(self.check_gist(&s.gist_root, &s.user_id, ctx).await?);
        }
        check_ownership(&s.user_id, &s.challenge, ctx)?;
        check_link_present(scope.query, &s.link_id)?;
        if !session.is_zero() && s.nullifier.is_zero() {
            return Err(ProofError::NullifierMismatch("nullifier is zero".into()));
        }
        Ok(states)
    }

    fn verify_linked(
        &self,
        circuit: CircuitId,
        s: &LinkedMultiQuerySignals,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let scope = self.scope(circuit, ctx)?;
        let merklized = scope.def.is_merklized();
        if s.merklized != merklized {
            return Err(ProofError::FieldBindingMismatch("merklized flag".into()));
        }

        let mut queries: Vec<CircuitQuery> = scope.metas.iter().map(CircuitQuery::unbound).collect();
        queries.resize_with(LINKED_QUERY_COUNT, || CircuitQuery::noop(merklized));
        let requested = queries
            .iter()
            .map(|q| linked_query_hash(&scope.schema, q))
            .collect::<ProofResult<Vec<Fr>>>()?;

        let mut want = requested.clone();
        let mut got = s.circuit_query_hashes.clone();
        want.sort_by_key(fr_to_biguint);
        got.sort_by_key(fr_to_biguint);
        if want != got {
            return Err(ProofError::QueryHashMismatch);
        }

        for (meta, hash) in scope.metas.iter().zip(&requested) {
            if meta.operator != Operator::Sd {
                continue;
            }
            let position = s
                .circuit_query_hashes
                .iter()
                .position(|h| h == hash)
                .ok_or(ProofError::QueryHashMismatch)?;
            let output = s.operator_outputs.get(position).copied().unwrap_or_else(Fr::zero);
            self.check_operator_output(&scope, meta, &output, ctx)?;
        }
        check_link_present(scope.query, &s.link_id)?;
        Ok(Vec::new())
    }

    // -- shared checks --------------------------------------------------------

    fn scope<'a>(&self, circuit: CircuitId, ctx: &'a VerifyContext) -> ProofResult<QueryScope<'a>> {
        let query = ctx.query(circuit)?;
        let def = query.type_definition(self.loader.as_ref())?;
        let schema = SchemaHash::from_type_iri(&def.iri).to_fr();
        let metas = parse_query(query, &def, circuit)?;
        Ok(QueryScope {
            query,
            def,
            schema,
            metas,
        })
    }

    /// Operator and padded values a V2 proof must carry. `SD` and `NOOP` on a
    /// named field are proven as `EQ`; for `NOOP` the value is not known.
    fn v2_expectation(
        &self,
        scope: &QueryScope<'_>,
        meta: &QueryMetadata,
        ctx: &VerifyContext,
    ) -> ProofResult<(Operator, Option<Vec<Fr>>)> {
        if meta.field_name.is_empty() {
            return Ok((meta.operator, Some(padded_values(meta)?)));
        }
        match meta.operator {
            Operator::Sd => {
                let value = self.disclosed_value(scope, meta, ctx)?;
                let mut values = vec![value];
                values.resize(VALUE_ARRAY_SIZE, Fr::zero());
                Ok((Operator::Eq, Some(values)))
            }
            Operator::Noop => Ok((Operator::Eq, None)),
            op => Ok((op, Some(padded_values(meta)?))),
        }
    }

    fn check_operator_output(
        &self,
        scope: &QueryScope<'_>,
        meta: &QueryMetadata,
        output: &Fr,
        ctx: &VerifyContext,
    ) -> ProofResult<()> {
        if meta.operator != Operator::Sd {
            return Ok(());
        }
        let disclosed = self.disclosed_value(scope, meta, ctx)?;
        if disclosed != *output {
            return Err(ProofError::DisclosureMismatch(format!(
                "{} differs from the presentation",
                meta.field_name
            )));
        }
        Ok(())
    }

    /// Value of the disclosed field, re-derived from the presentation. For
    /// merklized credentials it must come with a valid Merkle proof.
    fn disclosed_value(
        &self,
        scope: &QueryScope<'_>,
        meta: &QueryMetadata,
        ctx: &VerifyContext,
    ) -> ProofResult<Fr> {
        let vp = ctx
            .presentation
            .as_ref()
            .ok_or_else(|| ProofError::DisclosureMismatch("no presentation".into()))?;
        let credential = &vp.verifiable_credential;
        if !credential.types.iter().any(|t| *t == scope.query.credential_type) {
            return Err(ProofError::DisclosureMismatch(format!(
                "presentation is not a {}",
                scope.query.credential_type
            )));
        }

        if meta.merklized {
            let path = meta
                .path
                .as_ref()
                .ok_or_else(|| ProofError::DisclosureMismatch("no path for field".into()))?;
            let merklizer = Merklizer::merklize_subject(&credential.credential_subject, &scope.def)?;
            let (proof, value) = merklizer.proof(path)?;
            let value = value.ok_or_else(|| {
                ProofError::DisclosureMismatch(format!("{} not disclosed", meta.field_name))
            })?;
            let key = path.key()?;
            if key != meta.claim_path_key || !verify_proof(&merklizer.root()?, &proof, &key, &value)? {
                return Err(ProofError::DisclosureMismatch(format!(
                    "{} has no valid proof",
                    meta.field_name
                )));
            }
            Ok(value)
        } else {
            let raw = lookup_field(&credential.credential_subject, &meta.field_name).ok_or_else(
                || ProofError::DisclosureMismatch(format!("{} not disclosed", meta.field_name)),
            )?;
            let datatype = meta
                .datatype
                .ok_or_else(|| ProofError::DisclosureMismatch("field has no datatype".into()))?;
            Ok(hash_value(datatype, raw)?)
        }
    }

    async fn check_issuer_states(
        &self,
        issuer_id: &Id,
        issuer_state: &Fr,
        non_rev_state: &Fr,
        is_revocation_checked: bool,
        ctx: &VerifyContext,
    ) -> ProofResult<Vec<StateCheck>> {
        let now = ctx.now();
        let issuer = self.check_state(issuer_id, issuer_state, None, now).await?;
        let max_age = is_revocation_checked.then_some(ctx.options.non_revocation_state_max_age_secs);
        let non_rev = self
            .check_state(issuer_id, non_rev_state, max_age, now)
            .await?;
        Ok(vec![
            StateCheck {
                role: StateRole::Issuer,
                state: *issuer_state,
                trust: issuer,
            },
            StateCheck {
                role: StateRole::NonRevocation,
                state: *non_rev_state,
                trust: non_rev,
            },
        ])
    }

    /// Ask the ledger first; a state it does not know is accepted only when
    /// the id derives from it.
    async fn check_state(
        &self,
        id: &Id,
        state: &Fr,
        max_age_secs: Option<u64>,
        now: u64,
    ) -> ProofResult<StateTrust> {
        match self.oracle.get_state_info_by_id_and_state(id, state).await? {
            Some(info) if info.replaced_at_timestamp == 0 => {
                Ok(StateTrust::Registered { replaced_at: None })
            }
            Some(info) => {
                let age = now.saturating_sub(info.replaced_at_timestamp);
                if let Some(max) = max_age_secs {
                    if age > max {
                        tracing::warn!(id = %id, age, max, "state outdated");
                        return Err(ProofError::StateOutdated {
                            state: fr_to_decimal(state),
                            age_secs: age,
                            max_age_secs: max,
                        });
                    }
                }
                Ok(StateTrust::Registered {
                    replaced_at: Some(info.replaced_at_timestamp),
                })
            }
            None if id.is_genesis_state(state) => {
                tracing::debug!(id = %id, "state accepted as genesis");
                Ok(StateTrust::Genesis)
            }
            None => Err(ProofError::StateNotRegistered(fr_to_decimal(state))),
        }
    }

    async fn check_gist(&self, root: &Fr, id: &Id, ctx: &VerifyContext) -> ProofResult<StateCheck> {
        let info = self
            .oracle
            .get_gist_root_info(root, id)
            .await?
            .ok_or_else(|| ProofError::GistRootNotFound(fr_to_decimal(root)))?;
        let replaced_at = if info.replaced_at_timestamp == 0 {
            None
        } else {
            let age = ctx.now().saturating_sub(info.replaced_at_timestamp);
            let max = ctx.options.gist_root_max_age_secs;
            if age > max {
                return Err(ProofError::StateOutdated {
                    state: fr_to_decimal(root),
                    age_secs: age,
                    max_age_secs: max,
                });
            }
            Some(info.replaced_at_timestamp)
        };
        Ok(StateCheck {
            role: StateRole::Gist,
            state: *root,
            trust: StateTrust::Registered { replaced_at },
        })
    }
}

// ---------------------------------------------------------------------------
// Stateless checks
// ---------------------------------------------------------------------------

fn padded_values(meta: &QueryMetadata) -> ProofResult<Vec<Fr>> {
    Ok(meta.circuit_values(VALUE_ARRAY_SIZE)?)
}

fn check_revocation_required(query: &ProofQuery, is_revocation_checked: bool) -> ProofResult<()> {
    if !query.skip_revocation_check() && !is_revocation_checked {
        return Err(ProofError::RevocationCheckRequired);
    }
    Ok(())
}

fn check_binding(
    meta: &QueryMetadata,
    merklized: Option<bool>,
    claim_path_key: &Fr,
    slot_index: u64,
) -> ProofResult<()> {
    if meta.field_name.is_empty() {
        return Ok(());
    }
    if let Some(m) = merklized {
        if m != meta.merklized {
            return Err(ProofError::FieldBindingMismatch("merklized flag".into()));
        }
    }
    if meta.merklized {
        if *claim_path_key != meta.claim_path_key {
            return Err(ProofError::FieldBindingMismatch(format!(
                "claim path key of {}",
                meta.field_name
            )));
        }
    } else if slot_index != meta.slot_index as u64 {
        return Err(ProofError::FieldBindingMismatch(format!(
            "slot index of {}",
            meta.field_name
        )));
    }
    Ok(())
}

fn check_freshness(timestamp: u64, ctx: &VerifyContext) -> ProofResult<()> {
    let max = ctx.options.proof_max_age_secs;
    if ctx.now().saturating_sub(timestamp) > max {
        return Err(ProofError::ProofOutdated {
            generated: timestamp,
            max_age_secs: max,
        });
    }
    Ok(())
}

fn check_ownership(user_id: &Id, challenge: &Fr, ctx: &VerifyContext) -> ProofResult<()> {
    if let Some(sender) = &ctx.sender {
        if sender.id != *user_id {
            return Err(ProofError::IdOwnershipFailed(format!(
                "sender {} is not the proof's user",
                sender
            )));
        }
    }
    if let Some(expected) = &ctx.challenge {
        if expected != challenge {
            return Err(ProofError::IdOwnershipFailed("challenge mismatch".into()));
        }
    }
    Ok(())
}

fn check_link_present(query: &ProofQuery, link_id: &Fr) -> ProofResult<()> {
    if query.group_id.is_some() && link_id.is_zero() {
        return Err(ProofError::LinkIdRequired);
    }
    Ok(())
}

fn check_allowed_issuer(query: &ProofQuery, issuer_id: &Id) -> ProofResult<()> {
    let issuer = Did::from_id(*issuer_id)?.to_string();
    if !query.allows_issuer(&issuer) {
        return Err(ProofError::IssuerNotAllowed(issuer));
    }
    Ok(())
}

/// V2 circuits are pinned to one proof type; V3 carries it as a signal.
fn check_proof_type(circuit: CircuitId, query: &ProofQuery, signal: Option<u64>) -> ProofResult<()> {
    let Some(requested) = query.proof_type else {
        return Ok(());
    };
    let proven: Option<ProofType> = match signal {
        Some(code) => ProofType::from_circuit_code(code),
        None => circuit.fixed_proof_type(),
    };
    if proven != Some(requested) {
        return Err(ProofError::ProofTypeMismatch);
    }
    Ok(())
}

fn check_nullifier(
    nullifier: &Fr,
    verifier_id: &Fr,
    session_id: &Fr,
    ctx: &VerifyContext,
) -> ProofResult<()> {
    let requested = match ctx.nullifier_session_id {
        Some(s) if !s.is_zero() => s,
        _ => return Ok(()),
    };
    if nullifier.is_zero() {
        return Err(ProofError::NullifierMismatch("nullifier is zero".into()));
    }
    if *session_id != requested {
        return Err(ProofError::NullifierMismatch("session id differs".into()));
    }
    let verifier = ctx
        .verifier_did
        .ok_or_else(|| ProofError::NullifierMismatch("verifier DID required".into()))?;
    if *verifier_id != verifier.id.to_fr() {
        return Err(ProofError::NullifierMismatch("verifier id differs".into()));
    }
    Ok(())
}
