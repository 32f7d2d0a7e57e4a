//! # Machine
//!
//! Wires the claim store, the service registry, the case manager, and the
//! rule trigger together, and exposes the administrative surface an outer
//! layer (CLI, HTTP API) calls.
//!
//! ```text
//! ClaimManager ◀── claim lookup ── Services ◀── evaluate ── CaseManager ──events──▶ RuleTrigger
//!                                      ▲                                                 │
//!                                      └────────────── evaluate applies rules ───────────┘
//! ```
//!
//! The claim store never holds a handle to cases. Whenever a claim
//! operation touches a linked case, the machine performs the case side.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lac_core::{CalculationDate, CaseId, ClaimId, Record, Value};
use lac_engine::{EvaluationRequest, RuleResult, ServiceProvider, Services};
use lac_rules::{DataSource, RuleCatalog, RuleInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::case::{AppealStatus, Case, CaseStatus, ObjectionStatus};
use crate::case_manager::{CaseManager, Sampler};
use crate::claim::{Claim, ClaimSubmission};
use crate::claim_manager::{ClaimFilter, ClaimManager};
use crate::config::MachineConfig;
use crate::error::CaseError;
use crate::event::Event;
use crate::trigger::{spawn_dispatcher, RuleTrigger, TriggerStats};

/// The assembled case-handling machine.
pub struct Machine {
    config: MachineConfig,
    services: Arc<Services>,
    claims: Arc<ClaimManager>,
    cases: Arc<CaseManager>,
    trigger: Arc<RuleTrigger>,
    dispatcher: JoinHandle<()>,
}

impl Machine {
    /// Assemble a machine over `catalog` and start the rule trigger on the
    /// current Tokio runtime.
    pub fn new(catalog: Arc<dyn RuleCatalog>, config: MachineConfig) -> Result<Self, CaseError> {
        Self::build(catalog, config, None)
    }

    /// Like [`Machine::new`], drawing review samples from `sampler` instead
    /// of the thread RNG.
    pub fn with_sampler(
        catalog: Arc<dyn RuleCatalog>,
        config: MachineConfig,
        sampler: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Result<Self, CaseError> {
        Self::build(catalog, config, Some(Arc::new(sampler)))
    }

    fn build(catalog: Arc<dyn RuleCatalog>, config: MachineConfig, sampler: Option<Sampler>) -> Result<Self, CaseError> {
        tokio::runtime::Handle::try_current().map_err(|_| CaseError::NoRuntime)?;

        let claims = Arc::new(ClaimManager::new());
        let services = Arc::new(
            Services::new(catalog, config.root_reference_date()).with_claim_lookup(claims.clone()),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut cases = CaseManager::new(Arc::clone(&services))
            .with_sample_rate(config.sample_rate)
            .with_event_sink(events_tx);
        if let Some(sampler) = sampler {
            cases = cases.with_sampler(move || sampler());
        }
        let cases = Arc::new(cases);
        let trigger = Arc::new(RuleTrigger::new(Arc::clone(&services), &cases));
        let dispatcher = spawn_dispatcher(Arc::clone(&trigger), events_rx, config.trigger_workers);

        tracing::info!(
            services = services.service_names().len(),
            root_reference_date = %services.root_reference_date(),
            sample_rate = config.sample_rate,
            trigger_workers = config.trigger_workers,
            "machine started"
        );
        Ok(Self {
            config,
            services,
            claims,
            cases,
            trigger,
            dispatcher,
        })
    }

    /// The configuration the machine was built with.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The service registry.
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// The case manager.
    pub fn case_manager(&self) -> &Arc<CaseManager> {
        &self.cases
    }

    /// The claim manager.
    pub fn claim_manager(&self) -> &Arc<ClaimManager> {
        &self.claims
    }

    /// Rule trigger counters.
    pub fn trigger_stats(&self) -> TriggerStats {
        self.trigger.stats()
    }

    /// True while the trigger dispatcher runs.
    pub fn trigger_running(&self) -> bool {
        !self.dispatcher.is_finished()
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Evaluate a law directly, without a case.
    pub fn evaluate(&self, request: EvaluationRequest) -> Result<RuleResult, CaseError> {
        Ok(self.services.evaluate(request)?)
    }

    /// Metadata of the version of `law` in effect on `reference_date`.
    pub fn rule_info(&self, service: &str, law: &str, reference_date: CalculationDate) -> Result<RuleInfo, CaseError> {
        Ok(self.services.rule_info(service, law, reference_date)?)
    }

    /// service → laws discoverable by `audience`.
    pub fn discoverable_service_laws(&self, audience: &str) -> BTreeMap<String, BTreeSet<String>> {
        self.services.discoverable_service_laws(audience)
    }

    /// Register a table for `service`.
    pub fn set_source(&self, service: &str, table: &str, source: Arc<dyn DataSource>) -> Result<(), CaseError> {
        Ok(self.services.set_source(service, table, source)?)
    }

    // -----------------------------------------------------------------------
    // Cases
    // -----------------------------------------------------------------------

    /// Submit a case. See [`CaseManager::submit_case`].
    pub fn submit_case(
        &self,
        bsn: &str,
        service: &str,
        law: &str,
        parameters: Record,
        claimed_result: Record,
        approved_claims_only: bool,
    ) -> Result<CaseId, CaseError> {
        self.cases
            .submit_case(bsn, service, law, parameters, claimed_result, approved_claims_only)
    }

    /// The case for (`bsn`, `service`, `law`).
    pub fn get_case(&self, bsn: &str, service: &str, law: &str) -> Option<Case> {
        self.cases.get_case(bsn, service, law)
    }

    /// The case with identifier `case_id`.
    pub fn get_case_by_id(&self, case_id: CaseId) -> Result<Case, CaseError> {
        self.cases.get_case_by_id(case_id)
    }

    /// Cases of `service` in `status`.
    pub fn get_cases_by_status(&self, service: &str, status: CaseStatus) -> Vec<Case> {
        self.cases.get_cases_by_status(service, status)
    }

    /// Cases under `law` of `service`.
    pub fn get_cases_by_law(&self, law: &str, service: &str) -> Vec<Case> {
        self.cases.get_cases_by_law(law, service)
    }

    /// Record a reviewer's decision.
    pub fn complete_manual_review(
        &self,
        case_id: CaseId,
        verifier_id: &str,
        approved: bool,
        reason: &str,
        override_result: Option<Record>,
    ) -> Result<Case, CaseError> {
        self.cases
            .complete_manual_review(case_id, verifier_id, approved, reason, override_result)
    }

    /// File an objection.
    pub fn object_case(&self, case_id: CaseId, reason: &str) -> Result<Case, CaseError> {
        self.cases.object_case(case_id, reason)
    }

    /// Record objection eligibility.
    pub fn determine_objection_status(&self, case_id: CaseId, update: &ObjectionStatus) -> Result<Case, CaseError> {
        self.cases.determine_objection_status(case_id, update)
    }

    /// Record objection admissibility.
    pub fn determine_objection_admissibility(&self, case_id: CaseId, admissible: Option<bool>) -> Result<Case, CaseError> {
        self.cases.determine_objection_admissibility(case_id, admissible)
    }

    /// Record appeal eligibility.
    pub fn determine_appeal_status(&self, case_id: CaseId, update: &AppealStatus) -> Result<Case, CaseError> {
        self.cases.determine_appeal_status(case_id, update)
    }

    /// Whether an objection is possible.
    pub fn can_object(&self, case_id: CaseId) -> Result<bool, CaseError> {
        self.cases.can_object(case_id)
    }

    /// Whether an appeal is possible.
    pub fn can_appeal(&self, case_id: CaseId) -> Result<bool, CaseError> {
        self.cases.can_appeal(case_id)
    }

    /// Recorded events, optionally of one case.
    pub fn get_events(&self, case_id: Option<CaseId>) -> Vec<Event> {
        self.cases.get_events(case_id)
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    /// File a claim, attaching it to its case when one is named.
    pub fn submit_claim(&self, submission: ClaimSubmission) -> Result<Claim, CaseError> {
        if let Some(case_id) = submission.case_id {
            self.cases.get_case_by_id(case_id)?;
        }
        let claim = self.claims.submit_claim(submission);
        if let Some(case_id) = claim.case_id {
            self.cases.add_claim(case_id, &claim)?;
            self.cases.record_claim_decision(case_id, &claim)?;
        }
        Ok(claim)
    }

    /// Approve a claim.
    pub fn approve_claim(&self, claim_id: ClaimId, verified_by: &str, verified_value: Value) -> Result<Claim, CaseError> {
        let claim = self.claims.approve_claim(claim_id, verified_by, verified_value)?;
        self.sync_claim_decision(&claim)?;
        Ok(claim)
    }

    /// Reject a claim.
    pub fn reject_claim(&self, claim_id: ClaimId, rejected_by: &str, reason: &str) -> Result<Claim, CaseError> {
        let claim = self.claims.reject_claim(claim_id, rejected_by, reason)?;
        self.sync_claim_decision(&claim)?;
        Ok(claim)
    }

    /// Link a claim to an existing case.
    pub fn link_claim(&self, claim_id: ClaimId, case_id: CaseId) -> Result<Claim, CaseError> {
        self.cases.get_case_by_id(case_id)?;
        let claim = self.claims.link_case(claim_id, case_id)?;
        self.cases.add_claim(case_id, &claim)?;
        Ok(claim)
    }

    /// Attach evidence to a pending claim.
    pub fn add_claim_evidence(&self, claim_id: ClaimId, evidence_path: &str) -> Result<Claim, CaseError> {
        self.claims.add_evidence(claim_id, evidence_path)
    }

    /// The claim with identifier `claim_id`.
    pub fn get_claim(&self, claim_id: ClaimId) -> Result<Claim, CaseError> {
        self.claims.get_claim(claim_id)
    }

    /// Claims linked to `case_id`.
    pub fn get_claims_by_case(&self, case_id: CaseId, filter: ClaimFilter) -> Vec<Claim> {
        self.claims.get_claims_by_case(case_id, filter)
    }

    /// Claims about subject `bsn`.
    pub fn get_claims_by_bsn(&self, bsn: &str, filter: ClaimFilter) -> Vec<Claim> {
        self.claims.get_claims_by_bsn(bsn, filter)
    }

    /// Claims against `service`.
    pub fn get_claims_by_service(&self, service: &str, filter: ClaimFilter) -> Vec<Claim> {
        self.claims.get_claims_by_service(service, filter)
    }

    /// Claims about `bsn` under (`service`, `law`), by key.
    pub fn claims_for(&self, bsn: &str, service: &str, law: &str, filter: ClaimFilter) -> BTreeMap<String, Claim> {
        self.claims.claims_for(bsn, service, law, filter)
    }

    fn sync_claim_decision(&self, claim: &Claim) -> Result<(), CaseError> {
        match claim.case_id {
            Some(case_id) => self.cases.record_claim_decision(case_id, claim),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("config", &self.config)
            .field("cases", &self.cases)
            .field("claims", &self.claims)
            .field("trigger", &self.trigger)
            .finish()
    }
}
