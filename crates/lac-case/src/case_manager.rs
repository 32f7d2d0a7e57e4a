//! # Case Lifecycle Manager
//!
//! In-memory case store with a (subject, service, law) index and the
//! append-only event log.
//!
//! ## Locking
//!
//! Cases, the index, and the event log live under one `parking_lot::RwLock`.
//! Every mutation reads, validates, mutates, re-indexes, and appends its
//! event under a single write guard, so concurrent callers cannot lose each
//! other's updates. Rule evaluation for a submission runs before the guard
//! is taken.
//!
//! ## Events
//!
//! Each appended event is also sent to the rule trigger queue, while the
//! guard is still held, so the trigger sees events in recording order.
//! Nothing waits for the trigger.

use std::collections::HashMap;
use std::sync::Arc;

use lac_core::{CaseId, Record};
use lac_engine::{EvaluationRequest, ServiceProvider, Services};
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;

use crate::case::{AppealStatus, Case, CaseStatus, ObjectionStatus, Submission, SYSTEM_VERIFIER};
use crate::claim::{Claim, ClaimStatus};
use crate::comparison::results_match;
use crate::error::CaseError;
use crate::event::{CaseEventType, Event};

/// Default fraction of matching submissions still sent to manual review.
pub const DEFAULT_SAMPLE_RATE: f64 = 0.10;

/// Source of uniform samples in `[0, 1)`.
pub type Sampler = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Default)]
struct CaseStore {
    cases: HashMap<CaseId, Case>,
    index: HashMap<(String, String, String), CaseId>,
    events: Vec<Event>,
}

/// Manages the lifecycle of administrative cases.
pub struct CaseManager {
    services: Arc<Services>,
    sample_rate: f64,
    sampler: Sampler,
    state: RwLock<CaseStore>,
    events_tx: Option<UnboundedSender<Event>>,
}

impl CaseManager {
    /// A manager evaluating submissions through `services`, sampling at
    /// [`DEFAULT_SAMPLE_RATE`].
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sampler: Arc::new(rand::random::<f64>),
            state: RwLock::new(CaseStore::default()),
            events_tx: None,
        }
    }

    /// Builder: fraction of matching submissions routed to review anyway.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Builder: replace the random source used for review sampling.
    pub fn with_sampler(mut self, sampler: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// Builder: forward every recorded event to `events_tx`.
    pub fn with_event_sink(mut self, events_tx: UnboundedSender<Event>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// The registry submissions are evaluated against.
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// The configured review sample rate.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Evaluate a submission and decide it automatically or route it to
    /// review.
    ///
    /// The rule is evaluated with approved claims only. A new (subject,
    /// service, law) creates a case and records `Submitted`; an existing one
    /// is reset in place without an event of its own. The claimed result
    /// must match the verified result and the submission must escape review
    /// sampling for an automatic approval; otherwise the case goes to
    /// `IN_REVIEW`.
    pub fn submit_case(
        &self,
        bsn: &str,
        service: &str,
        law: &str,
        parameters: Record,
        claimed_result: Record,
        approved_claims_only: bool,
    ) -> Result<CaseId, CaseError> {
        let request = EvaluationRequest::new(service, law, parameters.clone()).with_approved(true);
        let result = self.services.evaluate(request)?;
        let verified = result.output;

        let matched = results_match(&claimed_result, &verified);
        let sampled = (self.sampler)() < self.sample_rate;
        let submission = Submission {
            bsn: bsn.to_string(),
            service: service.to_string(),
            law: law.to_string(),
            parameters,
            claimed_result,
            approved_claims_only,
        };

        let mut guard = self.state.write();
        let store = &mut *guard;
        let key = (bsn.to_string(), service.to_string(), law.to_string());

        let case_id = match store.index.get(&key).copied() {
            Some(case_id) => {
                let case = store.cases.get_mut(&case_id).ok_or(CaseError::CaseNotFound { case_id })?;
                case.reset(submission, verified.clone(), result.rulespec_uuid);
                case_id
            }
            None => {
                let case = Case::new(submission, verified.clone(), result.rulespec_uuid);
                let case_id = case.id;
                let data = case.submitted_data();
                store.index.insert(key, case_id);
                store.cases.insert(case_id, case);
                self.append(store, case_id, CaseEventType::Submitted, data);
                case_id
            }
        };

        let case = store.cases.get_mut(&case_id).ok_or(CaseError::CaseNotFound { case_id })?;
        let (decision, data) = if matched && !sampled {
            (CaseEventType::AutomaticallyDecided, case.decide_automatically(verified, true)?)
        } else {
            let reason = if matched {
                "Selected for manual review - random sample check"
            } else {
                "Selected for manual review - results differ"
            };
            (
                CaseEventType::AddedToManualReview,
                case.select_for_manual_review(SYSTEM_VERIFIER, reason)?,
            )
        };
        let status = case.status;
        self.append(store, case_id, decision, data);

        tracing::info!(
            %case_id,
            service = %service,
            law = %law,
            %status,
            matched,
            sampled,
            "case submitted"
        );
        Ok(case_id)
    }

    /// Record a reviewer's decision on a case in review or under objection.
    /// `override_result`, when given, replaces the verified result.
    pub fn complete_manual_review(
        &self,
        case_id: CaseId,
        verifier_id: &str,
        approved: bool,
        reason: &str,
        override_result: Option<Record>,
    ) -> Result<Case, CaseError> {
        self.mutate(case_id, |case| {
            let data = case.decide(verifier_id, approved, reason, override_result)?;
            Ok((CaseEventType::Decided, data))
        })
    }

    /// File an objection against a decided case.
    pub fn object_case(&self, case_id: CaseId, reason: &str) -> Result<Case, CaseError> {
        self.mutate(case_id, |case| Ok((CaseEventType::Objected, case.object(reason)?)))
    }

    /// Record objection eligibility. Only the fields set in `update` change.
    pub fn determine_objection_status(&self, case_id: CaseId, update: &ObjectionStatus) -> Result<Case, CaseError> {
        self.mutate(case_id, |case| {
            Ok((CaseEventType::ObjectionStatusDetermined, case.determine_objection_status(update)))
        })
    }

    /// Record whether a filed objection is admissible.
    pub fn determine_objection_admissibility(&self, case_id: CaseId, admissible: Option<bool>) -> Result<Case, CaseError> {
        self.mutate(case_id, |case| {
            Ok((
                CaseEventType::ObjectionAdmissibilityDetermined,
                case.determine_objection_admissibility(admissible),
            ))
        })
    }

    /// Record appeal eligibility. Only the fields set in `update` change.
    pub fn determine_appeal_status(&self, case_id: CaseId, update: &AppealStatus) -> Result<Case, CaseError> {
        self.mutate(case_id, |case| {
            Ok((CaseEventType::AppealStatusDetermined, case.determine_appeal_status(update)))
        })
    }

    /// Attach a newly filed claim. Returns false, recording nothing, if the
    /// claim was already attached.
    pub fn add_claim(&self, case_id: CaseId, claim: &Claim) -> Result<bool, CaseError> {
        let mut guard = self.state.write();
        let store = &mut *guard;
        let case = store.cases.get_mut(&case_id).ok_or(CaseError::CaseNotFound { case_id })?;
        if !case.add_claim(claim.id) {
            return Ok(false);
        }
        self.append(store, case_id, CaseEventType::ClaimCreated, claim.event_data());
        Ok(true)
    }

    /// Record the review outcome of a linked claim.
    pub fn record_claim_decision(&self, case_id: CaseId, claim: &Claim) -> Result<(), CaseError> {
        let event_type = match claim.status {
            ClaimStatus::Approved => CaseEventType::ClaimApproved,
            ClaimStatus::Rejected => CaseEventType::ClaimRejected,
            ClaimStatus::Pending => return Ok(()),
        };
        self.mutate(case_id, |case| {
            case.add_claim(claim.id);
            Ok((event_type, claim.event_data()))
        })
        .map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The case for (`bsn`, `service`, `law`), if one was submitted.
    pub fn get_case(&self, bsn: &str, service: &str, law: &str) -> Option<Case> {
        let state = self.state.read();
        let key = (bsn.to_string(), service.to_string(), law.to_string());
        state.index.get(&key).and_then(|id| state.cases.get(id)).cloned()
    }

    /// The case with identifier `case_id`.
    pub fn get_case_by_id(&self, case_id: CaseId) -> Result<Case, CaseError> {
        self.state
            .read()
            .cases
            .get(&case_id)
            .cloned()
            .ok_or(CaseError::CaseNotFound { case_id })
    }

    /// Cases of `service` currently in `status`, oldest first.
    pub fn get_cases_by_status(&self, service: &str, status: CaseStatus) -> Vec<Case> {
        self.collect(|c| c.service == service && c.status == status)
    }

    /// Cases decided under `law` by `service`, oldest first.
    pub fn get_cases_by_law(&self, law: &str, service: &str) -> Vec<Case> {
        self.collect(|c| c.law == law && c.service == service)
    }

    /// Recorded events in order, optionally only those of one case.
    pub fn get_events(&self, case_id: Option<CaseId>) -> Vec<Event> {
        let state = self.state.read();
        match case_id {
            Some(id) => state.events.iter().filter(|e| e.case_id == id).cloned().collect(),
            None => state.events.clone(),
        }
    }

    /// Whether a rule has determined an objection is possible.
    pub fn can_object(&self, case_id: CaseId) -> Result<bool, CaseError> {
        Ok(self.get_case_by_id(case_id)?.can_object())
    }

    /// Whether a rule has determined an appeal is possible.
    pub fn can_appeal(&self, case_id: CaseId) -> Result<bool, CaseError> {
        Ok(self.get_case_by_id(case_id)?.can_appeal())
    }

    /// Number of cases.
    pub fn len(&self) -> usize {
        self.state.read().cases.len()
    }

    /// True if no case was ever submitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn mutate<F>(&self, case_id: CaseId, f: F) -> Result<Case, CaseError>
    where
        F: FnOnce(&mut Case) -> Result<(CaseEventType, Record), CaseError>,
    {
        let mut guard = self.state.write();
        let store = &mut *guard;
        let case = store.cases.get_mut(&case_id).ok_or(CaseError::CaseNotFound { case_id })?;
        let (event_type, data) = f(case)?;
        let snapshot = case.clone();
        self.append(store, case_id, event_type, data);
        tracing::debug!(%case_id, event = %event_type, status = %snapshot.status, "case updated");
        Ok(snapshot)
    }

    fn append(&self, store: &mut CaseStore, case_id: CaseId, event_type: CaseEventType, data: Record) {
        let event = Event::new(case_id, event_type, data);
        if let Some(tx) = &self.events_tx {
            if tx.send(event.clone()).is_err() {
                tracing::debug!(%case_id, event = %event_type, "rule trigger stopped, event not dispatched");
            }
        }
        store.events.push(event);
    }

    fn collect(&self, pred: impl Fn(&Case) -> bool) -> Vec<Case> {
        let state = self.state.read();
        let mut cases: Vec<Case> = state.cases.values().filter(|c| pred(c)).cloned().collect();
        cases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        cases
    }
}

impl std::fmt::Debug for CaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CaseManager")
            .field("cases_count", &state.cases.len())
            .field("events_count", &state.events.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lac_core::{record, CalculationDate, Value};
    use lac_rules::RuleSet;

    const RULE: &str = r#"
uuid: zt-2025
name: Zorgtoeslag
law: zorgtoeslagwet
service: TOESLAGEN
valid_from: 2025-01-01
properties:
  parameters:
    - { name: BSN, type: string, required: true }
  output:
    - { name: amount, type: amount, type_spec: { unit: eurocent, precision: 0, min: 0 } }
actions:
  - output: amount
    operation: IF
    conditions:
      - test: { operation: EQUALS, subject: $BSN, value: "111" }
        then: 1200
      - else: 0
"#;

    fn manager(sample: f64) -> CaseManager {
        let catalog = RuleSet::from_specs([serde_yaml::from_str(RULE).unwrap()]);
        let services = Services::new(Arc::new(catalog), CalculationDate::parse("2025-03-01").unwrap());
        CaseManager::new(Arc::new(services)).with_sampler(move || sample)
    }

    fn submit(m: &CaseManager, bsn: &str, amount: i64) -> CaseId {
        m.submit_case(
            bsn,
            "TOESLAGEN",
            "zorgtoeslagwet",
            record! { "BSN" => bsn },
            record! { "amount" => amount },
            false,
        )
        .unwrap()
    }

    fn event_types(m: &CaseManager, id: CaseId) -> Vec<CaseEventType> {
        m.get_events(Some(id)).iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn matching_unsampled_submission_is_decided() {
        let m = manager(0.99);
        let id = submit(&m, "111", 1200);
        let case = m.get_case_by_id(id).unwrap();
        assert_eq!(case.status, CaseStatus::Decided);
        assert_eq!(case.approved, Some(true));
        assert_eq!(case.verified_result.get("amount"), Some(&Value::Int(1200)));
        assert_eq!(event_types(&m, id), [CaseEventType::Submitted, CaseEventType::AutomaticallyDecided]);
    }

    #[test]
    fn differing_submission_goes_to_review_regardless_of_sampling() {
        let m = manager(0.99);
        let id = submit(&m, "111", 5000);
        let case = m.get_case_by_id(id).unwrap();
        assert_eq!(case.status, CaseStatus::InReview);
        assert!(case.reason.as_deref().unwrap().contains("results differ"));
        assert_eq!(case.verifier_id.as_deref(), Some(SYSTEM_VERIFIER));
    }

    #[test]
    fn missing_required_input_is_never_auto_approved() {
        let rule = r#"
uuid: zt-income
name: Zorgtoeslag
law: zorgtoeslagwet
service: TOESLAGEN
valid_from: 2025-01-01
properties:
  input:
    - { name: income, type: amount, required: true }
  output:
    - { name: amount, type: amount }
actions:
  - output: amount
    operation: ADD
    values: [1200, $income]
"#;
        let catalog = RuleSet::from_specs([serde_yaml::from_str(rule).unwrap()]);
        let services = Services::new(Arc::new(catalog), CalculationDate::parse("2025-03-01").unwrap());
        let m = CaseManager::new(Arc::new(services)).with_sampler(|| 0.99);

        let id = submit(&m, "111", 1200);
        let case = m.get_case_by_id(id).unwrap();
        assert!(case.verified_result.is_empty());
        assert_eq!(case.status, CaseStatus::InReview);
        assert!(case.reason.as_deref().unwrap().contains("results differ"));
    }

    #[test]
    fn sampled_submission_goes_to_review() {
        let m = manager(0.0);
        let id = submit(&m, "111", 1200);
        let case = m.get_case_by_id(id).unwrap();
        assert_eq!(case.status, CaseStatus::InReview);
        assert!(case.reason.as_deref().unwrap().contains("random sample check"));
    }

    #[test]
    fn resubmission_reuses_identifier_without_extra_event() {
        let m = manager(0.99);
        let first = submit(&m, "111", 5000);
        let second = submit(&m, "111", 1200);
        assert_eq!(first, second);
        assert_eq!(m.len(), 1);
        let case = m.get_case_by_id(first).unwrap();
        assert_eq!(case.status, CaseStatus::Decided);
        assert_eq!(case.reason, None);
        assert_eq!(
            event_types(&m, first),
            [
                CaseEventType::Submitted,
                CaseEventType::AddedToManualReview,
                CaseEventType::AutomaticallyDecided,
            ]
        );
    }

    #[test]
    fn manual_review_requires_review_status() {
        let m = manager(0.99);
        let decided = submit(&m, "111", 1200);
        let before = m.get_case_by_id(decided).unwrap();
        assert!(matches!(
            m.complete_manual_review(decided, "inspector", true, "fine", None),
            Err(CaseError::InvalidTransition { .. })
        ));
        assert_eq!(m.get_case_by_id(decided).unwrap(), before);
        assert_eq!(m.get_events(Some(decided)).len(), 2);

        let reviewed = submit(&m, "222", 100);
        let case = m
            .complete_manual_review(reviewed, "inspector", false, "no entitlement", None)
            .unwrap();
        assert_eq!(case.status, CaseStatus::Decided);
        assert_eq!(case.approved, Some(false));
        let last = m.get_events(Some(reviewed)).pop().unwrap();
        assert_eq!(last.event_type, CaseEventType::Decided);
        assert_eq!(last.data.get("verifier_id"), Some(&Value::from("inspector")));
    }

    #[test]
    fn objection_requires_decision() {
        let m = manager(0.0);
        let id = submit(&m, "111", 1200);
        assert!(m.object_case(id, "too low").is_err());

        m.complete_manual_review(id, "inspector", true, "ok", None).unwrap();
        let case = m.object_case(id, "too low").unwrap();
        assert_eq!(case.status, CaseStatus::Objected);
        let last = m.get_events(Some(id)).pop().unwrap();
        assert_eq!(last.data, record! { "reason" => "too low" });
    }

    #[test]
    fn each_mutation_appends_one_event_with_changed_fields() {
        let m = manager(0.99);
        let id = submit(&m, "111", 1200);
        let before = m.get_events(None).len();
        let update = ObjectionStatus {
            possible: Some(true),
            objection_period: Some(6),
            ..ObjectionStatus::default()
        };
        m.determine_objection_status(id, &update).unwrap();
        let events = m.get_events(None);
        assert_eq!(events.len(), before + 1);
        assert_eq!(events[before].data, record! { "possible" => true, "objection_period" => 6i64 });
        assert!(m.can_object(id).unwrap());
        assert!(!m.can_appeal(id).unwrap());
    }

    #[test]
    fn unknown_case_is_reported() {
        let m = manager(0.99);
        let missing = CaseId::new();
        assert!(matches!(
            m.object_case(missing, "x"),
            Err(CaseError::CaseNotFound { case_id }) if case_id == missing
        ));
        assert!(m.get_case("111", "TOESLAGEN", "zorgtoeslagwet").is_none());
    }

    #[test]
    fn queries_filter_by_status_and_law() {
        let m = manager(0.99);
        submit(&m, "111", 1200);
        submit(&m, "222", 999);
        assert_eq!(m.get_cases_by_status("TOESLAGEN", CaseStatus::Decided).len(), 1);
        assert_eq!(m.get_cases_by_status("TOESLAGEN", CaseStatus::InReview).len(), 1);
        assert_eq!(m.get_cases_by_law("zorgtoeslagwet", "TOESLAGEN").len(), 2);
        assert!(m.get_cases_by_law("zorgtoeslagwet", "OTHER").is_empty());
        assert_eq!(m.get_events(None).len(), 4);
    }

    #[test]
    fn evaluation_errors_leave_no_case() {
        let m = manager(0.99);
        let err = m
            .submit_case("111", "UNKNOWN", "zorgtoeslagwet", Record::new(), Record::new(), false)
            .unwrap_err();
        assert!(matches!(err, CaseError::Engine(_)));
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn events_are_forwarded_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let m = manager(0.99).with_event_sink(tx);
        let id = submit(&m, "111", 1200);
        assert_eq!(rx.recv().await.unwrap().event_type, CaseEventType::Submitted);
        let decided = rx.recv().await.unwrap();
        assert_eq!(decided.event_type, CaseEventType::AutomaticallyDecided);
        assert_eq!(decided.case_id, id);
    }
}
