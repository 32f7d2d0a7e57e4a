//! # Integration Tests for the case machine
//!
//! Drives a [`Machine`] end to end: submission and review routing,
//! objections, resubmission, claims feeding back into evaluation, and the
//! rule trigger writing objection status onto decided cases.

use std::sync::Arc;
use std::time::Duration;

use lac_case::{
    CaseError, CaseEventType, CaseStatus, ClaimFilter, ClaimStatus, ClaimSubmission, Machine, MachineConfig,
};
use lac_core::{record, CalculationDate, CaseId, Record, Value};
use lac_engine::EvaluationRequest;
use lac_rules::{RuleSet, RuleSpec};

const ALLOWANCE: &str = r#"
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
      - test: { operation: EQUALS, subject: $has_partner, value: true }
        then: 600
      - else: 1200
"#;

const OBJECTION: &str = r#"
uuid: awb-bezwaar-2025
name: Bezwaartermijn
law: awb/bezwaar
service: JenV
valid_from: 2025-01-01
properties:
  parameters:
    - { name: case, type: object, required: true }
  output:
    - { name: objection_possible, type: boolean }
    - { name: objection_period_weeks, type: int }
  applies:
    - name: case
      aggregate: Case
      events:
        - type: decided
          filter: { approved: false }
      update:
        - method: determine_objection_status
          mapping:
            possible: $objection_possible
            objection_period: $objection_period_weeks
actions:
  - output: objection_possible
    operation: EQUALS
    subject: $case.status
    value: DECIDED
  - { output: objection_period_weeks, value: 6 }
"#;

const SERVICE: &str = "TOESLAGEN";
const LAW: &str = "zorgtoeslagwet";

/// Helper: a machine that never samples matching submissions for review.
fn machine() -> Machine {
    let specs: Vec<RuleSpec> = [ALLOWANCE, OBJECTION]
        .iter()
        .map(|rule| serde_yaml::from_str(rule).unwrap())
        .collect();
    let config = MachineConfig {
        root_reference_date: Some(CalculationDate::parse("2025-03-01").unwrap()),
        trigger_workers: 2,
        ..MachineConfig::default()
    };
    Machine::with_sampler(Arc::new(RuleSet::from_specs(specs)), config, || 0.99).unwrap()
}

/// Helper: submit a claimed allowance for `bsn`.
fn submit(machine: &Machine, bsn: &str, amount: i64) -> CaseId {
    machine
        .submit_case(bsn, SERVICE, LAW, record! { "BSN" => bsn }, record! { "amount" => amount }, false)
        .unwrap()
}

fn event_types(machine: &Machine, id: CaseId) -> Vec<CaseEventType> {
    machine.get_events(Some(id)).iter().map(|e| e.event_type).collect()
}

/// Helper: wait until the trigger has handled every recorded event.
async fn settle(machine: &Machine) {
    for _ in 0..300 {
        if machine.trigger_stats().completed() >= machine.get_events(None).len() as u64 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("rule trigger did not catch up: {:?}", machine.trigger_stats());
}

// -- Construction -------------------------------------------------------------

#[test]
fn test_machine_requires_runtime() {
    let err = Machine::new(Arc::new(RuleSet::default()), MachineConfig::default()).unwrap_err();
    assert!(matches!(err, CaseError::NoRuntime));
}

#[tokio::test]
async fn test_machine_starts_trigger() {
    let machine = machine();
    assert!(machine.trigger_running());
    assert_eq!(machine.trigger_stats().completed(), 0);
    assert_eq!(machine.services().service_names(), ["JenV", "TOESLAGEN"]);
}

// -- Submission ---------------------------------------------------------------

#[tokio::test]
async fn test_matching_claim_is_decided_automatically() {
    let machine = machine();
    let id = submit(&machine, "111", 1200);

    let case = machine.get_case_by_id(id).unwrap();
    assert_eq!(case.status, CaseStatus::Decided);
    assert_eq!(case.approved, Some(true));
    assert_eq!(case.rulespec_uuid, "zt-2025");
    assert_eq!(event_types(&machine, id), [CaseEventType::Submitted, CaseEventType::AutomaticallyDecided]);
    assert_eq!(machine.get_case("111", SERVICE, LAW).map(|c| c.id), Some(id));
}

#[tokio::test]
async fn test_claim_within_tolerance_is_decided_automatically() {
    let machine = machine();
    let id = submit(&machine, "111", 1205);
    assert_eq!(machine.get_case_by_id(id).unwrap().status, CaseStatus::Decided);
}

#[tokio::test]
async fn test_differing_claim_goes_to_review() {
    let machine = machine();
    let id = submit(&machine, "111", 5000);

    let case = machine.get_case_by_id(id).unwrap();
    assert_eq!(case.status, CaseStatus::InReview);
    assert_eq!(case.approved, None);
    assert_eq!(machine.get_cases_by_status(SERVICE, CaseStatus::InReview).len(), 1);
    assert!(machine.get_cases_by_status(SERVICE, CaseStatus::Decided).is_empty());
}

#[tokio::test]
async fn test_resubmission_resets_existing_case() {
    let machine = machine();
    let first = submit(&machine, "111", 5000);
    machine
        .complete_manual_review(first, "inspector", false, "claimed too much", None)
        .unwrap();

    let second = submit(&machine, "111", 1200);
    assert_eq!(first, second);
    let case = machine.get_case_by_id(first).unwrap();
    assert_eq!(case.status, CaseStatus::Decided);
    assert_eq!(case.approved, Some(true));
    assert_eq!(case.verifier_id.as_deref(), None);
    assert_eq!(machine.get_cases_by_law(LAW, SERVICE).len(), 1);
}

// -- Review and objection -----------------------------------------------------

#[tokio::test]
async fn test_review_then_objection_then_review() -> anyhow::Result<()> {
    let machine = machine();
    let id = machine.submit_case("222", SERVICE, LAW, record! { "BSN" => "222" }, record! { "amount" => 5000 }, false)?;

    let decided = machine.complete_manual_review(id, "inspector", false, "not entitled", None)?;
    assert_eq!(decided.status, CaseStatus::Decided);
    assert_eq!(decided.approved, Some(false));

    let objected = machine.object_case(id, "my income was lower")?;
    assert_eq!(objected.status, CaseStatus::Objected);
    assert_eq!(objected.reason.as_deref(), Some("my income was lower"));

    let override_result = record! { "amount" => 5000 };
    let final_case =
        machine.complete_manual_review(id, "senior", true, "objection upheld", Some(override_result.clone()))?;
    assert_eq!(final_case.status, CaseStatus::Decided);
    assert_eq!(final_case.verified_result, override_result);
    Ok(())
}

#[tokio::test]
async fn test_objection_requires_decided_case() {
    let machine = machine();
    let id = submit(&machine, "222", 5000);
    let before = machine.get_events(Some(id)).len();

    let err = machine.object_case(id, "too early").unwrap_err();
    assert!(matches!(
        err,
        CaseError::InvalidTransition { from: CaseStatus::InReview, to: CaseStatus::Objected, .. }
    ));
    assert_eq!(machine.get_case_by_id(id).unwrap().status, CaseStatus::InReview);
    assert_eq!(machine.get_events(Some(id)).len(), before);
}

#[tokio::test]
async fn test_unknown_case_is_reported() {
    let machine = machine();
    let missing = CaseId::new();
    assert!(matches!(machine.get_case_by_id(missing), Err(CaseError::CaseNotFound { .. })));
    assert!(matches!(machine.object_case(missing, "x"), Err(CaseError::CaseNotFound { .. })));
    assert!(machine.get_case("999", SERVICE, LAW).is_none());
}

// -- Rule trigger -------------------------------------------------------------

#[tokio::test]
async fn test_rejection_triggers_objection_status() {
    let machine = machine();
    let id = submit(&machine, "222", 5000);
    machine
        .complete_manual_review(id, "inspector", false, "not entitled", None)
        .unwrap();

    settle(&machine).await;
    let case = machine.get_case_by_id(id).unwrap();
    assert_eq!(case.objection_status.possible, Some(true));
    assert_eq!(case.objection_status.objection_period, Some(6));
    assert!(machine.can_object(id).unwrap());
    assert_eq!(
        event_types(&machine, id).last(),
        Some(&CaseEventType::ObjectionStatusDetermined)
    );
    assert_eq!(machine.trigger_stats().failed, 0);
}

#[tokio::test]
async fn test_approval_does_not_trigger_objection_status() {
    let machine = machine();
    let id = submit(&machine, "111", 1200);

    settle(&machine).await;
    assert!(machine.get_case_by_id(id).unwrap().objection_status.is_empty());
    assert!(!machine.can_object(id).unwrap());
}

// -- Claims -------------------------------------------------------------------

#[tokio::test]
async fn test_claims_feed_evaluation() {
    let machine = machine();
    let id = submit(&machine, "111", 1200);
    let claim = machine
        .submit_claim(
            ClaimSubmission::new(SERVICE, LAW, "111", "has_partner", true)
                .with_reason("married last month", "citizen")
                .with_case(id),
        )
        .unwrap();
    assert_eq!(claim.status, ClaimStatus::Pending);

    let amount = |approved: bool| {
        let request = EvaluationRequest::new(SERVICE, LAW, record! { "BSN" => "111" }).with_approved(approved);
        machine.evaluate(request).unwrap().output.get("amount").cloned()
    };
    assert_eq!(amount(false), Some(Value::Int(600)));
    assert_eq!(amount(true), Some(Value::Int(1200)));

    machine.approve_claim(claim.id, "inspector", Value::Bool(true)).unwrap();
    assert_eq!(amount(true), Some(Value::Int(600)));

    assert_eq!(
        event_types(&machine, id),
        [
            CaseEventType::Submitted,
            CaseEventType::AutomaticallyDecided,
            CaseEventType::ClaimCreated,
            CaseEventType::ClaimApproved,
        ]
    );
    assert_eq!(machine.get_case_by_id(id).unwrap().claim_ids, [claim.id]);
}

#[tokio::test]
async fn test_rejected_claim_is_ignored() {
    let machine = machine();
    let claim = machine
        .submit_claim(ClaimSubmission::new(SERVICE, LAW, "111", "has_partner", true).with_reason("guess", "citizen"))
        .unwrap();
    let rejected = machine.reject_claim(claim.id, "inspector", "no evidence").unwrap();
    assert_eq!(rejected.status, ClaimStatus::Rejected);

    let request = EvaluationRequest::new(SERVICE, LAW, record! { "BSN" => "111" });
    let output = machine.evaluate(request).unwrap().output;
    assert_eq!(output.get("amount"), Some(&Value::Int(1200)));
    assert!(machine.get_claims_by_bsn("111", ClaimFilter::approved()).is_empty());
    assert_eq!(machine.get_claims_by_bsn("111", ClaimFilter::all()).len(), 1);
}

#[tokio::test]
async fn test_claim_linking() {
    let machine = machine();
    let id = submit(&machine, "111", 1200);
    let claim = machine
        .submit_claim(ClaimSubmission::new(SERVICE, LAW, "111", "has_partner", true).with_reason("", "citizen"))
        .unwrap();
    assert_eq!(claim.case_id, None);

    let linked = machine.link_claim(claim.id, id).unwrap();
    assert_eq!(linked.case_id, Some(id));
    assert_eq!(machine.get_claims_by_case(id, ClaimFilter::all()).len(), 1);
    assert!(matches!(
        machine.link_claim(claim.id, id),
        Err(CaseError::ClaimAlreadyLinked { .. })
    ));
    assert!(matches!(
        machine.link_claim(claim.id, CaseId::new()),
        Err(CaseError::CaseNotFound { .. })
    ));
}

#[tokio::test]
async fn test_claim_for_unknown_case_is_refused() {
    let machine = machine();
    let submission = ClaimSubmission::new(SERVICE, LAW, "111", "has_partner", true).with_case(CaseId::new());
    assert!(matches!(
        machine.submit_claim(submission),
        Err(CaseError::CaseNotFound { .. })
    ));
    assert!(machine.claim_manager().is_empty());
}

#[tokio::test]
async fn test_auto_approved_claim_counts_immediately() {
    let machine = machine();
    let id = submit(&machine, "111", 1200);
    let claim = machine
        .submit_claim(
            ClaimSubmission::new(SERVICE, LAW, "111", "has_partner", true)
                .with_reason("registry correction", "inspector")
                .with_case(id)
                .with_auto_approve(true),
        )
        .unwrap();
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(claim.verified_by.as_deref(), Some("inspector"));

    let claims: Record = machine
        .claims_for("111", SERVICE, LAW, ClaimFilter::approved())
        .into_iter()
        .map(|(key, claim)| (key, claim.new_value))
        .collect();
    assert_eq!(claims, record! { "has_partner" => true });
    assert_eq!(
        event_types(&machine, id)[2..],
        [CaseEventType::ClaimCreated, CaseEventType::ClaimApproved]
    );
}
