//! # Event-Driven Rule Trigger
//!
//! Rules may declare that they apply to case events. When a matching event
//! is recorded, the rule is evaluated with the case as its only parameter
//! and selected outputs are written back through a case mutator.
//!
//! ## Dispatch
//!
//! ```text
//! CaseManager ──event──▶ dispatcher ──hash(case_id)──▶ lane 0..N ──▶ spawn_blocking(apply_rules)
//! ```
//!
//! The case manager pushes every recorded event onto an unbounded channel.
//! The dispatcher routes each event to one of N lanes by case identifier.
//! A lane handles one event at a time, so triggers for the same case run
//! in recording order and at most N evaluations run at once. Evaluation is
//! synchronous and runs on the blocking pool.
//!
//! A failed trigger is logged and dropped. It never affects the call that
//! recorded the event, and it is not retried.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lac_core::{CaseId, Record, Value};
use lac_engine::{EvaluationRequest, ServiceProvider, Services};
use lac_rules::{matching_applies, UpdateMethod, REFERENCE_SIGIL};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::case::{AppealStatus, ObjectionStatus};
use crate::case_manager::CaseManager;
use crate::error::CaseError;
use crate::event::Event;

/// Counts of processed trigger events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerStats {
    /// Events whose matching rules all applied cleanly.
    pub processed: u64,
    /// Events whose trigger failed.
    pub failed: u64,
}

impl TriggerStats {
    /// Events handled either way.
    pub fn completed(&self) -> u64 {
        self.processed + self.failed
    }
}

/// Evaluates `applies` declarations against recorded events.
pub struct RuleTrigger {
    services: Arc<Services>,
    cases: Weak<CaseManager>,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl RuleTrigger {
    /// A trigger writing back to `cases`. Only a weak handle is kept, so a
    /// dropped case manager stops the trigger.
    pub fn new(services: Arc<Services>, cases: &Arc<CaseManager>) -> Self {
        Self {
            services,
            cases: Arc::downgrade(cases),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> TriggerStats {
        TriggerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Run every rule declaration matching `event`, returning the number of
    /// updates applied.
    ///
    /// For each match the case is reloaded, passed to the rule under the
    /// declaration's name, and evaluated at the root reference date with
    /// approved claims only. Each update maps `$output` references to
    /// fields; outputs that are absent or null are left out.
    pub fn apply_rules(&self, event: &Event) -> Result<usize, CaseError> {
        let Some(cases) = self.cases.upgrade() else {
            return Ok(0);
        };
        let matches = matching_applies(
            self.services.catalog().as_ref(),
            event.event_type.as_str(),
            &event.data,
        );

        let mut applied = 0;
        for (spec, applies) in matches {
            let case = cases.get_case_by_id(event.case_id)?;
            let mut parameters = Record::new();
            parameters.insert(applies.name.clone(), Value::from_serializable(&case)?);

            tracing::debug!(
                case_id = %case.id,
                event = %event.event_type,
                service = %spec.service,
                law = %spec.law,
                "applying rule to case event"
            );
            let request = EvaluationRequest::new(spec.service.as_str(), spec.law.as_str(), parameters)
                .with_reference_date(self.services.root_reference_date())
                .with_approved(true);
            let result = self.services.evaluate(request)?;

            for update in &applies.update {
                let fields = mapped_fields(&update.mapping, &result.output);
                match update.method()? {
                    UpdateMethod::DetermineObjectionStatus => {
                        cases.determine_objection_status(case.id, &ObjectionStatus::from_fields(&fields))?;
                    }
                    UpdateMethod::DetermineObjectionAdmissibility => {
                        let admissible = fields.get("admissible").and_then(Value::as_bool);
                        cases.determine_objection_admissibility(case.id, admissible)?;
                    }
                    UpdateMethod::DetermineAppealStatus => {
                        cases.determine_appeal_status(case.id, &AppealStatus::from_fields(&fields))?;
                    }
                }
                applied += 1;
            }
        }
        Ok(applied)
    }
}

impl std::fmt::Debug for RuleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTrigger").field("stats", &self.stats()).finish()
    }
}

/// Read `$output` references out of `output`. Mappings without the sigil
/// and outputs that are absent or null are skipped.
fn mapped_fields(mapping: &BTreeMap<String, String>, output: &Record) -> Record {
    mapping
        .iter()
        .filter_map(|(field, reference)| {
            let name = reference.strip_prefix(REFERENCE_SIGIL)?;
            let value = output.get(name).filter(|v| !v.is_null())?;
            Some((field.clone(), value.clone()))
        })
        .collect()
}

/// Start the dispatcher and `workers` lanes on the current runtime. The
/// dispatcher stops once every sender of `events` is dropped.
pub fn spawn_dispatcher(
    trigger: Arc<RuleTrigger>,
    mut events: UnboundedReceiver<Event>,
    workers: usize,
) -> JoinHandle<()> {
    let lanes: Vec<_> = (0..workers.max(1))
        .map(|lane| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_lane(lane, Arc::clone(&trigger), rx));
            tx
        })
        .collect();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let lane = lane_for(&event.case_id, lanes.len());
            if let Err(err) = lanes[lane].send(event) {
                tracing::error!(lane, case_id = %err.0.case_id, "trigger lane closed, event dropped");
            }
        }
        tracing::debug!("rule trigger dispatcher stopped");
    })
}

async fn run_lane(lane: usize, trigger: Arc<RuleTrigger>, mut events: UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let case_id = event.case_id;
        let event_type = event.event_type;
        let worker = Arc::clone(&trigger);
        match tokio::task::spawn_blocking(move || worker.apply_rules(&event)).await {
            Ok(Ok(applied)) => {
                trigger.processed.fetch_add(1, Ordering::Relaxed);
                if applied > 0 {
                    tracing::debug!(lane, %case_id, event = %event_type, applied, "rule trigger applied");
                }
            }
            Ok(Err(err)) => {
                trigger.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(lane, %case_id, event = %event_type, error = %err, "rule trigger failed");
            }
            Err(err) => {
                trigger.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(lane, %case_id, event = %event_type, error = %err, "rule trigger task aborted");
            }
        }
    }
}

fn lane_for(case_id: &CaseId, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    case_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseStatus;
    use crate::event::CaseEventType;
    use lac_core::{record, CalculationDate};
    use lac_rules::{RuleSet, RuleSpec};
    use std::time::Duration;

    const ALLOWANCE: &str = r#"
uuid: zt-2025
name: Zorgtoeslag
law: zorgtoeslagwet
service: TOESLAGEN
valid_from: 2025-01-01
properties:
  output:
    - { name: amount, type: amount }
actions:
  - { output: amount, value: 1200 }
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
    - { name: unknown, type: string }
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
            not_possible_reason: $unknown
actions:
  - output: objection_possible
    operation: EQUALS
    subject: $case.status
    value: DECIDED
  - { output: objection_period_weeks, value: 6 }
"#;

    fn setup(rules: &[&str]) -> (Arc<CaseManager>, RuleTrigger) {
        let specs: Vec<RuleSpec> = rules.iter().map(|r| serde_yaml::from_str(r).unwrap()).collect();
        let services = Arc::new(Services::new(
            Arc::new(RuleSet::from_specs(specs)),
            CalculationDate::parse("2025-03-01").unwrap(),
        ));
        let cases = Arc::new(CaseManager::new(Arc::clone(&services)).with_sampler(|| 0.0));
        let trigger = RuleTrigger::new(services, &cases);
        (cases, trigger)
    }

    fn rejected_case(cases: &CaseManager) -> CaseId {
        let id = cases
            .submit_case("111", "TOESLAGEN", "zorgtoeslagwet", Record::new(), record! { "amount" => 1200 }, false)
            .unwrap();
        cases.complete_manual_review(id, "inspector", false, "rejected", None).unwrap();
        id
    }

    fn last_event(cases: &CaseManager, id: CaseId) -> Event {
        cases.get_events(Some(id)).pop().unwrap()
    }

    #[test]
    fn matching_event_updates_case() {
        let (cases, trigger) = setup(&[ALLOWANCE, OBJECTION]);
        let id = rejected_case(&cases);
        let decided = last_event(&cases, id);
        assert_eq!(decided.event_type, CaseEventType::Decided);

        assert_eq!(trigger.apply_rules(&decided).unwrap(), 1);
        let case = cases.get_case_by_id(id).unwrap();
        assert_eq!(case.objection_status.possible, Some(true));
        assert_eq!(case.objection_status.objection_period, Some(6));
        assert_eq!(case.objection_status.not_possible_reason, None);

        let determined = last_event(&cases, id);
        assert_eq!(determined.event_type, CaseEventType::ObjectionStatusDetermined);
        assert_eq!(determined.data, record! { "possible" => true, "objection_period" => 6i64 });
    }

    #[test]
    fn filter_mismatch_applies_nothing() {
        let (cases, trigger) = setup(&[ALLOWANCE, OBJECTION]);
        let id = cases
            .submit_case("111", "TOESLAGEN", "zorgtoeslagwet", Record::new(), record! { "amount" => 1200 }, false)
            .unwrap();
        let approved = cases.complete_manual_review(id, "inspector", true, "ok", None).unwrap();
        assert_eq!(approved.status, CaseStatus::Decided);
        assert_eq!(trigger.apply_rules(&last_event(&cases, id)).unwrap(), 0);
        assert!(cases.get_case_by_id(id).unwrap().objection_status.is_empty());
    }

    #[test]
    fn unknown_update_method_is_an_error() {
        let broken = OBJECTION.replace("determine_objection_status", "close_case");
        let (cases, trigger) = setup(&[ALLOWANCE, &broken]);
        let id = rejected_case(&cases);
        assert!(matches!(
            trigger.apply_rules(&last_event(&cases, id)),
            Err(CaseError::Spec(_))
        ));
    }

    #[test]
    fn dropped_case_manager_stops_trigger() {
        let (cases, trigger) = setup(&[ALLOWANCE, OBJECTION]);
        let id = rejected_case(&cases);
        let event = last_event(&cases, id);
        drop(cases);
        assert_eq!(trigger.apply_rules(&event).unwrap(), 0);
    }

    #[test]
    fn mapping_skips_missing_and_null_outputs() {
        let mapping = [
            ("possible".to_string(), "$objection_possible".to_string()),
            ("period".to_string(), "$missing".to_string()),
            ("reason".to_string(), "$nothing".to_string()),
            ("literal".to_string(), "objection_possible".to_string()),
        ]
        .into_iter()
        .collect();
        let output = record! { "objection_possible" => true, "nothing" => Value::Null };
        assert_eq!(mapped_fields(&mapping, &output), record! { "possible" => true });
    }

    #[test]
    fn lanes_are_stable_per_case() {
        let id = CaseId::new();
        assert_eq!(lane_for(&id, 4), lane_for(&id, 4));
        assert!(lane_for(&id, 4) < 4);
        assert_eq!(lane_for(&id, 1), 0);
    }

    #[tokio::test]
    async fn dispatcher_applies_rules_asynchronously() {
        let specs: Vec<RuleSpec> = [ALLOWANCE, OBJECTION].iter().map(|r| serde_yaml::from_str(r).unwrap()).collect();
        let services = Arc::new(Services::new(
            Arc::new(RuleSet::from_specs(specs)),
            CalculationDate::parse("2025-03-01").unwrap(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let cases = Arc::new(
            CaseManager::new(Arc::clone(&services))
                .with_sampler(|| 0.0)
                .with_event_sink(tx),
        );
        let trigger = Arc::new(RuleTrigger::new(services, &cases));
        let handle = spawn_dispatcher(Arc::clone(&trigger), rx, 2);

        let id = rejected_case(&cases);
        let mut attempts = 0;
        while !cases.get_case_by_id(id).unwrap().can_object() {
            attempts += 1;
            assert!(attempts < 200, "trigger did not run");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(trigger.stats().failed, 0);

        drop(cases);
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
