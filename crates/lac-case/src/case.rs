//! # Administrative Case
//!
//! A case tracks one subject's request under one law of one service, from
//! submission through decision, objection, and appeal.
//!
//! ## State Machine
//!
//! ```text
//! SUBMITTED ──▶ DECIDED ──▶ OBJECTED ──▶ DECIDED
//!     │            ▲            │
//!     ▼            │            ▼
//! IN_REVIEW ───────┘        IN_REVIEW
//! ```
//!
//! Resubmission resets a case to `SUBMITTED` from any status. Every
//! transition method validates the current status before touching any field
//! and returns the event payload describing what changed.

use lac_core::{CaseId, ClaimId, Record, Timestamp, Value};
use serde::{Deserialize, Serialize};

use crate::error::CaseError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    /// Submitted, not yet decided.
    Submitted,
    /// Awaiting a human decision.
    InReview,
    /// Decided, automatically or manually.
    Decided,
    /// An objection was filed against the decision.
    Objected,
}

impl CaseStatus {
    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::InReview => "IN_REVIEW",
            Self::Decided => "DECIDED",
            Self::Objected => "OBJECTED",
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = CaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(Self::Submitted),
            "IN_REVIEW" => Ok(Self::InReview),
            "DECIDED" => Ok(Self::Decided),
            "OBJECTED" => Ok(Self::Objected),
            other => Err(CaseError::UnknownStatus {
                kind: "case",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Objection and appeal status
// ---------------------------------------------------------------------------

/// Copy every `Some` field of `$update` onto `$target` and record it in the
/// returned payload.
macro_rules! merge_set_fields {
    ($target:expr, $update:expr; $($field:ident),+ $(,)?) => {{
        let mut changed = Record::new();
        $(
            if let Some(value) = &$update.$field {
                $target.$field = Some(value.clone());
                changed.insert(stringify!($field).to_string(), Value::from(value.clone()));
            }
        )+
        changed
    }};
}

/// Whether and within which periods an objection is possible. Only fields
/// a rule actually computed are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectionStatus {
    /// Objection is possible at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible: Option<bool>,
    /// Why an objection is not possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_possible_reason: Option<String>,
    /// Weeks within which an objection must be filed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objection_period: Option<i64>,
    /// Weeks within which the objection must be decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_period: Option<i64>,
    /// Weeks by which the decision period may be extended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_period: Option<i64>,
    /// Whether a filed objection is admissible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admissible: Option<bool>,
}

impl ObjectionStatus {
    /// Pick the known fields out of rule outputs. Fields with an unexpected
    /// type are left unset.
    pub fn from_fields(fields: &Record) -> Self {
        Self {
            possible: bool_field(fields, "possible"),
            not_possible_reason: string_field(fields, "not_possible_reason"),
            objection_period: int_field(fields, "objection_period"),
            decision_period: int_field(fields, "decision_period"),
            extension_period: int_field(fields, "extension_period"),
            admissible: bool_field(fields, "admissible"),
        }
    }

    /// True if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Whether and where an appeal is possible. Only fields a rule actually
/// computed are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppealStatus {
    /// Appeal is possible at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible: Option<bool>,
    /// Why an appeal is not possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_possible_reason: Option<String>,
    /// Weeks within which an appeal must be lodged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appeal_period: Option<i64>,
    /// Appeal may bypass the objection phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_appeal: Option<bool>,
    /// Why direct appeal is allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_appeal_reason: Option<String>,
    /// Court that hears the appeal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competent_court: Option<String>,
    /// Kind of court.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court_type: Option<String>,
}

impl AppealStatus {
    /// Pick the known fields out of rule outputs. Fields with an unexpected
    /// type are left unset.
    pub fn from_fields(fields: &Record) -> Self {
        Self {
            possible: bool_field(fields, "possible"),
            not_possible_reason: string_field(fields, "not_possible_reason"),
            appeal_period: int_field(fields, "appeal_period"),
            direct_appeal: bool_field(fields, "direct_appeal"),
            direct_appeal_reason: string_field(fields, "direct_appeal_reason"),
            competent_court: string_field(fields, "competent_court"),
            court_type: string_field(fields, "court_type"),
        }
    }

    /// True if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn bool_field(fields: &Record, key: &str) -> Option<bool> {
    fields.get(key).and_then(Value::as_bool)
}

fn string_field(fields: &Record, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Periods arrive as integers, or as floats without a fractional part.
fn int_field(fields: &Record, key: &str) -> Option<i64> {
    match fields.get(key)? {
        Value::Int(i) => Some(*i),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Case
// ---------------------------------------------------------------------------

/// Actor recorded for system-initiated review routing.
pub const SYSTEM_VERIFIER: &str = "SYSTEM";

/// What a caller submits for evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Submission {
    /// Subject's citizen service number.
    pub bsn: String,
    /// Service handling the case.
    pub service: String,
    /// Law the case is decided under.
    pub law: String,
    /// Evaluation parameters.
    pub parameters: Record,
    /// Outcome the subject claims.
    pub claimed_result: Record,
    /// Whether only approved claims may feed the evaluation.
    pub approved_claims_only: bool,
}

/// An administrative case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Stable identifier, reused across resubmissions.
    pub id: CaseId,
    /// Subject's citizen service number.
    pub bsn: String,
    /// Service handling the case.
    pub service: String,
    /// Law the case is decided under.
    pub law: String,
    /// Rule version that produced the verified result.
    pub rulespec_uuid: String,
    /// Whether only approved claims fed the evaluation.
    pub approved_claims_only: bool,
    /// Outcome the subject claims.
    pub claimed_result: Record,
    /// Outcome the engine computed.
    pub verified_result: Record,
    /// Evaluation parameters.
    pub parameters: Record,
    /// Parameters under dispute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disputed_parameters: Option<Record>,
    /// Supporting evidence reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// Reason for the latest review routing, decision, or objection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Who routed or decided the case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_id: Option<String>,
    /// Objection eligibility as determined by rules.
    #[serde(default)]
    pub objection_status: ObjectionStatus,
    /// Appeal eligibility as determined by rules.
    #[serde(default)]
    pub appeal_status: AppealStatus,
    /// Outcome of the decision, once decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    /// Lifecycle status.
    pub status: CaseStatus,
    /// When the case was first submitted.
    pub created_at: Timestamp,
    /// When the case last changed.
    pub updated_at: Timestamp,
    /// Claims filed against this case.
    #[serde(default)]
    pub claim_ids: Vec<ClaimId>,
}

impl Case {
    /// A freshly submitted case.
    pub fn new(submission: Submission, verified_result: Record, rulespec_uuid: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: CaseId::new(),
            bsn: submission.bsn,
            service: submission.service,
            law: submission.law,
            rulespec_uuid: rulespec_uuid.into(),
            approved_claims_only: submission.approved_claims_only,
            claimed_result: submission.claimed_result,
            verified_result,
            parameters: submission.parameters,
            disputed_parameters: None,
            evidence: None,
            reason: None,
            verifier_id: None,
            objection_status: ObjectionStatus::default(),
            appeal_status: AppealStatus::default(),
            approved: None,
            status: CaseStatus::Submitted,
            created_at: now,
            updated_at: now,
            claim_ids: Vec::new(),
        }
    }

    /// Payload of the `Submitted` event.
    pub fn submitted_data(&self) -> Record {
        lac_core::record! {
            "bsn" => self.bsn.as_str(),
            "service" => self.service.as_str(),
            "law" => self.law.as_str(),
            "parameters" => self.parameters.clone(),
            "claimed_result" => self.claimed_result.clone(),
            "verified_result" => self.verified_result.clone(),
            "rulespec_uuid" => self.rulespec_uuid.as_str(),
            "approved_claims_only" => self.approved_claims_only,
        }
    }

    /// Start over with a new submission, keeping identity, claims, and
    /// objection/appeal status. Allowed from any status.
    pub fn reset(&mut self, submission: Submission, verified_result: Record, rulespec_uuid: impl Into<String>) {
        self.approved_claims_only = submission.approved_claims_only;
        self.claimed_result = submission.claimed_result;
        self.verified_result = verified_result;
        self.parameters = submission.parameters;
        self.rulespec_uuid = rulespec_uuid.into();
        self.disputed_parameters = None;
        self.evidence = None;
        self.reason = None;
        self.verifier_id = None;
        self.approved = None;
        self.status = CaseStatus::Submitted;
        self.touch();
    }

    /// Decide without human involvement.
    pub fn decide_automatically(&mut self, verified_result: Record, approved: bool) -> Result<Record, CaseError> {
        self.guard(
            &[CaseStatus::Submitted, CaseStatus::Objected],
            CaseStatus::Decided,
            "can only automatically decide submitted or objected cases",
        )?;
        self.verified_result = verified_result;
        self.status = CaseStatus::Decided;
        self.approved = Some(approved);
        self.touch();
        Ok(lac_core::record! {
            "verified_result" => self.verified_result.clone(),
            "approved" => approved,
        })
    }

    /// Route to a human reviewer.
    pub fn select_for_manual_review(&mut self, verifier_id: &str, reason: &str) -> Result<Record, CaseError> {
        self.guard(
            &[CaseStatus::Submitted, CaseStatus::Objected],
            CaseStatus::InReview,
            "can only route submitted or objected cases to review",
        )?;
        self.status = CaseStatus::InReview;
        self.reason = Some(reason.to_string());
        self.verifier_id = Some(verifier_id.to_string());
        self.touch();
        Ok(lac_core::record! {
            "verifier_id" => verifier_id,
            "reason" => reason,
            "claimed_result" => self.claimed_result.clone(),
            "verified_result" => self.verified_result.clone(),
        })
    }

    /// Record a human decision, optionally replacing the verified result.
    pub fn decide(
        &mut self,
        verifier_id: &str,
        approved: bool,
        reason: &str,
        override_result: Option<Record>,
    ) -> Result<Record, CaseError> {
        self.guard(
            &[CaseStatus::InReview, CaseStatus::Objected],
            CaseStatus::Decided,
            "can only manually decide cases in review or objected",
        )?;
        if let Some(result) = override_result {
            self.verified_result = result;
        }
        self.status = CaseStatus::Decided;
        self.approved = Some(approved);
        self.reason = Some(reason.to_string());
        self.verifier_id = Some(verifier_id.to_string());
        self.touch();
        Ok(lac_core::record! {
            "verified_result" => self.verified_result.clone(),
            "reason" => reason,
            "verifier_id" => verifier_id,
            "approved" => approved,
        })
    }

    /// File an objection against the decision.
    pub fn object(&mut self, reason: &str) -> Result<Record, CaseError> {
        self.guard(&[CaseStatus::Decided], CaseStatus::Objected, "can only object to decided cases")?;
        self.status = CaseStatus::Objected;
        self.reason = Some(reason.to_string());
        self.touch();
        Ok(lac_core::record! { "reason" => reason })
    }

    /// Record the objection fields a rule computed.
    pub fn determine_objection_status(&mut self, update: &ObjectionStatus) -> Record {
        let changed = merge_set_fields!(
            self.objection_status, update;
            possible, not_possible_reason, objection_period, decision_period, extension_period,
        );
        self.touch();
        changed
    }

    /// Record whether a filed objection is admissible.
    pub fn determine_objection_admissibility(&mut self, admissible: Option<bool>) -> Record {
        let update = ObjectionStatus {
            admissible,
            ..ObjectionStatus::default()
        };
        let changed = merge_set_fields!(self.objection_status, update; admissible);
        self.touch();
        changed
    }

    /// Record the appeal fields a rule computed.
    pub fn determine_appeal_status(&mut self, update: &AppealStatus) -> Record {
        let changed = merge_set_fields!(
            self.appeal_status, update;
            possible, not_possible_reason, appeal_period, direct_appeal,
            direct_appeal_reason, competent_court, court_type,
        );
        self.touch();
        changed
    }

    /// Attach a claim. Returns false if it was already attached.
    pub fn add_claim(&mut self, claim_id: ClaimId) -> bool {
        if self.claim_ids.contains(&claim_id) {
            return false;
        }
        self.claim_ids.push(claim_id);
        self.touch();
        true
    }

    /// True if a rule determined an objection is possible.
    pub fn can_object(&self) -> bool {
        self.objection_status.possible == Some(true)
    }

    /// True if a rule determined an appeal is possible.
    pub fn can_appeal(&self) -> bool {
        self.appeal_status.possible == Some(true)
    }

    fn guard(&self, allowed: &[CaseStatus], to: CaseStatus, reason: &str) -> Result<(), CaseError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(CaseError::InvalidTransition {
                case_id: self.id,
                from: self.status,
                to,
                reason: reason.to_string(),
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}
