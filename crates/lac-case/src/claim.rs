//! # Claims
//!
//! A claim is a subject's assertion that one input of one law has a
//! different value than the engine would otherwise use. Claims exist
//! independently of cases and may be linked to one later.
//!
//! `PENDING → {APPROVED, REJECTED}`. Approval and rejection are not guarded;
//! a second call simply overwrites the outcome.

use lac_core::{CaseId, ClaimId, Record, Timestamp, Value};
use serde::{Deserialize, Serialize};

use crate::error::CaseError;

/// Review status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    /// Awaiting review.
    Pending,
    /// Accepted, possibly with an adjusted value.
    Approved,
    /// Refused.
    Rejected,
}

impl ClaimStatus {
    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClaimStatus {
    type Err = CaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(CaseError::UnknownStatus {
                kind: "claim",
                value: other.to_string(),
            }),
        }
    }
}

/// Input to [`ClaimManager::submit_claim`](crate::ClaimManager::submit_claim).
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSubmission {
    /// Service whose input is claimed.
    pub service: String,
    /// Law whose input is claimed.
    pub law: String,
    /// Subject the claim is about.
    pub bsn: String,
    /// Input name.
    pub key: String,
    /// Claimed value.
    pub new_value: Value,
    /// Value the claim replaces, if known.
    pub old_value: Option<Value>,
    /// Why the subject makes the claim.
    pub reason: String,
    /// Who makes the claim.
    pub claimant: String,
    /// Case to link on creation.
    pub case_id: Option<CaseId>,
    /// Supporting evidence reference.
    pub evidence_path: Option<String>,
    /// Approve immediately with the claimed value, verified by the claimant.
    pub auto_approve: bool,
}

impl ClaimSubmission {
    /// A claim that `key` of (`bsn`, `service`, `law`) is `new_value`.
    pub fn new(
        service: impl Into<String>,
        law: impl Into<String>,
        bsn: impl Into<String>,
        key: impl Into<String>,
        new_value: impl Into<Value>,
    ) -> Self {
        Self {
            service: service.into(),
            law: law.into(),
            bsn: bsn.into(),
            key: key.into(),
            new_value: new_value.into(),
            old_value: None,
            reason: String::new(),
            claimant: String::new(),
            case_id: None,
            evidence_path: None,
            auto_approve: false,
        }
    }

    /// Builder: reason and claimant.
    pub fn with_reason(mut self, reason: impl Into<String>, claimant: impl Into<String>) -> Self {
        self.reason = reason.into();
        self.claimant = claimant.into();
        self
    }

    /// Builder: link to `case_id` on creation.
    pub fn with_case(mut self, case_id: CaseId) -> Self {
        self.case_id = Some(case_id);
        self
    }

    /// Builder: the value being replaced.
    pub fn with_old_value(mut self, old_value: impl Into<Value>) -> Self {
        self.old_value = Some(old_value.into());
        self
    }

    /// Builder: supporting evidence.
    pub fn with_evidence(mut self, evidence_path: impl Into<String>) -> Self {
        self.evidence_path = Some(evidence_path.into());
        self
    }

    /// Builder: approve on submission.
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }
}

/// A claim about one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Stable identifier, reused when the same key is claimed again.
    pub id: ClaimId,
    /// Service whose input is claimed.
    pub service: String,
    /// Input name.
    pub key: String,
    /// Value the claim replaces, if known.
    pub old_value: Option<Value>,
    /// Claimed value.
    pub new_value: Value,
    /// Why the subject makes the claim.
    pub reason: String,
    /// Supporting evidence reference.
    pub evidence_path: Option<String>,
    /// Who makes the claim.
    pub claimant: String,
    /// Linked case.
    pub case_id: Option<CaseId>,
    /// Law whose input is claimed.
    pub law: String,
    /// Subject the claim is about.
    pub bsn: String,
    /// Review status.
    pub status: ClaimStatus,
    /// When the claim was (re)submitted.
    pub created_at: Timestamp,
    /// Who approved it.
    pub verified_by: Option<String>,
    /// The value the approver accepted.
    pub verified_value: Option<Value>,
    /// When it was approved.
    pub verified_at: Option<Timestamp>,
    /// Who rejected it.
    pub rejected_by: Option<String>,
    /// Why it was rejected.
    pub rejection_reason: Option<String>,
    /// When it was rejected.
    pub rejected_at: Option<Timestamp>,
}

impl Claim {
    /// A pending claim.
    pub fn new(submission: &ClaimSubmission) -> Self {
        Self {
            id: ClaimId::new(),
            service: submission.service.clone(),
            key: submission.key.clone(),
            old_value: submission.old_value.clone(),
            new_value: submission.new_value.clone(),
            reason: submission.reason.clone(),
            evidence_path: submission.evidence_path.clone(),
            claimant: submission.claimant.clone(),
            case_id: submission.case_id,
            law: submission.law.clone(),
            bsn: submission.bsn.clone(),
            status: ClaimStatus::Pending,
            created_at: Timestamp::now(),
            verified_by: None,
            verified_value: None,
            verified_at: None,
            rejected_by: None,
            rejection_reason: None,
            rejected_at: None,
        }
    }

    /// Replace the claim with a new submission of the same key, back to
    /// pending. The identifier is kept.
    pub fn reset(&mut self, submission: &ClaimSubmission) {
        let id = self.id;
        *self = Self::new(submission);
        self.id = id;
    }

    /// Accept the claim with `verified_value`.
    pub fn approve(&mut self, verified_by: &str, verified_value: Value) {
        self.status = ClaimStatus::Approved;
        self.verified_by = Some(verified_by.to_string());
        self.verified_value = Some(verified_value);
        self.verified_at = Some(Timestamp::now());
    }

    /// Refuse the claim.
    pub fn reject(&mut self, rejected_by: &str, reason: &str) {
        self.status = ClaimStatus::Rejected;
        self.rejected_by = Some(rejected_by.to_string());
        self.rejection_reason = Some(reason.to_string());
        self.rejected_at = Some(Timestamp::now());
    }

    /// Link to a case. Fails if already linked.
    pub fn link_case(&mut self, case_id: CaseId) -> Result<(), CaseError> {
        if let Some(existing) = self.case_id {
            return Err(CaseError::ClaimAlreadyLinked {
                claim_id: self.id,
                case_id: existing,
            });
        }
        self.case_id = Some(case_id);
        Ok(())
    }

    /// Attach evidence. Only pending claims accept evidence.
    pub fn add_evidence(&mut self, evidence_path: &str) -> Result<(), CaseError> {
        if self.status != ClaimStatus::Pending {
            return Err(CaseError::ClaimNotPending {
                claim_id: self.id,
                status: self.status,
            });
        }
        self.evidence_path = Some(evidence_path.to_string());
        Ok(())
    }

    /// The value evaluation should use: the verified value once approved,
    /// the claimed value otherwise.
    pub fn effective_value(&self) -> &Value {
        match (&self.status, &self.verified_value) {
            (ClaimStatus::Approved, Some(verified)) => verified,
            _ => &self.new_value,
        }
    }

    /// Payload for case events about this claim.
    pub fn event_data(&self) -> Record {
        lac_core::record! {
            "claim_id" => self.id.to_string(),
            "key" => self.key.as_str(),
            "status" => self.status.as_str(),
        }
    }
}
