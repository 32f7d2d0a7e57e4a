//! # Case Events
//!
//! The append-only record of what happened to each case. Events are never
//! mutated or removed once recorded. Each one is also handed to the rule
//! trigger, which matches it against `applies` declarations by type name
//! and payload.

use lac_core::{CaseId, Record, Timestamp};
use serde::{Deserialize, Serialize};

/// Kinds of case event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseEventType {
    /// A brand-new case was created.
    Submitted,
    /// Decided without human involvement.
    AutomaticallyDecided,
    /// Routed to a human reviewer.
    AddedToManualReview,
    /// Decided by a human reviewer.
    Decided,
    /// An objection was filed.
    Objected,
    /// Objection eligibility was determined.
    ObjectionStatusDetermined,
    /// Objection admissibility was determined.
    ObjectionAdmissibilityDetermined,
    /// Appeal eligibility was determined.
    AppealStatusDetermined,
    /// A claim was filed against the case.
    ClaimCreated,
    /// A linked claim was approved.
    ClaimApproved,
    /// A linked claim was rejected.
    ClaimRejected,
}

impl CaseEventType {
    /// The name `applies` declarations match against.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::AutomaticallyDecided => "AutomaticallyDecided",
            Self::AddedToManualReview => "AddedToManualReview",
            Self::Decided => "Decided",
            Self::Objected => "Objected",
            Self::ObjectionStatusDetermined => "ObjectionStatusDetermined",
            Self::ObjectionAdmissibilityDetermined => "ObjectionAdmissibilityDetermined",
            Self::AppealStatusDetermined => "AppealStatusDetermined",
            Self::ClaimCreated => "ClaimCreated",
            Self::ClaimApproved => "ClaimApproved",
            Self::ClaimRejected => "ClaimRejected",
        }
    }
}

impl std::fmt::Display for CaseEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The case the event belongs to.
    pub case_id: CaseId,
    /// When it was recorded.
    pub timestamp: Timestamp,
    /// What happened.
    pub event_type: CaseEventType,
    /// The fields the mutation changed.
    pub data: Record,
}

impl Event {
    /// An event recorded now.
    pub fn new(case_id: CaseId, event_type: CaseEventType, data: Record) -> Self {
        Self {
            case_id,
            timestamp: Timestamp::now(),
            event_type,
            data,
        }
    }
}
