//! # Event Application Declarations
//!
//! A rule may declare that it *applies* to events recorded against an
//! aggregate (in practice, cases). When a matching event is recorded, the
//! rule is evaluated with the aggregate as its input and selected outputs
//! are written back through a named update method.
//!
//! ```yaml
//! applies:
//!   - name: case
//!     aggregate: Case
//!     events:
//!       - type: Decided
//!         filter: { approved: false }
//!     update:
//!       - method: determine_objection_status
//!         mapping:
//!           possible: $objection_possible
//!           objection_period: $objection_period_weeks
//! ```

use std::collections::BTreeMap;

use lac_core::Record;
use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// One `applies` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applies {
    /// Parameter name under which the aggregate is passed to the rule.
    pub name: String,
    /// Aggregate type the declaration listens to. Declarations without an
    /// aggregate never match.
    #[serde(default)]
    pub aggregate: String,
    /// Event patterns that trigger the rule.
    #[serde(default)]
    pub events: Vec<EventPattern>,
    /// Write-backs performed after evaluation.
    #[serde(default)]
    pub update: Vec<Update>,
}

impl Applies {
    /// True if any pattern matches the event type and payload.
    pub fn matches(&self, event_type: &str, payload: &Record) -> bool {
        !self.aggregate.is_empty() && self.events.iter().any(|p| p.matches(event_type, payload))
    }
}

/// An event type plus payload filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPattern {
    /// Event type, compared case-insensitively.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Key/value pairs that must all be present and equal in the payload.
    #[serde(default)]
    pub filter: Record,
}

impl EventPattern {
    /// True if the type matches and every filter pair is present and equal.
    pub fn matches(&self, event_type: &str, payload: &Record) -> bool {
        self.event_type.eq_ignore_ascii_case(event_type)
            && self
                .filter
                .iter()
                .all(|(k, v)| payload.get(k).is_some_and(|actual| actual.loose_eq(v)))
    }
}

/// A write-back of evaluation outputs to the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Mutator to invoke, see [`UpdateMethod`].
    pub method: String,
    /// Target field → `$output` reference.
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

impl Update {
    /// Parse the method name.
    pub fn method(&self) -> Result<UpdateMethod, SpecError> {
        self.method.parse()
    }
}

/// Case mutators reachable from `applies` declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateMethod {
    /// Record whether and within which periods an objection is possible.
    DetermineObjectionStatus,
    /// Record whether a filed objection is admissible.
    DetermineObjectionAdmissibility,
    /// Record whether and where an appeal is possible.
    DetermineAppealStatus,
}

impl UpdateMethod {
    /// The rule-text name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DetermineObjectionStatus => "determine_objection_status",
            Self::DetermineObjectionAdmissibility => "determine_objection_admissibility",
            Self::DetermineAppealStatus => "determine_appeal_status",
        }
    }
}

impl std::fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateMethod {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "determine_objection_status" => Ok(Self::DetermineObjectionStatus),
            "determine_objection_admissibility" => Ok(Self::DetermineObjectionAdmissibility),
            "determine_appeal_status" => Ok(Self::DetermineAppealStatus),
            other => Err(SpecError::UnknownUpdateMethod {
                method: other.to_string(),
            }),
        }
    }
}
