//! # Requirements
//!
//! Preconditions of a rule. The rule's `requirements` list is a
//! conjunction; each entry is an `all:` group, an `or:` group, or a single
//! test expression. Empty groups are vacuously satisfied.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::operation::Expr;

/// One requirement entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirement {
    /// Every member must hold.
    All {
        /// Members of the group.
        all: Vec<Requirement>,
    },
    /// At least one member must hold.
    Or {
        /// Members of the group.
        or: Vec<Requirement>,
    },
    /// A test expression, interpreted by truthiness.
    Test(Expr),
}

impl Requirement {
    /// Short label used in evaluation traces.
    pub fn label(&self) -> &'static str {
        match self {
            Self::All { .. } => "Check ALL conditions",
            Self::Or { .. } => "Check OR conditions",
            Self::Test(_) => "Test condition",
        }
    }

    /// Collect every `$reference` path mentioned in this requirement.
    pub fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::All { all: members } | Self::Or { or: members } => {
                members.iter().for_each(|m| m.collect_references(out))
            }
            Self::Test(expr) => expr.collect_references(out),
        }
    }
}
