//! # Rule Catalog
//!
//! The loading contract consumed by the engine: given a law, a reference
//! date, and a requesting service, return the rule version in effect.
//! [`RuleSet`] is the in-memory implementation; whatever loads rule
//! documents hands it the parsed specifications.
//!
//! ## Version Selection
//!
//! Among the versions of a law, the one with the latest `valid_from` on or
//! before the reference date applies. A version owned by a different
//! service than the requester is rejected rather than silently used.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lac_core::{CalculationDate, Record};

use crate::applies::Applies;
use crate::error::SpecError;
use crate::spec::RuleSpec;

/// Source of rule specifications.
pub trait RuleCatalog: Send + Sync {
    /// The version of `law` in effect on `reference_date`, owned by `service`.
    fn get_rule_spec(
        &self,
        law: &str,
        reference_date: &CalculationDate,
        service: &str,
    ) -> Result<Arc<RuleSpec>, SpecError>;

    /// Every loaded rule version.
    fn rules(&self) -> Vec<Arc<RuleSpec>>;

    /// service → laws for rules discoverable by `audience`.
    fn discoverable_service_laws(&self, audience: &str) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for spec in self.rules() {
            if spec.discoverable.as_deref() == Some(audience) {
                out.entry(spec.service.clone()).or_default().insert(spec.law.clone());
            }
        }
        out
    }
}

/// An in-memory rule catalog.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// law → versions sorted by `valid_from`.
    by_law: BTreeMap<String, Vec<Arc<RuleSpec>>>,
}

impl RuleSet {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from parsed specifications.
    pub fn from_specs(specs: impl IntoIterator<Item = RuleSpec>) -> Self {
        let mut set = Self::new();
        for spec in specs {
            set.insert(spec);
        }
        set
    }

    /// Add a specification, keeping versions ordered by effective date.
    pub fn insert(&mut self, spec: RuleSpec) {
        let versions = self.by_law.entry(spec.law.clone()).or_default();
        versions.push(Arc::new(spec));
        versions.sort_by_key(|s| s.valid_from);
    }

    /// Number of loaded versions.
    pub fn len(&self) -> usize {
        self.by_law.values().map(Vec::len).sum()
    }

    /// True if no versions are loaded.
    pub fn is_empty(&self) -> bool {
        self.by_law.is_empty()
    }

    /// Names of every service owning at least one rule.
    pub fn services(&self) -> BTreeSet<String> {
        self.by_law
            .values()
            .flatten()
            .map(|s| s.service.clone())
            .collect()
    }
}

impl RuleCatalog for RuleSet {
    fn get_rule_spec(
        &self,
        law: &str,
        reference_date: &CalculationDate,
        service: &str,
    ) -> Result<Arc<RuleSpec>, SpecError> {
        let spec = self
            .by_law
            .get(law)
            .and_then(|versions| versions.iter().rev().find(|s| s.valid_from <= *reference_date))
            .ok_or_else(|| SpecError::NoApplicableVersion {
                law: law.to_string(),
                service: service.to_string(),
                reference_date: reference_date.to_string(),
            })?;

        if spec.service != service {
            return Err(SpecError::ServiceMismatch {
                law: law.to_string(),
                expected: service.to_string(),
                found: spec.service.clone(),
            });
        }
        Ok(Arc::clone(spec))
    }

    fn rules(&self) -> Vec<Arc<RuleSpec>> {
        self.by_law.values().flatten().cloned().collect()
    }
}

/// Every `(rule, declaration)` pair whose `applies` block matches an event.
pub fn matching_applies(
    catalog: &dyn RuleCatalog,
    event_type: &str,
    payload: &Record,
) -> Vec<(Arc<RuleSpec>, Applies)> {
    catalog
        .rules()
        .into_iter()
        .flat_map(|rule| {
            let matched: Vec<Applies> = rule
                .properties
                .applies
                .iter()
                .filter(|a| a.matches(event_type, payload))
                .cloned()
                .collect();
            matched.into_iter().map(move |a| (Arc::clone(&rule), a))
        })
        .collect()
}
