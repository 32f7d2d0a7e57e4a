//! # Service Registry
//!
//! One [`RuleService`] per service name, each caching evaluators by
//! `(law, reference date)` and owning the tabular sources registered for
//! that service. [`Services`] is the top-level registry and the
//! [`ServiceProvider`] that resolution contexts call for cross-law inputs.
//!
//! ## Locking
//!
//! Evaluator caches and source maps sit behind `parking_lot::RwLock`s.
//! Locks are held only long enough to clone an `Arc`; no lock is held while
//! a rule evaluates, so nested service calls on the same registry cannot
//! deadlock. Two threads racing on a cache miss may both build an
//! evaluator; the first insert wins and the other is dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use lac_core::CalculationDate;
use lac_rules::{DataSource, RuleCatalog, RuleInfo};
use parking_lot::RwLock;

use crate::context::SourceTables;
use crate::error::EngineError;
use crate::evaluator::RuleEvaluator;
use crate::provider::{ClaimLookup, EvaluationRequest, RuleResult, ServiceProvider};

/// The laws and sources of one service.
pub struct RuleService {
    service_name: String,
    catalog: Arc<dyn RuleCatalog>,
    evaluators: RwLock<HashMap<(String, CalculationDate), Arc<RuleEvaluator>>>,
    sources: RwLock<SourceTables>,
}

impl std::fmt::Debug for RuleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleService")
            .field("service_name", &self.service_name)
            .field("cached_evaluators", &self.evaluators.read().len())
            .field("sources", &self.sources.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RuleService {
    /// A service with no cached evaluators and no sources.
    pub fn new(service_name: impl Into<String>, catalog: Arc<dyn RuleCatalog>) -> Self {
        Self {
            service_name: service_name.into(),
            catalog,
            evaluators: RwLock::new(HashMap::new()),
            sources: RwLock::new(SourceTables::new()),
        }
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.service_name
    }

    /// The evaluator for `law` as of `reference_date`, built on first use.
    pub fn get_evaluator(&self, law: &str, reference_date: CalculationDate) -> Result<Arc<RuleEvaluator>, EngineError> {
        let key = (law.to_string(), reference_date);
        if let Some(evaluator) = self.evaluators.read().get(&key) {
            return Ok(Arc::clone(evaluator));
        }

        let spec = self.catalog.get_rule_spec(law, &reference_date, &self.service_name)?;
        let built = Arc::new(RuleEvaluator::new(spec));
        let mut evaluators = self.evaluators.write();
        let evaluator = evaluators.entry(key).or_insert(built);
        tracing::debug!(
            service = %self.service_name,
            law,
            %reference_date,
            rulespec_uuid = %evaluator.spec().uuid,
            "evaluator cached"
        );
        Ok(Arc::clone(evaluator))
    }

    /// Register (or replace) a table for this service's rules.
    pub fn set_source(&self, table: impl Into<String>, source: Arc<dyn DataSource>) {
        let table = table.into();
        tracing::debug!(service = %self.service_name, %table, "source registered");
        self.sources.write().insert(table, source);
    }

    /// Evaluate a law of this service as of `reference_date`.
    pub fn evaluate(
        &self,
        provider: &dyn ServiceProvider,
        claims: Option<&dyn ClaimLookup>,
        request: &EvaluationRequest,
        reference_date: CalculationDate,
    ) -> Result<RuleResult, EngineError> {
        let evaluator = self.get_evaluator(&request.law, reference_date)?;
        let sources = self.sources.read().clone();
        evaluator.evaluate(provider, claims, &sources, request, reference_date)
    }
}

/// The top-level registry of services.
pub struct Services {
    catalog: Arc<dyn RuleCatalog>,
    services: RwLock<BTreeMap<String, Arc<RuleService>>>,
    root_reference_date: CalculationDate,
    claims: Option<Arc<dyn ClaimLookup>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("services", &self.services.read().keys().collect::<Vec<_>>())
            .field("root_reference_date", &self.root_reference_date)
            .field("claims", &self.claims.is_some())
            .finish()
    }
}

impl Services {
    /// A registry with one service per service name in `catalog`.
    pub fn new(catalog: Arc<dyn RuleCatalog>, root_reference_date: CalculationDate) -> Self {
        let mut names: Vec<String> = catalog.rules().iter().map(|r| r.service.clone()).collect();
        names.sort();
        names.dedup();
        let services = names
            .into_iter()
            .map(|name| {
                let service = Arc::new(RuleService::new(name.clone(), Arc::clone(&catalog)));
                (name, service)
            })
            .collect();
        Self {
            catalog,
            services: RwLock::new(services),
            root_reference_date,
            claims: None,
        }
    }

    /// Builder: consult `claims` for every evaluation.
    pub fn with_claim_lookup(mut self, claims: Arc<dyn ClaimLookup>) -> Self {
        self.claims = Some(claims);
        self
    }

    /// The rule catalog.
    pub fn catalog(&self) -> &Arc<dyn RuleCatalog> {
        &self.catalog
    }

    /// The date used when a request carries none.
    pub fn root_reference_date(&self) -> CalculationDate {
        self.root_reference_date
    }

    /// Names of all services.
    pub fn service_names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Look up a service.
    pub fn service(&self, name: &str) -> Option<Arc<RuleService>> {
        self.services.read().get(name).cloned()
    }

    /// Metadata of the version of `law` in effect on `reference_date`.
    pub fn rule_info(&self, service: &str, law: &str, reference_date: CalculationDate) -> Result<RuleInfo, EngineError> {
        Ok(self.catalog.get_rule_spec(law, &reference_date, service)?.info())
    }

    /// service → laws of the rules discoverable by `audience`.
    pub fn discoverable_service_laws(&self, audience: &str) -> BTreeMap<String, BTreeSet<String>> {
        self.catalog.discoverable_service_laws(audience)
    }

    /// Register a table for `service`.
    pub fn set_source(&self, service: &str, table: impl Into<String>, source: Arc<dyn DataSource>) -> Result<(), EngineError> {
        let target = self.service(service).ok_or_else(|| EngineError::UnknownService {
            service: service.to_string(),
        })?;
        target.set_source(table, source);
        Ok(())
    }
}

impl ServiceProvider for Services {
    fn evaluate(&self, request: EvaluationRequest) -> Result<RuleResult, EngineError> {
        if request.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let service = self.service(&request.service).ok_or_else(|| EngineError::UnknownService {
            service: request.service.clone(),
        })?;
        let reference_date = request.reference_date.unwrap_or(self.root_reference_date);
        service.evaluate(self, self.claims.as_deref(), &request, reference_date)
    }
}
