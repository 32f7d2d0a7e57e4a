//! # Capabilities
//!
//! The narrow interfaces an evaluation depends on:
//!
//! - [`ServiceProvider`] — evaluate another service's rule. The resolution
//!   context only ever sees this trait, never the registry behind it, so
//!   tests substitute a stub.
//! - [`ClaimLookup`] — the claimed field values on file for a subject.
//!
//! Plus the request and result types that cross them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lac_core::{CalculationDate, Record};
use serde::Serialize;

use crate::error::EngineError;
use crate::trace::PathNode;

/// Explicit input overrides: service → field → value.
pub type OverwriteInput = BTreeMap<String, Record>;

/// A request to evaluate one law of one service.
#[derive(Debug, Clone, Default)]
pub struct EvaluationRequest {
    /// Owning service.
    pub service: String,
    /// Law to evaluate.
    pub law: String,
    /// Caller parameters.
    pub parameters: Record,
    /// Evaluation date; `None` means the registry's root reference date.
    pub reference_date: Option<CalculationDate>,
    /// Input overrides, passed on to nested evaluations.
    pub overwrite_input: OverwriteInput,
    /// Compute only this output (and what it depends on).
    pub requested_output: Option<String>,
    /// Consult approved claims only.
    pub approved: bool,
    /// Cooperative cancellation flag.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl EvaluationRequest {
    /// A request with default options.
    pub fn new(service: impl Into<String>, law: impl Into<String>, parameters: Record) -> Self {
        Self {
            service: service.into(),
            law: law.into(),
            parameters,
            ..Default::default()
        }
    }

    /// Builder: evaluate as of `date`.
    pub fn with_reference_date(mut self, date: CalculationDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Builder: supply input overrides.
    pub fn with_overwrite_input(mut self, overwrite: OverwriteInput) -> Self {
        self.overwrite_input = overwrite;
        self
    }

    /// Builder: compute a single output.
    pub fn with_requested_output(mut self, output: impl Into<String>) -> Self {
        self.requested_output = Some(output.into());
        self
    }

    /// Builder: consult approved claims only.
    pub fn with_approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    /// Builder: attach a cancellation flag.
    pub fn with_cancel(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = cancel;
        self
    }

    /// True once the caller has raised the cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// The outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    /// Computed outputs after type enforcement.
    pub output: Record,
    /// Whether every requirement held.
    pub requirements_met: bool,
    /// Whether a required input resolved to nothing.
    pub missing_required: bool,
    /// Every non-null value resolved during evaluation, by path.
    pub input: Record,
    /// Identifier of the rule version evaluated.
    pub rulespec_uuid: String,
    /// The resolution trace.
    pub path: Option<PathNode>,
}

/// Evaluates rules on behalf of a resolution context.
pub trait ServiceProvider: Send + Sync {
    /// Evaluate `request.law` of `request.service`.
    fn evaluate(&self, request: EvaluationRequest) -> Result<RuleResult, EngineError>;
}

/// Supplies claimed field values for a subject.
pub trait ClaimLookup: Send + Sync {
    /// Field key → claimed value for `bsn`. Claims specific to
    /// `(service, law)` take precedence over the subject's other claims.
    /// With `approved_only`, pending claims are ignored.
    fn claim_values(&self, bsn: &str, service: &str, law: &str, approved_only: bool) -> Record;
}

#[cfg(test)]
mod tests {
    use super::*;
    use lac_core::record;

    #[test]
    fn builder_sets_fields() {
        let date = CalculationDate::parse("2025-01-01").unwrap();
        let req = EvaluationRequest::new("TOESLAGEN", "zorgtoeslagwet", record! { "BSN" => "999" })
            .with_reference_date(date)
            .with_requested_output("amount")
            .with_approved(true);
        assert_eq!(req.reference_date, Some(date));
        assert_eq!(req.requested_output.as_deref(), Some("amount"));
        assert!(req.approved);
        assert!(!req.is_cancelled());
    }

    #[test]
    fn cancellation_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let req = EvaluationRequest::new("S", "L", Record::new()).with_cancel(Some(Arc::clone(&flag)));
        assert!(!req.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(req.is_cancelled());
    }
}
