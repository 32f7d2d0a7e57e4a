//! # Rule Evaluator
//!
//! Runs one [`RuleSpec`] against one request: check requirements, then
//! execute the actions (all of them, or only those a requested output
//! depends on), enforcing each declared output type.
//!
//! An evaluator is immutable after construction and holds nothing
//! request-specific, so the registry shares one instance across
//! concurrent evaluations. Each call builds its own [`ResolutionContext`].

use std::collections::BTreeMap;
use std::sync::Arc;

use lac_core::{CalculationDate, Record, Value};
use lac_rules::{PropertySpec, Requirement, RuleSpec};

use crate::context::{ResolutionContext, SourceTables};
use crate::dependency::required_actions;
use crate::error::EngineError;
use crate::provider::{ClaimLookup, EvaluationRequest, RuleResult, ServiceProvider};
use crate::trace::{NodeKind, PathNode};

/// Parameter carrying the subject's citizen service number.
pub const SUBJECT_PARAMETER: &str = "BSN";

/// Evaluates one version of one law.
#[derive(Debug)]
pub struct RuleEvaluator {
    spec: Arc<RuleSpec>,
    property_specs: BTreeMap<String, PropertySpec>,
}

impl RuleEvaluator {
    /// Prepare an evaluator for `spec`.
    pub fn new(spec: Arc<RuleSpec>) -> Self {
        let property_specs = spec.property_specs().map(|p| (p.name.clone(), p.clone())).collect();
        Self { spec, property_specs }
    }

    /// The rule this evaluator runs.
    pub fn spec(&self) -> &Arc<RuleSpec> {
        &self.spec
    }

    /// Evaluate as of `reference_date`.
    ///
    /// Claims for the request's `BSN` parameter are fetched from `claims`
    /// when given; with `request.approved` only approved claims count.
    pub fn evaluate(
        &self,
        provider: &dyn ServiceProvider,
        claims: Option<&dyn ClaimLookup>,
        sources: &SourceTables,
        request: &EvaluationRequest,
        reference_date: CalculationDate,
    ) -> Result<RuleResult, EngineError> {
        let spec = &*self.spec;
        tracing::debug!(
            service = %spec.service,
            law = %spec.law,
            %reference_date,
            requested_output = ?request.requested_output,
            "evaluating rule"
        );

        let claimed = match (claims, request.parameters.get(SUBJECT_PARAMETER).and_then(Value::as_str)) {
            (Some(lookup), Some(bsn)) => lookup.claim_values(bsn, &spec.service, &spec.law, request.approved),
            _ => Record::new(),
        };

        let mut ctx = ResolutionContext::new(
            provider,
            &spec.service,
            &spec.properties.definitions,
            &self.property_specs,
            sources,
            &request.overwrite_input,
            reference_date,
        )
        .with_parameters(request.parameters.clone())
        .with_claims(claimed)
        .with_approved(request.approved)
        .with_cancel(request.cancel.clone());

        ctx.enter(
            PathNode::new(NodeKind::Root, format!("Evaluation of {}", spec.name))
                .with_detail("service", spec.service.as_str())
                .with_detail("law", spec.law.as_str())
                .with_detail("reference_date", reference_date.to_string()),
        );

        ctx.enter(PathNode::new(NodeKind::Requirements, "Check all requirements"));
        let mut requirements_met = all_hold(&mut ctx, &spec.requirements)? && !ctx.missing_required();
        ctx.exit(Value::Bool(requirements_met));

        let mut output = Record::new();
        if requirements_met {
            for action in required_actions(&spec.actions, request.requested_output.as_deref())? {
                if ctx.missing_required() {
                    break;
                }
                ctx.check_cancelled()?;
                ctx.enter(PathNode::new(NodeKind::Action, format!("Evaluate action for {}", action.output)));
                let raw = match ctx.output_override(&action.output).cloned() {
                    Some(value) => value,
                    None => ctx.evaluate_expr(&action.expr()?)?,
                };
                let value = spec.output_type_spec(&action.output).enforce(raw);
                ctx.set_output(&action.output, value.clone());
                output.insert(action.output.clone(), value.clone());
                ctx.exit(value);
            }
        } else {
            tracing::debug!(service = %spec.service, law = %spec.law, "requirements not met");
        }

        // A missing required input voids the whole result.
        if ctx.missing_required() {
            tracing::debug!(service = %spec.service, law = %spec.law, "required input missing, outputs dropped");
            output.clear();
            requirements_met = false;
        }

        ctx.exit(Value::Record(output.clone()));
        Ok(RuleResult {
            output,
            requirements_met,
            missing_required: ctx.missing_required(),
            input: ctx.resolved_paths().clone(),
            rulespec_uuid: spec.uuid.clone(),
            path: ctx.finish_trace(),
        })
    }
}

/// The top-level requirement list is a conjunction; stop at the first
/// failure.
fn all_hold(ctx: &mut ResolutionContext<'_>, requirements: &[Requirement]) -> Result<bool, EngineError> {
    for requirement in requirements {
        ctx.check_cancelled()?;
        if !holds(ctx, requirement)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn holds(ctx: &mut ResolutionContext<'_>, requirement: &Requirement) -> Result<bool, EngineError> {
    ctx.enter(PathNode::new(NodeKind::Requirement, requirement.label()));
    let held = match requirement {
        Requirement::All { all } => {
            let mut held = true;
            for member in all {
                if !holds(ctx, member)? {
                    held = false;
                    break;
                }
                if ctx.missing_required() {
                    break;
                }
            }
            held
        }
        Requirement::Or { or } if or.is_empty() => true,
        Requirement::Or { or } => {
            let mut held = false;
            for member in or {
                if holds(ctx, member)? {
                    held = true;
                    break;
                }
                if ctx.missing_required() {
                    break;
                }
            }
            held
        }
        Requirement::Test(expr) => ctx.evaluate_expr(expr)?.is_truthy(),
    };
    ctx.exit(Value::Bool(held));
    Ok(held)
}
