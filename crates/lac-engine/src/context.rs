//! # Resolution Context
//!
//! Per-evaluation state answering "what is the value of `$x`?".
//!
//! ## Precedence
//!
//! A `$path` reference is resolved by probing, in order:
//!
//! 1. date pseudo-paths derived from the calculation date;
//! 2. dotted navigation (`$case.objection_status.possible`), resolving the
//!    root and walking record fields;
//! 3. claims on the subject;
//! 4. the local scope of a `FOREACH` iteration;
//! 5. definitions;
//! 6. caller parameters;
//! 7. outputs computed earlier in this evaluation;
//! 8. the property declaration: explicit overrides, then a tabular source,
//!    then another service.
//!
//! The first source holding the key wins. A required property that
//! resolves to `null` sets the sticky missing-required flag; it is never an
//! error.
//!
//! ## Trace
//!
//! The context builds the trace tree as it goes. [`enter`] pushes a node,
//! [`exit`] stamps its result and attaches it to its parent. Nodes are
//! owned values; nothing is shared between evaluations.
//!
//! [`enter`]: ResolutionContext::enter
//! [`exit`]: ResolutionContext::exit

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lac_core::{CalculationDate, Record, Value};
use lac_rules::{
    DataSource, Expr, PropertySpec, ServiceReference, SourceReference, REFERENCE_SIGIL,
};

use crate::error::EngineError;
use crate::provider::{EvaluationRequest, OverwriteInput, ServiceProvider};
use crate::trace::{NodeKind, PathNode, ResolveSource};

/// Tables available to an evaluation, by name.
pub type SourceTables = BTreeMap<String, Arc<dyn DataSource>>;

/// Per-evaluation resolution state.
pub struct ResolutionContext<'a> {
    provider: &'a dyn ServiceProvider,
    service_name: &'a str,
    definitions: &'a Record,
    property_specs: &'a BTreeMap<String, PropertySpec>,
    sources: &'a SourceTables,
    overwrite: &'a OverwriteInput,
    calculation_date: CalculationDate,
    parameters: Record,
    claims: Record,
    pub(crate) outputs: Record,
    pub(crate) local: Record,
    approved: bool,
    cancel: Option<Arc<AtomicBool>>,
    values_cache: HashMap<String, Value>,
    accessed_paths: BTreeSet<String>,
    resolved_paths: Record,
    missing_required: bool,
    stack: Vec<PathNode>,
}

impl<'a> ResolutionContext<'a> {
    /// A fresh context with no parameters, claims, or trace.
    pub fn new(
        provider: &'a dyn ServiceProvider,
        service_name: &'a str,
        definitions: &'a Record,
        property_specs: &'a BTreeMap<String, PropertySpec>,
        sources: &'a SourceTables,
        overwrite: &'a OverwriteInput,
        calculation_date: CalculationDate,
    ) -> Self {
        Self {
            provider,
            service_name,
            definitions,
            property_specs,
            sources,
            overwrite,
            calculation_date,
            parameters: Record::new(),
            claims: Record::new(),
            outputs: Record::new(),
            local: Record::new(),
            approved: false,
            cancel: None,
            values_cache: HashMap::new(),
            accessed_paths: BTreeSet::new(),
            resolved_paths: Record::new(),
            missing_required: false,
            stack: Vec::new(),
        }
    }

    /// Builder: caller parameters.
    pub fn with_parameters(mut self, parameters: Record) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builder: claimed values by field key.
    pub fn with_claims(mut self, claims: Record) -> Self {
        self.claims = claims;
        self
    }

    /// Builder: approved-only flag, forwarded to nested evaluations.
    pub fn with_approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    /// Builder: cancellation flag.
    pub fn with_cancel(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = cancel;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The date this evaluation runs as of.
    pub fn calculation_date(&self) -> CalculationDate {
        self.calculation_date
    }

    /// The owning service.
    pub fn service_name(&self) -> &str {
        self.service_name
    }

    /// Whether a required value resolved to nothing.
    pub fn missing_required(&self) -> bool {
        self.missing_required
    }

    /// Every path looked up so far.
    pub fn accessed_paths(&self) -> &BTreeSet<String> {
        &self.accessed_paths
    }

    /// Every non-null value resolved so far, by path.
    pub fn resolved_paths(&self) -> &Record {
        &self.resolved_paths
    }

    /// Override for an output of this service, if one was supplied.
    pub fn output_override(&self, output: &str) -> Option<&Value> {
        self.overwrite.get(self.service_name).and_then(|fields| fields.get(output))
    }

    /// Record an output so later actions and requirements can see it.
    pub fn set_output(&mut self, name: &str, value: Value) {
        self.outputs.insert(name.to_string(), value);
    }

    /// Abort if the caller raised the cancellation flag.
    pub fn check_cancelled(&self) -> Result<(), EngineError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(EngineError::Cancelled),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Trace
    // -----------------------------------------------------------------------

    /// Open a trace node below the current one.
    pub fn enter(&mut self, node: PathNode) {
        self.stack.push(node);
    }

    /// Close the current trace node with `result`.
    pub fn exit(&mut self, result: Value) {
        if let Some(mut node) = self.stack.pop() {
            node.result = result;
            match self.stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => self.stack.push(node),
            }
        }
    }

    /// The innermost open node.
    pub fn current_mut(&mut self) -> Option<&mut PathNode> {
        self.stack.last_mut()
    }

    fn annotate(&mut self, source: ResolveSource) {
        if let Some(node) = self.current_mut() {
            node.resolve_type = Some(source);
        }
    }

    fn annotate_property(&mut self, spec: &PropertySpec) {
        if let Some(node) = self.current_mut() {
            node.required = spec.required;
            if let Some(t) = &spec.value_type {
                node.details.insert("type".into(), Value::from(t.as_str()));
            }
        }
    }

    /// Close any open nodes and return the trace root.
    pub fn finish_trace(&mut self) -> Option<PathNode> {
        while self.stack.len() > 1 {
            let result = self.stack.last().map(|n| n.result.clone()).unwrap_or_default();
            self.exit(result);
        }
        self.stack.pop()
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve a value. Anything other than a `$`-prefixed string is a
    /// literal and returned unchanged.
    pub fn resolve_value(&mut self, value: &Value) -> Result<Value, EngineError> {
        let path = match value.as_str().and_then(|s| s.strip_prefix(REFERENCE_SIGIL)) {
            Some(path) => path.to_string(),
            None => return Ok(value.clone()),
        };

        self.accessed_paths.insert(path.clone());
        self.enter(PathNode::resolve(&path));
        let resolved = self.resolve_path(&path)?;
        if !resolved.is_null() {
            self.resolved_paths.insert(path.clone(), resolved.clone());
        }
        self.exit(resolved.clone());
        Ok(resolved)
    }

    fn resolve_path(&mut self, path: &str) -> Result<Value, EngineError> {
        if let Some(date) = self.resolve_date(path) {
            self.annotate(ResolveSource::Date);
            return Ok(date);
        }

        if let Some((root, rest)) = path.split_once('.') {
            let base = self.resolve_value(&Value::String(format!("{REFERENCE_SIGIL}{root}")))?;
            let walked = base.get_path(rest.split('.')).cloned().unwrap_or_default();
            if walked.is_null() {
                tracing::debug!(path, "dotted path resolved to nothing");
            }
            return Ok(walked);
        }

        let property = self.property_specs.get(path);

        if let Some(value) = self.claims.get(path).cloned() {
            self.annotate(ResolveSource::Claim);
            if let Some(spec) = property {
                self.annotate_property(spec);
            }
            return Ok(value);
        }

        let scopes = [
            (ResolveSource::Local, self.local.get(path)),
            (ResolveSource::Definition, self.definitions.get(path)),
            (ResolveSource::Parameter, self.parameters.get(path)),
            (ResolveSource::Output, self.outputs.get(path)),
        ];
        let scoped = scopes
            .into_iter()
            .find_map(|(source, value)| value.map(|v| (source, v.clone())));
        if let Some((source, value)) = scoped {
            self.annotate(source);
            return Ok(value);
        }

        if let Some(spec) = property {
            return self.resolve_property(path, spec);
        }

        tracing::debug!(path, service = self.service_name, "no source for reference");
        self.annotate(ResolveSource::None);
        Ok(Value::Null)
    }

    fn resolve_date(&self, path: &str) -> Option<Value> {
        let date = self.calculation_date;
        match path {
            "calculation_date" => Some(date.to_value()),
            "january_first" => Some(date.january_first().to_value()),
            "prev_january_first" => Some(date.prev_january_first().to_value()),
            "year" => Some(Value::String(format!("{:04}", date.year()))),
            _ => None,
        }
    }

    fn resolve_property(&mut self, path: &str, spec: &'a PropertySpec) -> Result<Value, EngineError> {
        self.annotate_property(spec);

        let overridden = spec.service_reference.as_ref().and_then(|r| {
            self.overwrite
                .get(&r.service)
                .and_then(|fields| fields.get(&r.field))
                .cloned()
        });

        let (source, value) = if let Some(value) = overridden {
            (ResolveSource::Overwrite, value)
        } else {
            let mut found = (ResolveSource::None, Value::Null);
            if let Some(source_ref) = &spec.source_reference {
                let value = self.resolve_from_source(source_ref)?;
                if !value.is_null() {
                    found = (ResolveSource::Source, value);
                }
            }
            if found.1.is_null() {
                if let Some(service_ref) = &spec.service_reference {
                    let value = self.resolve_from_service(path, service_ref, spec)?;
                    found = (ResolveSource::Service, value);
                }
            }
            found
        };

        self.annotate(source);
        if value.is_null() && spec.required {
            tracing::debug!(path, service = self.service_name, "required value missing");
            self.missing_required = true;
        }
        Ok(value)
    }

    fn resolve_from_service(
        &mut self,
        path: &str,
        service_ref: &ServiceReference,
        spec: &PropertySpec,
    ) -> Result<Value, EngineError> {
        self.check_cancelled()?;

        let mut parameters = self.parameters.clone();
        for param in &service_ref.parameters {
            let value = self.resolve_value(&param.reference)?;
            parameters.insert(param.name.clone(), value);
        }

        let mut reference_date = self.calculation_date;
        if let Some(reference) = spec.temporal.as_ref().and_then(|t| t.reference.as_deref()) {
            let resolved = self.resolve_value(&Value::from(reference))?;
            if !resolved.is_null() {
                reference_date = CalculationDate::from_value(&resolved)?;
            }
        }

        let rendered: Vec<String> = parameters.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        let cache_key = format!("{path}({},{reference_date})", rendered.join(","));
        if let Some(cached) = self.values_cache.get(&cache_key).cloned() {
            tracing::trace!(%cache_key, "service value served from cache");
            if let Some(node) = self.current_mut() {
                node.details.insert("cached".into(), Value::Bool(true));
            }
            return Ok(cached);
        }

        let mut node = PathNode::new(
            NodeKind::ServiceEvaluation,
            format!("Service call: {}.{}", service_ref.service, service_ref.law),
        )
        .with_detail("service", service_ref.service.as_str())
        .with_detail("law", service_ref.law.as_str())
        .with_detail("field", service_ref.field.as_str())
        .with_detail("reference_date", reference_date.to_string())
        .with_detail("parameters", Value::Record(parameters.clone()));
        node.path = Some(path.to_string());
        node.required = spec.required;
        self.enter(node);

        let request = EvaluationRequest::new(&service_ref.service, &service_ref.law, parameters)
            .with_reference_date(reference_date)
            .with_overwrite_input(self.overwrite.clone())
            .with_requested_output(&service_ref.field)
            .with_approved(self.approved)
            .with_cancel(self.cancel.clone());

        let result = self
            .provider
            .evaluate(request)
            .map_err(|e| EngineError::ServiceCall {
                service: service_ref.service.clone(),
                law: service_ref.law.clone(),
                source: Box::new(e),
            })?;

        let value = result.output.get(&service_ref.field).cloned().unwrap_or_default();
        self.values_cache.insert(cache_key, value.clone());
        self.missing_required |= result.missing_required;
        if let (Some(child), Some(current)) = (result.path, self.stack.last_mut()) {
            current.children.push(child);
        }
        self.exit(value.clone());
        Ok(value)
    }

    fn resolve_from_source(&mut self, source_ref: &SourceReference) -> Result<Value, EngineError> {
        if matches!(source_ref.source_type.as_deref(), Some("laws") | Some("events")) {
            tracing::warn!(
                table = %source_ref.table,
                source_type = ?source_ref.source_type,
                "source type is not resolvable from tables"
            );
            return Ok(Value::Null);
        }

        let Some(table) = self.sources.get(&source_ref.table) else {
            tracing::warn!(table = %source_ref.table, service = self.service_name, "table not available");
            return Ok(Value::Null);
        };
        let mut frame: Arc<dyn DataSource> = Arc::clone(table);

        for select in &source_ref.select_on {
            frame = match &select.value {
                Expr::Op(op) if op.operation == "IN" => {
                    let allowed = match &op.values {
                        Some(values) => self.evaluate_expr(values)?,
                        None => Value::Null,
                    };
                    let allowed = match allowed {
                        Value::List(items) => items,
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    frame.filter(&select.name, "in", &Value::List(allowed))?
                }
                other => {
                    let value = self.evaluate_expr(other)?;
                    frame.filter(&select.name, "=", &value)?
                }
            };
        }

        let rows: Vec<Value> = if let Some(fields) = &source_ref.fields {
            let existing: Vec<String> = fields.iter().filter(|f| frame.has_column(f)).cloned().collect();
            if existing.len() < fields.len() {
                tracing::warn!(table = %source_ref.table, ?fields, "some fields not found in source");
            }
            frame.select(&existing).to_records().into_iter().map(Value::Record).collect()
        } else if let Some(field) = &source_ref.field {
            if !frame.has_column(field) {
                tracing::debug!(table = %source_ref.table, field = %field, "field not found in source");
                return Ok(Value::Null);
            }
            frame.column_values(field)
        } else {
            frame.to_records().into_iter().map(Value::Record).collect()
        };

        Ok(match rows.len() {
            0 => Value::Null,
            1 => rows.into_iter().next().unwrap_or_default(),
            _ => Value::List(rows),
        })
    }
}
