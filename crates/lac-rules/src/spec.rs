//! # Rule Specification
//!
//! The immutable, loaded-once representation of one version of a law's
//! computation. A [`RuleSpec`] is produced by an external loader (rule
//! texts are YAML documents with this shape) and shared behind an `Arc`
//! by every evaluator built from it.

use lac_core::{CalculationDate, Record};
use serde::{Deserialize, Serialize};

use crate::applies::Applies;
use crate::error::SpecError;
use crate::operation::{Expr, Operation};
use crate::requirement::Requirement;
use crate::types::{TypeConstraints, TypeSpec};

/// One version of a law's rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Version identifier.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Governing law code.
    pub law: String,
    /// Owning service.
    pub service: String,
    /// First date this version is effective.
    pub valid_from: CalculationDate,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Audience tag for discovery (e.g. `CITIZEN`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discoverable: Option<String>,
    /// Parameter, input, source, output, and definition declarations.
    #[serde(default)]
    pub properties: Properties,
    /// Preconditions; a conjunction.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Output-producing actions, in execution order.
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl RuleSpec {
    /// Look up an output declaration.
    pub fn output_spec(&self, name: &str) -> Option<&OutputSpec> {
        self.properties.output.iter().find(|o| o.name == name)
    }

    /// The type spec enforced on an output. Undeclared outputs get an
    /// unconstrained spec.
    pub fn output_type_spec(&self, name: &str) -> TypeSpec {
        self.output_spec(name)
            .map(OutputSpec::type_spec)
            .unwrap_or_default()
    }

    /// Input and source property declarations, inputs first.
    pub fn property_specs(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.input.iter().chain(self.properties.sources.iter())
    }

    /// Identifying metadata.
    pub fn info(&self) -> RuleInfo {
        RuleInfo {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            valid_from: self.valid_from,
        }
    }
}

/// Identifying metadata of a rule version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// Version identifier.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// First date this version is effective.
    pub valid_from: CalculationDate,
}

/// The `properties:` block of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// Caller-supplied parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Inputs resolved from other services.
    #[serde(default)]
    pub input: Vec<PropertySpec>,
    /// Inputs resolved from tabular sources.
    #[serde(default)]
    pub sources: Vec<PropertySpec>,
    /// Declared outputs.
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    /// Named constants.
    #[serde(default)]
    pub definitions: Record,
    /// Event application declarations.
    #[serde(default)]
    pub applies: Vec<Applies>,
}

/// A caller-supplied parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the caller must supply it.
    #[serde(default)]
    pub required: bool,
}

/// Temporal qualifier of a property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temporal {
    /// `point_in_time`, `period`, ...
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// `year`, `month`, ... for periods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_type: Option<String>,
    /// Reference date expression, e.g. `$prev_january_first`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A parameter passed on a cross-service call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceParameter {
    /// Parameter name in the called rule.
    pub name: String,
    /// Value or `$reference` in the calling rule.
    pub reference: lac_core::Value,
}

/// Where an input comes from when another service computes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReference {
    /// Called service.
    pub service: String,
    /// Output field of the called rule.
    pub field: String,
    /// Called law.
    pub law: String,
    /// Parameters overlaid on the caller's parameters.
    #[serde(default)]
    pub parameters: Vec<ServiceParameter>,
}

/// A filter applied to a tabular source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOn {
    /// Column name.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Equality operand, or an `IN` operation whose `values` give the set.
    pub value: Expr,
}

/// Where an input comes from when a table holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    /// Kind of source; only tables are resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Table name within the service's sources.
    pub table: String,
    /// Single column to extract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Columns to project as records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// Row filters.
    #[serde(default)]
    pub select_on: Vec<SelectOn>,
}

/// An input or source property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name, referenced as `$name`.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Numeric constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_spec: Option<TypeConstraints>,
    /// Temporal qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<Temporal>,
    /// Cross-service origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_reference: Option<ServiceReference>,
    /// Tabular origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<SourceReference>,
    /// Whether absence marks the evaluation as missing required data.
    #[serde(default)]
    pub required: bool,
}

/// A declared output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output name.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Numeric constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_spec: Option<TypeConstraints>,
    /// Temporal qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<Temporal>,
}

impl OutputSpec {
    /// The enforcement spec for this output.
    pub fn type_spec(&self) -> TypeSpec {
        TypeSpec::new(self.value_type.clone(), self.type_spec.clone())
    }
}

/// An output-producing action.
///
/// Either `value` is set (a literal, reference, or nested operation), or the
/// action itself is an operation node (`operation:`, `values:`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Output name.
    pub output: String,
    /// Direct value expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expr>,
    /// Inline operation.
    #[serde(flatten)]
    pub operation: Option<Operation>,
}

impl Action {
    /// The expression producing this action's output. An inline operation
    /// takes precedence; its `value` operand is the action's `value`.
    pub fn expr(&self) -> Result<Expr, SpecError> {
        match (&self.value, &self.operation) {
            (value, Some(op)) => {
                let mut op = op.clone();
                if op.value.is_none() {
                    op.value = value.clone();
                }
                Ok(Expr::Op(Box::new(op)))
            }
            (Some(value), None) => Ok(value.clone()),
            (None, None) => Err(SpecError::EmptyAction {
                output: self.output.clone(),
            }),
        }
    }

    /// Every `$reference` path the action mentions.
    pub fn references(&self) -> std::collections::BTreeSet<String> {
        let mut refs = std::collections::BTreeSet::new();
        if let Some(value) = &self.value {
            value.collect_references(&mut refs);
        }
        if let Some(op) = &self.operation {
            op.collect_references(&mut refs);
        }
        refs
    }
}
