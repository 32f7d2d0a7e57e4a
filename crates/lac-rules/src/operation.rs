//! # Operation Trees
//!
//! The expression language rule authors write inside requirements and
//! actions. An [`Expr`] is either an operation node (a mapping with an
//! `operation` key), a list of expressions, or a literal. Literal strings
//! beginning with `$` are references resolved by the evaluation context.
//!
//! Operation names are kept as written and classified with
//! [`Operation::kind`], so an unknown name surfaces as
//! [`SpecError::UnknownOperation`] at evaluation time rather than being
//! silently read as a literal record.
//!
//! An operation node only ever comes from a mapping. A sequence such as
//! `[a, b]` is always a list of expressions.

use std::collections::BTreeSet;
use std::fmt;

use lac_core::Value;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SpecError;

/// The sigil marking a literal string as a reference.
pub const REFERENCE_SIGIL: char = '$';

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    /// An operation node.
    Op(Box<Operation>),
    /// A list whose elements are evaluated individually.
    List(Vec<Expr>),
    /// A literal value or a `$reference` string.
    Literal(Value),
}

impl Expr {
    /// A literal expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A `$reference` expression.
    pub fn reference(path: &str) -> Self {
        Self::Literal(Value::String(format!("{REFERENCE_SIGIL}{path}")))
    }

    /// Collect every `$reference` path mentioned anywhere in this expression.
    pub fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Op(op) => op.collect_references(out),
            Self::List(items) => items.iter().for_each(|e| e.collect_references(out)),
            Self::Literal(v) => collect_value_references(v, out),
        }
    }
}

fn collect_value_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if let Some(path) = s.strip_prefix(REFERENCE_SIGIL) {
                out.insert(path.to_string());
            }
        }
        Value::List(items) => items.iter().for_each(|v| collect_value_references(v, out)),
        Value::Record(r) => r.values().for_each(|v| collect_value_references(v, out)),
        _ => {}
    }
}

/// One branch of an `IF` operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Condition {
    /// The test; absent on an `else` branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<Expr>,
    /// Result when the test holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Expr>,
    /// Result of the fallback branch.
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Expr>,
}

/// An operation node as written in a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    /// Operation name, e.g. `ADD`, `EQUALS`, `IF`.
    pub operation: String,
    /// Left operand of comparisons, membership tests, and iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Expr>,
    /// Right operand of comparisons; body of `FOREACH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expr>,
    /// Operand list of aggregates and logical operations; the allowed set
    /// of `IN`/`NOT_IN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Expr>,
    /// Ordered branches of `IF`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    /// Aggregate applied to `FOREACH` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine: Option<String>,
    /// Unit of `SUBTRACT_DATE` (`days`, `months`, `years`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Deserialize)]
struct OperationFields {
    operation: String,
    #[serde(default)]
    subject: Option<Expr>,
    #[serde(default)]
    value: Option<Expr>,
    #[serde(default)]
    values: Option<Expr>,
    #[serde(default)]
    conditions: Option<Vec<Condition>>,
    #[serde(default)]
    combine: Option<String>,
    #[serde(default)]
    unit: Option<String>,
}

struct OperationVisitor;

impl<'de> Visitor<'de> for OperationVisitor {
    type Value = Operation;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping with an `operation` key")
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Operation, A::Error> {
        let fields = OperationFields::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(Operation {
            operation: fields.operation,
            subject: fields.subject,
            value: fields.value,
            values: fields.values,
            conditions: fields.conditions,
            combine: fields.combine,
            unit: fields.unit,
        })
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OperationVisitor)
    }
}

impl Operation {
    /// A bare operation node with no operands.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            subject: None,
            value: None,
            values: None,
            conditions: None,
            combine: None,
            unit: None,
        }
    }

    /// Builder: set the subject.
    pub fn with_subject(mut self, subject: Expr) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Builder: set the value.
    pub fn with_value(mut self, value: Expr) -> Self {
        self.value = Some(value);
        self
    }

    /// Builder: set the operand list.
    pub fn with_values(mut self, values: Vec<Expr>) -> Self {
        self.values = Some(Expr::List(values));
        self
    }

    /// Classify the operation name.
    pub fn kind(&self) -> Result<OperationKind, SpecError> {
        self.operation.parse()
    }

    /// Collect every `$reference` path this node mentions.
    pub fn collect_references(&self, out: &mut BTreeSet<String>) {
        for expr in [&self.subject, &self.value, &self.values].into_iter().flatten() {
            expr.collect_references(out);
        }
        for cond in self.conditions.iter().flatten() {
            for expr in [&cond.test, &cond.then, &cond.otherwise].into_iter().flatten() {
                expr.collect_references(out);
            }
        }
    }
}

/// The operation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Sum of operands.
    Add,
    /// First operand minus the rest.
    Subtract,
    /// Product of operands.
    Multiply,
    /// First operand divided by the rest.
    Divide,
    /// Smallest operand.
    Min,
    /// Largest operand.
    Max,
    /// String concatenation of operands.
    Concat,
    /// Numeric-aware equality.
    Equals,
    /// Negated equality.
    NotEquals,
    /// `>`
    GreaterThan,
    /// `<`
    LessThan,
    /// `>=`
    GreaterOrEqual,
    /// `<=`
    LessOrEqual,
    /// Short-circuit conjunction.
    And,
    /// Short-circuit disjunction.
    Or,
    /// Logical negation of the subject.
    Not,
    /// Set membership.
    In,
    /// Negated set membership.
    NotIn,
    /// Subject is present.
    NotNull,
    /// Subject is absent.
    IsNull,
    /// Per-element iteration with a combining aggregate.
    Foreach,
    /// Ordered conditional branches.
    If,
    /// Difference between two dates.
    SubtractDate,
}

impl OperationKind {
    /// The rule-text name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Subtract => "SUBTRACT",
            Self::Multiply => "MULTIPLY",
            Self::Divide => "DIVIDE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Concat => "CONCAT",
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::GreaterOrEqual => "GREATER_OR_EQUAL",
            Self::LessOrEqual => "LESS_OR_EQUAL",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::NotNull => "NOT_NULL",
            Self::IsNull => "IS_NULL",
            Self::Foreach => "FOREACH",
            Self::If => "IF",
            Self::SubtractDate => "SUBTRACT_DATE",
        }
    }

    /// True for operations that fold a list of operands into one value.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Subtract
                | Self::Multiply
                | Self::Divide
                | Self::Min
                | Self::Max
                | Self::Concat
                | Self::And
                | Self::Or
        )
    }

    /// True for binary comparisons.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::GreaterThan
                | Self::LessThan
                | Self::GreaterOrEqual
                | Self::LessOrEqual
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ADD" => Self::Add,
            "SUBTRACT" => Self::Subtract,
            "MULTIPLY" => Self::Multiply,
            "DIVIDE" => Self::Divide,
            "MIN" => Self::Min,
            "MAX" => Self::Max,
            "CONCAT" => Self::Concat,
            "EQUALS" => Self::Equals,
            "NOT_EQUALS" => Self::NotEquals,
            "GREATER_THAN" => Self::GreaterThan,
            "LESS_THAN" => Self::LessThan,
            "GREATER_OR_EQUAL" => Self::GreaterOrEqual,
            "LESS_OR_EQUAL" => Self::LessOrEqual,
            "AND" => Self::And,
            "OR" => Self::Or,
            "NOT" => Self::Not,
            "IN" => Self::In,
            "NOT_IN" => Self::NotIn,
            "NOT_NULL" => Self::NotNull,
            "IS_NULL" => Self::IsNull,
            "FOREACH" => Self::Foreach,
            "IF" => Self::If,
            "SUBTRACT_DATE" => Self::SubtractDate,
            other => {
                return Err(SpecError::UnknownOperation {
                    operation: other.to_string(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_with_operation_is_an_op() {
        let e: Expr = serde_yaml::from_str("operation: ADD\nvalues: [1, $x]\n").unwrap();
        match e {
            Expr::Op(op) => {
                assert_eq!(op.kind().unwrap(), OperationKind::Add);
                assert!(matches!(op.values, Some(Expr::List(ref v)) if v.len() == 2));
            }
            other => panic!("expected op, got {other:?}"),
        }
    }

    #[test]
    fn mapping_without_operation_is_a_literal_record() {
        let e: Expr = serde_yaml::from_str("a: 1\nb: two\n").unwrap();
        assert!(matches!(e, Expr::Literal(Value::Record(_))));
    }

    #[test]
    fn string_sequences_are_lists_not_operations() {
        let e: Expr = serde_yaml::from_str("[$a, $b]").unwrap();
        assert_eq!(e, Expr::List(vec![Expr::reference("a"), Expr::reference("b")]));
    }

    #[test]
    fn scalars_are_literals() {
        let e: Expr = serde_yaml::from_str("$income").unwrap();
        assert_eq!(e, Expr::reference("income"));
        let e: Expr = serde_yaml::from_str("42").unwrap();
        assert_eq!(e, Expr::literal(42));
    }

    #[test]
    fn if_conditions_parse_else_branch() {
        let yaml = r#"
operation: IF
conditions:
  - test: { operation: EQUALS, subject: $a, value: 1 }
    then: 10
  - else: 20
"#;
        let e: Expr = serde_yaml::from_str(yaml).unwrap();
        let Expr::Op(op) = e else { panic!("expected op") };
        let conditions = op.conditions.unwrap();
        assert_eq!(conditions.len(), 2);
        assert!(conditions[0].test.is_some());
        assert_eq!(conditions[1].otherwise, Some(Expr::literal(20)));
    }

    #[test]
    fn unknown_operation_is_reported() {
        let op = Operation::new("FROBNICATE");
        assert_eq!(
            op.kind().unwrap_err(),
            SpecError::UnknownOperation {
                operation: "FROBNICATE".into()
            }
        );
    }

    #[test]
    fn collects_nested_references() {
        let yaml = r#"
operation: IF
conditions:
  - test: { operation: GREATER_THAN, subject: $income, value: $THRESHOLD }
    then: { operation: MULTIPLY, values: [$base, 2] }
  - else: 0
"#;
        let e: Expr = serde_yaml::from_str(yaml).unwrap();
        let mut refs = BTreeSet::new();
        e.collect_references(&mut refs);
        let refs: Vec<_> = refs.into_iter().collect();
        assert_eq!(refs, vec!["THRESHOLD", "base", "income"]);
    }

    #[test]
    fn kind_names_roundtrip() {
        for name in ["ADD", "NOT_IN", "SUBTRACT_DATE", "GREATER_OR_EQUAL"] {
            let kind: OperationKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
    }
}
