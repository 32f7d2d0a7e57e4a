//! # Operation Interpreter
//!
//! Evaluates [`Expr`] trees against a [`ResolutionContext`]. Every
//! operation node opens an `Operation` trace node carrying its result.
//!
//! ## Numeric semantics
//!
//! Aggregates keep integer results when every operand is integral
//! (booleans count as 0/1) and fall back to floating point on overflow or
//! when any operand is a float. `DIVIDE` always yields a float. Operands
//! that cannot be read as numbers are a [`EngineError::TypeMismatch`].
//!
//! Comparisons between values with no defined ordering are `false`, never
//! an error.

use std::cmp::Ordering;

use lac_core::{CalculationDate, Record, Value};
use lac_rules::{Condition, Expr, Operation, OperationKind, SpecError};

use crate::context::ResolutionContext;
use crate::error::EngineError;
use crate::trace::{NodeKind, PathNode};

impl ResolutionContext<'_> {
    /// Evaluate an expression: literals are resolved, lists evaluated
    /// element-wise, operation nodes interpreted.
    pub fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value, EngineError> {
        match expr {
            Expr::Literal(value) => self.resolve_value(value),
            Expr::List(items) => items
                .iter()
                .map(|item| self.evaluate_expr(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Op(op) => self.evaluate_operation(op),
        }
    }

    /// Interpret one operation node.
    pub fn evaluate_operation(&mut self, op: &Operation) -> Result<Value, EngineError> {
        let kind = op.kind()?;
        self.enter(PathNode::new(NodeKind::Operation, format!("Operation: {kind}")).with_detail("operation", kind.as_str()));
        let result = self.apply(kind, op)?;
        tracing::trace!(operation = %kind, result = %result, "operation evaluated");
        self.exit(result.clone());
        Ok(result)
    }

    fn apply(&mut self, kind: OperationKind, op: &Operation) -> Result<Value, EngineError> {
        match kind {
            OperationKind::And => self.short_circuit(op, false),
            OperationKind::Or => self.short_circuit(op, true),
            k if k.is_aggregate() => {
                let operands = self.operands(op)?;
                aggregate(k, operands)
            }
            k if k.is_comparison() => {
                let (left, right) = self.binary_operands(k, op)?;
                Ok(Value::Bool(compare(k, &left, &right)))
            }
            OperationKind::Not => {
                let subject = self.unary_operand(op)?;
                Ok(Value::Bool(!subject.is_truthy()))
            }
            OperationKind::NotNull => Ok(Value::Bool(!self.unary_operand(op)?.is_null())),
            OperationKind::IsNull => Ok(Value::Bool(self.unary_operand(op)?.is_null())),
            OperationKind::In | OperationKind::NotIn => {
                let subject = self.unary_operand(op)?;
                let allowed = match &op.values {
                    Some(values) => self.evaluate_expr(values)?,
                    None => Value::Null,
                };
                let member = contains(&allowed, &subject);
                if let Some(node) = self.current_mut() {
                    node.details.insert("subject_value".into(), subject);
                    node.details.insert("allowed_values".into(), allowed);
                }
                Ok(Value::Bool(member == (kind == OperationKind::In)))
            }
            OperationKind::Foreach => self.foreach(op),
            OperationKind::If => self.if_branches(op),
            OperationKind::SubtractDate => self.subtract_date(op),
            other => Err(SpecError::UnknownOperation {
                operation: other.as_str().to_string(),
            }
            .into()),
        }
    }

    // -----------------------------------------------------------------------
    // Operand collection
    // -----------------------------------------------------------------------

    /// Operands of an aggregate. A list expression is evaluated element by
    /// element; a single expression producing a list is flattened.
    fn operands(&mut self, op: &Operation) -> Result<Vec<Value>, EngineError> {
        match &op.values {
            Some(Expr::List(items)) => items.iter().map(|item| self.evaluate_expr(item)).collect(),
            Some(other) => Ok(match self.evaluate_expr(other)? {
                Value::List(items) => items,
                single => vec![single],
            }),
            None => Ok(Vec::new()),
        }
    }

    fn binary_operands(&mut self, kind: OperationKind, op: &Operation) -> Result<(Value, Value), EngineError> {
        if let (Some(subject), Some(value)) = (&op.subject, &op.value) {
            let left = self.evaluate_expr(subject)?;
            let right = self.evaluate_expr(value)?;
            return Ok((left, right));
        }
        let mut values = self.operands(op)?;
        if values.len() < 2 {
            return Err(malformed(kind, "expected subject and value, or two values"));
        }
        let right = values.swap_remove(1);
        let left = values.swap_remove(0);
        Ok((left, right))
    }

    fn unary_operand(&mut self, op: &Operation) -> Result<Value, EngineError> {
        match &op.subject {
            Some(subject) => self.evaluate_expr(subject),
            None => Ok(self.operands(op)?.into_iter().next().unwrap_or_default()),
        }
    }

    // -----------------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------------

    /// `AND` stops at the first falsy operand, `OR` at the first truthy one.
    fn short_circuit(&mut self, op: &Operation, stop_on: bool) -> Result<Value, EngineError> {
        let mut evaluated = Vec::new();
        let mut outcome = !stop_on;
        match &op.values {
            Some(Expr::List(items)) => {
                for item in items {
                    let value = self.evaluate_expr(item)?;
                    let truthy = value.is_truthy();
                    evaluated.push(value);
                    if truthy == stop_on {
                        outcome = stop_on;
                        break;
                    }
                }
            }
            Some(other) => {
                let values = match self.evaluate_expr(other)? {
                    Value::List(items) => items,
                    single => vec![single],
                };
                if values.iter().any(|v| v.is_truthy() == stop_on) {
                    outcome = stop_on;
                }
                evaluated = values;
            }
            None => {}
        }
        if let Some(node) = self.current_mut() {
            node.details.insert("evaluated_values".into(), Value::List(evaluated));
        }
        Ok(Value::Bool(outcome))
    }

    fn if_branches(&mut self, op: &Operation) -> Result<Value, EngineError> {
        let conditions: &[Condition] = op
            .conditions
            .as_deref()
            .ok_or_else(|| malformed(OperationKind::If, "missing conditions"))?;

        for (index, condition) in conditions.iter().enumerate() {
            match (&condition.test, &condition.otherwise) {
                (Some(test), _) => {
                    if self.evaluate_expr(test)?.is_truthy() {
                        self.note_branch(index);
                        return match &condition.then {
                            Some(then) => self.evaluate_expr(then),
                            None => Ok(Value::Null),
                        };
                    }
                }
                (None, Some(otherwise)) => {
                    self.note_branch(index);
                    return self.evaluate_expr(otherwise);
                }
                (None, None) => {}
            }
        }
        Ok(Value::Null)
    }

    fn note_branch(&mut self, index: usize) {
        if let Some(node) = self.current_mut() {
            node.details.insert("branch".into(), Value::Int(index as i64));
        }
    }

    fn foreach(&mut self, op: &Operation) -> Result<Value, EngineError> {
        let combine: OperationKind = op
            .combine
            .as_deref()
            .ok_or_else(|| malformed(OperationKind::Foreach, "missing combine"))?
            .parse()?;
        if !combine.is_aggregate() {
            return Err(malformed(OperationKind::Foreach, "combine must be an aggregate"));
        }
        let body = match &op.value {
            Some(Expr::List(items)) => items.first(),
            other => other.as_ref(),
        }
        .ok_or_else(|| malformed(OperationKind::Foreach, "missing value"))?;

        let subject = match &op.subject {
            Some(subject) => self.evaluate_expr(subject)?,
            None => Value::Null,
        };
        if !subject.is_truthy() {
            tracing::debug!(service = self.service_name(), "no data to iterate over");
            return aggregate(combine, Vec::new());
        }
        let items = match subject {
            Value::List(items) => items,
            single => vec![single],
        };

        let mut results = Vec::new();
        for item in items {
            let scope = match item {
                Value::Record(fields) => fields,
                scalar => {
                    let mut scope = Record::new();
                    scope.insert("value".into(), scalar);
                    scope
                }
            };
            let saved = std::mem::replace(&mut self.local, scope);
            let outcome = self.evaluate_expr(body);
            self.local = saved;
            match outcome? {
                Value::List(values) => results.extend(values),
                value => results.push(value),
            }
        }
        aggregate(combine, results)
    }

    fn subtract_date(&mut self, op: &Operation) -> Result<Value, EngineError> {
        let values = self.operands(op)?;
        if values.len() != 2 {
            tracing::warn!(count = values.len(), "SUBTRACT_DATE requires exactly two values");
            return Ok(Value::Int(0));
        }
        let end = CalculationDate::from_value(&values[0]).unwrap_or_else(|_| self.calculation_date());
        let start = CalculationDate::from_value(&values[1])?;
        let unit = op.unit.as_deref().unwrap_or("days");
        let difference = match unit {
            "days" => end.days_since(&start),
            "months" => end.months_since(&start),
            "years" => end.years_since(&start),
            other => {
                tracing::warn!(unit = other, "unknown date unit");
                0
            }
        };
        if let Some(node) = self.current_mut() {
            node.details.insert("unit".into(), Value::from(unit));
        }
        Ok(Value::Int(difference))
    }
}

fn malformed(kind: OperationKind, reason: &str) -> EngineError {
    SpecError::MalformedOperation {
        operation: kind.as_str().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

// ---------------------------------------------------------------------------
// Pure operations
// ---------------------------------------------------------------------------

fn compare(kind: OperationKind, left: &Value, right: &Value) -> bool {
    match kind {
        OperationKind::Equals => left.loose_eq(right),
        OperationKind::NotEquals => !left.loose_eq(right),
        _ => match left.compare(right) {
            Some(ordering) => match kind {
                OperationKind::GreaterThan => ordering == Ordering::Greater,
                OperationKind::LessThan => ordering == Ordering::Less,
                OperationKind::GreaterOrEqual => ordering != Ordering::Less,
                OperationKind::LessOrEqual => ordering != Ordering::Greater,
                _ => false,
            },
            None => {
                tracing::debug!(operation = %kind, %left, %right, "values are not comparable");
                false
            }
        },
    }
}

fn contains(allowed: &Value, subject: &Value) -> bool {
    match allowed {
        Value::Null => false,
        Value::List(items) => items.iter().any(|item| item.loose_eq(subject)),
        Value::Record(fields) => subject.as_str().is_some_and(|key| fields.contains_key(key)),
        scalar => scalar.loose_eq(subject),
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn numbers(kind: OperationKind, values: &[Value]) -> Result<Vec<f64>, EngineError> {
    values
        .iter()
        .map(|v| {
            v.to_number().map_err(|e| EngineError::TypeMismatch {
                operation: kind.as_str().to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Fold operands with an aggregate operation. Null operands are dropped;
/// with nothing left the result is `0`.
pub(crate) fn aggregate(kind: OperationKind, values: Vec<Value>) -> Result<Value, EngineError> {
    let total = values.len();
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if values.is_empty() {
        tracing::debug!(operation = %kind, "no operands, result is 0");
        return Ok(Value::Int(0));
    }
    if values.len() < total {
        tracing::debug!(operation = %kind, dropped = total - values.len(), "dropped null operands");
    }

    match kind {
        OperationKind::And => Ok(Value::Bool(values.iter().all(Value::is_truthy))),
        OperationKind::Or => Ok(Value::Bool(values.iter().any(Value::is_truthy))),
        OperationKind::Concat => Ok(Value::String(values.iter().map(Value::to_string).collect())),
        OperationKind::Min | OperationKind::Max => extremum(kind, values),
        OperationKind::Divide => {
            let nums = numbers(kind, &values)?;
            if nums.len() < 2 {
                return Ok(Value::Int(0));
            }
            let quotient = nums[1..]
                .iter()
                .filter(|d| **d != 0.0)
                .fold(nums[0], |acc, d| acc / d);
            Ok(Value::Float(quotient))
        }
        OperationKind::Add | OperationKind::Subtract | OperationKind::Multiply => arithmetic(kind, &values),
        other => Err(malformed(other, "not an aggregate")),
    }
}

fn arithmetic(kind: OperationKind, values: &[Value]) -> Result<Value, EngineError> {
    let ints: Option<Vec<i64>> = values.iter().map(integral).collect();
    if let Some(ints) = ints {
        let checked = ints[1..].iter().try_fold(ints[0], |acc, x| match kind {
            OperationKind::Add => acc.checked_add(*x),
            OperationKind::Subtract => acc.checked_sub(*x),
            _ => acc.checked_mul(*x),
        });
        if let Some(result) = checked {
            return Ok(Value::Int(result));
        }
    }
    let nums = numbers(kind, values)?;
    let result = nums[1..].iter().fold(nums[0], |acc, x| match kind {
        OperationKind::Add => acc + x,
        OperationKind::Subtract => acc - x,
        _ => acc * x,
    });
    Ok(Value::Float(result))
}

fn extremum(kind: OperationKind, values: Vec<Value>) -> Result<Value, EngineError> {
    let wanted = if kind == OperationKind::Min { Ordering::Less } else { Ordering::Greater };
    let mut iter = values.into_iter();
    let mut best = iter.next().unwrap_or_default();
    for candidate in iter {
        match candidate.compare(&best) {
            Some(ordering) if ordering == wanted => best = candidate,
            Some(_) => {}
            None => {
                return Err(EngineError::TypeMismatch {
                    operation: kind.as_str().to_string(),
                    reason: format!("cannot order {} and {}", candidate.type_name(), best.type_name()),
                })
            }
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SourceTables;
    use crate::provider::{EvaluationRequest, OverwriteInput, RuleResult, ServiceProvider};
    use lac_core::record;
    use std::collections::BTreeMap;

    struct NoServices;

    impl ServiceProvider for NoServices {
        fn evaluate(&self, request: EvaluationRequest) -> Result<RuleResult, EngineError> {
            Err(EngineError::UnknownService { service: request.service })
        }
    }

    fn eval_with(yaml: &str, parameters: Record) -> Result<Value, EngineError> {
        let expr: Expr = serde_yaml::from_str(yaml).unwrap();
        let definitions = record! { "THRESHOLD" => 100 };
        let specs = BTreeMap::new();
        let sources = SourceTables::new();
        let overwrite = OverwriteInput::new();
        let mut ctx = ResolutionContext::new(
            &NoServices,
            "TEST",
            &definitions,
            &specs,
            &sources,
            &overwrite,
            CalculationDate::parse("2025-06-30").unwrap(),
        )
        .with_parameters(parameters);
        ctx.evaluate_expr(&expr)
    }

    fn eval(yaml: &str) -> Value {
        eval_with(yaml, Record::new()).unwrap()
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(eval("{ operation: ADD, values: [1, 2, 3] }"), Value::Int(6));
        assert_eq!(eval("{ operation: SUBTRACT, values: [$THRESHOLD, 30] }"), Value::Int(70));
        assert_eq!(eval("{ operation: MULTIPLY, values: [4, 2.5] }"), Value::Float(10.0));
    }

    #[test]
    fn overflow_falls_back_to_float() {
        let v = eval(&format!("{{ operation: ADD, values: [{}, 1] }}", i64::MAX));
        assert!(matches!(v, Value::Float(_)));
    }

    #[test]
    fn null_operands_are_dropped() {
        assert_eq!(eval("{ operation: ADD, values: [5, $missing] }"), Value::Int(5));
        assert_eq!(eval("{ operation: ADD, values: [$missing] }"), Value::Int(0));
        assert_eq!(eval("{ operation: MAX, values: [] }"), Value::Int(0));
    }

    #[test]
    fn divide_skips_zero_and_yields_float() {
        assert_eq!(eval("{ operation: DIVIDE, values: [10, 4] }"), Value::Float(2.5));
        assert_eq!(eval("{ operation: DIVIDE, values: [10, 0, 2] }"), Value::Float(5.0));
        assert_eq!(eval("{ operation: DIVIDE, values: [10] }"), Value::Int(0));
    }

    #[test]
    fn min_max_concat() {
        assert_eq!(eval("{ operation: MIN, values: [3, 1.5, 7] }"), Value::Float(1.5));
        assert_eq!(eval("{ operation: MAX, values: [3, 1.5, 7] }"), Value::Int(7));
        assert_eq!(eval("{ operation: CONCAT, values: [a, 1, b] }"), Value::from("a1b"));
    }

    #[test]
    fn non_numeric_operand_is_type_mismatch() {
        let err = eval_with("{ operation: ADD, values: [1, abc] }", Record::new()).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { ref operation, .. } if operation == "ADD"));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("{ operation: EQUALS, subject: 1, value: 1.0 }"), Value::Bool(true));
        assert_eq!(eval("{ operation: NOT_EQUALS, values: [a, b] }"), Value::Bool(true));
        assert_eq!(eval("{ operation: GREATER_THAN, subject: $THRESHOLD, value: 99 }"), Value::Bool(true));
        assert_eq!(eval("{ operation: LESS_OR_EQUAL, values: ['2024-01-01', '2024-01-01'] }"), Value::Bool(true));
        assert_eq!(eval("{ operation: LESS_THAN, subject: $missing, value: 5 }"), Value::Bool(false));
    }

    #[test]
    fn comparison_without_operands_is_malformed() {
        let err = eval_with("{ operation: EQUALS, subject: 1 }", Record::new()).unwrap_err();
        assert!(matches!(err, EngineError::Spec(SpecError::MalformedOperation { .. })));
    }

    #[test]
    fn unknown_operation_is_spec_error() {
        let err = eval_with("{ operation: XOR, values: [1] }", Record::new()).unwrap_err();
        assert!(matches!(err, EngineError::Spec(SpecError::UnknownOperation { .. })));
    }

    #[test]
    fn logical_short_circuit() {
        // The failing second operand is never evaluated.
        assert_eq!(
            eval("{ operation: AND, values: [false, { operation: ADD, values: [x] }] }"),
            Value::Bool(false)
        );
        assert_eq!(
            eval("{ operation: OR, values: [1, { operation: ADD, values: [x] }] }"),
            Value::Bool(true)
        );
        assert_eq!(eval("{ operation: AND, values: [] }"), Value::Bool(true));
        assert_eq!(eval("{ operation: OR, values: [] }"), Value::Bool(false));
        assert_eq!(eval("{ operation: NOT, subject: 0 }"), Value::Bool(true));
    }

    #[test]
    fn membership_and_nullness() {
        assert_eq!(eval("{ operation: IN, subject: b, values: [a, b] }"), Value::Bool(true));
        assert_eq!(eval("{ operation: NOT_IN, subject: 3, values: [1, 2] }"), Value::Bool(true));
        assert_eq!(eval("{ operation: IN, subject: a, values: $missing }"), Value::Bool(false));
        assert_eq!(eval("{ operation: NOT_NULL, subject: $THRESHOLD }"), Value::Bool(true));
        assert_eq!(eval("{ operation: IS_NULL, subject: $missing }"), Value::Bool(true));
    }

    #[test]
    fn if_takes_first_true_branch() {
        let yaml = r#"
operation: IF
conditions:
  - test: { operation: GREATER_THAN, subject: $income, value: $THRESHOLD }
    then: high
  - test: { operation: GREATER_THAN, subject: $income, value: 10 }
    then: medium
  - else: low
"#;
        assert_eq!(eval_with(yaml, record! { "income" => 500 }).unwrap(), Value::from("high"));
        assert_eq!(eval_with(yaml, record! { "income" => 50 }).unwrap(), Value::from("medium"));
        assert_eq!(eval_with(yaml, record! { "income" => 1 }).unwrap(), Value::from("low"));
    }

    #[test]
    fn if_without_match_is_null_and_without_conditions_is_malformed() {
        let yaml = "{ operation: IF, conditions: [{ test: false, then: 1 }] }";
        assert_eq!(eval(yaml), Value::Null);
        assert!(eval_with("{ operation: IF }", Record::new()).is_err());
    }

    #[test]
    fn foreach_over_records_and_scalars() {
        let children = Value::List(vec![
            Value::Record(record! { "age" => 4 }),
            Value::Record(record! { "age" => 17 }),
            Value::Record(record! { "age" => 9 }),
        ]);
        let yaml = r#"
operation: FOREACH
combine: ADD
subject: $children
value:
  - operation: IF
    conditions:
      - test: { operation: LESS_THAN, subject: $age, value: 12 }
        then: 1
      - else: 0
"#;
        assert_eq!(eval_with(yaml, record! { "children" => children }).unwrap(), Value::Int(2));

        let scalars = "{ operation: FOREACH, combine: MAX, subject: [3, 8, 5], value: $value }";
        assert_eq!(eval(scalars), Value::Int(8));
    }

    #[test]
    fn foreach_on_empty_subject_and_missing_combine() {
        assert_eq!(eval("{ operation: FOREACH, combine: ADD, subject: $missing, value: 1 }"), Value::Int(0));
        assert!(eval_with("{ operation: FOREACH, subject: [1], value: 1 }", Record::new()).is_err());
    }

    #[test]
    fn foreach_restores_local_scope() {
        let yaml = r#"
operation: ADD
values:
  - { operation: FOREACH, combine: ADD, subject: [1, 2], value: $value }
  - { operation: IS_NULL, subject: $value }
"#;
        // 3 from the iteration, plus true (1) because `value` is unbound again.
        assert_eq!(eval(yaml), Value::Int(4));
    }

    #[test]
    fn subtract_date_units() {
        assert_eq!(eval("{ operation: SUBTRACT_DATE, values: ['2025-03-01', '2025-02-01'] }"), Value::Int(28));
        assert_eq!(
            eval("{ operation: SUBTRACT_DATE, unit: years, values: [$calculation_date, '1990-07-01'] }"),
            Value::Int(34)
        );
        assert_eq!(
            eval("{ operation: SUBTRACT_DATE, unit: months, values: ['2025-03-31', '2024-12-01'] }"),
            Value::Int(3)
        );
        assert_eq!(eval("{ operation: SUBTRACT_DATE, values: ['2025-03-01'] }"), Value::Int(0));
        assert_eq!(eval("{ operation: SUBTRACT_DATE, unit: weeks, values: ['2025-03-01', '2025-02-01'] }"), Value::Int(0));
    }

    #[test]
    fn subtract_date_with_invalid_start_is_an_error() {
        let err = eval_with("{ operation: SUBTRACT_DATE, values: ['2025-03-01', 'soon'] }", Record::new()).unwrap_err();
        assert!(matches!(err, EngineError::Value(_)));
    }

    #[test]
    fn operation_trace_records_result() {
        let expr: Expr = serde_yaml::from_str("{ operation: ADD, values: [1, 2] }").unwrap();
        let definitions = Record::new();
        let specs = BTreeMap::new();
        let sources = SourceTables::new();
        let overwrite = OverwriteInput::new();
        let mut ctx = ResolutionContext::new(
            &NoServices,
            "TEST",
            &definitions,
            &specs,
            &sources,
            &overwrite,
            CalculationDate::parse("2025-06-30").unwrap(),
        );
        ctx.evaluate_expr(&expr).unwrap();
        let root = ctx.finish_trace().unwrap();
        assert_eq!(root.name, "Operation: ADD");
        assert_eq!(root.result, Value::Int(3));
    }
}
