//! # Tabular Data Sources
//!
//! The read contract rules use to pull inputs out of tables, plus
//! [`MemoryTable`], an in-memory implementation used for embedding and
//! tests. Production deployments plug in their own [`DataSource`].

use std::fmt;
use std::sync::Arc;

use lac_core::{Record, Value};

use crate::error::SourceError;

/// Row filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `in`: membership in a list operand.
    In,
}

impl FilterOp {
    /// The operator as written.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::In => "in",
        }
    }

    /// Test one cell against the operand.
    pub fn test(&self, cell: &Value, operand: &Value) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => cell.loose_eq(operand),
            Self::Ne => !cell.loose_eq(operand),
            Self::Gt => matches!(cell.compare(operand), Some(Greater)),
            Self::Lt => matches!(cell.compare(operand), Some(Less)),
            Self::Ge => matches!(cell.compare(operand), Some(Greater | Equal)),
            Self::Le => matches!(cell.compare(operand), Some(Less | Equal)),
            Self::In => operand
                .as_list()
                .is_some_and(|items| items.iter().any(|v| cell.loose_eq(v))),
        }
    }
}

impl std::str::FromStr for FilterOp {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "in" | "IN" => Ok(Self::In),
            other => Err(SourceError::UnknownOperator {
                operator: other.to_string(),
            }),
        }
    }
}

/// Read contract of a tabular source.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Rows whose `column` satisfies `operator` against `value`. Rows
    /// lacking the column never match.
    fn filter(
        &self,
        column: &str,
        operator: &str,
        value: &Value,
    ) -> Result<Arc<dyn DataSource>, SourceError>;

    /// Project every row onto `columns`.
    fn select(&self, columns: &[String]) -> Arc<dyn DataSource>;

    /// All rows.
    fn to_records(&self) -> Vec<Record>;

    /// True if any row carries `name`.
    fn has_column(&self, name: &str) -> bool;

    /// Values of `name` for rows carrying it, in row order.
    fn column_values(&self, name: &str) -> Vec<Value>;
}

/// A table held in memory as a list of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    rows: Vec<Record>,
}

impl MemoryTable {
    /// Build a table from rows.
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl DataSource for MemoryTable {
    fn filter(
        &self,
        column: &str,
        operator: &str,
        value: &Value,
    ) -> Result<Arc<dyn DataSource>, SourceError> {
        let op: FilterOp = operator.parse()?;
        if op == FilterOp::In && value.as_list().is_none() {
            return Err(SourceError::ExpectedList {
                operator: operator.to_string(),
                column: column.to_string(),
            });
        }
        let rows = self
            .rows
            .iter()
            .filter(|row| row.get(column).is_some_and(|cell| op.test(cell, value)))
            .cloned()
            .collect();
        Ok(Arc::new(MemoryTable::new(rows)))
    }

    fn select(&self, columns: &[String]) -> Arc<dyn DataSource> {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect()
            })
            .collect();
        Arc::new(MemoryTable::new(rows))
    }

    fn to_records(&self) -> Vec<Record> {
        self.rows.clone()
    }

    fn has_column(&self, name: &str) -> bool {
        self.rows.iter().any(|row| row.contains_key(name))
    }

    fn column_values(&self, name: &str) -> Vec<Value> {
        self.rows.iter().filter_map(|row| row.get(name).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lac_core::record;

    fn table() -> MemoryTable {
        MemoryTable::new(vec![
            record! { "bsn" => "111", "income" => 20000, "insured" => true },
            record! { "bsn" => "222", "income" => 45000, "insured" => false },
            record! { "bsn" => "333", "income" => 45000 },
        ])
    }

    #[test]
    fn equality_filter() {
        let t = table().filter("bsn", "=", &Value::from("222")).unwrap();
        let rows = t.to_records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("income"), Some(&Value::Int(45000)));
    }

    #[test]
    fn ordered_filters_compare_numbers() {
        let t = table();
        assert_eq!(t.filter("income", ">", &Value::Int(30000)).unwrap().to_records().len(), 2);
        assert_eq!(t.filter("income", "<=", &Value::Float(20000.0)).unwrap().to_records().len(), 1);
        assert_eq!(t.filter("income", "!=", &Value::Int(45000)).unwrap().to_records().len(), 1);
    }

    #[test]
    fn membership_filter_requires_list() {
        let t = table();
        let hits = t
            .filter("bsn", "in", &Value::List(vec!["111".into(), "333".into()]))
            .unwrap();
        assert_eq!(hits.to_records().len(), 2);
        let err = t.filter("bsn", "in", &Value::from("111")).unwrap_err();
        assert!(matches!(err, SourceError::ExpectedList { .. }));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let err = table().filter("bsn", "LIKE", &Value::from("1%")).unwrap_err();
        assert_eq!(err, SourceError::UnknownOperator { operator: "LIKE".into() });
    }

    #[test]
    fn rows_without_column_never_match() {
        let t = table().filter("insured", "!=", &Value::Bool(true)).unwrap();
        assert_eq!(t.to_records().len(), 1);
    }

    #[test]
    fn select_and_column_values() {
        let t = table();
        assert!(t.has_column("insured"));
        assert!(!t.has_column("age"));
        assert_eq!(t.column_values("insured"), vec![Value::Bool(true), Value::Bool(false)]);
        let projected = t.select(&["bsn".to_string()]).to_records();
        assert_eq!(projected.len(), 3);
        assert!(projected.iter().all(|r| r.len() == 1));
    }
}
