//! # Specification Errors
//!
//! Hard errors raised when a rule specification is malformed, when no
//! version of a law applies, or when a tabular source rejects a query.
//! These abort the evaluation that encountered them.

use thiserror::Error;

/// Errors attributable to the rule specification or its catalog.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    /// The operation name is not part of the vocabulary.
    #[error("unknown operation: {operation}")]
    UnknownOperation {
        /// The unrecognised operation name.
        operation: String,
    },

    /// The operation node is missing a part its operation requires.
    #[error("malformed {operation} operation: {reason}")]
    MalformedOperation {
        /// The operation name.
        operation: String,
        /// What is wrong with the node.
        reason: String,
    },

    /// An action declares neither a value nor an operation.
    #[error("action for output {output} has neither a value nor an operation")]
    EmptyAction {
        /// The output the action should produce.
        output: String,
    },

    /// Output dependencies form a cycle.
    #[error("circular dependency between outputs involving {output}")]
    CircularDependency {
        /// One of the outputs on the cycle.
        output: String,
    },

    /// No rule version for the law is effective at the reference date.
    #[error("no rule specification for law {law} in service {service} is valid on {reference_date}")]
    NoApplicableVersion {
        /// The requested law.
        law: String,
        /// The requesting service.
        service: String,
        /// The reference date.
        reference_date: String,
    },

    /// The resolved rule belongs to a different service.
    #[error("rule specification for law {law} belongs to service {found}, not {expected}")]
    ServiceMismatch {
        /// The requested law.
        law: String,
        /// The service that asked for the rule.
        expected: String,
        /// The service the rule declares.
        found: String,
    },

    /// An `applies` update names a mutator that does not exist.
    #[error("unknown update method: {method}")]
    UnknownUpdateMethod {
        /// The unrecognised method name.
        method: String,
    },

    /// A tabular source rejected a query.
    #[error("data source error: {0}")]
    Source(#[from] SourceError),
}

/// Errors raised by [`crate::DataSource`] implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The filter operator is not supported.
    #[error("unknown filter operator: {operator}")]
    UnknownOperator {
        /// The unrecognised operator.
        operator: String,
    },

    /// Set-membership filtering requires a list operand.
    #[error("operator {operator} on column {column} requires a list operand")]
    ExpectedList {
        /// The operator used.
        operator: String,
        /// The filtered column.
        column: String,
    },
}
