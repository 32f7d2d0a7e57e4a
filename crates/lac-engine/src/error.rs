//! # Engine Errors
//!
//! Hard failures of an evaluation. Resolution gaps are not errors: an
//! unresolvable reference yields `null` and, when required, sets the
//! missing-required flag on the result instead.

use lac_core::ValueError;
use lac_rules::{SourceError, SpecError};
use thiserror::Error;

/// Errors that abort an evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The rule specification is malformed or no version applies.
    #[error("specification error: {0}")]
    Spec(#[from] SpecError),

    /// A tabular source rejected a lookup.
    #[error("data source error: {0}")]
    Source(#[from] SourceError),

    /// A value had the wrong shape for an operation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// No registry exists for the named service.
    #[error("unknown service: {service}")]
    UnknownService {
        /// The requested service.
        service: String,
    },

    /// An operand could not be used by an operation.
    #[error("{operation}: {reason}")]
    TypeMismatch {
        /// The operation name.
        operation: String,
        /// What was wrong with the operand.
        reason: String,
    },

    /// A nested service evaluation failed.
    #[error("evaluation of {service}.{law} failed: {source}")]
    ServiceCall {
        /// Called service.
        service: String,
        /// Called law.
        law: String,
        /// Underlying failure.
        #[source]
        source: Box<EngineError>,
    },

    /// The caller cancelled the evaluation.
    #[error("evaluation cancelled")]
    Cancelled,
}

impl EngineError {
    /// The innermost error, unwrapping nested service calls.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            Self::ServiceCall { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
