#![deny(missing_docs)]

//! # lac-rules — Rule Specification Model
//!
//! Everything a rule author writes, as typed data:
//!
//! - [`RuleSpec`] — one version of a law's computation with its property
//!   declarations, requirements, and actions.
//! - [`Expr`] / [`Operation`] — the operation tree language.
//! - [`Requirement`] — precondition groups.
//! - [`TypeSpec`] — output type enforcement.
//! - [`Applies`] — event application declarations.
//!
//! And the two read contracts the engine consumes:
//!
//! - [`RuleCatalog`] — version lookup by law and date ([`RuleSet`] is the
//!   in-memory implementation).
//! - [`DataSource`] — tabular lookups ([`MemoryTable`] is the in-memory
//!   implementation).
//!
//! This crate performs no evaluation. It has no runtime dependencies on
//! the engine, so rule documents can be parsed and validated standalone.

pub mod applies;
pub mod catalog;
pub mod error;
pub mod operation;
pub mod requirement;
pub mod source;
pub mod spec;
pub mod types;

pub use applies::{Applies, EventPattern, Update, UpdateMethod};
pub use catalog::{matching_applies, RuleCatalog, RuleSet};
pub use error::{SourceError, SpecError};
pub use operation::{Condition, Expr, Operation, OperationKind, REFERENCE_SIGIL};
pub use requirement::Requirement;
pub use source::{DataSource, FilterOp, MemoryTable};
pub use spec::{
    Action, OutputSpec, ParameterSpec, Properties, PropertySpec, RuleInfo, RuleSpec, SelectOn,
    ServiceParameter, ServiceReference, SourceReference, Temporal,
};
pub use types::{round_half_away, TypeConstraints, TypeSpec, MINOR_CURRENCY_UNITS};
