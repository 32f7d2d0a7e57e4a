#![deny(missing_docs)]

//! # lac-engine — Rule Evaluation
//!
//! Turns rule specifications into decisions:
//!
//! - [`ResolutionContext`] — answers `$reference` lookups from claims,
//!   scopes, definitions, parameters, outputs, tables, and other services,
//!   recording a [`PathNode`] trace as it goes.
//! - [`RuleEvaluator`] — checks requirements and executes actions for one
//!   rule version.
//! - [`Services`] — the registry of per-service evaluator caches and
//!   tables, and the [`ServiceProvider`] used for cross-law inputs.
//!
//! ## Design
//!
//! Evaluation is synchronous and CPU-bound. Callers on an async runtime
//! run it on a blocking thread. The context only sees the
//! [`ServiceProvider`] and [`ClaimLookup`] capabilities, never the
//! registry or claim store behind them.

pub mod context;
pub mod dependency;
pub mod error;
pub mod evaluator;
mod operations;
pub mod provider;
pub mod registry;
pub mod trace;

pub use context::{ResolutionContext, SourceTables};
pub use dependency::required_actions;
pub use error::EngineError;
pub use evaluator::{RuleEvaluator, SUBJECT_PARAMETER};
pub use provider::{ClaimLookup, EvaluationRequest, OverwriteInput, RuleResult, ServiceProvider};
pub use registry::{RuleService, Services};
pub use trace::{extract_value_tree, render, NodeKind, PathNode, ResolveSource, ValueTreeEntry};
