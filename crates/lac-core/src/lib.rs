#![deny(missing_docs)]

//! # lac-core — Foundational Types for the Law-as-Code Engine
//!
//! This crate defines the types that every other crate in the workspace
//! depends on. It has no internal crate dependencies, only `serde`,
//! `serde_json`, `thiserror`, `chrono`, and `uuid` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **One closed value type.** Every piece of rule data (parameters, claims,
//!    definitions, outputs, tabular cells) is a [`Value`]. There is no
//!    reflective field access: records are navigated with [`Value::get`] and
//!    [`Value::get_path`].
//!
//! 2. **Newtype wrappers for identifiers.** You cannot pass a [`ClaimId`]
//!    where a [`CaseId`] is expected.
//!
//! 3. **Calculation dates are calendar dates.** [`CalculationDate`] wraps a
//!    `chrono::NaiveDate` and derives the pseudo-paths rules may reference
//!    (`january_first`, `prev_january_first`, `year`).
//!
//! 4. **Structured errors with `thiserror`.** No `Box<dyn Error>`, no
//!    `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;
pub mod value;

// Re-export primary types at crate root for ergonomic imports.
pub use error::ValueError;
pub use identity::{CaseId, ClaimId};
pub use temporal::{CalculationDate, Timestamp};
pub use value::{Record, Value};
