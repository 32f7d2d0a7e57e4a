#![deny(missing_docs)]

//! # lac-case — Case and Claim Lifecycle
//!
//! Administrative handling on top of the rule engine:
//!
//! - [`CaseManager`] — submissions, automatic and manual decisions,
//!   objections, and the append-only event log.
//! - [`ClaimManager`] — citizen claims about individual input values, and
//!   the [`ClaimLookup`](lac_engine::ClaimLookup) that feeds them into
//!   evaluation.
//! - [`RuleTrigger`] — reacts to recorded events by evaluating the laws
//!   whose `applies` clauses match and writing their outputs back to the
//!   case.
//! - [`Machine`] — wires the above together over one rule catalog.
//!
//! ## Design
//!
//! Case mutations are synchronous and serialized per manager. Recorded
//! events go onto an unbounded queue drained by the trigger dispatcher on
//! the Tokio runtime; events of one case are always handled in recording
//! order, events of different cases may run in parallel.

pub mod case;
pub mod case_manager;
pub mod claim;
pub mod claim_manager;
pub mod comparison;
pub mod config;
pub mod error;
pub mod event;
pub mod machine;
pub mod telemetry;
pub mod trigger;

pub use case::{AppealStatus, Case, CaseStatus, ObjectionStatus, Submission, SYSTEM_VERIFIER};
pub use case_manager::{CaseManager, Sampler, DEFAULT_SAMPLE_RATE};
pub use claim::{Claim, ClaimStatus, ClaimSubmission};
pub use claim_manager::{ClaimFilter, ClaimManager};
pub use comparison::{results_match, RELATIVE_TOLERANCE};
pub use config::{LogConfig, LogFormat, MachineConfig, DEFAULT_TRIGGER_WORKERS};
pub use error::{CaseError, ConfigError};
pub use event::{CaseEventType, Event};
pub use machine::Machine;
pub use telemetry::init_tracing;
pub use trigger::{spawn_dispatcher, RuleTrigger, TriggerStats};
