//! # Case Error Types
//!
//! State machine rejections carry the current status, the attempted target,
//! and a reason. Lookups that miss carry the identifier that was asked for.
//! Evaluation and specification failures are wrapped unchanged so callers
//! can still match on the engine's own variants.

use lac_core::{CaseId, ClaimId, ValueError};
use lac_engine::EngineError;
use lac_rules::SpecError;
use thiserror::Error;

use crate::case::CaseStatus;
use crate::claim::ClaimStatus;

/// Errors from the case and claim lifecycle.
#[derive(Error, Debug)]
pub enum CaseError {
    /// The case's status does not permit the requested transition. The case
    /// is left unmodified.
    #[error("invalid transition of case {case_id} from {from} to {to}: {reason}")]
    InvalidTransition {
        /// The case that was asked to transition.
        case_id: CaseId,
        /// Status at the time of the request.
        from: CaseStatus,
        /// Status the request would have produced.
        to: CaseStatus,
        /// Why the transition is not allowed.
        reason: String,
    },

    /// No case with this identifier exists.
    #[error("case {case_id} not found")]
    CaseNotFound {
        /// The identifier that was looked up.
        case_id: CaseId,
    },

    /// No claim with this identifier exists.
    #[error("claim {claim_id} not found")]
    ClaimNotFound {
        /// The identifier that was looked up.
        claim_id: ClaimId,
    },

    /// The claim is already linked to a case.
    #[error("claim {claim_id} is already linked to case {case_id}")]
    ClaimAlreadyLinked {
        /// The claim that was asked to link.
        claim_id: ClaimId,
        /// The case it is linked to.
        case_id: CaseId,
    },

    /// Evidence can only be added while a claim is pending.
    #[error("claim {claim_id} is {status}, expected PENDING")]
    ClaimNotPending {
        /// The claim that was asked to change.
        claim_id: ClaimId,
        /// Its current status.
        status: ClaimStatus,
    },

    /// A status string did not name a known status.
    #[error("unknown {kind} status: {value:?}")]
    UnknownStatus {
        /// `case` or `claim`.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Rule trigger dispatch requires a Tokio runtime.
    #[error("no Tokio runtime available to run the rule trigger")]
    NoRuntime,

    /// Rule evaluation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A rule specification is malformed.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// A value could not be converted.
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Invalid environment configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}
