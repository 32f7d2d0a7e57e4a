//! # Claim Lifecycle Manager
//!
//! In-memory claim store indexed by service, case, claimant, subject, and
//! (subject, service, law, key). Claims are created independently of cases;
//! linking a claim to a case is recorded here, and the case side is kept in
//! step by [`Machine`](crate::Machine).
//!
//! The manager is also the engine's [`ClaimLookup`]: during evaluation a
//! subject's claimed values take precedence over every other source.

use std::collections::{BTreeMap, HashMap};

use lac_core::{CaseId, ClaimId, Record, Value};
use lac_engine::ClaimLookup;
use parking_lot::RwLock;

use crate::claim::{Claim, ClaimStatus, ClaimSubmission};
use crate::error::CaseError;

/// Which claims a query returns.
///
/// `approved_only` admits only approved claims. Otherwise approved and
/// pending claims are admitted, plus rejected ones with `include_rejected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    /// Only approved claims.
    pub approved_only: bool,
    /// Also rejected claims. Ignored with `approved_only`.
    pub include_rejected: bool,
}

impl ClaimFilter {
    /// Approved claims only.
    pub fn approved() -> Self {
        Self {
            approved_only: true,
            include_rejected: false,
        }
    }

    /// Every claim regardless of status.
    pub fn all() -> Self {
        Self {
            approved_only: false,
            include_rejected: true,
        }
    }

    /// True if a claim in `status` passes.
    pub fn admits(&self, status: ClaimStatus) -> bool {
        match status {
            ClaimStatus::Approved => true,
            ClaimStatus::Pending => !self.approved_only,
            ClaimStatus::Rejected => !self.approved_only && self.include_rejected,
        }
    }
}

type SubjectLaw = (String, String, String);

#[derive(Debug, Default)]
struct ClaimStore {
    claims: HashMap<ClaimId, Claim>,
    by_service: HashMap<String, Vec<ClaimId>>,
    by_case: HashMap<CaseId, Vec<ClaimId>>,
    by_claimant: HashMap<String, Vec<ClaimId>>,
    by_bsn: HashMap<String, Vec<ClaimId>>,
    by_subject_law: HashMap<SubjectLaw, BTreeMap<String, ClaimId>>,
}

impl ClaimStore {
    fn index(&mut self, claim: &Claim) {
        push_unique(self.by_service.entry(claim.service.clone()).or_default(), claim.id);
        push_unique(self.by_claimant.entry(claim.claimant.clone()).or_default(), claim.id);
        push_unique(self.by_bsn.entry(claim.bsn.clone()).or_default(), claim.id);
        if let Some(case_id) = claim.case_id {
            push_unique(self.by_case.entry(case_id).or_default(), claim.id);
        }
        self.by_subject_law
            .entry((claim.bsn.clone(), claim.service.clone(), claim.law.clone()))
            .or_default()
            .insert(claim.key.clone(), claim.id);
    }

    fn get_mut(&mut self, claim_id: ClaimId) -> Result<&mut Claim, CaseError> {
        self.claims.get_mut(&claim_id).ok_or(CaseError::ClaimNotFound { claim_id })
    }

    fn select(&self, ids: Option<&Vec<ClaimId>>, filter: ClaimFilter) -> Vec<Claim> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.claims.get(id))
            .filter(|c| filter.admits(c.status))
            .cloned()
            .collect()
    }
}

fn push_unique(ids: &mut Vec<ClaimId>, id: ClaimId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Manages the lifecycle of claims.
#[derive(Default)]
pub struct ClaimManager {
    state: RwLock<ClaimStore>,
}

impl ClaimManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// File a claim. A claim for the same subject, service, law, and key is
    /// reset to the new submission instead of duplicated.
    pub fn submit_claim(&self, submission: ClaimSubmission) -> Claim {
        let mut state = self.state.write();
        let subject_law = (submission.bsn.clone(), submission.service.clone(), submission.law.clone());
        let existing = state
            .by_subject_law
            .get(&subject_law)
            .and_then(|keys| keys.get(&submission.key))
            .copied();

        let mut claim = match existing.and_then(|id| state.claims.get(&id)).cloned() {
            Some(mut claim) => {
                claim.reset(&submission);
                claim
            }
            None => Claim::new(&submission),
        };
        if submission.auto_approve {
            claim.approve(&submission.claimant, submission.new_value.clone());
        }
        state.index(&claim);
        state.claims.insert(claim.id, claim.clone());

        tracing::info!(
            claim_id = %claim.id,
            service = %claim.service,
            law = %claim.law,
            key = %claim.key,
            status = %claim.status,
            reset = existing.is_some(),
            "claim submitted"
        );
        claim
    }

    /// Approve a claim with the value the verifier accepted.
    pub fn approve_claim(&self, claim_id: ClaimId, verified_by: &str, verified_value: Value) -> Result<Claim, CaseError> {
        let mut state = self.state.write();
        let claim = state.get_mut(claim_id)?;
        claim.approve(verified_by, verified_value);
        tracing::info!(%claim_id, verified_by = %verified_by, "claim approved");
        Ok(claim.clone())
    }

    /// Reject a claim.
    pub fn reject_claim(&self, claim_id: ClaimId, rejected_by: &str, reason: &str) -> Result<Claim, CaseError> {
        let mut state = self.state.write();
        let claim = state.get_mut(claim_id)?;
        claim.reject(rejected_by, reason);
        tracing::info!(%claim_id, rejected_by = %rejected_by, "claim rejected");
        Ok(claim.clone())
    }

    /// Link a claim to a case. Fails if it is already linked.
    pub fn link_case(&self, claim_id: ClaimId, case_id: CaseId) -> Result<Claim, CaseError> {
        let mut state = self.state.write();
        let claim = state.get_mut(claim_id)?;
        claim.link_case(case_id)?;
        let snapshot = claim.clone();
        push_unique(state.by_case.entry(case_id).or_default(), claim_id);
        Ok(snapshot)
    }

    /// Attach evidence to a pending claim.
    pub fn add_evidence(&self, claim_id: ClaimId, evidence_path: &str) -> Result<Claim, CaseError> {
        let mut state = self.state.write();
        let claim = state.get_mut(claim_id)?;
        claim.add_evidence(evidence_path)?;
        Ok(claim.clone())
    }

    /// The claim with identifier `claim_id`.
    pub fn get_claim(&self, claim_id: ClaimId) -> Result<Claim, CaseError> {
        self.state
            .read()
            .claims
            .get(&claim_id)
            .cloned()
            .ok_or(CaseError::ClaimNotFound { claim_id })
    }

    /// Claims against `service`.
    pub fn get_claims_by_service(&self, service: &str, filter: ClaimFilter) -> Vec<Claim> {
        let state = self.state.read();
        state.select(state.by_service.get(service), filter)
    }

    /// Claims linked to `case_id`.
    pub fn get_claims_by_case(&self, case_id: CaseId, filter: ClaimFilter) -> Vec<Claim> {
        let state = self.state.read();
        state.select(state.by_case.get(&case_id), filter)
    }

    /// Claims made by `claimant`.
    pub fn get_claims_by_claimant(&self, claimant: &str, filter: ClaimFilter) -> Vec<Claim> {
        let state = self.state.read();
        state.select(state.by_claimant.get(claimant), filter)
    }

    /// Claims about subject `bsn`.
    pub fn get_claims_by_bsn(&self, bsn: &str, filter: ClaimFilter) -> Vec<Claim> {
        let state = self.state.read();
        state.select(state.by_bsn.get(bsn), filter)
    }

    /// Claims about `bsn` under (`service`, `law`), by key.
    pub fn claims_for(&self, bsn: &str, service: &str, law: &str, filter: ClaimFilter) -> BTreeMap<String, Claim> {
        let state = self.state.read();
        let key = (bsn.to_string(), service.to_string(), law.to_string());
        state
            .by_subject_law
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|(k, id)| state.claims.get(id).map(|c| (k.clone(), c)))
            .filter(|(_, c)| filter.admits(c.status))
            .map(|(k, c)| (k, c.clone()))
            .collect()
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.state.read().claims.len()
    }

    /// True if no claim was ever filed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClaimLookup for ClaimManager {
    /// Every claimed value about `bsn`, with claims filed under `service`
    /// and `law` winning over claims filed elsewhere.
    fn claim_values(&self, bsn: &str, service: &str, law: &str, approved_only: bool) -> Record {
        let filter = ClaimFilter {
            approved_only,
            include_rejected: false,
        };
        let mut values: Record = self
            .get_claims_by_bsn(bsn, filter)
            .into_iter()
            .map(|c| (c.key.clone(), c.effective_value().clone()))
            .collect();
        for (key, claim) in self.claims_for(bsn, service, law, filter) {
            values.insert(key, claim.effective_value().clone());
        }
        values
    }
}

impl std::fmt::Debug for ClaimManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimManager")
            .field("claims_count", &self.state.read().claims.len())
            .finish()
    }
}
