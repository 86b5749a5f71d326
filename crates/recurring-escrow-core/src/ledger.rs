//! Agreement ledger - per-agreement records tracked by the manager
//!
//! Each record caches the worst-case next claim of an agreement (and of its
//! pending update, if any). The cache is only an upper bound: the collector
//! stays authoritative and the manager refreshes records on demand.
//!
//! # Invariants
//!
//! 1. An agreement id is tracked at most once
//! 2. Every authorized hash points at a tracked agreement
//! 3. The per-provider index holds exactly the tracked ids of that provider

use std::collections::{BTreeSet, HashMap};

use recurring_escrow_types::{
    Address, AgreementId, EscrowError, Result, TermsHash, Timestamp, Tokens,
};
use serde::{Deserialize, Serialize};

/// An update offered for an agreement but not yet accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub nonce: u32,
    pub max_next_claim: Tokens,
    pub update_hash: TermsHash,
    /// Acceptance deadline of the update
    pub deadline: Timestamp,
}

/// Everything the manager remembers about one agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAgreement {
    pub agreement_id: AgreementId,
    pub provider: Address,
    pub data_service: Address,
    /// Acceptance deadline of the original offer
    pub deadline: Timestamp,
    /// Snapshot taken when the offer was made
    pub offered_max_claim: Tokens,
    /// Last known worst-case next claim
    pub max_next_claim: Tokens,
    pub terms_hash: TermsHash,
    pub pending_update: Option<PendingUpdate>,
}

impl TrackedAgreement {
    pub fn pending_max_next_claim(&self) -> Tokens {
        self.pending_update
            .as_ref()
            .map(|p| p.max_next_claim)
            .unwrap_or(Tokens::ZERO)
    }

    /// Amount this agreement contributes to its provider's required escrow
    pub fn tracked_total(&self) -> Result<Tokens> {
        self.max_next_claim.checked_add(self.pending_max_next_claim())
    }
}

/// The agreement ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgreementLedger {
    agreements: HashMap<AgreementId, TrackedAgreement>,
    by_provider: HashMap<Address, BTreeSet<AgreementId>>,
    authorized: HashMap<TermsHash, AgreementId>,
}

impl AgreementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an agreement and authorize its terms hash
    pub fn insert(&mut self, record: TrackedAgreement) -> Result<()> {
        if self.agreements.contains_key(&record.agreement_id) {
            return Err(EscrowError::AgreementAlreadyOffered {
                agreement_id: record.agreement_id,
            });
        }

        self.authorized.insert(record.terms_hash, record.agreement_id);
        self.by_provider
            .entry(record.provider)
            .or_default()
            .insert(record.agreement_id);
        self.agreements.insert(record.agreement_id, record);
        Ok(())
    }

    pub fn contains(&self, agreement_id: &AgreementId) -> bool {
        self.agreements.contains_key(agreement_id)
    }

    pub fn get(&self, agreement_id: &AgreementId) -> Option<&TrackedAgreement> {
        self.agreements.get(agreement_id)
    }

    /// Cached next-claim snapshot; zero for untracked agreements
    pub fn max_next_claim(&self, agreement_id: &AgreementId) -> Tokens {
        self.agreements
            .get(agreement_id)
            .map(|a| a.max_next_claim)
            .unwrap_or(Tokens::ZERO)
    }

    /// Replace the snapshot, returning the previous value
    pub fn set_max_next_claim(&mut self, agreement_id: &AgreementId, amount: Tokens) -> Result<Tokens> {
        let record = self.get_mut(agreement_id)?;
        Ok(std::mem::replace(&mut record.max_next_claim, amount))
    }

    /// Record a pending update, superseding (and de-authorizing) any previous one
    pub fn set_pending_update(
        &mut self,
        agreement_id: &AgreementId,
        pending: PendingUpdate,
    ) -> Result<Option<PendingUpdate>> {
        let record = self.get_mut(agreement_id)?;
        let new_hash = pending.update_hash;
        let previous = record.pending_update.replace(pending);
        if let Some(old) = &previous {
            self.authorized.remove(&old.update_hash);
        }
        self.authorized.insert(new_hash, *agreement_id);
        Ok(previous)
    }

    /// Drop the pending update, if any, and its authorization
    pub fn clear_pending_update(&mut self, agreement_id: &AgreementId) -> Result<Option<PendingUpdate>> {
        let previous = self.get_mut(agreement_id)?.pending_update.take();
        if let Some(old) = &previous {
            self.authorized.remove(&old.update_hash);
        }
        Ok(previous)
    }

    /// Forget an agreement entirely.
    ///
    /// The caller must already have subtracted its tracked total from the
    /// required-escrow aggregate.
    pub fn remove(&mut self, agreement_id: &AgreementId) -> Result<TrackedAgreement> {
        let record = self
            .agreements
            .remove(agreement_id)
            .ok_or(EscrowError::AgreementNotOffered {
                agreement_id: *agreement_id,
            })?;

        self.authorized.remove(&record.terms_hash);
        if let Some(pending) = &record.pending_update {
            self.authorized.remove(&pending.update_hash);
        }
        if let Some(ids) = self.by_provider.get_mut(&record.provider) {
            ids.remove(agreement_id);
            if ids.is_empty() {
                self.by_provider.remove(&record.provider);
            }
        }
        Ok(record)
    }

    pub fn agreement_count(&self, provider: &Address) -> usize {
        self.by_provider.get(provider).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Tracked agreement ids of a provider, in ascending order
    pub fn agreement_ids(&self, provider: &Address) -> Vec<AgreementId> {
        self.by_provider
            .get(provider)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Agreement a hash was authorized for, if it still is
    pub fn authorized_agreement(&self, hash: &TermsHash) -> Option<AgreementId> {
        self.authorized.get(hash).copied()
    }

    /// Every provider with at least one tracked agreement
    pub fn providers(&self) -> impl Iterator<Item = &Address> {
        self.by_provider.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedAgreement> {
        self.agreements.values()
    }

    fn get_mut(&mut self, agreement_id: &AgreementId) -> Result<&mut TrackedAgreement> {
        self.agreements
            .get_mut(agreement_id)
            .ok_or(EscrowError::AgreementNotOffered {
                agreement_id: *agreement_id,
            })
    }
}
