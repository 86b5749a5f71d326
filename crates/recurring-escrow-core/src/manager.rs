//! Agreement manager - lifecycle controller
//!
//! The manager offers agreements on behalf of its payer, reserves escrow for
//! the worst-case next claim of each, and hands excess escrow back through
//! the thaw/withdraw cycle once agreements stop being claimable.
//!
//! # Transactions
//!
//! Every operation runs in the same order:
//!
//! 1. Check the caller and validate inputs
//! 2. Compute new snapshots and the new required total (checked)
//! 3. Reconcile escrow against the new total
//! 4. Commit ledger, aggregator and authorizations
//! 5. Record events
//!
//! Nothing is committed before step 4, so an error leaves the manager as it
//! was. The collector stays the authority on agreement state; the ledger only
//! caches upper bounds.

use std::collections::BTreeMap;

use recurring_escrow_types::{
    Address, AgreementId, AgreementState, AgreementStatus, AgreementTerms, AgreementUpdate,
    Authorization, EscrowAccount, EscrowError, ManagerEvent, Result, TermsHash, Timestamp, Tokens,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::access::AccessControl;
use crate::aggregator::RequiredEscrowAggregator;
use crate::claim;
use crate::collaborators::{AgreementApprover, Clock, EscrowLedger, RecurringCollectionAuthority};
use crate::config::ManagerConfig;
use crate::ledger::{AgreementLedger, PendingUpdate, TrackedAgreement};
use crate::reconciler::{EscrowReconciler, ReconcileReport};

/// Serializable view of everything the manager tracks
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub payer: Address,
    pub collector: Address,
    pub agreements: Vec<TrackedAgreement>,
    pub required_escrow: BTreeMap<Address, Tokens>,
}

/// Agreement manager
pub struct AgreementManager<C, E, K> {
    config: ManagerConfig,
    access: AccessControl,
    collector: C,
    reconciler: EscrowReconciler<E>,
    clock: K,
    ledger: AgreementLedger,
    totals: RequiredEscrowAggregator,
    events: Vec<ManagerEvent>,
}

impl<C, E, K> AgreementManager<C, E, K>
where
    C: RecurringCollectionAuthority,
    E: EscrowLedger,
    K: Clock,
{
    /// Create a manager for the configured payer and collector
    pub fn new(config: ManagerConfig, collector: C, escrow: E, clock: K) -> Result<Self> {
        config.validate()?;

        let access = AccessControl::new(config.governor, config.operators.iter().copied());
        let reconciler = EscrowReconciler::new(escrow, config.payer, config.collector);

        info!(
            payer = %config.payer,
            collector = %config.collector,
            operators = config.operators.len(),
            "Agreement manager created"
        );

        Ok(Self {
            config,
            access,
            collector,
            reconciler,
            clock,
            ledger: AgreementLedger::new(),
            totals: RequiredEscrowAggregator::new(),
            events: Vec::new(),
        })
    }

    // ========================================================================
    // Offers
    // ========================================================================

    /// Offer an agreement to a provider and reserve escrow for it
    pub fn offer_agreement(&mut self, caller: &Address, terms: AgreementTerms) -> Result<AgreementId> {
        self.access.require_operator(caller)?;
        let now = self.clock.now();
        self.validate_terms(&terms, now)?;

        let agreement_id = self.collector.generate_agreement_id(
            &terms.payer,
            &terms.data_service,
            &terms.service_provider,
            terms.deadline,
            terms.nonce,
        );
        if self.ledger.contains(&agreement_id) {
            return Err(EscrowError::AgreementAlreadyOffered { agreement_id });
        }

        let provider = terms.service_provider;
        let max_next_claim = claim::max_claim_for_terms(&terms)?;
        let required = self.totals.apply(&provider, max_next_claim, Tokens::ZERO)?;
        let terms_hash = self.collector.hash_terms(&terms);

        let report = self.reconciler.reconcile(&provider, required, now)?;

        self.ledger.insert(TrackedAgreement {
            agreement_id,
            provider,
            data_service: terms.data_service,
            deadline: terms.deadline,
            offered_max_claim: max_next_claim,
            max_next_claim,
            terms_hash,
            pending_update: None,
        })?;
        self.totals.add(&provider, max_next_claim)?;

        info!(
            agreement_id = %agreement_id,
            provider = %provider,
            max_next_claim = %max_next_claim,
            required_escrow = %required,
            "Agreement offered"
        );

        self.events.push(ManagerEvent::AgreementOffered {
            agreement_id,
            provider,
            terms_hash,
            max_next_claim,
        });
        self.events.extend(report.events());
        Ok(agreement_id)
    }

    /// Offer new terms for a tracked agreement.
    ///
    /// Until the collector reports the update as accepted, both the current
    /// and the proposed terms are reserved.
    pub fn offer_agreement_update(&mut self, caller: &Address, update: AgreementUpdate) -> Result<TermsHash> {
        self.access.require_operator(caller)?;
        let now = self.clock.now();
        let agreement_id = update.agreement_id;
        let record = self.tracked(&agreement_id)?.clone();

        let status = self.collector.agreement_status(&agreement_id)?;
        if status.state.is_canceled() {
            return Err(EscrowError::AgreementCanceled { agreement_id });
        }
        let current = record
            .pending_update
            .as_ref()
            .map(|p| p.nonce.max(status.update_nonce))
            .unwrap_or(status.update_nonce);
        if update.nonce <= current {
            return Err(EscrowError::StaleUpdateNonce {
                agreement_id,
                nonce: update.nonce,
                current,
            });
        }
        validate_window(
            update.deadline,
            update.ends_at,
            update.min_seconds_per_collection,
            update.max_seconds_per_collection,
            now,
        )?;

        let pending_max_next_claim = claim::max_claim_for_update(&update)?;

        // A settled pending update is folded into a fresh snapshot in the same
        // transaction that replaces it.
        let folded = match &record.pending_update {
            Some(pending) if pending_settled(pending, &status, now) => Some(self.fetch_claim(&record, now)?.0),
            _ => None,
        };

        let provider = record.provider;
        let max_next_claim = folded.unwrap_or(record.max_next_claim);
        let old_total = record.tracked_total()?;
        let new_total = max_next_claim.checked_add(pending_max_next_claim)?;
        let required = self.totals.apply(&provider, new_total, old_total)?;
        let update_hash = self.collector.hash_update(&update);

        let report = self.reconciler.reconcile(&provider, required, now)?;

        if max_next_claim != record.max_next_claim {
            self.ledger.set_max_next_claim(&agreement_id, max_next_claim)?;
        }
        let previous = self.ledger.set_pending_update(
            &agreement_id,
            PendingUpdate {
                nonce: update.nonce,
                max_next_claim: pending_max_next_claim,
                update_hash,
                deadline: update.deadline,
            },
        )?;
        self.totals.adjust(&provider, new_total, old_total)?;

        if let Some(previous) = previous {
            debug!(
                agreement_id = %agreement_id,
                superseded_nonce = previous.nonce,
                settled = folded.is_some(),
                "Pending update superseded"
            );
        }
        if folded.is_some() {
            self.events.push(ManagerEvent::AgreementReconciled {
                agreement_id,
                provider,
                old_max_next_claim: record.max_next_claim,
                new_max_next_claim: max_next_claim,
                pending_cleared: true,
            });
        }
        info!(
            agreement_id = %agreement_id,
            provider = %provider,
            nonce = update.nonce,
            pending_max_next_claim = %pending_max_next_claim,
            required_escrow = %required,
            "Agreement update offered"
        );

        self.events.push(ManagerEvent::AgreementUpdateOffered {
            agreement_id,
            provider,
            update_hash,
            nonce: update.nonce,
            pending_max_next_claim,
        });
        self.events.extend(report.events());
        Ok(update_hash)
    }

    /// Drop a pending update that the provider has not accepted.
    ///
    /// Returns `false` when there was nothing pending.
    pub fn revoke_agreement_update(&mut self, caller: &Address, agreement_id: &AgreementId) -> Result<bool> {
        self.access.require_operator(caller)?;
        let record = self.tracked(agreement_id)?.clone();
        let Some(pending) = record.pending_update else {
            return Ok(false);
        };

        let status = self.collector.agreement_status(agreement_id)?;
        if status.update_nonce >= pending.nonce {
            return Err(EscrowError::AgreementAlreadyAccepted {
                agreement_id: *agreement_id,
            });
        }

        let now = self.clock.now();
        let provider = record.provider;
        let required = self.totals.apply(&provider, Tokens::ZERO, pending.max_next_claim)?;
        let report = self.reconciler.reconcile(&provider, required, now)?;

        self.ledger.clear_pending_update(agreement_id)?;
        self.totals.subtract(&provider, pending.max_next_claim)?;

        info!(
            agreement_id = %agreement_id,
            provider = %provider,
            nonce = pending.nonce,
            "Agreement update revoked"
        );

        self.events.push(ManagerEvent::AgreementUpdateRevoked {
            agreement_id: *agreement_id,
            provider,
            nonce: pending.nonce,
        });
        self.events.extend(report.events());
        Ok(true)
    }

    /// Withdraw an offer the provider has not accepted
    pub fn revoke_offer(&mut self, caller: &Address, agreement_id: &AgreementId) -> Result<()> {
        self.access.require_operator(caller)?;
        let record = self.tracked(agreement_id)?.clone();

        let status = self.collector.agreement_status(agreement_id)?;
        if status.state.is_accepted_or_later() {
            return Err(EscrowError::AgreementAlreadyAccepted {
                agreement_id: *agreement_id,
            });
        }

        let provider = record.provider;
        let (released, report) = self.release(&record)?;

        info!(
            agreement_id = %agreement_id,
            provider = %provider,
            released = %released,
            "Offer revoked"
        );

        self.events.push(ManagerEvent::OfferRevoked {
            agreement_id: *agreement_id,
            provider,
        });
        self.events.extend(report.events());
        Ok(())
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Refresh one agreement from the collector and rebalance its provider's escrow.
    ///
    /// Untracked agreements are ignored and reported as `false`.
    pub fn reconcile_agreement(&mut self, agreement_id: &AgreementId) -> Result<bool> {
        let Some(record) = self.ledger.get(agreement_id).cloned() else {
            debug!(agreement_id = %agreement_id, "Reconcile of untracked agreement ignored");
            return Ok(false);
        };

        let now = self.clock.now();
        let (fresh, status) = self.fetch_claim(&record, now)?;
        let clear_pending = record
            .pending_update
            .as_ref()
            .map(|pending| pending_settled(pending, &status, now))
            .unwrap_or(false);

        let provider = record.provider;
        let old_total = record.tracked_total()?;
        let kept_pending = if clear_pending {
            Tokens::ZERO
        } else {
            record.pending_max_next_claim()
        };
        let new_total = fresh.checked_add(kept_pending)?;
        let required = self.totals.apply(&provider, new_total, old_total)?;

        let report = self.reconciler.reconcile(&provider, required, now)?;

        if fresh != record.max_next_claim {
            self.ledger.set_max_next_claim(agreement_id, fresh)?;
        }
        if clear_pending {
            self.ledger.clear_pending_update(agreement_id)?;
        }
        self.totals.adjust(&provider, new_total, old_total)?;

        if fresh != record.max_next_claim || clear_pending {
            info!(
                agreement_id = %agreement_id,
                provider = %provider,
                state = ?status.state,
                old_max_next_claim = %record.max_next_claim,
                new_max_next_claim = %fresh,
                pending_cleared = clear_pending,
                "Agreement reconciled"
            );
            self.events.push(ManagerEvent::AgreementReconciled {
                agreement_id: *agreement_id,
                provider,
                old_max_next_claim: record.max_next_claim,
                new_max_next_claim: fresh,
                pending_cleared: clear_pending,
            });
        }
        self.events.extend(report.events());
        Ok(true)
    }

    /// Reconcile every tracked agreement of a provider, then its escrow.
    ///
    /// Returns the number of agreements visited.
    pub fn reconcile_provider(&mut self, provider: &Address) -> Result<usize> {
        let ids = self.ledger.agreement_ids(provider);
        for agreement_id in &ids {
            self.reconcile_agreement(agreement_id)?;
        }
        self.flush_reconcile(provider)?;
        Ok(ids.len())
    }

    /// Stop tracking an agreement that can no longer be claimed against
    pub fn remove_agreement(&mut self, agreement_id: &AgreementId) -> Result<()> {
        let record = self.tracked(agreement_id)?.clone();
        let now = self.clock.now();

        let (claimable, status) = self.fetch_claim(&record, now)?;
        if !claimable.is_zero() {
            return Err(EscrowError::AgreementStillClaimable {
                agreement_id: *agreement_id,
                claimable,
            });
        }

        let provider = record.provider;
        let (released, report) = self.release(&record)?;

        info!(
            agreement_id = %agreement_id,
            provider = %provider,
            state = ?status.state,
            released = %released,
            "Agreement removed"
        );

        self.events.push(ManagerEvent::AgreementRemoved {
            agreement_id: *agreement_id,
            provider,
        });
        self.events.extend(report.events());
        Ok(())
    }

    /// Rebalance the escrow of a provider with no tracked agreements
    pub fn maintain(&mut self, provider: &Address) -> Result<ReconcileReport> {
        let count = self.ledger.agreement_count(provider);
        if count > 0 {
            return Err(EscrowError::StillHasAgreements {
                provider: *provider,
                count,
            });
        }

        let now = self.clock.now();
        let required = self.totals.required_escrow(provider);
        let report = self.reconciler.reconcile(provider, required, now)?;
        self.events.extend(report.events());
        Ok(report)
    }

    // ========================================================================
    // Authorization oracle
    // ========================================================================

    /// Tell a collector whether `hash` is an offer or update this manager stands behind
    pub fn approve_agreement(&self, hash: &TermsHash) -> Authorization {
        match self.ledger.authorized_agreement(hash) {
            Some(agreement_id) => Authorization::Approved(agreement_id),
            None => Authorization::Unauthorized,
        }
    }

    pub fn is_authorized_agreement(&self, hash: &TermsHash) -> bool {
        self.approve_agreement(hash).is_approved()
    }

    // ========================================================================
    // Access control
    // ========================================================================

    pub fn grant_operator(&mut self, caller: &Address, account: Address) -> Result<bool> {
        let granted = self.access.grant_operator(caller, account)?;
        if granted {
            info!(account = %account, "Operator granted");
            self.events.push(ManagerEvent::OperatorGranted { account });
        }
        Ok(granted)
    }

    pub fn revoke_operator(&mut self, caller: &Address, account: &Address) -> Result<bool> {
        let revoked = self.access.revoke_operator(caller, account)?;
        if revoked {
            info!(account = %account, "Operator revoked");
            self.events.push(ManagerEvent::OperatorRevoked { account: *account });
        }
        Ok(revoked)
    }

    pub fn is_operator(&self, account: &Address) -> bool {
        self.access.is_operator(account)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn required_escrow(&self, provider: &Address) -> Tokens {
        self.totals.required_escrow(provider)
    }

    pub fn provider_agreement_count(&self, provider: &Address) -> usize {
        self.ledger.agreement_count(provider)
    }

    pub fn agreement(&self, agreement_id: &AgreementId) -> Option<&TrackedAgreement> {
        self.ledger.get(agreement_id)
    }

    /// Cached worst-case next claim; zero for untracked agreements
    pub fn agreement_max_next_claim(&self, agreement_id: &AgreementId) -> Tokens {
        self.ledger.max_next_claim(agreement_id)
    }

    pub fn agreement_ids(&self, provider: &Address) -> Vec<AgreementId> {
        self.ledger.agreement_ids(provider)
    }

    pub fn escrow_account(&self, provider: &Address) -> Result<EscrowAccount> {
        self.reconciler.account(provider)
    }

    /// Recompute a provider's required escrow from the ledger
    pub fn audit_required_escrow(&self, provider: &Address) -> Result<Tokens> {
        let totals = self
            .ledger
            .iter()
            .filter(|a| &a.provider == provider)
            .map(TrackedAgreement::tracked_total)
            .collect::<Result<Vec<_>>>()?;
        Tokens::checked_sum(totals)
    }

    pub fn events(&self) -> &[ManagerEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<ManagerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let mut agreements: Vec<TrackedAgreement> = self.ledger.iter().cloned().collect();
        agreements.sort_by(|a, b| {
            a.provider
                .cmp(&b.provider)
                .then(a.agreement_id.cmp(&b.agreement_id))
        });

        ManagerSnapshot {
            payer: self.config.payer,
            collector: self.config.collector,
            agreements,
            required_escrow: self
                .totals
                .providers()
                .map(|(provider, total)| (*provider, *total))
                .collect(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }

    pub fn escrow(&self) -> &E {
        self.reconciler.escrow()
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn tracked(&self, agreement_id: &AgreementId) -> Result<&TrackedAgreement> {
        self.ledger
            .get(agreement_id)
            .ok_or(EscrowError::AgreementNotOffered {
                agreement_id: *agreement_id,
            })
    }

    fn validate_terms(&self, terms: &AgreementTerms, now: Timestamp) -> Result<()> {
        if terms.payer != self.config.payer {
            return Err(EscrowError::PayerMismatch {
                expected: self.config.payer,
                actual: terms.payer,
            });
        }
        if terms.service_provider.is_zero() {
            return Err(EscrowError::invalid_terms("service_provider", "must not be the zero address"));
        }
        if terms.data_service.is_zero() {
            return Err(EscrowError::invalid_terms("data_service", "must not be the zero address"));
        }
        validate_window(
            terms.deadline,
            terms.ends_at,
            terms.min_seconds_per_collection,
            terms.max_seconds_per_collection,
            now,
        )
    }

    /// Worst-case next claim as the collector sees it right now.
    ///
    /// The collector knows nothing about offers that were never accepted, so
    /// the offered snapshot stands in until the offer deadline passes.
    fn fetch_claim(&self, record: &TrackedAgreement, now: Timestamp) -> Result<(Tokens, AgreementStatus)> {
        let status = self.collector.agreement_status(&record.agreement_id)?;
        let claim = match status.state {
            AgreementState::NotAccepted if now <= record.deadline => record.offered_max_claim,
            AgreementState::NotAccepted => Tokens::ZERO,
            _ => self.collector.max_next_claim(&record.agreement_id)?,
        };
        Ok((claim, status))
    }

    /// Untrack an agreement and release everything it reserved
    fn release(&mut self, record: &TrackedAgreement) -> Result<(Tokens, ReconcileReport)> {
        let now = self.clock.now();
        let total = record.tracked_total()?;
        let required = self.totals.apply(&record.provider, Tokens::ZERO, total)?;

        let report = self.reconciler.reconcile(&record.provider, required, now)?;

        self.ledger.remove(&record.agreement_id)?;
        self.totals.subtract(&record.provider, total)?;
        Ok((total, report))
    }

    /// Reconcile a provider's escrow against its committed required total
    fn flush_reconcile(&mut self, provider: &Address) -> Result<()> {
        let now = self.clock.now();
        let required = self.totals.required_escrow(provider);
        let report = self.reconciler.reconcile(provider, required, now)?;
        self.events.extend(report.events());
        Ok(())
    }
}

impl<C, E, K> AgreementApprover for AgreementManager<C, E, K>
where
    C: RecurringCollectionAuthority,
    E: EscrowLedger,
    K: Clock,
{
    fn approve_agreement(&self, hash: &TermsHash) -> Authorization {
        AgreementManager::approve_agreement(self, hash)
    }
}

/// Whether a pending update no longer needs its own reservation
fn pending_settled(pending: &PendingUpdate, status: &AgreementStatus, now: Timestamp) -> bool {
    status.update_nonce >= pending.nonce || status.state.is_canceled() || now > pending.deadline
}

fn validate_window(
    deadline: Timestamp,
    ends_at: Timestamp,
    min_seconds_per_collection: u64,
    max_seconds_per_collection: u64,
    now: Timestamp,
) -> Result<()> {
    if max_seconds_per_collection == 0 {
        return Err(EscrowError::invalid_terms("max_seconds_per_collection", "must be positive"));
    }
    if min_seconds_per_collection > max_seconds_per_collection {
        return Err(EscrowError::invalid_terms(
            "min_seconds_per_collection",
            "must not exceed max_seconds_per_collection",
        ));
    }
    if ends_at <= deadline {
        return Err(EscrowError::invalid_terms("ends_at", "must be after the acceptance deadline"));
    }
    if deadline < now {
        return Err(EscrowError::OfferExpired { deadline, now });
    }
    Ok(())
}
