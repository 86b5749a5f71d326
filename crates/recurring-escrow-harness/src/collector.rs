//! In-memory recurring collector
//!
//! Owns the agreement lifecycle the manager only observes: acceptance,
//! updates, cancellation and collection. Acceptances and updates are gated
//! on the payer's authorization oracle, the same way the on-chain collector
//! asks the payer contract before honouring an offer it did not sign.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use recurring_escrow_core::claim::{collection_window, max_claim};
use recurring_escrow_core::{AgreementApprover, Clock, RecurringCollectionAuthority};
use recurring_escrow_types::{
    Address, AgreementId, AgreementState, AgreementStatus, AgreementTerms, AgreementUpdate,
    Authorization, EscrowError, Result, TermsHash, Timestamp, Tokens,
};
use serde::Serialize;
use sha3::{Digest, Keccak256};
use tracing::info;

use crate::clock::ManualClock;
use crate::escrow::InMemoryPaymentsEscrow;

const TERMS_DOMAIN: &[u8] = b"recurring-collection/terms";
const UPDATE_DOMAIN: &[u8] = b"recurring-collection/update";

fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Collector-side record of an accepted agreement
#[derive(Debug, Clone, Serialize)]
pub struct CollectorAgreement {
    /// Terms currently in force (updated in place by accepted updates)
    pub terms: AgreementTerms,
    pub state: AgreementState,
    pub update_nonce: u32,
    pub accepted_at: Timestamp,
    pub last_collection_at: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
}

impl CollectorAgreement {
    /// Largest amount the next collection could take at `now`
    pub fn max_next_claim(&self) -> Result<Tokens> {
        let end = match self.state {
            AgreementState::NotAccepted | AgreementState::CanceledByServiceProvider => {
                return Ok(Tokens::ZERO)
            }
            AgreementState::Accepted => self.terms.ends_at,
            AgreementState::CanceledByPayer => self
                .canceled_at
                .map(|at| at.min(self.terms.ends_at))
                .unwrap_or(self.terms.ends_at),
        };

        let start = self.last_collection_at.unwrap_or(self.accepted_at);
        let window = collection_window(start, end, self.terms.max_seconds_per_collection);
        let initial = if self.last_collection_at.is_none() {
            self.terms.max_initial_tokens
        } else {
            Tokens::ZERO
        };
        max_claim(
            initial,
            self.terms.max_ongoing_tokens_per_second,
            window,
            self.terms.max_seconds_per_collection,
        )
    }
}

/// Shared-handle recurring collector
#[derive(Debug, Clone)]
pub struct InMemoryRecurringCollector {
    address: Address,
    agreements: Arc<RwLock<HashMap<AgreementId, CollectorAgreement>>>,
    escrow: InMemoryPaymentsEscrow,
    clock: ManualClock,
}

impl InMemoryRecurringCollector {
    pub fn new(address: Address, escrow: InMemoryPaymentsEscrow, clock: ManualClock) -> Self {
        Self {
            address,
            agreements: Arc::new(RwLock::new(HashMap::new())),
            escrow,
            clock,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn agreement(&self, agreement_id: &AgreementId) -> Option<CollectorAgreement> {
        self.agreements.read().get(agreement_id).cloned()
    }

    /// Provider accepts an offer; the payer's oracle must approve its hash
    pub fn accept(&self, terms: &AgreementTerms, approver: &dyn AgreementApprover) -> Result<AgreementId> {
        let now = self.clock.now();
        if now > terms.deadline {
            return Err(EscrowError::OfferExpired {
                deadline: terms.deadline,
                now,
            });
        }

        let agreement_id = self.generate_agreement_id(
            &terms.payer,
            &terms.data_service,
            &terms.service_provider,
            terms.deadline,
            terms.nonce,
        );
        let hash = self.hash_terms(terms);
        match approver.approve_agreement(&hash) {
            Authorization::Approved(approved) if approved == agreement_id => {}
            _ => return Err(EscrowError::AgreementNotAuthorized { hash }),
        }

        let mut agreements = self.agreements.write();
        if agreements.contains_key(&agreement_id) {
            return Err(EscrowError::AgreementAlreadyAccepted { agreement_id });
        }
        agreements.insert(
            agreement_id,
            CollectorAgreement {
                terms: terms.clone(),
                state: AgreementState::Accepted,
                update_nonce: 0,
                accepted_at: now,
                last_collection_at: None,
                canceled_at: None,
            },
        );

        info!(agreement_id = %agreement_id, provider = %terms.service_provider, "Agreement accepted");
        Ok(agreement_id)
    }

    /// Provider accepts an update; its hash must be approved as well
    pub fn update(&self, update: &AgreementUpdate, approver: &dyn AgreementApprover) -> Result<()> {
        let now = self.clock.now();
        if now > update.deadline {
            return Err(EscrowError::OfferExpired {
                deadline: update.deadline,
                now,
            });
        }

        let hash = self.hash_update(update);
        match approver.approve_agreement(&hash) {
            Authorization::Approved(approved) if approved == update.agreement_id => {}
            _ => return Err(EscrowError::AgreementNotAuthorized { hash }),
        }

        let mut agreements = self.agreements.write();
        let agreement = agreements
            .get_mut(&update.agreement_id)
            .ok_or_else(|| EscrowError::collector(format!("agreement {} not accepted", update.agreement_id)))?;
        if agreement.state != AgreementState::Accepted {
            return Err(EscrowError::AgreementCanceled {
                agreement_id: update.agreement_id,
            });
        }
        if update.nonce <= agreement.update_nonce {
            return Err(EscrowError::StaleUpdateNonce {
                agreement_id: update.agreement_id,
                nonce: update.nonce,
                current: agreement.update_nonce,
            });
        }

        agreement.terms.ends_at = update.ends_at;
        agreement.terms.max_initial_tokens = update.max_initial_tokens;
        agreement.terms.max_ongoing_tokens_per_second = update.max_ongoing_tokens_per_second;
        agreement.terms.min_seconds_per_collection = update.min_seconds_per_collection;
        agreement.terms.max_seconds_per_collection = update.max_seconds_per_collection;
        agreement.update_nonce = update.nonce;

        info!(agreement_id = %update.agreement_id, nonce = update.nonce, "Agreement update accepted");
        Ok(())
    }

    pub fn cancel_by_provider(&self, agreement_id: &AgreementId) -> Result<()> {
        self.cancel(agreement_id, AgreementState::CanceledByServiceProvider)
    }

    pub fn cancel_by_payer(&self, agreement_id: &AgreementId) -> Result<()> {
        self.cancel(agreement_id, AgreementState::CanceledByPayer)
    }

    /// Collect `tokens` for the current window, paid from escrow
    pub fn collect(&self, agreement_id: &AgreementId, tokens: Tokens) -> Result<()> {
        let now = self.clock.now();
        let mut agreements = self.agreements.write();
        let agreement = agreements
            .get_mut(agreement_id)
            .ok_or_else(|| EscrowError::collector(format!("agreement {} not accepted", agreement_id)))?;

        let claimable = agreement.max_next_claim()?;
        if tokens > claimable {
            return Err(EscrowError::collector(format!(
                "collecting {} exceeds claimable {}",
                tokens, claimable
            )));
        }

        self.escrow.collect(
            &agreement.terms.payer,
            &self.address,
            &agreement.terms.service_provider,
            tokens,
        )?;
        let collected_until = agreement.canceled_at.map(|at| at.min(now)).unwrap_or(now);
        agreement.last_collection_at = Some(collected_until);

        info!(agreement_id = %agreement_id, tokens = %tokens, "Collected");
        Ok(())
    }

    fn cancel(&self, agreement_id: &AgreementId, state: AgreementState) -> Result<()> {
        let mut agreements = self.agreements.write();
        let agreement = agreements
            .get_mut(agreement_id)
            .ok_or_else(|| EscrowError::collector(format!("agreement {} not accepted", agreement_id)))?;
        if agreement.state != AgreementState::Accepted {
            return Err(EscrowError::AgreementCanceled {
                agreement_id: *agreement_id,
            });
        }
        agreement.state = state;
        agreement.canceled_at = Some(self.clock.now());

        info!(agreement_id = %agreement_id, state = ?state, "Agreement canceled");
        Ok(())
    }
}

impl RecurringCollectionAuthority for InMemoryRecurringCollector {
    fn generate_agreement_id(
        &self,
        payer: &Address,
        data_service: &Address,
        service_provider: &Address,
        deadline: Timestamp,
        nonce: u64,
    ) -> AgreementId {
        let digest = keccak256(&[
            payer.as_bytes(),
            data_service.as_bytes(),
            service_provider.as_bytes(),
            &deadline.to_be_bytes(),
            &nonce.to_be_bytes(),
        ]);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        AgreementId::new(id)
    }

    fn hash_terms(&self, terms: &AgreementTerms) -> TermsHash {
        TermsHash::new(keccak256(&[TERMS_DOMAIN, self.address.as_bytes(), &terms.encode()]))
    }

    fn hash_update(&self, update: &AgreementUpdate) -> TermsHash {
        TermsHash::new(keccak256(&[UPDATE_DOMAIN, self.address.as_bytes(), &update.encode()]))
    }

    fn agreement_status(&self, agreement_id: &AgreementId) -> Result<AgreementStatus> {
        Ok(self
            .agreements
            .read()
            .get(agreement_id)
            .map(|a| AgreementStatus {
                state: a.state,
                update_nonce: a.update_nonce,
            })
            .unwrap_or_default())
    }

    fn max_next_claim(&self, agreement_id: &AgreementId) -> Result<Tokens> {
        match self.agreements.read().get(agreement_id) {
            Some(agreement) => agreement.max_next_claim(),
            None => Ok(Tokens::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ApproveAll(AgreementId);

    impl AgreementApprover for ApproveAll {
        fn approve_agreement(&self, _hash: &TermsHash) -> Authorization {
            Authorization::Approved(self.0)
        }
    }

    struct ApproveNone;

    impl AgreementApprover for ApproveNone {
        fn approve_agreement(&self, _hash: &TermsHash) -> Authorization {
            Authorization::Unauthorized
        }
    }

    fn setup() -> (ManualClock, InMemoryRecurringCollector) {
        let clock = ManualClock::new(1_000);
        let escrow = InMemoryPaymentsEscrow::new(clock.clone(), 86_400).unwrap();
        let collector = InMemoryRecurringCollector::new(Address::from_low_u64(0xc0), escrow, clock.clone());
        (clock, collector)
    }

    fn terms() -> AgreementTerms {
        AgreementTerms {
            deadline: 2_000,
            ends_at: 100_000,
            payer: Address::from_low_u64(1),
            data_service: Address::from_low_u64(2),
            service_provider: Address::from_low_u64(3),
            max_initial_tokens: Tokens::from_whole(100),
            max_ongoing_tokens_per_second: Tokens::from_whole(1),
            min_seconds_per_collection: 60,
            max_seconds_per_collection: 3_600,
            nonce: 1,
            metadata: Vec::new(),
        }
    }

    fn id_of(collector: &InMemoryRecurringCollector, terms: &AgreementTerms) -> AgreementId {
        collector.generate_agreement_id(
            &terms.payer,
            &terms.data_service,
            &terms.service_provider,
            terms.deadline,
            terms.nonce,
        )
    }

    #[test]
    fn test_ids_are_deterministic_and_distinct() {
        let (_, collector) = setup();
        let a = terms();
        let mut b = terms();
        b.nonce = 2;
        assert_eq!(id_of(&collector, &a), id_of(&collector, &a));
        assert_ne!(id_of(&collector, &a), id_of(&collector, &b));
        assert_ne!(collector.hash_terms(&a), collector.hash_terms(&b));
    }

    #[test]
    fn test_accept_requires_approval() {
        let (_, collector) = setup();
        let terms = terms();
        let err = collector.accept(&terms, &ApproveNone).unwrap_err();
        assert_eq!(err.error_code(), "AGREEMENT_NOT_AUTHORIZED");

        let wrong = ApproveAll(AgreementId::new([9; 16]));
        assert!(collector.accept(&terms, &wrong).is_err());

        let id = id_of(&collector, &terms);
        assert_eq!(collector.accept(&terms, &ApproveAll(id)).unwrap(), id);
        assert_eq!(collector.agreement_status(&id).unwrap().state, AgreementState::Accepted);
    }

    #[test]
    fn test_accept_after_deadline_fails() {
        let (clock, collector) = setup();
        let terms = terms();
        clock.set(2_001);
        let id = id_of(&collector, &terms);
        assert!(matches!(
            collector.accept(&terms, &ApproveAll(id)),
            Err(EscrowError::OfferExpired { .. })
        ));
    }

    #[test]
    fn test_max_next_claim_by_state() {
        let (clock, collector) = setup();
        let terms = terms();
        let id = id_of(&collector, &terms);
        assert_eq!(collector.max_next_claim(&id).unwrap(), Tokens::ZERO);

        collector.accept(&terms, &ApproveAll(id)).unwrap();
        assert_eq!(collector.max_next_claim(&id).unwrap(), Tokens::from_whole(3_700));

        clock.advance(600);
        collector.cancel_by_payer(&id).unwrap();
        clock.advance(10_000);
        assert_eq!(collector.max_next_claim(&id).unwrap(), Tokens::from_whole(700));
    }

    #[test]
    fn test_provider_cancel_ends_claims() {
        let (_, collector) = setup();
        let terms = terms();
        let id = id_of(&collector, &terms);
        collector.accept(&terms, &ApproveAll(id)).unwrap();
        collector.cancel_by_provider(&id).unwrap();
        assert_eq!(collector.max_next_claim(&id).unwrap(), Tokens::ZERO);
        assert!(collector.cancel_by_payer(&id).is_err());
    }
}
