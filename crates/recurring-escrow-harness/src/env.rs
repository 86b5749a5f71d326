//! Wired-up test environment
//!
//! A manager plus in-memory collector, escrow and clock that all share state,
//! with helpers for the steps tests keep repeating.

use std::collections::BTreeSet;

use recurring_escrow_core::{AgreementManager, Clock, ManagerConfig};
use recurring_escrow_types::{
    Address, AgreementId, AgreementTerms, AgreementUpdate, EscrowAccount, Result, Timestamp, Tokens,
};
use serde::{Deserialize, Serialize};

use crate::clock::ManualClock;
use crate::collector::InMemoryRecurringCollector;
use crate::escrow::{InMemoryPaymentsEscrow, DEFAULT_THAW_PERIOD_SECS};

/// Manager type used throughout the harness
pub type TestManager = AgreementManager<InMemoryRecurringCollector, InMemoryPaymentsEscrow, ManualClock>;

/// How long an offer stays acceptable
pub const OFFER_WINDOW_SECS: u64 = 3_600;

/// Default agreement duration: one year
pub const AGREEMENT_DURATION_SECS: u64 = 365 * 86_400;

/// Settings of the simulated collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowSimConfig {
    pub thaw_period_secs: u64,
    pub start_timestamp: Timestamp,
}

impl Default for EscrowSimConfig {
    fn default() -> Self {
        Self {
            thaw_period_secs: DEFAULT_THAW_PERIOD_SECS,
            start_timestamp: 1_700_000_000,
        }
    }
}

/// Offer shape in whole tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferShape {
    pub initial_tokens: u64,
    pub tokens_per_second: u64,
    pub max_seconds_per_collection: u64,
    pub duration_secs: u64,
}

impl OfferShape {
    /// 100 initial plus 1 per second over an hour: 3700 tokens
    pub const STANDARD: Self = Self {
        initial_tokens: 100,
        tokens_per_second: 1,
        max_seconds_per_collection: 3_600,
        duration_secs: AGREEMENT_DURATION_SECS,
    };

    pub fn new(initial_tokens: u64, tokens_per_second: u64, max_seconds_per_collection: u64) -> Self {
        Self {
            initial_tokens,
            tokens_per_second,
            max_seconds_per_collection,
            ..Self::STANDARD
        }
    }
}

pub struct TestEnv {
    pub clock: ManualClock,
    pub escrow: InMemoryPaymentsEscrow,
    pub collector: InMemoryRecurringCollector,
    pub manager: TestManager,
    pub config: ManagerConfig,
    pub data_service: Address,
    next_nonce: u64,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        Self::with_config(ManagerConfig::development(), EscrowSimConfig::default())
    }

    pub fn with_config(config: ManagerConfig, sim: EscrowSimConfig) -> Result<Self> {
        let clock = ManualClock::new(sim.start_timestamp);
        let escrow = InMemoryPaymentsEscrow::new(clock.clone(), sim.thaw_period_secs)?;
        let collector = InMemoryRecurringCollector::new(config.collector, escrow.clone(), clock.clone());
        let manager = AgreementManager::new(config.clone(), collector.clone(), escrow.clone(), clock.clone())?;

        Ok(Self {
            clock,
            escrow,
            collector,
            manager,
            config,
            data_service: Address::from_low_u64(0xd5),
            next_nonce: 1,
        })
    }

    /// Address of the n-th test provider
    pub fn provider(n: u64) -> Address {
        Address::from_low_u64(0x10_0000 + n)
    }

    pub fn payer(&self) -> Address {
        self.config.payer
    }

    /// First configured operator, or the zero address if there is none
    pub fn operator(&self) -> Address {
        self.config.operators.first().copied().unwrap_or(Address::ZERO)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Fresh terms for `provider`, acceptable for the next hour
    pub fn terms(&mut self, provider: Address, shape: OfferShape) -> AgreementTerms {
        let now = self.now();
        let nonce = self.next_nonce;
        self.next_nonce += 1;

        AgreementTerms {
            deadline: now.saturating_add(OFFER_WINDOW_SECS),
            ends_at: now.saturating_add(OFFER_WINDOW_SECS).saturating_add(shape.duration_secs),
            payer: self.config.payer,
            data_service: self.data_service,
            service_provider: provider,
            max_initial_tokens: Tokens::from_whole(shape.initial_tokens),
            max_ongoing_tokens_per_second: Tokens::from_whole(shape.tokens_per_second),
            min_seconds_per_collection: shape.max_seconds_per_collection.min(60),
            max_seconds_per_collection: shape.max_seconds_per_collection,
            nonce,
            metadata: Vec::new(),
        }
    }

    pub fn standard_terms(&mut self, provider: Address) -> AgreementTerms {
        self.terms(provider, OfferShape::STANDARD)
    }

    /// Update proposal for a tracked agreement, acceptable for the next hour
    pub fn update_terms(&self, agreement_id: AgreementId, nonce: u32, shape: OfferShape) -> AgreementUpdate {
        let now = self.now();
        AgreementUpdate {
            agreement_id,
            deadline: now.saturating_add(OFFER_WINDOW_SECS),
            ends_at: now.saturating_add(OFFER_WINDOW_SECS).saturating_add(shape.duration_secs),
            max_initial_tokens: Tokens::from_whole(shape.initial_tokens),
            max_ongoing_tokens_per_second: Tokens::from_whole(shape.tokens_per_second),
            min_seconds_per_collection: shape.max_seconds_per_collection.min(60),
            max_seconds_per_collection: shape.max_seconds_per_collection,
            nonce,
            metadata: Vec::new(),
        }
    }

    /// Offer as the default operator
    pub fn offer(&mut self, terms: AgreementTerms) -> Result<AgreementId> {
        let operator = self.operator();
        self.manager.offer_agreement(&operator, terms)
    }

    pub fn offer_update(&mut self, update: AgreementUpdate) -> Result<()> {
        let operator = self.operator();
        self.manager.offer_agreement_update(&operator, update).map(|_| ())
    }

    /// Deposit whole tokens into the provider's escrow account
    pub fn fund(&self, provider: &Address, tokens: u64) -> Result<()> {
        self.escrow
            .deposit(&self.config.payer, &self.config.collector, provider, Tokens::from_whole(tokens))
    }

    /// Provider accepts at the collector, which asks the manager for approval
    pub fn accept(&self, terms: &AgreementTerms) -> Result<AgreementId> {
        self.collector.accept(terms, &self.manager)
    }

    pub fn accept_update(&self, update: &AgreementUpdate) -> Result<()> {
        self.collector.update(update, &self.manager)
    }

    pub fn advance(&self, seconds: u64) -> Timestamp {
        self.clock.advance(seconds)
    }

    pub fn account(&self, provider: &Address) -> Result<EscrowAccount> {
        self.manager.escrow_account(provider)
    }

    /// Providers whose required escrow differs from the sum of their
    /// tracked amounts, as `(provider, aggregated, recomputed)`
    pub fn sum_invariant_violations(&self) -> Result<Vec<(Address, Tokens, Tokens)>> {
        let snapshot = self.manager.snapshot();
        let providers: BTreeSet<Address> = snapshot
            .agreements
            .iter()
            .map(|a| a.provider)
            .chain(snapshot.required_escrow.keys().copied())
            .collect();

        let mut violations = Vec::new();
        for provider in providers {
            let aggregated = self.manager.required_escrow(&provider);
            let recomputed = self.manager.audit_required_escrow(&provider)?;
            if aggregated != recomputed {
                violations.push((provider, aggregated, recomputed));
            }
        }
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_offer_reserves_3700() {
        let mut env = TestEnv::new().unwrap();
        let provider = TestEnv::provider(1);
        let terms = env.standard_terms(provider);
        let id = env.offer(terms.clone()).unwrap();

        assert_eq!(env.manager.required_escrow(&provider), Tokens::from_whole(3_700));
        assert_eq!(env.accept(&terms).unwrap(), id);
        assert!(env.sum_invariant_violations().unwrap().is_empty());
    }

    #[test]
    fn test_zero_thaw_period_rejected() {
        let sim = EscrowSimConfig {
            thaw_period_secs: 0,
            ..EscrowSimConfig::default()
        };
        let err = TestEnv::with_config(ManagerConfig::development(), sim).err().unwrap();
        assert_eq!(err.error_code(), "INVALID_TERMS");
    }

    #[test]
    fn test_maintain_twice_at_same_instant_is_noop() {
        let sim = EscrowSimConfig {
            thaw_period_secs: 1,
            ..EscrowSimConfig::default()
        };
        let mut env = TestEnv::with_config(ManagerConfig::development(), sim).unwrap();
        let provider = TestEnv::provider(1);
        let terms = env.standard_terms(provider);
        let id = env.offer(terms.clone()).unwrap();
        env.fund(&provider, 3_700).unwrap();
        env.accept(&terms).unwrap();
        env.collector.cancel_by_provider(&id).unwrap();
        env.manager.remove_agreement(&id).unwrap();

        let account = env.account(&provider).unwrap();
        assert_eq!(account.tokens_thawing, Tokens::from_whole(3_700));
        assert!(env.manager.maintain(&provider).unwrap().is_noop());
        assert!(env.manager.maintain(&provider).unwrap().is_noop());
    }

    #[test]
    fn test_terms_after_huge_advance_do_not_panic() {
        let mut env = TestEnv::new().unwrap();
        env.advance(u64::MAX);
        let terms = env.standard_terms(TestEnv::provider(1));
        let err = env.offer(terms).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TERMS");
    }

    #[test]
    fn test_terms_nonces_are_unique() {
        let mut env = TestEnv::new().unwrap();
        let provider = TestEnv::provider(1);
        let a = env.standard_terms(provider);
        let b = env.standard_terms(provider);
        assert_ne!(a.nonce, b.nonce);
    }
}
