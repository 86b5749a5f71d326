//! Collaborator interfaces
//!
//! The manager never mirrors the collector's agreement lifecycle or the
//! escrow ledger's balances; it queries them through these traits, which are
//! injected at construction.

use recurring_escrow_types::{
    Address, AgreementId, AgreementStatus, AgreementTerms, AgreementUpdate, Authorization,
    EscrowAccount, Result, TermsHash, Timestamp, Tokens,
};

/// The recurring collector: authority on agreement lifecycle and claims
pub trait RecurringCollectionAuthority {
    /// Deterministic id for (payer, data service, provider, deadline, nonce)
    fn generate_agreement_id(
        &self,
        payer: &Address,
        data_service: &Address,
        service_provider: &Address,
        deadline: Timestamp,
        nonce: u64,
    ) -> AgreementId;

    fn hash_terms(&self, terms: &AgreementTerms) -> TermsHash;

    fn hash_update(&self, update: &AgreementUpdate) -> TermsHash;

    /// Current state; `NotAccepted` for agreements the collector has never seen
    fn agreement_status(&self, agreement_id: &AgreementId) -> Result<AgreementStatus>;

    /// Largest amount collectable at the next collection of an accepted or
    /// canceled agreement; zero once nothing more can be collected
    fn max_next_claim(&self, agreement_id: &AgreementId) -> Result<Tokens>;
}

/// The escrow ledger holding the funds that back each provider
pub trait EscrowLedger {
    fn account(&self, payer: &Address, collector: &Address, provider: &Address) -> Result<EscrowAccount>;

    /// Set the thawing amount and start a fresh thaw timer
    fn thaw(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()>;

    /// Lower the thawing amount to `tokens`, keeping the running timer
    fn reduce_thaw(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()>;

    /// Release a completed thaw back to the payer, returning the amount
    fn withdraw(&self, payer: &Address, collector: &Address, provider: &Address) -> Result<Tokens>;
}

/// Authorization oracle consulted by the collector when a provider accepts
pub trait AgreementApprover {
    fn approve_agreement(&self, hash: &TermsHash) -> Authorization;
}

/// Source of the current time
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

impl<T: RecurringCollectionAuthority + ?Sized> RecurringCollectionAuthority for &T {
    fn generate_agreement_id(
        &self,
        payer: &Address,
        data_service: &Address,
        service_provider: &Address,
        deadline: Timestamp,
        nonce: u64,
    ) -> AgreementId {
        (**self).generate_agreement_id(payer, data_service, service_provider, deadline, nonce)
    }

    fn hash_terms(&self, terms: &AgreementTerms) -> TermsHash {
        (**self).hash_terms(terms)
    }

    fn hash_update(&self, update: &AgreementUpdate) -> TermsHash {
        (**self).hash_update(update)
    }

    fn agreement_status(&self, agreement_id: &AgreementId) -> Result<AgreementStatus> {
        (**self).agreement_status(agreement_id)
    }

    fn max_next_claim(&self, agreement_id: &AgreementId) -> Result<Tokens> {
        (**self).max_next_claim(agreement_id)
    }
}

impl<T: EscrowLedger + ?Sized> EscrowLedger for &T {
    fn account(&self, payer: &Address, collector: &Address, provider: &Address) -> Result<EscrowAccount> {
        (**self).account(payer, collector, provider)
    }

    fn thaw(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()> {
        (**self).thaw(payer, collector, provider, tokens)
    }

    fn reduce_thaw(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()> {
        (**self).reduce_thaw(payer, collector, provider, tokens)
    }

    fn withdraw(&self, payer: &Address, collector: &Address, provider: &Address) -> Result<Tokens> {
        (**self).withdraw(payer, collector, provider)
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
