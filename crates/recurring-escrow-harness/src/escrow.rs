//! In-memory payments escrow
//!
//! Accounts are keyed by (payer, collector, provider). Funds leave an account
//! either through a collection or through a thaw that has run its full
//! period followed by a withdraw.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use recurring_escrow_core::{Clock, EscrowLedger};
use recurring_escrow_types::{Address, EscrowAccount, EscrowError, Result, Tokens};
use tracing::debug;

use crate::clock::ManualClock;

/// One day
pub const DEFAULT_THAW_PERIOD_SECS: u64 = 86_400;

type AccountKey = (Address, Address, Address);

/// Shared-handle escrow ledger; clones see the same accounts
#[derive(Debug, Clone)]
pub struct InMemoryPaymentsEscrow {
    accounts: Arc<RwLock<HashMap<AccountKey, EscrowAccount>>>,
    returned: Arc<RwLock<HashMap<Address, Tokens>>>,
    clock: ManualClock,
    thaw_period: u64,
}

impl InMemoryPaymentsEscrow {
    /// A zero thaw period is rejected: a thaw would complete the instant it
    /// starts and reconciling twice in a row would no longer be a no-op.
    pub fn new(clock: ManualClock, thaw_period: u64) -> Result<Self> {
        if thaw_period == 0 {
            return Err(EscrowError::invalid_terms("thaw_period_secs", "must be greater than zero"));
        }
        Ok(Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            returned: Arc::new(RwLock::new(HashMap::new())),
            clock,
            thaw_period,
        })
    }

    pub fn thaw_period(&self) -> u64 {
        self.thaw_period
    }

    pub fn deposit(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts.entry((*payer, *collector, *provider)).or_default();
        account.balance = account.balance.checked_add(tokens)?;
        debug!(provider = %provider, tokens = %tokens, balance = %account.balance, "Escrow deposit");
        Ok(())
    }

    /// Pay `tokens` out to the provider, as a collection does
    pub fn collect(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts.entry((*payer, *collector, *provider)).or_default();
        if tokens > account.balance {
            return Err(EscrowError::escrow(format!(
                "insufficient escrow: balance {}, collecting {}",
                account.balance, tokens
            )));
        }
        account.balance = account.balance.checked_sub(tokens)?;
        if account.tokens_thawing > account.balance {
            account.tokens_thawing = account.balance;
        }
        if account.tokens_thawing.is_zero() {
            account.thaw_end_timestamp = 0;
        }
        Ok(())
    }

    /// Tokens withdrawn back to a payer so far
    pub fn returned_to(&self, payer: &Address) -> Tokens {
        self.returned.read().get(payer).copied().unwrap_or(Tokens::ZERO)
    }
}

impl EscrowLedger for InMemoryPaymentsEscrow {
    fn account(&self, payer: &Address, collector: &Address, provider: &Address) -> Result<EscrowAccount> {
        Ok(self
            .accounts
            .read()
            .get(&(*payer, *collector, *provider))
            .copied()
            .unwrap_or_default())
    }

    fn thaw(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts.entry((*payer, *collector, *provider)).or_default();
        if tokens.is_zero() {
            return Err(EscrowError::escrow("cannot thaw zero tokens"));
        }
        if tokens > account.balance {
            return Err(EscrowError::escrow(format!(
                "insufficient escrow: balance {}, thawing {}",
                account.balance, tokens
            )));
        }
        let thaw_end = self
            .clock
            .now()
            .checked_add(self.thaw_period)
            .ok_or_else(|| EscrowError::escrow("thaw end overflows"))?;
        account.tokens_thawing = tokens;
        account.thaw_end_timestamp = thaw_end;
        Ok(())
    }

    fn reduce_thaw(&self, payer: &Address, collector: &Address, provider: &Address, tokens: Tokens) -> Result<()> {
        let mut accounts = self.accounts.write();
        let account = accounts.entry((*payer, *collector, *provider)).or_default();
        if tokens > account.tokens_thawing {
            return Err(EscrowError::escrow(format!(
                "cannot raise thaw from {} to {}",
                account.tokens_thawing, tokens
            )));
        }
        account.tokens_thawing = tokens;
        if tokens.is_zero() {
            account.thaw_end_timestamp = 0;
        }
        Ok(())
    }

    fn withdraw(&self, payer: &Address, collector: &Address, provider: &Address) -> Result<Tokens> {
        let mut accounts = self.accounts.write();
        let account = accounts.entry((*payer, *collector, *provider)).or_default();
        if !account.thaw_complete(self.clock.now()) {
            return Err(EscrowError::escrow("no completed thaw to withdraw"));
        }

        let tokens = account.tokens_thawing;
        account.balance = account.balance.checked_sub(tokens)?;
        account.tokens_thawing = Tokens::ZERO;
        account.thaw_end_timestamp = 0;

        let mut returned = self.returned.write();
        let total = returned.entry(*payer).or_default();
        *total = total.checked_add(tokens)?;
        Ok(tokens)
    }
}
