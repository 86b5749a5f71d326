//! Required escrow aggregation
//!
//! Keeps, per provider, the running sum of every tracked snapshot so that the
//! required escrow is available in O(1) without iterating agreements.

use std::collections::HashMap;

use recurring_escrow_types::{Address, EscrowError, Result, Tokens};
use serde::{Deserialize, Serialize};

/// Running per-provider required escrow totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiredEscrowAggregator {
    totals: HashMap<Address, Tokens>,
}

impl RequiredEscrowAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current required escrow; zero for unknown providers
    pub fn required_escrow(&self, provider: &Address) -> Tokens {
        self.totals.get(provider).copied().unwrap_or(Tokens::ZERO)
    }

    /// Total after adding `add` and subtracting `subtract`, without mutating
    pub fn apply(&self, provider: &Address, add: Tokens, subtract: Tokens) -> Result<Tokens> {
        let tracked = self.required_escrow(provider);
        let raised = tracked.checked_add(add)?;
        raised
            .checked_sub(subtract)
            .map_err(|_| EscrowError::RequiredEscrowUnderflow {
                provider: *provider,
                tracked: raised,
                requested: subtract,
            })
    }

    pub fn add(&mut self, provider: &Address, amount: Tokens) -> Result<Tokens> {
        self.adjust(provider, amount, Tokens::ZERO)
    }

    /// Fails if the total would go negative, which only a broken caller can cause
    pub fn subtract(&mut self, provider: &Address, amount: Tokens) -> Result<Tokens> {
        self.adjust(provider, Tokens::ZERO, amount)
    }

    /// Apply a delta in one step; nothing changes on error
    pub fn adjust(&mut self, provider: &Address, add: Tokens, subtract: Tokens) -> Result<Tokens> {
        let total = self.apply(provider, add, subtract)?;
        if total.is_zero() {
            self.totals.remove(provider);
        } else {
            self.totals.insert(*provider, total);
        }
        Ok(total)
    }

    pub fn providers(&self) -> impl Iterator<Item = (&Address, &Tokens)> {
        self.totals.iter()
    }
}
