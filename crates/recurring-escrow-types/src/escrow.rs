//! Escrow account state
//!
//! Funds backing a provider live in an external escrow ledger. This type is
//! the read-only view of one (payer, collector, provider) account.

use crate::{Timestamp, Tokens};
use serde::{Deserialize, Serialize};

/// Observable state of one escrow account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscrowAccount {
    /// Total tokens held, including tokens being thawed
    pub balance: Tokens,
    /// Tokens currently on their way out
    pub tokens_thawing: Tokens,
    /// When the current thaw completes (zero if nothing is thawing)
    pub thaw_end_timestamp: Timestamp,
}

impl EscrowAccount {
    /// Balance still available as collateral
    pub fn liquid(&self) -> Tokens {
        self.balance.saturating_sub(self.tokens_thawing)
    }

    pub fn is_thawing(&self) -> bool {
        !self.tokens_thawing.is_zero()
    }

    /// Check if a thaw is in progress and its timer has run out
    pub fn thaw_complete(&self, now: Timestamp) -> bool {
        self.is_thawing() && now >= self.thaw_end_timestamp
    }

    /// Check if a thaw is in progress and its timer is still running
    pub fn thaw_running(&self, now: Timestamp) -> bool {
        self.is_thawing() && now < self.thaw_end_timestamp
    }
}
