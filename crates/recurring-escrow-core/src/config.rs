//! Manager configuration

use recurring_escrow_types::{Address, EscrowError, Result};
use serde::{Deserialize, Serialize};

/// Static configuration of an agreement manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// The manager's own address; every offer must name it as payer
    pub payer: Address,

    /// Collector address that, with the payer, keys the escrow accounts
    pub collector: Address,

    /// Account allowed to grant and revoke operators
    pub governor: Address,

    /// Initial operator set
    #[serde(default)]
    pub operators: Vec<Address>,
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.payer.is_zero() {
            return Err(EscrowError::invalid_terms("payer", "must not be the zero address"));
        }
        if self.collector.is_zero() {
            return Err(EscrowError::invalid_terms("collector", "must not be the zero address"));
        }
        if self.governor.is_zero() {
            return Err(EscrowError::invalid_terms("governor", "must not be the zero address"));
        }
        Ok(())
    }

    /// Configuration for development and tests
    pub fn development() -> Self {
        Self {
            payer: Address::from_low_u64(0x1000),
            collector: Address::from_low_u64(0x2000),
            governor: Address::from_low_u64(0x3000),
            operators: vec![Address::from_low_u64(0x4000)],
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::development()
    }
}
