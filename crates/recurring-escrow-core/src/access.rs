//! Role-based access control
//!
//! Offers, updates and revocations are operator-only. The governor manages
//! the operator set. Reconcile, remove, maintain and the authorization
//! oracle are open to anyone.

use std::collections::BTreeSet;

use recurring_escrow_types::{Address, EscrowError, Result};
use serde::{Deserialize, Serialize};

/// Role names as reported in `Unauthorized` errors
pub const OPERATOR_ROLE: &str = "OPERATOR";
pub const GOVERNOR_ROLE: &str = "GOVERNOR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    governor: Address,
    operators: BTreeSet<Address>,
}

impl AccessControl {
    pub fn new(governor: Address, operators: impl IntoIterator<Item = Address>) -> Self {
        Self {
            governor,
            operators: operators.into_iter().collect(),
        }
    }

    pub fn governor(&self) -> &Address {
        &self.governor
    }

    pub fn is_operator(&self, account: &Address) -> bool {
        self.operators.contains(account)
    }

    pub fn operators(&self) -> impl Iterator<Item = &Address> {
        self.operators.iter()
    }

    pub fn require_operator(&self, caller: &Address) -> Result<()> {
        if self.is_operator(caller) {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized {
                caller: *caller,
                role: OPERATOR_ROLE.to_string(),
            })
        }
    }

    pub fn require_governor(&self, caller: &Address) -> Result<()> {
        if caller == &self.governor {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized {
                caller: *caller,
                role: GOVERNOR_ROLE.to_string(),
            })
        }
    }

    /// Returns whether the account was newly granted
    pub fn grant_operator(&mut self, caller: &Address, account: Address) -> Result<bool> {
        self.require_governor(caller)?;
        Ok(self.operators.insert(account))
    }

    /// Returns whether the account held the role
    pub fn revoke_operator(&mut self, caller: &Address, account: &Address) -> Result<bool> {
        self.require_governor(caller)?;
        Ok(self.operators.remove(account))
    }
}
