//! Escrow reconciler - the thaw/withdraw state machine
//!
//! Drives a provider's escrow account toward `liquid == required`:
//!
//! ```text
//! desired_thawing = max(0, balance - required)
//!
//!   thaw complete ──► clip to desired (if over) ──► withdraw ──► re-plan
//!   desired <  thawing ──► reduce thaw (timer kept; zero cancels)
//!   desired >  thawing, timer running ──► defer (never restart the clock)
//!   desired >  thawing, idle ──► thaw desired (new timer)
//!   desired == thawing ──► nothing
//! ```
//!
//! The decision is a pure function of the observed account, the required
//! amount and the current time, so it can be tested without any ledger. The
//! reconciler is the only component that issues escrow instructions.

use recurring_escrow_types::{Address, EscrowAccount, ManagerEvent, Result, Timestamp, Tokens};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::EscrowLedger;

/// One instruction for the escrow ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum EscrowInstruction {
    /// Release the completed thaw
    Withdraw { tokens: Tokens },
    /// Start thawing `tokens` with a fresh timer
    Thaw { tokens: Tokens },
    /// Lower the thawing amount, keeping the timer
    ReduceThaw { from: Tokens, to: Tokens },
}

/// Outcome of planning, before anything is issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowPlan {
    pub instructions: Vec<EscrowInstruction>,
    /// Balance once the instructions have run
    pub projected_balance: Tokens,
    /// Thawing amount once the instructions have run
    pub projected_thawing: Tokens,
    /// Thaw target that was held back because a timer is running
    pub deferred_increase: Option<Tokens>,
}

impl EscrowPlan {
    pub fn is_noop(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Decide which instructions bring `account` in line with `required`
pub fn plan_escrow_adjustment(account: &EscrowAccount, required: Tokens, now: Timestamp) -> EscrowPlan {
    let mut instructions = Vec::new();
    let mut balance = account.balance;
    let mut thawing = account.tokens_thawing;
    let mut desired = balance.saturating_sub(required);
    let mut timer_running = account.thaw_running(now);

    if account.thaw_complete(now) {
        // Never let more leave than the excess, even if the thaw was started
        // when less was required.
        if thawing > desired {
            instructions.push(EscrowInstruction::ReduceThaw {
                from: thawing,
                to: desired,
            });
            thawing = desired;
        }
        if !thawing.is_zero() {
            instructions.push(EscrowInstruction::Withdraw { tokens: thawing });
            balance = balance.saturating_sub(thawing);
            thawing = Tokens::ZERO;
            desired = balance.saturating_sub(required);
        }
        timer_running = false;
    }

    let mut deferred_increase = None;
    if desired < thawing {
        instructions.push(EscrowInstruction::ReduceThaw {
            from: thawing,
            to: desired,
        });
        thawing = desired;
    } else if desired > thawing {
        if timer_running {
            deferred_increase = Some(desired);
        } else {
            instructions.push(EscrowInstruction::Thaw { tokens: desired });
            thawing = desired;
        }
    }

    EscrowPlan {
        instructions,
        projected_balance: balance,
        projected_thawing: thawing,
        deferred_increase,
    }
}

/// What a reconcile did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub provider: Address,
    pub required: Tokens,
    pub before: EscrowAccount,
    pub after: EscrowAccount,
    pub instructions: Vec<EscrowInstruction>,
    /// Tokens returned to the payer
    pub withdrawn: Tokens,
    pub deferred_increase: Option<Tokens>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Events describing the instructions that were issued
    pub fn events(&self) -> Vec<ManagerEvent> {
        self.instructions
            .iter()
            .map(|instruction| match *instruction {
                EscrowInstruction::Withdraw { tokens } => ManagerEvent::EscrowWithdrawn {
                    provider: self.provider,
                    tokens,
                },
                EscrowInstruction::Thaw { tokens } => ManagerEvent::EscrowThawed {
                    provider: self.provider,
                    tokens,
                    thaw_end_timestamp: self.after.thaw_end_timestamp,
                },
                EscrowInstruction::ReduceThaw { from, to } => ManagerEvent::EscrowThawReduced {
                    provider: self.provider,
                    from,
                    to,
                },
            })
            .collect()
    }
}

/// Issues escrow instructions for the accounts of one (payer, collector) pair
#[derive(Debug, Clone)]
pub struct EscrowReconciler<E> {
    escrow: E,
    payer: Address,
    collector: Address,
}

impl<E: EscrowLedger> EscrowReconciler<E> {
    pub fn new(escrow: E, payer: Address, collector: Address) -> Self {
        Self {
            escrow,
            payer,
            collector,
        }
    }

    pub fn escrow(&self) -> &E {
        &self.escrow
    }

    pub fn account(&self, provider: &Address) -> Result<EscrowAccount> {
        self.escrow.account(&self.payer, &self.collector, provider)
    }

    /// Bring the provider's account in line with `required`.
    ///
    /// Redundant calls are no-ops: once the account matches, the plan is empty.
    pub fn reconcile(&self, provider: &Address, required: Tokens, now: Timestamp) -> Result<ReconcileReport> {
        let before = self.account(provider)?;
        let plan = plan_escrow_adjustment(&before, required, now);

        if before.balance < required && before.is_thawing() {
            warn!(
                provider = %provider,
                balance = %before.balance,
                required = %required,
                thawing = %before.tokens_thawing,
                "Escrow under-collateralized, canceling thaw"
            );
        }

        let mut withdrawn = Tokens::ZERO;
        for instruction in &plan.instructions {
            match *instruction {
                EscrowInstruction::Withdraw { .. } => {
                    withdrawn = self.escrow.withdraw(&self.payer, &self.collector, provider)?;
                    info!(provider = %provider, tokens = %withdrawn, "Escrow withdrawn");
                }
                EscrowInstruction::Thaw { tokens } => {
                    self.escrow.thaw(&self.payer, &self.collector, provider, tokens)?;
                    info!(provider = %provider, tokens = %tokens, "Escrow thaw started");
                }
                EscrowInstruction::ReduceThaw { from, to } => {
                    self.escrow.reduce_thaw(&self.payer, &self.collector, provider, to)?;
                    info!(provider = %provider, from = %from, to = %to, "Escrow thaw reduced");
                }
            }
        }

        if let Some(target) = plan.deferred_increase {
            debug!(
                provider = %provider,
                thawing = %before.tokens_thawing,
                target = %target,
                "Thaw increase deferred until the running thaw completes"
            );
        }

        let after = if plan.is_noop() {
            debug!(provider = %provider, required = %required, "Escrow already reconciled");
            before
        } else {
            self.account(provider)?
        };

        Ok(ReconcileReport {
            provider: *provider,
            required,
            before,
            after,
            instructions: plan.instructions,
            withdrawn,
            deferred_increase: plan.deferred_increase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: u64) -> Tokens {
        Tokens::from_whole(n)
    }

    fn account(balance: u64, thawing: u64, end: Timestamp) -> EscrowAccount {
        EscrowAccount {
            balance: t(balance),
            tokens_thawing: t(thawing),
            thaw_end_timestamp: end,
        }
    }

    #[test]
    fn test_balanced_is_noop() {
        let plan = plan_escrow_adjustment(&account(100, 0, 0), t(100), 10);
        assert!(plan.is_noop());
        assert_eq!(plan.deferred_increase, None);
    }

    #[test]
    fn test_excess_starts_thaw() {
        let plan = plan_escrow_adjustment(&account(100, 0, 0), t(40), 10);
        assert_eq!(plan.instructions, vec![EscrowInstruction::Thaw { tokens: t(60) }]);
        assert_eq!(plan.projected_thawing, t(60));
    }

    #[test]
    fn test_increase_while_running_is_deferred() {
        let plan = plan_escrow_adjustment(&account(100, 30, 500), t(40), 10);
        assert!(plan.is_noop());
        assert_eq!(plan.deferred_increase, Some(t(60)));
        assert_eq!(plan.projected_thawing, t(30));
    }

    #[test]
    fn test_decrease_while_running_reduces() {
        let plan = plan_escrow_adjustment(&account(7_400, 3_700, 500), t(5_510), 10);
        assert_eq!(
            plan.instructions,
            vec![EscrowInstruction::ReduceThaw { from: t(3_700), to: t(1_890) }]
        );
    }

    #[test]
    fn test_deficit_cancels_whole_thaw() {
        let plan = plan_escrow_adjustment(&account(100, 80, 500), t(150), 10);
        assert_eq!(
            plan.instructions,
            vec![EscrowInstruction::ReduceThaw { from: t(80), to: Tokens::ZERO }]
        );
    }

    #[test]
    fn test_deficit_with_complete_thaw_withdraws_nothing() {
        let plan = plan_escrow_adjustment(&account(100, 80, 5), t(150), 10);
        assert_eq!(
            plan.instructions,
            vec![EscrowInstruction::ReduceThaw { from: t(80), to: Tokens::ZERO }]
        );
        assert_eq!(plan.projected_balance, t(100));
    }

    #[test]
    fn test_complete_thaw_is_withdrawn() {
        let plan = plan_escrow_adjustment(&account(3_700, 3_700, 100), Tokens::ZERO, 100);
        assert_eq!(plan.instructions, vec![EscrowInstruction::Withdraw { tokens: t(3_700) }]);
        assert_eq!(plan.projected_balance, Tokens::ZERO);
        assert_eq!(plan.projected_thawing, Tokens::ZERO);
    }

    #[test]
    fn test_complete_thaw_over_excess_is_clipped_then_withdrawn() {
        let plan = plan_escrow_adjustment(&account(100, 80, 5), t(50), 10);
        assert_eq!(
            plan.instructions,
            vec![
                EscrowInstruction::ReduceThaw { from: t(80), to: t(50) },
                EscrowInstruction::Withdraw { tokens: t(50) },
            ]
        );
        assert_eq!(plan.projected_balance, t(50));
    }

    #[test]
    fn test_deferred_increase_picked_up_after_withdraw() {
        let plan = plan_escrow_adjustment(&account(100, 30, 5), t(40), 10);
        assert_eq!(
            plan.instructions,
            vec![
                EscrowInstruction::Withdraw { tokens: t(30) },
                EscrowInstruction::Thaw { tokens: t(30) },
            ]
        );
        assert_eq!(plan.projected_balance, t(70));
        assert_eq!(plan.projected_thawing, t(30));
    }

    #[test]
    fn test_plan_of_projection_is_noop() {
        let before = account(7_400, 3_700, 500);
        let plan = plan_escrow_adjustment(&before, t(5_510), 10);
        let after = EscrowAccount {
            balance: plan.projected_balance,
            tokens_thawing: plan.projected_thawing,
            thaw_end_timestamp: before.thaw_end_timestamp,
        };
        assert!(plan_escrow_adjustment(&after, t(5_510), 10).is_noop());
    }
}
