//! Recurring Escrow Core - Agreement escrow accounting engine
//!
//! This crate keeps the escrow backing a payer's recurring-collection
//! agreements in line with what providers could claim:
//! - ClaimArithmetic: worst-case next claim of an agreement
//! - AgreementLedger: tracked agreements, snapshots and authorized hashes
//! - RequiredEscrowAggregator: per-provider running totals
//! - EscrowReconciler: the thaw/withdraw state machine
//! - AgreementManager: the lifecycle controller tying them together
//!
//! # Architectural Invariants
//!
//! 1. Required escrow equals the sum of tracked snapshots, per provider
//! 2. A running thaw timer is never restarted to grow the thaw
//! 3. Funds never thaw while a provider is under-collateralized
//! 4. The collector is authoritative; tracked amounts are upper bounds
//! 5. Fail closed: an error leaves every component untouched

pub mod access;
pub mod aggregator;
pub mod claim;
pub mod collaborators;
pub mod config;
pub mod ledger;
pub mod manager;
pub mod reconciler;

pub use access::*;
pub use aggregator::*;
pub use collaborators::*;
pub use config::*;
pub use ledger::*;
pub use manager::*;
pub use reconciler::*;
