//! Recurring Escrow Harness - In-memory collaborators and scenario runner
//!
//! Stand-ins for the contracts the agreement manager talks to:
//! - ManualClock: time that only moves when told to
//! - InMemoryPaymentsEscrow: per-(payer, collector, provider) escrow accounts
//!   with a thaw period
//! - InMemoryRecurringCollector: agreement acceptance, updates, cancellation
//!   and collection, gated on the manager's authorization oracle
//! - TestEnv: all of the above wired to one manager
//! - scenario: JSON step scripts run against a TestEnv

pub mod clock;
pub mod collector;
pub mod env;
pub mod escrow;
pub mod scenario;

pub use clock::*;
pub use collector::*;
pub use env::*;
pub use escrow::*;
pub use scenario::*;
