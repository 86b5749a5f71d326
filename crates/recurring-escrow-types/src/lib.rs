//! Recurring Escrow Types - Canonical domain types for agreement escrow accounting
//!
//! This crate contains the foundational types shared by every recurring-escrow
//! crate, with zero dependencies on the others. It defines:
//!
//! - Identity types (Address, AgreementId, TermsHash)
//! - Token amounts with checked 18-decimal arithmetic
//! - Recurring-collection agreement terms and update proposals
//! - Escrow account state as observed from the escrow ledger
//! - Manager events
//! - The error taxonomy
//!
//! # Invariants
//!
//! 1. Token arithmetic never wraps: overflow is an error, never a truncated value
//! 2. Agreement identifiers are derived by the collector, never invented locally
//! 3. Failure must be explicit

pub mod identity;
pub mod amount;
pub mod agreement;
pub mod escrow;
pub mod event;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use agreement::*;
pub use escrow::*;
pub use event::*;
pub use error::*;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Version of the recurring-escrow types schema
pub const TYPES_VERSION: &str = "0.1.0";
