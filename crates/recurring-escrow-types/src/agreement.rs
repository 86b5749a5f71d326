//! Recurring-collection agreement types
//!
//! An agreement is offered by a payer to a service provider through a data
//! service. Its lifecycle (acceptance, cancellation, collection) is owned by
//! the recurring collector; this crate only describes the terms and the
//! states the collector reports.

use crate::{Address, AgreementId, Timestamp, Tokens};
use serde::{Deserialize, Serialize};

/// Terms of a recurring-collection agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementTerms {
    /// Latest time at which the provider may accept the offer
    pub deadline: Timestamp,
    /// Time after which nothing more accrues
    pub ends_at: Timestamp,
    /// Account paying for the service (the agreement manager)
    pub payer: Address,
    /// Data service through which collections happen
    pub data_service: Address,
    /// Provider receiving payments
    pub service_provider: Address,
    /// Tokens claimable once, on the first collection
    pub max_initial_tokens: Tokens,
    /// Tokens accruing per second of service
    pub max_ongoing_tokens_per_second: Tokens,
    pub min_seconds_per_collection: u64,
    /// Cap on the window a single collection may cover
    pub max_seconds_per_collection: u64,
    /// Disambiguates otherwise identical offers
    pub nonce: u64,
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl AgreementTerms {
    /// Canonical byte encoding used for hashing
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 * 20 + 7 * 16 + self.metadata.len());
        out.extend_from_slice(&self.deadline.to_be_bytes());
        out.extend_from_slice(&self.ends_at.to_be_bytes());
        out.extend_from_slice(self.payer.as_bytes());
        out.extend_from_slice(self.data_service.as_bytes());
        out.extend_from_slice(self.service_provider.as_bytes());
        out.extend_from_slice(&self.max_initial_tokens.0.to_be_bytes());
        out.extend_from_slice(&self.max_ongoing_tokens_per_second.0.to_be_bytes());
        out.extend_from_slice(&self.min_seconds_per_collection.to_be_bytes());
        out.extend_from_slice(&self.max_seconds_per_collection.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.metadata);
        out
    }
}

/// A proposed change to the terms of an existing agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementUpdate {
    pub agreement_id: AgreementId,
    /// Latest time at which the provider may accept the update
    pub deadline: Timestamp,
    pub ends_at: Timestamp,
    pub max_initial_tokens: Tokens,
    pub max_ongoing_tokens_per_second: Tokens,
    pub min_seconds_per_collection: u64,
    pub max_seconds_per_collection: u64,
    /// Must be strictly greater than the last accepted update nonce
    pub nonce: u32,
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl AgreementUpdate {
    /// Canonical byte encoding used for hashing
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 6 * 16 + self.metadata.len());
        out.extend_from_slice(self.agreement_id.as_bytes());
        out.extend_from_slice(&self.deadline.to_be_bytes());
        out.extend_from_slice(&self.ends_at.to_be_bytes());
        out.extend_from_slice(&self.max_initial_tokens.0.to_be_bytes());
        out.extend_from_slice(&self.max_ongoing_tokens_per_second.0.to_be_bytes());
        out.extend_from_slice(&self.min_seconds_per_collection.to_be_bytes());
        out.extend_from_slice(&self.max_seconds_per_collection.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.metadata);
        out
    }
}

/// Agreement state as reported by the recurring collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementState {
    /// Offered but not (yet) accepted by the provider
    #[default]
    NotAccepted,
    /// Accepted and collectable
    Accepted,
    /// Canceled by the provider; nothing further is collectable
    CanceledByServiceProvider,
    /// Canceled by the payer; the window up to cancellation stays collectable
    CanceledByPayer,
}

impl AgreementState {
    /// Check if the agreement has been canceled by either party
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::CanceledByServiceProvider | Self::CanceledByPayer)
    }

    /// Check if the provider has accepted at some point
    pub fn is_accepted_or_later(&self) -> bool {
        !matches!(self, Self::NotAccepted)
    }
}

/// Authoritative status of an agreement at the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgreementStatus {
    pub state: AgreementState,
    /// Nonce of the last accepted update (zero if none)
    pub update_nonce: u32,
}

/// Answer of the authorization oracle
///
/// Unauthorized hashes are reported with a sentinel value rather than an
/// error, so callers can never mistake a failure for an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    /// The hash matches a tracked offer or pending update of this agreement
    Approved(AgreementId),
    Unauthorized,
}

impl Authorization {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }
}
