//! Error types for recurring escrow
//!
//! All errors are explicit and raised at the point of violation. Operations
//! are all-or-nothing: an error means nothing was mutated.

use crate::{Address, AgreementId, TermsHash, Tokens};
use thiserror::Error;

/// Result type for recurring escrow operations
pub type Result<T> = std::result::Result<T, EscrowError>;

/// Recurring escrow error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    // ========================================================================
    // Not Found
    // ========================================================================

    /// The agreement is not tracked by this manager
    #[error("Agreement {agreement_id} was not offered by this manager")]
    AgreementNotOffered { agreement_id: AgreementId },

    // ========================================================================
    // Lifecycle Preconditions
    // ========================================================================

    #[error("Agreement {agreement_id} has already been offered")]
    AgreementAlreadyOffered { agreement_id: AgreementId },

    /// The provider accepted; the offer can no longer be revoked
    #[error("Agreement {agreement_id} has already been accepted")]
    AgreementAlreadyAccepted { agreement_id: AgreementId },

    /// The provider could still collect this much
    #[error("Agreement {agreement_id} is still claimable: {claimable}")]
    AgreementStillClaimable {
        agreement_id: AgreementId,
        claimable: Tokens,
    },

    #[error("Provider {provider} still has {count} tracked agreements")]
    StillHasAgreements { provider: Address, count: usize },

    #[error("Agreement {agreement_id} has been canceled")]
    AgreementCanceled { agreement_id: AgreementId },

    #[error("Update nonce {nonce} for agreement {agreement_id} must exceed {current}")]
    StaleUpdateNonce {
        agreement_id: AgreementId,
        nonce: u32,
        current: u32,
    },

    #[error("Offer deadline {deadline} has passed (now {now})")]
    OfferExpired { deadline: u64, now: u64 },

    // ========================================================================
    // Validation
    // ========================================================================

    #[error("Payer mismatch: expected {expected}, got {actual}")]
    PayerMismatch { expected: Address, actual: Address },

    #[error("Invalid terms: {field} - {reason}")]
    InvalidTerms { field: String, reason: String },

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Caller lacks the role an operation requires
    #[error("Unauthorized: {caller} lacks role {role}")]
    Unauthorized { caller: Address, role: String },

    /// A collector refused an acceptance because the oracle did not approve it
    #[error("Agreement hash {hash} is not authorized")]
    AgreementNotAuthorized { hash: TermsHash },

    // ========================================================================
    // Arithmetic (fatal)
    // ========================================================================

    #[error("Token amount overflow during arithmetic operation")]
    AmountOverflow,

    #[error("Token amount underflow during arithmetic operation")]
    AmountUnderflow,

    /// Required escrow would go negative; callers only subtract what they added
    #[error("Required escrow underflow for provider {provider}: tracked {tracked}, subtracting {requested}")]
    RequiredEscrowUnderflow {
        provider: Address,
        tracked: Tokens,
        requested: Tokens,
    },

    // ========================================================================
    // Collaborators
    // ========================================================================

    #[error("Recurring collector error: {reason}")]
    Collector { reason: String },

    #[error("Escrow ledger error: {reason}")]
    Escrow { reason: String },
}

impl EscrowError {
    /// Create an invalid terms error
    pub fn invalid_terms(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTerms {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a collector error
    pub fn collector(reason: impl Into<String>) -> Self {
        Self::Collector {
            reason: reason.into(),
        }
    }

    /// Create an escrow ledger error
    pub fn escrow(reason: impl Into<String>) -> Self {
        Self::Escrow {
            reason: reason.into(),
        }
    }

    /// Arithmetic failures indicate a broken invariant, never a caller mistake
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AmountOverflow | Self::AmountUnderflow | Self::RequiredEscrowUnderflow { .. }
        )
    }

    /// Check if waiting (for a claim to drain, for agreements to be removed) may resolve this
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::AgreementStillClaimable { .. } | Self::StillHasAgreements { .. }
        )
    }

    /// Stable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AgreementNotOffered { .. } => "AGREEMENT_NOT_OFFERED",
            Self::AgreementAlreadyOffered { .. } => "AGREEMENT_ALREADY_OFFERED",
            Self::AgreementAlreadyAccepted { .. } => "AGREEMENT_ALREADY_ACCEPTED",
            Self::AgreementStillClaimable { .. } => "AGREEMENT_STILL_CLAIMABLE",
            Self::StillHasAgreements { .. } => "STILL_HAS_AGREEMENTS",
            Self::AgreementCanceled { .. } => "AGREEMENT_CANCELED",
            Self::StaleUpdateNonce { .. } => "STALE_UPDATE_NONCE",
            Self::OfferExpired { .. } => "OFFER_EXPIRED",
            Self::PayerMismatch { .. } => "PAYER_MISMATCH",
            Self::InvalidTerms { .. } => "INVALID_TERMS",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::AgreementNotAuthorized { .. } => "AGREEMENT_NOT_AUTHORIZED",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow => "AMOUNT_UNDERFLOW",
            Self::RequiredEscrowUnderflow { .. } => "REQUIRED_ESCROW_UNDERFLOW",
            Self::Collector { .. } => "COLLECTOR_ERROR",
            Self::Escrow { .. } => "ESCROW_ERROR",
        }
    }
}
