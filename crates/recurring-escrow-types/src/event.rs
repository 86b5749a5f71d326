//! Events emitted by the agreement manager
//!
//! Every state-changing operation records what it did. Calls that change
//! nothing (a redundant reconcile, for instance) record nothing.

use crate::{Address, AgreementId, TermsHash, Timestamp, Tokens};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    AgreementOffered {
        agreement_id: AgreementId,
        provider: Address,
        terms_hash: TermsHash,
        max_next_claim: Tokens,
    },
    AgreementUpdateOffered {
        agreement_id: AgreementId,
        provider: Address,
        update_hash: TermsHash,
        nonce: u32,
        pending_max_next_claim: Tokens,
    },
    /// An offer withdrawn before the provider accepted it
    OfferRevoked {
        agreement_id: AgreementId,
        provider: Address,
    },
    AgreementUpdateRevoked {
        agreement_id: AgreementId,
        provider: Address,
        nonce: u32,
    },
    /// A tracked amount changed after consulting the collector
    AgreementReconciled {
        agreement_id: AgreementId,
        provider: Address,
        old_max_next_claim: Tokens,
        new_max_next_claim: Tokens,
        pending_cleared: bool,
    },
    AgreementRemoved {
        agreement_id: AgreementId,
        provider: Address,
    },
    EscrowThawed {
        provider: Address,
        tokens: Tokens,
        thaw_end_timestamp: Timestamp,
    },
    EscrowThawReduced {
        provider: Address,
        from: Tokens,
        to: Tokens,
    },
    EscrowWithdrawn {
        provider: Address,
        tokens: Tokens,
    },
    OperatorGranted {
        account: Address,
    },
    OperatorRevoked {
        account: Address,
    },
}

impl ManagerEvent {
    /// Short name of the event, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgreementOffered { .. } => "agreement_offered",
            Self::AgreementUpdateOffered { .. } => "agreement_update_offered",
            Self::OfferRevoked { .. } => "offer_revoked",
            Self::AgreementUpdateRevoked { .. } => "agreement_update_revoked",
            Self::AgreementReconciled { .. } => "agreement_reconciled",
            Self::AgreementRemoved { .. } => "agreement_removed",
            Self::EscrowThawed { .. } => "escrow_thawed",
            Self::EscrowThawReduced { .. } => "escrow_thaw_reduced",
            Self::EscrowWithdrawn { .. } => "escrow_withdrawn",
            Self::OperatorGranted { .. } => "operator_granted",
            Self::OperatorRevoked { .. } => "operator_revoked",
        }
    }
}
