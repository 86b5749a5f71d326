//! Claim arithmetic
//!
//! The largest amount a provider can collect in one go is the initial tokens
//! plus the ongoing rate times the collection window, where the window never
//! exceeds `max_seconds_per_collection`. Multiplication is exact and checked.

use recurring_escrow_types::{AgreementTerms, AgreementUpdate, Result, Timestamp, Tokens};

/// `initial + rate * min(window, max_seconds_per_collection)`
pub fn max_claim(
    max_initial_tokens: Tokens,
    max_ongoing_tokens_per_second: Tokens,
    window: u64,
    max_seconds_per_collection: u64,
) -> Result<Tokens> {
    let seconds = window.min(max_seconds_per_collection);
    max_ongoing_tokens_per_second
        .checked_mul(seconds)?
        .checked_add(max_initial_tokens)
}

/// Worst-case claim for freshly offered terms: a full window plus the initial tokens
pub fn max_claim_for_terms(terms: &AgreementTerms) -> Result<Tokens> {
    max_claim(
        terms.max_initial_tokens,
        terms.max_ongoing_tokens_per_second,
        terms.max_seconds_per_collection,
        terms.max_seconds_per_collection,
    )
}

/// Worst-case claim under the terms of an update proposal
pub fn max_claim_for_update(update: &AgreementUpdate) -> Result<Tokens> {
    max_claim(
        update.max_initial_tokens,
        update.max_ongoing_tokens_per_second,
        update.max_seconds_per_collection,
        update.max_seconds_per_collection,
    )
}

/// Length of the collectable window between `start` and `end`, capped at `max_seconds`
pub fn collection_window(start: Timestamp, end: Timestamp, max_seconds: u64) -> u64 {
    end.saturating_sub(start).min(max_seconds)
}
