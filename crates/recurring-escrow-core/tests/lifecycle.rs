//! Agreement lifecycle tests: offers, updates, revocation, removal,
//! authorization and access control.

use recurring_escrow_core::{ManagerConfig, RecurringCollectionAuthority};
use recurring_escrow_harness::{EscrowSimConfig, OfferShape, TestEnv};
use recurring_escrow_types::{
    Address, AgreementId, Authorization, EscrowError, ManagerEvent, Tokens,
};

fn t(n: u64) -> Tokens {
    Tokens::from_whole(n)
}

fn env() -> TestEnv {
    TestEnv::new().unwrap()
}

fn assert_sum_invariant(env: &TestEnv) {
    assert_eq!(env.sum_invariant_violations().unwrap(), vec![]);
}

// ============================================================================
// Offers
// ============================================================================

#[test]
fn test_offer_tracks_and_authorizes() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let terms_hash = env.collector.hash_terms(&terms);

    let id = env.offer(terms).unwrap();

    assert_eq!(env.manager.required_escrow(&provider), t(3_700));
    assert_eq!(env.manager.provider_agreement_count(&provider), 1);
    assert_eq!(env.manager.agreement_max_next_claim(&id), t(3_700));
    assert_eq!(env.manager.approve_agreement(&terms_hash), Authorization::Approved(id));
    assert!(env.manager.is_authorized_agreement(&terms_hash));
    assert_eq!(
        env.manager.events(),
        &[ManagerEvent::AgreementOffered {
            agreement_id: id,
            provider,
            terms_hash,
            max_next_claim: t(3_700),
        }]
    );
    assert_sum_invariant(&env);
}

#[test]
fn test_duplicate_offer_rejected() {
    let mut env = env();
    let terms = env.standard_terms(TestEnv::provider(1));
    let id = env.offer(terms.clone()).unwrap();

    let err = env.offer(terms).unwrap_err();
    assert_eq!(err, EscrowError::AgreementAlreadyOffered { agreement_id: id });
    assert_eq!(env.manager.required_escrow(&TestEnv::provider(1)), t(3_700));
}

#[test]
fn test_offer_validation() {
    let mut env = env();
    let provider = TestEnv::provider(1);

    let mut terms = env.standard_terms(provider);
    terms.payer = Address::from_low_u64(0xbad);
    assert!(matches!(env.offer(terms), Err(EscrowError::PayerMismatch { .. })));

    let mut terms = env.standard_terms(provider);
    terms.service_provider = Address::ZERO;
    assert_eq!(env.offer(terms).unwrap_err().error_code(), "INVALID_TERMS");

    let mut terms = env.standard_terms(provider);
    terms.data_service = Address::ZERO;
    assert_eq!(env.offer(terms).unwrap_err().error_code(), "INVALID_TERMS");

    let mut terms = env.standard_terms(provider);
    terms.max_seconds_per_collection = 0;
    terms.min_seconds_per_collection = 0;
    assert_eq!(env.offer(terms).unwrap_err().error_code(), "INVALID_TERMS");

    let mut terms = env.standard_terms(provider);
    terms.ends_at = terms.deadline;
    assert_eq!(env.offer(terms).unwrap_err().error_code(), "INVALID_TERMS");

    let terms = env.standard_terms(provider);
    env.advance(3_601);
    assert!(matches!(env.offer(terms), Err(EscrowError::OfferExpired { .. })));

    assert_eq!(env.manager.provider_agreement_count(&provider), 0);
    assert_eq!(env.manager.required_escrow(&provider), Tokens::ZERO);
    assert!(env.manager.events().is_empty());
}

#[test]
fn test_offer_overflow_is_fatal_and_leaves_state() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let mut terms = env.standard_terms(provider);
    terms.max_ongoing_tokens_per_second = Tokens::new(u128::MAX / 2);

    let err = env.offer(terms).unwrap_err();
    assert_eq!(err, EscrowError::AmountOverflow);
    assert!(err.is_fatal());
    assert_eq!(env.manager.provider_agreement_count(&provider), 0);
}

// ============================================================================
// Revocation
// ============================================================================

#[test]
fn test_revoke_unaccepted_offer() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.manager.take_events();

    let operator = env.operator();
    env.manager.revoke_offer(&operator, &id).unwrap();

    assert_eq!(env.manager.required_escrow(&provider), Tokens::ZERO);
    assert_eq!(env.manager.provider_agreement_count(&provider), 0);
    assert_eq!(
        env.manager.events(),
        &[ManagerEvent::OfferRevoked { agreement_id: id, provider }]
    );

    // The collector can no longer get the offer approved
    let err = env.accept(&terms).unwrap_err();
    assert_eq!(err.error_code(), "AGREEMENT_NOT_AUTHORIZED");
}

#[test]
fn test_revoke_accepted_offer_rejected() {
    let mut env = env();
    let terms = env.standard_terms(TestEnv::provider(1));
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let operator = env.operator();
    let err = env.manager.revoke_offer(&operator, &id).unwrap_err();
    assert_eq!(err, EscrowError::AgreementAlreadyAccepted { agreement_id: id });
    assert_eq!(env.manager.provider_agreement_count(&TestEnv::provider(1)), 1);
}

#[test]
fn test_revoke_unknown_offer() {
    let mut env = env();
    let operator = env.operator();
    let ghost = AgreementId::new([7; 16]);
    assert_eq!(
        env.manager.revoke_offer(&operator, &ghost).unwrap_err(),
        EscrowError::AgreementNotOffered { agreement_id: ghost }
    );
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_remove_blocked_while_claimable() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.fund(&provider, 3_700).unwrap();
    env.accept(&terms).unwrap();

    let err = env.manager.remove_agreement(&id).unwrap_err();
    assert_eq!(
        err,
        EscrowError::AgreementStillClaimable {
            agreement_id: id,
            claimable: t(3_700),
        }
    );
    assert!(err.is_retriable());
    assert_eq!(env.manager.provider_agreement_count(&provider), 1);
    assert_eq!(env.manager.required_escrow(&provider), t(3_700));
}

#[test]
fn test_unaccepted_offer_removable_after_deadline() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms).unwrap();

    assert!(matches!(
        env.manager.remove_agreement(&id),
        Err(EscrowError::AgreementStillClaimable { .. })
    ));

    env.advance(3_601);
    env.manager.remove_agreement(&id).unwrap();
    assert_eq!(env.manager.provider_agreement_count(&provider), 0);
    assert_eq!(env.manager.required_escrow(&provider), Tokens::ZERO);
}

#[test]
fn test_payer_cancel_keeps_window_until_collected() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.fund(&provider, 3_700).unwrap();
    env.accept(&terms).unwrap();

    env.advance(600);
    env.collector.cancel_by_payer(&id).unwrap();
    assert!(env.manager.reconcile_agreement(&id).unwrap());
    assert_eq!(env.manager.agreement_max_next_claim(&id), t(700));
    assert_eq!(env.manager.required_escrow(&provider), t(700));

    let err = env.manager.remove_agreement(&id).unwrap_err();
    assert_eq!(
        err,
        EscrowError::AgreementStillClaimable {
            agreement_id: id,
            claimable: t(700),
        }
    );

    env.collector.collect(&id, t(700)).unwrap();
    env.manager.remove_agreement(&id).unwrap();
    assert_eq!(env.manager.required_escrow(&provider), Tokens::ZERO);
}

#[test]
fn test_remove_unknown_agreement() {
    let mut env = env();
    let ghost = AgreementId::new([1; 16]);
    assert_eq!(
        env.manager.remove_agreement(&ghost).unwrap_err(),
        EscrowError::AgreementNotOffered { agreement_id: ghost }
    );
}

#[test]
fn test_reconcile_untracked_is_noop() {
    let mut env = env();
    assert!(!env.manager.reconcile_agreement(&AgreementId::new([2; 16])).unwrap());
    assert!(env.manager.events().is_empty());
}

#[test]
fn test_maintain_rejected_while_tracking() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    env.offer(terms).unwrap();

    let err = env.manager.maintain(&provider).unwrap_err();
    assert_eq!(err, EscrowError::StillHasAgreements { provider, count: 1 });
}

// ============================================================================
// Updates
// ============================================================================

#[test]
fn test_update_reserves_both_until_accepted() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let update = env.update_terms(id, 1, OfferShape::new(200, 2, 3_600));
    env.offer_update(update.clone()).unwrap();
    assert_eq!(env.manager.required_escrow(&provider), t(3_700 + 7_400));
    assert_sum_invariant(&env);

    env.accept_update(&update).unwrap();
    env.manager.take_events();
    assert!(env.manager.reconcile_agreement(&id).unwrap());

    assert_eq!(env.manager.required_escrow(&provider), t(7_400));
    assert_eq!(env.manager.agreement_max_next_claim(&id), t(7_400));
    assert!(env.manager.agreement(&id).unwrap().pending_update.is_none());
    assert_eq!(
        env.manager.events()[0],
        ManagerEvent::AgreementReconciled {
            agreement_id: id,
            provider,
            old_max_next_claim: t(3_700),
            new_max_next_claim: t(7_400),
            pending_cleared: true,
        }
    );
    assert_sum_invariant(&env);
}

#[test]
fn test_update_supersedes_pending() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let first = env.update_terms(id, 1, OfferShape::new(200, 2, 3_600));
    env.offer_update(first.clone()).unwrap();
    let second = env.update_terms(id, 2, OfferShape::new(0, 1, 3_600));
    env.offer_update(second.clone()).unwrap();

    assert_eq!(env.manager.required_escrow(&provider), t(3_700 + 3_600));
    assert_eq!(env.accept_update(&first).unwrap_err().error_code(), "AGREEMENT_NOT_AUTHORIZED");
    env.accept_update(&second).unwrap();
    assert_sum_invariant(&env);
}

#[test]
fn test_update_after_accepted_update_folds_snapshot() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let first = env.update_terms(id, 1, OfferShape::new(200, 2, 3_600));
    env.offer_update(first.clone()).unwrap();
    env.accept_update(&first).unwrap();
    env.manager.take_events();

    // Not reconciled yet: the accepted update becomes the snapshot
    let second = env.update_terms(id, 2, OfferShape::new(0, 1, 3_600));
    env.offer_update(second).unwrap();

    assert_eq!(env.manager.agreement_max_next_claim(&id), t(7_400));
    assert_eq!(env.manager.agreement(&id).unwrap().pending_update.as_ref().unwrap().nonce, 2);
    assert_eq!(env.manager.required_escrow(&provider), t(7_400 + 3_600));
    assert_eq!(
        env.manager.events()[0],
        ManagerEvent::AgreementReconciled {
            agreement_id: id,
            provider,
            old_max_next_claim: t(3_700),
            new_max_next_claim: t(7_400),
            pending_cleared: true,
        }
    );
    assert!(matches!(
        env.manager.events()[1],
        ManagerEvent::AgreementUpdateOffered { nonce: 2, .. }
    ));
    assert_sum_invariant(&env);
}

#[test]
fn test_failed_update_leaves_accepted_pending_untouched() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let first = env.update_terms(id, 1, OfferShape::new(200, 2, 3_600));
    env.offer_update(first.clone()).unwrap();
    env.accept_update(&first).unwrap();
    env.manager.take_events();

    // Fits on its own, overflows once added to the folded snapshot
    let huge = env.update_terms(id, 2, OfferShape::new(8_240_973_594_166_534_393, u64::MAX, 18));
    let err = env.offer_update(huge).unwrap_err();
    assert!(err.is_fatal());

    let record = env.manager.agreement(&id).unwrap();
    assert_eq!(record.max_next_claim, t(3_700));
    assert_eq!(record.pending_update.as_ref().unwrap().nonce, 1);
    assert_eq!(env.manager.required_escrow(&provider), t(3_700 + 7_400));
    assert!(env.manager.events().is_empty());
    assert_sum_invariant(&env);
}

#[test]
fn test_update_nonce_must_advance() {
    let mut env = env();
    let terms = env.standard_terms(TestEnv::provider(1));
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let update = env.update_terms(id, 1, OfferShape::STANDARD);
    env.offer_update(update.clone()).unwrap();
    let err = env.offer_update(env.update_terms(id, 1, OfferShape::STANDARD)).unwrap_err();
    assert!(matches!(err, EscrowError::StaleUpdateNonce { nonce: 1, current: 1, .. }));

    env.accept_update(&update).unwrap();
    env.manager.reconcile_agreement(&id).unwrap();
    let err = env.offer_update(env.update_terms(id, 1, OfferShape::STANDARD)).unwrap_err();
    assert_eq!(err.error_code(), "STALE_UPDATE_NONCE");
}

#[test]
fn test_update_of_canceled_agreement_rejected() {
    let mut env = env();
    let terms = env.standard_terms(TestEnv::provider(1));
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();
    env.collector.cancel_by_provider(&id).unwrap();

    let err = env.offer_update(env.update_terms(id, 1, OfferShape::STANDARD)).unwrap_err();
    assert_eq!(err, EscrowError::AgreementCanceled { agreement_id: id });
}

#[test]
fn test_revoke_pending_update() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    let update = env.update_terms(id, 1, OfferShape::new(200, 2, 3_600));
    env.offer_update(update.clone()).unwrap();

    let operator = env.operator();
    assert!(env.manager.revoke_agreement_update(&operator, &id).unwrap());
    assert_eq!(env.manager.required_escrow(&provider), t(3_700));
    assert!(!env.manager.revoke_agreement_update(&operator, &id).unwrap());
    assert_eq!(env.accept_update(&update).unwrap_err().error_code(), "AGREEMENT_NOT_AUTHORIZED");
    assert_sum_invariant(&env);
}

#[test]
fn test_expired_pending_update_released_on_reconcile() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms.clone()).unwrap();
    env.accept(&terms).unwrap();

    env.offer_update(env.update_terms(id, 1, OfferShape::new(200, 2, 3_600))).unwrap();
    env.advance(3_601);
    env.manager.reconcile_agreement(&id).unwrap();

    assert_eq!(env.manager.required_escrow(&provider), t(3_700));
    assert!(env.manager.agreement(&id).unwrap().pending_update.is_none());
}

// ============================================================================
// Access control
// ============================================================================

#[test]
fn test_operator_only_operations() {
    let mut env = env();
    let stranger = Address::from_low_u64(0xdead);
    let terms = env.standard_terms(TestEnv::provider(1));

    let err = env.manager.offer_agreement(&stranger, terms.clone()).unwrap_err();
    assert_eq!(
        err,
        EscrowError::Unauthorized {
            caller: stranger,
            role: "OPERATOR".to_string(),
        }
    );

    let id = env.offer(terms).unwrap();
    assert_eq!(
        env.manager.revoke_offer(&stranger, &id).unwrap_err().error_code(),
        "UNAUTHORIZED"
    );
    assert_eq!(
        env.manager
            .revoke_agreement_update(&stranger, &id)
            .unwrap_err()
            .error_code(),
        "UNAUTHORIZED"
    );
}

#[test]
fn test_governor_manages_operators() {
    let mut env = env();
    let governor = env.config.governor;
    let newcomer = Address::from_low_u64(0xbeef);

    assert!(env.manager.grant_operator(&newcomer, newcomer).is_err());
    assert!(env.manager.grant_operator(&governor, newcomer).unwrap());
    assert!(env.manager.is_operator(&newcomer));

    let terms = env.standard_terms(TestEnv::provider(1));
    env.manager.offer_agreement(&newcomer, terms).unwrap();

    assert!(env.manager.revoke_operator(&governor, &newcomer).unwrap());
    let terms = env.standard_terms(TestEnv::provider(1));
    assert!(env.manager.offer_agreement(&newcomer, terms).is_err());

    let events = env.manager.take_events();
    assert!(events.contains(&ManagerEvent::OperatorGranted { account: newcomer }));
    assert!(events.contains(&ManagerEvent::OperatorRevoked { account: newcomer }));
}

#[test]
fn test_manager_without_operators() {
    let config = ManagerConfig {
        operators: Vec::new(),
        ..ManagerConfig::development()
    };
    let mut env = TestEnv::with_config(config, EscrowSimConfig::default()).unwrap();
    let terms = env.standard_terms(TestEnv::provider(1));
    assert_eq!(env.offer(terms).unwrap_err().error_code(), "UNAUTHORIZED");
}

#[test]
fn test_invalid_config_rejected() {
    let config = ManagerConfig {
        collector: Address::ZERO,
        ..ManagerConfig::development()
    };
    assert!(TestEnv::with_config(config, EscrowSimConfig::default()).is_err());
}

// ============================================================================
// Snapshot
// ============================================================================

#[test]
fn test_snapshot_serializes() {
    let mut env = env();
    let provider = TestEnv::provider(1);
    let terms = env.standard_terms(provider);
    let id = env.offer(terms).unwrap();

    let snapshot = env.manager.snapshot();
    assert_eq!(snapshot.agreements.len(), 1);
    assert_eq!(snapshot.agreements[0].agreement_id, id);
    assert_eq!(snapshot.required_escrow.get(&provider), Some(&t(3_700)));

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["agreements"][0]["agreement_id"], id.to_string());
}
