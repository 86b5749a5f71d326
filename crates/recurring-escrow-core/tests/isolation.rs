//! Operations on one provider never touch another provider's state

use recurring_escrow_harness::{OfferShape, TestEnv};
use recurring_escrow_types::{Address, EscrowAccount, Tokens};

#[derive(Debug, PartialEq, Eq)]
struct ProviderView {
    required: Tokens,
    count: usize,
    account: EscrowAccount,
}

fn view(env: &TestEnv, provider: &Address) -> ProviderView {
    ProviderView {
        required: env.manager.required_escrow(provider),
        count: env.manager.provider_agreement_count(provider),
        account: env.account(provider).unwrap(),
    }
}

#[test]
fn test_multi_provider_isolation() {
    let mut env = TestEnv::new().unwrap();
    let x = TestEnv::provider(1);
    let y = TestEnv::provider(2);

    // Y has an accepted, funded agreement and a thaw in progress
    let y_terms = env.standard_terms(y);
    env.offer(y_terms.clone()).unwrap();
    env.fund(&y, 5_000).unwrap();
    env.accept(&y_terms).unwrap();
    env.manager.reconcile_provider(&y).unwrap();
    let y_before = view(&env, &y);
    assert_eq!(y_before.account.tokens_thawing, Tokens::from_whole(1_300));

    let x_terms = env.standard_terms(x);
    let x_id = env.offer(x_terms.clone()).unwrap();
    assert_eq!(view(&env, &y), y_before);

    env.fund(&x, 10_000).unwrap();
    env.accept(&x_terms).unwrap();
    env.manager.reconcile_agreement(&x_id).unwrap();
    assert_eq!(view(&env, &y), y_before);

    let update = env.update_terms(x_id, 1, OfferShape::new(0, 2, 3_600));
    env.offer_update(update.clone()).unwrap();
    assert_eq!(view(&env, &y), y_before);

    env.accept_update(&update).unwrap();
    env.manager.reconcile_provider(&x).unwrap();
    assert_eq!(view(&env, &y), y_before);

    env.collector.cancel_by_provider(&x_id).unwrap();
    env.manager.remove_agreement(&x_id).unwrap();
    assert_eq!(view(&env, &y), y_before);

    let x_other = env.standard_terms(x);
    let x_other_id = env.offer(x_other).unwrap();
    let operator = env.operator();
    env.manager.revoke_offer(&operator, &x_other_id).unwrap();
    assert_eq!(view(&env, &y), y_before);

    env.manager.maintain(&x).unwrap();
    assert_eq!(view(&env, &y), y_before);
    assert_eq!(env.manager.provider_agreement_count(&x), 0);
    assert_eq!(env.manager.required_escrow(&x), Tokens::ZERO);
    assert!(env.sum_invariant_violations().unwrap().is_empty());
}

#[test]
fn test_failed_operation_on_one_provider_leaves_other() {
    let mut env = TestEnv::new().unwrap();
    let x = TestEnv::provider(1);
    let y = TestEnv::provider(2);

    let y_terms = env.standard_terms(y);
    env.offer(y_terms).unwrap();
    let x_terms = env.standard_terms(x);
    let x_id = env.offer(x_terms.clone()).unwrap();
    env.accept(&x_terms).unwrap();
    let y_before = view(&env, &y);

    assert!(env.manager.remove_agreement(&x_id).is_err());
    assert!(env.manager.maintain(&x).is_err());
    assert_eq!(view(&env, &y), y_before);
}
