mod common;

use std::sync::Arc;

use tally::modules::balances::BalanceError;
use tally::modules::defs::BlockWorker;
use tally::runtime::cancel::CancelToken;
use tally::schemas::BlockIdentifier;
use tally::test_utils::{
    create_test_store, test_account, test_currency, transfer, ChainBuilder, MockHelper,
};
use tally::BalanceStore;

fn seed_account(store: &BalanceStore, helper: &MockHelper, ctx: &CancelToken, addr: &str) {
    let acct = test_account(addr);
    let cur = test_currency("COIN");
    // First change of an unseen account reads the node at the parent.
    helper.set_live_balance(&acct, &cur, &BlockIdentifier::new(0, "g"), "0");

    let chain = ChainBuilder::new().block("h1", vec![transfer(&acct, &cur, "100")]).build();
    let tx = store.kv().transaction(true);
    let _worker = store.adding_block(ctx, &chain[1], &tx).unwrap();
    tx.commit(ctx).unwrap();
}

#[test]
fn cursor_is_monotone_under_out_of_order_reports() {
    let helper = Arc::new(MockHelper::new());
    let (store, _handler, _tmp) = create_test_store(helper.clone());
    let ctx = CancelToken::new();
    let acct = test_account("addr1");
    let cur = test_currency("COIN");
    seed_account(&store, &helper, &ctx, "addr1");

    // Reports arrive out of order; the cursor lands on the maximum.
    for (index, hash) in [(5i64, "h5"), (3, "h3"), (7, "h7"), (6, "h6")] {
        store.reconciled(&ctx, &acct, &cur, &BlockIdentifier::new(index, hash)).unwrap();
    }

    assert_eq!(store.reconciliation_coverage(&ctx, 7).unwrap(), 1.0);
    assert_eq!(store.reconciliation_coverage(&ctx, 8).unwrap(), 0.0);
}

#[test]
fn reconciling_unknown_account_fails() {
    let (store, _handler, _tmp) = create_test_store(Arc::new(MockHelper::new()));
    let ctx = CancelToken::new();

    let err = store
        .reconciled(
            &ctx,
            &test_account("ghost"),
            &test_currency("COIN"),
            &BlockIdentifier::new(1, "h1"),
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BalanceError>(),
        Some(BalanceError::MissingAccount { .. })
    ));
}

#[test]
fn coverage_is_zero_without_accounts() {
    let (store, _handler, _tmp) = create_test_store(Arc::new(MockHelper::new()));
    let ctx = CancelToken::new();
    assert_eq!(store.reconciliation_coverage(&ctx, 0).unwrap(), 0.0);
}

#[test]
fn coverage_counts_only_sufficiently_recent_cursors() {
    let helper = Arc::new(MockHelper::new());
    let (store, _handler, _tmp) = create_test_store(helper.clone());
    let ctx = CancelToken::new();
    let cur = test_currency("COIN");

    for addr in ["a1", "a2", "a3", "a4"] {
        seed_account(&store, &helper, &ctx, addr);
    }

    // a1 reconciled past the minimum, a2 exactly at it, a3 behind it,
    // a4 never reconciled.
    store.reconciled(&ctx, &test_account("a1"), &cur, &BlockIdentifier::new(9, "h9")).unwrap();
    store.reconciled(&ctx, &test_account("a2"), &cur, &BlockIdentifier::new(5, "h5")).unwrap();
    store.reconciled(&ctx, &test_account("a3"), &cur, &BlockIdentifier::new(2, "h2")).unwrap();

    let coverage = store.reconciliation_coverage(&ctx, 5).unwrap();
    assert_eq!(coverage, 0.5);
    assert_eq!(store.reconciliation_coverage(&ctx, 0).unwrap(), 0.75);
}

#[test]
fn all_account_currencies_lists_every_pair_once() {
    let helper = Arc::new(MockHelper::new());
    let (store, _handler, _tmp) = create_test_store(helper.clone());
    let ctx = CancelToken::new();
    let acct = test_account("addr1");
    let coin = test_currency("COIN");
    let token = test_currency("TOKEN");

    let genesis = BlockIdentifier::new(0, "g");
    helper.set_live_balance(&acct, &coin, &genesis, "0");
    helper.set_live_balance(&acct, &token, &genesis, "0");

    let chain = ChainBuilder::new()
        .block("h1", vec![transfer(&acct, &coin, "100"), transfer(&acct, &token, "7")])
        .block("h2", vec![transfer(&acct, &coin, "1")])
        .build();
    for block in &chain[1..] {
        let tx = store.kv().transaction(true);
        let _worker = store.adding_block(&ctx, block, &tx).unwrap();
        tx.commit(&ctx).unwrap();
    }

    let mut pairs: Vec<(String, String)> = store
        .all_account_currencies(&ctx)
        .unwrap()
        .into_iter()
        .map(|ac| (ac.account.address, ac.currency.symbol))
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("addr1".to_string(), "COIN".to_string()),
            ("addr1".to_string(), "TOKEN".to_string())
        ]
    );
}
