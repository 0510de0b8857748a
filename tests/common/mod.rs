// Shared helpers for integration tests.

use tally::modules::balances::storage::{
    historical_balance_prefix, BalanceEntry, HISTORICAL_BALANCE_NAMESPACE,
};
use tally::runtime::cancel::CancelToken;
use tally::runtime::kv::{Kv, ScanControl};
use tally::schemas::{AccountIdentifier, Currency};

/// Every stored `(block_index, value)` of one series, in key order.
#[allow(dead_code)]
pub fn series_entries(
    kv: &Kv,
    account: &AccountIdentifier,
    currency: &Currency,
) -> Vec<(i64, String)> {
    let ctx = CancelToken::new();
    let tx = kv.transaction(false);
    let prefix = historical_balance_prefix(account, currency).unwrap();

    let mut entries = Vec::new();
    tx.scan(&ctx, &prefix, &prefix, false, false, |_k, v| {
        let entry: BalanceEntry = tx.encoder().decode(HISTORICAL_BALANCE_NAMESPACE, v).unwrap();
        entries.push((entry.block.index, entry.amount.value));
        Ok(ScanControl::Continue)
    })
    .unwrap();
    entries
}

/// Raw `(key, value)` dump of one series, for before/after comparisons.
#[allow(dead_code)]
pub fn series_raw(
    kv: &Kv,
    account: &AccountIdentifier,
    currency: &Currency,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let ctx = CancelToken::new();
    let tx = kv.transaction(false);
    let prefix = historical_balance_prefix(account, currency).unwrap();

    let mut raw = Vec::new();
    tx.scan(&ctx, &prefix, &prefix, false, false, |k, v| {
        raw.push((k.to_vec(), v.to_vec()));
        Ok(ScanControl::Continue)
    })
    .unwrap();
    raw
}
