//! Range primitives over the historical-balance keyspace. Both walk one
//! `(account, currency)` series, scoped to the caller's transaction.

use anyhow::Result;

use crate::modules::balances::errors::BalanceError;
use crate::modules::balances::storage::{
    historical_balance_key, historical_balance_prefix, BalanceEntry, HISTORICAL_BALANCE_NAMESPACE,
};
use crate::runtime::cancel::CancelToken;
use crate::runtime::kv::{KvTransaction, ScanControl};
use crate::schemas::{AccountIdentifier, Amount, BlockIdentifier, Currency};

/// The balance that held as of `block`: the entry with the greatest index
/// `<=` `block.index`, found by one reverse step from the upper-bound key.
///
/// If the entry sits exactly at `block.index` but under a different hash,
/// a reorg was missed and the series is tainted; that is a fatal
/// [`BalanceError::HashMismatch`]. `None` means the series has no entry at
/// or before the block.
pub fn balance_at_or_before(
    ctx: &CancelToken,
    tx: &KvTransaction<'_>,
    account: &AccountIdentifier,
    currency: &Currency,
    block: &BlockIdentifier,
) -> Result<Option<(Amount, BlockIdentifier)>> {
    let prefix = historical_balance_prefix(account, currency)?;
    let seek = historical_balance_key(account, currency, block.index)?;

    let mut found: Option<(Amount, BlockIdentifier)> = None;
    tx.scan(ctx, &prefix, &seek, true, false, |_k, v| {
        let entry: BalanceEntry = tx.encoder().decode(HISTORICAL_BALANCE_NAMESPACE, v)?;
        if entry.block.index == block.index && entry.block.hash != block.hash {
            return Err(
                BalanceError::HashMismatch { wanted: block.clone(), found: entry.block }.into()
            );
        }
        found = Some((entry.amount, entry.block));
        Ok(ScanControl::Stop)
    })?;

    Ok(found)
}

/// Delete every entry of the series with index `>= from_index`. A negative
/// `from_index` wipes the whole series. Keys are collected first and
/// deleted after the scan ends, so the iterator is never invalidated.
/// Returns how many entries were removed.
pub fn remove_balances_from(
    ctx: &CancelToken,
    tx: &KvTransaction<'_>,
    account: &AccountIdentifier,
    currency: &Currency,
    from_index: i64,
) -> Result<usize> {
    let prefix = historical_balance_prefix(account, currency)?;
    let seek = if from_index < 0 {
        prefix.clone()
    } else {
        historical_balance_key(account, currency, from_index)?
    };

    let mut doomed: Vec<Vec<u8>> = Vec::new();
    tx.scan(ctx, &prefix, &seek, false, false, |k, _v| {
        doomed.push(k.to_vec());
        Ok(ScanControl::Continue)
    })?;

    let removed = doomed.len();
    for key in doomed {
        tx.delete(&key)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::kv::Kv;
    use tempfile::TempDir;

    fn create_test_kv() -> (Kv, TempDir) {
        let tmp = TempDir::new().unwrap();
        let kv = Kv::open_with_cache(tmp.path(), b"balances:", 1 << 20).unwrap();
        (kv, tmp)
    }

    fn account(addr: &str) -> AccountIdentifier {
        AccountIdentifier { address: addr.into(), sub_account: None, metadata: None }
    }

    fn currency(symbol: &str) -> Currency {
        Currency { symbol: symbol.into(), decimals: 8, metadata: None }
    }

    fn write_entry(tx: &KvTransaction<'_>, addr: &str, value: &str, index: i64, hash: &str) {
        let acct = account(addr);
        let cur = currency("COIN");
        let entry = BalanceEntry {
            account: acct.clone(),
            amount: Amount::new(value, cur.clone()),
            block: BlockIdentifier::new(index, hash),
        };
        let key = historical_balance_key(&acct, &cur, index).unwrap();
        let bytes = tx.encoder().encode(HISTORICAL_BALANCE_NAMESPACE, &entry).unwrap();
        tx.set(&key, bytes).unwrap();
    }

    #[test]
    fn test_at_or_before_picks_greatest_not_after() {
        let (kv, _tmp) = create_test_kv();
        let ctx = CancelToken::new();
        let tx = kv.transaction(true);
        write_entry(&tx, "addr1", "100", 1, "h1");
        write_entry(&tx, "addr1", "70", 5, "h5");

        let acct = account("addr1");
        let cur = currency("COIN");

        let (amount, block) =
            balance_at_or_before(&ctx, &tx, &acct, &cur, &BlockIdentifier::new(3, "h3"))
                .unwrap()
                .unwrap();
        assert_eq!(amount.value, "100");
        assert_eq!(block.index, 1);

        let (amount, _) =
            balance_at_or_before(&ctx, &tx, &acct, &cur, &BlockIdentifier::new(5, "h5"))
                .unwrap()
                .unwrap();
        assert_eq!(amount.value, "70");

        // Nothing at or before index 0.
        assert!(balance_at_or_before(&ctx, &tx, &acct, &cur, &BlockIdentifier::new(0, "g"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_at_or_before_detects_orphaned_hash() {
        let (kv, _tmp) = create_test_kv();
        let ctx = CancelToken::new();
        let tx = kv.transaction(true);
        write_entry(&tx, "addr1", "100", 5, "h5");

        let err = balance_at_or_before(
            &ctx,
            &tx,
            &account("addr1"),
            &currency("COIN"),
            &BlockIdentifier::new(5, "h5-prime"),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BalanceError>(),
            Some(BalanceError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_from_index_onward() {
        let (kv, _tmp) = create_test_kv();
        let ctx = CancelToken::new();
        let tx = kv.transaction(true);
        for (value, index) in [("100", 1i64), ("130", 2), ("70", 3)] {
            write_entry(&tx, "addr1", value, index, &format!("h{index}"));
        }

        let acct = account("addr1");
        let cur = currency("COIN");
        let removed = remove_balances_from(&ctx, &tx, &acct, &cur, 2).unwrap();
        assert_eq!(removed, 2);

        let (amount, block) =
            balance_at_or_before(&ctx, &tx, &acct, &cur, &BlockIdentifier::new(9, "h9"))
                .unwrap()
                .unwrap();
        assert_eq!(amount.value, "100");
        assert_eq!(block.index, 1);
    }

    #[test]
    fn test_remove_all_with_negative_index() {
        let (kv, _tmp) = create_test_kv();
        let ctx = CancelToken::new();
        let tx = kv.transaction(true);
        for (value, index) in [("100", 1i64), ("130", 2)] {
            write_entry(&tx, "addr1", value, index, &format!("h{index}"));
        }

        let acct = account("addr1");
        let cur = currency("COIN");
        assert_eq!(remove_balances_from(&ctx, &tx, &acct, &cur, -1).unwrap(), 2);
        assert!(balance_at_or_before(&ctx, &tx, &acct, &cur, &BlockIdentifier::new(9, "h9"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_remove_leaves_other_series_alone() {
        let (kv, _tmp) = create_test_kv();
        let ctx = CancelToken::new();
        let tx = kv.transaction(true);
        write_entry(&tx, "addr1", "100", 1, "h1");
        write_entry(&tx, "addr2", "500", 1, "h1");

        remove_balances_from(&ctx, &tx, &account("addr1"), &currency("COIN"), -1).unwrap();

        let survivor = balance_at_or_before(
            &ctx,
            &tx,
            &account("addr2"),
            &currency("COIN"),
            &BlockIdentifier::new(1, "h1"),
        )
        .unwrap();
        assert!(survivor.is_some());
    }
}
