use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::schemas::{stable_hash, AccountIdentifier, Amount, BlockIdentifier, Currency};

/// Namespace prefix for per-account records.
pub const ACCOUNT_NAMESPACE: &str = "account";

/// Namespace prefix for historical balance records.
pub const HISTORICAL_BALANCE_NAMESPACE: &str = "balance";

// account/{H(account)}/{H(currency)}
pub fn account_key(account: &AccountIdentifier, currency: &Currency) -> Result<Vec<u8>> {
    Ok(format!("{}/{}/{}", ACCOUNT_NAMESPACE, stable_hash(account)?, stable_hash(currency)?)
        .into_bytes())
}

// balance/{H(account)}/{H(currency)}/{index:020}
//
// Indices are zero-padded to 20 decimal digits so lexicographic key order
// equals numeric order over the non-negative int64 range.
pub fn historical_balance_key(
    account: &AccountIdentifier,
    currency: &Currency,
    block_index: i64,
) -> Result<Vec<u8>> {
    Ok(format!(
        "{}/{}/{}/{:020}",
        HISTORICAL_BALANCE_NAMESPACE,
        stable_hash(account)?,
        stable_hash(currency)?,
        block_index
    )
    .into_bytes())
}

/// Prefix covering every historical balance of one `(account, currency)`
/// pair; bounds range scans to a single series.
pub fn historical_balance_prefix(
    account: &AccountIdentifier,
    currency: &Currency,
) -> Result<Vec<u8>> {
    Ok(format!(
        "{}/{}/{}/",
        HISTORICAL_BALANCE_NAMESPACE,
        stable_hash(account)?,
        stable_hash(currency)?
    )
    .into_bytes())
}

/// One record per `(account, currency)` pair ever stored. Never deleted;
/// only the reconciliation cursor mutates after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub account: AccountIdentifier,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<BlockIdentifier>,
}

/// The balance an account held at a particular block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub account: AccountIdentifier,
    pub amount: Amount,
    pub block: BlockIdentifier,
}
