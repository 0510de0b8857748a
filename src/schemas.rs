use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sub-account qualifier (staking pools, vesting buckets, and the like).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubAccountIdentifier {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// An on-chain account. Equality for storage purposes is by canonical hash
/// (`stable_hash`), never field-by-field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountIdentifier {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account: Option<SubAccountIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// An asset: symbol plus the number of decimal places its values carry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub symbol: String,
    pub decimals: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A balance: decimal integer string in the currency's smallest unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub value: String,
    pub currency: Currency,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub index: i64,
    pub hash: String,
}

/// One operation inside a transaction. Only successful operations with an
/// account and an amount move balances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockTransaction {
    pub hash: String,
    pub operations: Vec<Operation>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_identifier: BlockIdentifier,
    pub parent_block_identifier: BlockIdentifier,
    pub transactions: Vec<BlockTransaction>,
}

/// An `(account, currency)` pair as stored; used to re-seed a reconciler
/// after restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountCurrency {
    pub account: AccountIdentifier,
    pub currency: Currency,
}

/// Exemption types, matched against the sign of `live - computed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptionType {
    /// Live balance may exceed the computed balance.
    GreaterOrEqual,
    /// Live balance may trail the computed balance.
    LessOrEqual,
    /// Any drift is allowed.
    Dynamic,
}

/// A rule permitting a bounded discrepancy between the computed balance and
/// the authoritative balance reported by a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceExemption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemption_type: Option<ExemptionType>,
}

/// Decides whether an operation counts toward balances. Stand-in for a full
/// response asserter: a status is successful iff it is in the configured set.
#[derive(Clone, Debug, Default)]
pub struct StatusAsserter {
    success_statuses: HashSet<String>,
}

impl StatusAsserter {
    pub fn new(success_statuses: impl IntoIterator<Item = String>) -> Self {
        Self { success_statuses: success_statuses.into_iter().collect() }
    }

    pub fn operation_successful(&self, op: &Operation) -> bool {
        op.status.as_ref().is_some_and(|s| self.success_statuses.contains(s))
    }
}

/// Canonical content hash of a structured identifier: hex-encoded SHA-256
/// over the canonical JSON rendering. Object keys serialize sorted, so the
/// digest is independent of field or metadata insertion order.
pub fn stable_hash<T: Serialize>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value).context("unable to canonicalize identifier")?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Parse a decimal integer string (the only number format stored values use).
pub fn parse_integer(value: &str) -> Result<i128> {
    value.parse::<i128>().with_context(|| format!("{value} is not an integer"))
}

/// `a + b` over decimal integer strings.
pub fn add_values(a: &str, b: &str) -> Result<String> {
    let sum = parse_integer(a)?
        .checked_add(parse_integer(b)?)
        .with_context(|| format!("overflow adding {a} and {b}"))?;
    Ok(sum.to_string())
}

/// `a - b` over decimal integer strings.
pub fn subtract_values(a: &str, b: &str) -> Result<String> {
    let diff = parse_integer(a)?
        .checked_sub(parse_integer(b)?)
        .with_context(|| format!("overflow subtracting {b} from {a}"))?;
    Ok(diff.to_string())
}

impl Amount {
    pub fn new(value: impl Into<String>, currency: Currency) -> Self {
        Self { value: value.into(), currency }
    }

    /// A zero amount in the given currency; what an account reads as before
    /// any observed change.
    pub fn zero(currency: Currency) -> Self {
        Self { value: "0".to_string(), currency }
    }
}

impl BlockIdentifier {
    pub fn new(index: i64, hash: impl Into<String>) -> Self {
        Self { index, hash: hash.into() }
    }
}

impl std::fmt::Display for BlockIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.hash)
    }
}

impl std::fmt::Display for AccountIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sub_account {
            Some(sub) => write!(f, "{}/{}", self.address, sub.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Reject non-integer bootstrap values before they reach storage.
pub fn validate_bootstrap_value(value: &str) -> Result<i128> {
    let parsed = parse_integer(value)?;
    if parsed < 1 {
        bail!("cannot bootstrap zero or negative balance {parsed}");
    }
    Ok(parsed)
}
