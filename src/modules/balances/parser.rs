use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::modules::defs::ExemptOperation;
use crate::runtime::cancel::CancelToken;
use crate::schemas::{
    parse_integer, stable_hash, AccountIdentifier, BalanceExemption, Block, BlockIdentifier,
    Currency, StatusAsserter,
};

/// A signed delta applied to an `(account, currency)` pair at a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account: AccountIdentifier,
    pub currency: Currency,
    pub block: BlockIdentifier,
    pub difference: String,
}

/// Turns blocks into balance deltas. Built once at engine initialization
/// from the helper's accessors.
pub struct ChangeParser {
    asserter: StatusAsserter,
    exempt_func: Option<ExemptOperation>,
    exemptions: Vec<BalanceExemption>,
}

impl ChangeParser {
    pub fn new(
        asserter: StatusAsserter,
        exempt_func: Option<ExemptOperation>,
        exemptions: Vec<BalanceExemption>,
    ) -> Self {
        Self { asserter, exempt_func, exemptions }
    }

    /// Aggregate the block's successful operations into one change per
    /// `(account, currency)` pair. In reverse mode every delta is negated,
    /// which is what removing the block should apply.
    ///
    /// Output order is deterministic (sorted by identifier hashes).
    pub fn balance_changes(
        &self,
        ctx: &CancelToken,
        block: &Block,
        reverse: bool,
    ) -> Result<Vec<BalanceChange>> {
        let mut merged: BTreeMap<(String, String), (AccountIdentifier, Currency, i128)> =
            BTreeMap::new();

        for tx in &block.transactions {
            ctx.check()?;
            for op in &tx.operations {
                if !self.asserter.operation_successful(op) {
                    continue;
                }
                let (Some(account), Some(amount)) = (&op.account, &op.amount) else {
                    continue;
                };
                if let Some(exempt) = &self.exempt_func {
                    if exempt(op) {
                        continue;
                    }
                }

                let mut delta = parse_integer(&amount.value)
                    .with_context(|| format!("bad amount in transaction {}", tx.hash))?;
                if reverse {
                    delta = delta
                        .checked_neg()
                        .with_context(|| format!("cannot negate {}", amount.value))?;
                }

                let key = (stable_hash(account)?, stable_hash(&amount.currency)?);
                match merged.entry(key) {
                    Entry::Occupied(mut entry) => {
                        let (_, _, total) = entry.get_mut();
                        *total = total
                            .checked_add(delta)
                            .with_context(|| format!("overflow in transaction {}", tx.hash))?;
                    }
                    Entry::Vacant(slot) => {
                        slot.insert((account.clone(), amount.currency.clone(), delta));
                    }
                }
            }
        }

        Ok(merged
            .into_values()
            .map(|(account, currency, total)| BalanceChange {
                account,
                currency,
                block: block.block_identifier.clone(),
                difference: total.to_string(),
            })
            .collect())
    }

    /// Exemptions applicable to this `(account, currency)` pair. Currency
    /// comparison is by canonical hash, like everywhere else.
    pub fn find_exemptions(
        &self,
        account: &AccountIdentifier,
        currency: &Currency,
    ) -> Result<Vec<BalanceExemption>> {
        let currency_hash = stable_hash(currency)?;
        let mut applicable = Vec::new();
        for exemption in &self.exemptions {
            let currency_matches = match &exemption.currency {
                Some(c) => stable_hash(c)? == currency_hash,
                None => true,
            };
            let account_matches = match &exemption.sub_account_address {
                Some(addr) => {
                    account.sub_account.as_ref().is_some_and(|sub| sub.address == *addr)
                }
                None => true,
            };
            if currency_matches && account_matches {
                applicable.push(exemption.clone());
            }
        }
        Ok(applicable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Amount, BlockTransaction, ExemptionType, Operation, SubAccountIdentifier};
    use std::sync::Arc;

    fn account(addr: &str) -> AccountIdentifier {
        AccountIdentifier { address: addr.into(), sub_account: None, metadata: None }
    }

    fn currency(symbol: &str) -> Currency {
        Currency { symbol: symbol.into(), decimals: 8, metadata: None }
    }

    fn op(addr: &str, value: &str, status: &str) -> Operation {
        Operation {
            op_type: "TRANSFER".into(),
            status: Some(status.into()),
            account: Some(account(addr)),
            amount: Some(Amount::new(value, currency("COIN"))),
        }
    }

    fn block(ops: Vec<Operation>) -> Block {
        Block {
            block_identifier: BlockIdentifier::new(1, "h1"),
            parent_block_identifier: BlockIdentifier::new(0, "g"),
            transactions: vec![BlockTransaction { hash: "tx1".into(), operations: ops }],
        }
    }

    fn parser() -> ChangeParser {
        ChangeParser::new(StatusAsserter::new(["SUCCESS".to_string()]), None, Vec::new())
    }

    #[test]
    fn test_merges_ops_per_account() {
        let ctx = CancelToken::new();
        let b = block(vec![op("addr1", "100", "SUCCESS"), op("addr1", "-30", "SUCCESS")]);
        let changes = parser().balance_changes(&ctx, &b, false).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].difference, "70");
        assert_eq!(changes[0].block, b.block_identifier);
    }

    #[test]
    fn test_skips_failed_and_accountless_ops() {
        let ctx = CancelToken::new();
        let mut orphan_op = op("addr2", "55", "SUCCESS");
        orphan_op.account = None;
        let b = block(vec![op("addr1", "100", "FAILURE"), orphan_op]);
        assert!(parser().balance_changes(&ctx, &b, false).unwrap().is_empty());
    }

    #[test]
    fn test_reverse_negates() {
        let ctx = CancelToken::new();
        let b = block(vec![op("addr1", "100", "SUCCESS")]);
        let changes = parser().balance_changes(&ctx, &b, true).unwrap();
        assert_eq!(changes[0].difference, "-100");
    }

    #[test]
    fn test_exempt_func_filters_ops() {
        let ctx = CancelToken::new();
        let exempt: ExemptOperation = Arc::new(|op: &Operation| op.op_type == "MINT");
        let p = ChangeParser::new(
            StatusAsserter::new(["SUCCESS".to_string()]),
            Some(exempt),
            Vec::new(),
        );
        let mut mint = op("addr1", "100", "SUCCESS");
        mint.op_type = "MINT".into();
        let b = block(vec![mint, op("addr1", "25", "SUCCESS")]);
        let changes = p.balance_changes(&ctx, &b, false).unwrap();
        assert_eq!(changes[0].difference, "25");
    }

    #[test]
    fn test_find_exemptions_filters_by_currency_and_sub_account() {
        let p = ChangeParser::new(
            StatusAsserter::new(["SUCCESS".to_string()]),
            None,
            vec![
                BalanceExemption {
                    sub_account_address: None,
                    currency: Some(currency("COIN")),
                    exemption_type: Some(ExemptionType::Dynamic),
                },
                BalanceExemption {
                    sub_account_address: Some("staked".into()),
                    currency: None,
                    exemption_type: Some(ExemptionType::GreaterOrEqual),
                },
            ],
        );

        let plain = p.find_exemptions(&account("addr1"), &currency("COIN")).unwrap();
        assert_eq!(plain.len(), 1);

        let staked = AccountIdentifier {
            address: "addr1".into(),
            sub_account: Some(SubAccountIdentifier { address: "staked".into(), metadata: None }),
            metadata: None,
        };
        let both = p.find_exemptions(&staked, &currency("COIN")).unwrap();
        assert_eq!(both.len(), 2);

        let other = p.find_exemptions(&account("addr1"), &currency("TOKEN")).unwrap();
        assert!(other.is_empty());
    }
}
