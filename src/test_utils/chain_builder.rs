//! Builders for small simulated chains: linked blocks carrying transfer
//! operations, enough to drive the block hooks end to end.

use crate::schemas::{
    AccountIdentifier, Amount, Block, BlockIdentifier, BlockTransaction, Currency, Operation,
    SubAccountIdentifier,
};

pub fn test_account(address: &str) -> AccountIdentifier {
    AccountIdentifier { address: address.into(), sub_account: None, metadata: None }
}

pub fn test_sub_account(address: &str, sub: &str) -> AccountIdentifier {
    AccountIdentifier {
        address: address.into(),
        sub_account: Some(SubAccountIdentifier { address: sub.into(), metadata: None }),
        metadata: None,
    }
}

pub fn test_currency(symbol: &str) -> Currency {
    Currency { symbol: symbol.into(), decimals: 8, metadata: None }
}

/// A successful transfer operation moving `value` on `account`.
pub fn transfer(account: &AccountIdentifier, currency: &Currency, value: &str) -> Operation {
    Operation {
        op_type: "TRANSFER".into(),
        status: Some("SUCCESS".into()),
        account: Some(account.clone()),
        amount: Some(Amount::new(value, currency.clone())),
    }
}

/// Builds a linked chain starting at a genesis block `{0, "g"}`. Each added
/// block's parent is the previous one; hashes are caller-chosen so reorg
/// scenarios can fork freely.
pub struct ChainBuilder {
    blocks: Vec<Block>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        let genesis = Block {
            block_identifier: BlockIdentifier::new(0, "g"),
            parent_block_identifier: BlockIdentifier::new(0, "g"),
            transactions: Vec::new(),
        };
        Self { blocks: vec![genesis] }
    }

    /// Append a block with one transaction holding `ops`.
    pub fn block(mut self, hash: &str, ops: Vec<Operation>) -> Self {
        let parent = self.blocks.last().expect("chain always has genesis").block_identifier.clone();
        let index = parent.index + 1;
        self.blocks.push(Block {
            block_identifier: BlockIdentifier::new(index, hash),
            parent_block_identifier: parent,
            transactions: vec![BlockTransaction {
                hash: format!("tx-{hash}"),
                operations: ops,
            }],
        });
        self
    }

    pub fn build(self) -> Vec<Block> {
        self.blocks
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A standalone block, for scenarios that need an explicit parent (forks,
/// competing tips).
pub fn block_at(
    index: i64,
    hash: &str,
    parent: &BlockIdentifier,
    ops: Vec<Operation>,
) -> Block {
    Block {
        block_identifier: BlockIdentifier::new(index, hash),
        parent_block_identifier: parent.clone(),
        transactions: vec![BlockTransaction { hash: format!("tx-{hash}"), operations: ops }],
    }
}
