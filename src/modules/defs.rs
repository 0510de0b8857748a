use std::sync::Arc;

use anyhow::Result;

use crate::modules::balances::parser::BalanceChange;
use crate::runtime::cancel::CancelToken;
use crate::runtime::kv::KvTransaction;
use crate::schemas::{
    AccountIdentifier, Amount, BalanceExemption, Block, BlockIdentifier, Currency, Operation,
    StatusAsserter,
};

/// Predicate marking operations whose effects the node accounts for out of
/// band (e.g. implicit fee burns); the parser skips them.
pub type ExemptOperation = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Deferred post-commit callback returned by the block hooks. The caller
/// commits the transaction first and invokes this iff the commit succeeded;
/// on rollback it must never run.
pub type CommitWorker = Box<dyn FnOnce(&CancelToken) -> Result<()> + Send>;

/// Source of authoritative balances and exemption configuration. Usually
/// backed by a node RPC; a datastore works too.
pub trait BalanceHelper: Send + Sync {
    /// Balance of `account` in `currency` as of `block`, from the
    /// authoritative source. Remote errors propagate unchanged.
    fn account_balance(
        &self,
        ctx: &CancelToken,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
    ) -> Result<Amount>;

    fn exempt_func(&self) -> Option<ExemptOperation> {
        None
    }

    fn balance_exemptions(&self) -> Vec<BalanceExemption> {
        Vec::new()
    }

    fn asserter(&self) -> StatusAsserter;
}

/// Consumes post-commit notifications for balance changes.
pub trait BalanceHandler: Send + Sync {
    fn block_added(&self, ctx: &CancelToken, block: &Block, changes: &[BalanceChange])
        -> Result<()>;

    fn block_removed(
        &self,
        ctx: &CancelToken,
        block: &Block,
        changes: &[BalanceChange],
    ) -> Result<()>;
}

/// The forward/backward hooks the block synchronizer drives. Both run
/// inside the caller's transaction and return the deferred notification.
pub trait BlockWorker: Send + Sync {
    fn adding_block(
        &self,
        ctx: &CancelToken,
        block: &Block,
        tx: &KvTransaction<'_>,
    ) -> Result<CommitWorker>;

    fn removing_block(
        &self,
        ctx: &CancelToken,
        block: &Block,
        tx: &KvTransaction<'_>,
    ) -> Result<CommitWorker>;
}
