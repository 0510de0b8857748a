//! Mock helper/handler pair for exercising the balance store without a
//! node. The helper only answers balances that were registered up front, so
//! an unexpected live lookup fails the test instead of passing silently.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::modules::balances::parser::BalanceChange;
use crate::modules::defs::{BalanceHandler, BalanceHelper, ExemptOperation};
use crate::runtime::cancel::CancelToken;
use crate::schemas::{
    stable_hash, AccountIdentifier, Amount, BalanceExemption, Block, BlockIdentifier, Currency,
    StatusAsserter,
};

pub struct MockHelper {
    live: Mutex<HashMap<(String, String, i64), String>>,
    exemptions: Vec<BalanceExemption>,
    exempt_func: Option<ExemptOperation>,
}

impl MockHelper {
    pub fn new() -> Self {
        Self { live: Mutex::new(HashMap::new()), exemptions: Vec::new(), exempt_func: None }
    }

    pub fn with_exemptions(exemptions: Vec<BalanceExemption>) -> Self {
        Self { live: Mutex::new(HashMap::new()), exemptions, exempt_func: None }
    }

    pub fn with_exempt_func(mut self, exempt_func: ExemptOperation) -> Self {
        self.exempt_func = Some(exempt_func);
        self
    }

    /// Register the balance the node would report for `account` at `block`.
    pub fn set_live_balance(
        &self,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
        value: &str,
    ) {
        let key =
            (stable_hash(account).unwrap(), stable_hash(currency).unwrap(), block.index);
        self.live.lock().unwrap().insert(key, value.to_string());
    }
}

impl Default for MockHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceHelper for MockHelper {
    fn account_balance(
        &self,
        ctx: &CancelToken,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
    ) -> Result<Amount> {
        ctx.check()?;
        let key = (stable_hash(account)?, stable_hash(currency)?, block.index);
        match self.live.lock().unwrap().get(&key) {
            Some(value) => Ok(Amount::new(value.clone(), currency.clone())),
            None => bail!("no live balance registered for {account} at {block}"),
        }
    }

    fn exempt_func(&self) -> Option<ExemptOperation> {
        self.exempt_func.clone()
    }

    fn balance_exemptions(&self) -> Vec<BalanceExemption> {
        self.exemptions.clone()
    }

    fn asserter(&self) -> StatusAsserter {
        StatusAsserter::new(["SUCCESS".to_string()])
    }
}

/// Records every notification it receives so tests can assert on the
/// post-commit stream.
#[derive(Default)]
pub struct RecordingHandler {
    pub added: Mutex<Vec<(Block, Vec<BalanceChange>)>>,
    pub removed: Mutex<Vec<(Block, Vec<BalanceChange>)>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.lock().unwrap().len()
    }
}

impl BalanceHandler for RecordingHandler {
    fn block_added(
        &self,
        ctx: &CancelToken,
        block: &Block,
        changes: &[BalanceChange],
    ) -> Result<()> {
        ctx.check()?;
        self.added.lock().unwrap().push((block.clone(), changes.to_vec()));
        Ok(())
    }

    fn block_removed(
        &self,
        ctx: &CancelToken,
        block: &Block,
        changes: &[BalanceChange],
    ) -> Result<()> {
        ctx.check()?;
        self.removed.lock().unwrap().push((block.clone(), changes.to_vec()));
        Ok(())
    }
}
