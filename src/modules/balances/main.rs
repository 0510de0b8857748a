use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::modules::balances::errors::BalanceError;
use crate::modules::balances::exemptions::match_balance_exemption;
use crate::modules::balances::history;
use crate::modules::balances::parser::{BalanceChange, ChangeParser};
use crate::modules::balances::storage::{
    account_key, historical_balance_key, AccountEntry, BalanceEntry, ACCOUNT_NAMESPACE,
    HISTORICAL_BALANCE_NAMESPACE,
};
use crate::modules::defs::{BalanceHandler, BalanceHelper, BlockWorker, CommitWorker};
use crate::runtime::cancel::CancelToken;
use crate::runtime::kv::{Kv, KvTransaction, ScanControl};
use crate::schemas::{
    add_values, parse_integer, subtract_values, validate_bootstrap_value, AccountCurrency,
    AccountIdentifier, Amount, BalanceExemption, Block, BlockIdentifier, Currency,
};

/// A genesis allocation: the balance an account starts with before any
/// observed change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapBalance {
    pub account_identifier: AccountIdentifier,
    pub currency: Currency,
    pub value: String,
}

/// A prefunded account imported at an arbitrary block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportedBalance {
    pub account: AccountIdentifier,
    pub amount: Amount,
    pub block: BlockIdentifier,
}

/// The balance store: full historical balance series per
/// `(account, currency)` pair plus a reconciliation cursor, kept consistent
/// with the chain's add/remove event sequence.
///
/// All mutations run inside a caller- or self-supplied [`Kv`] transaction;
/// the store owns every write to the `account/` and `balance/` keyspaces
/// but never commits a caller's transaction.
pub struct BalanceStore {
    kv: Arc<Kv>,
    helper: OnceLock<Arc<dyn BalanceHelper>>,
    handler: OnceLock<Arc<dyn BalanceHandler>>,
    parser: OnceLock<Arc<ChangeParser>>,
}

impl BalanceStore {
    pub fn new(kv: Arc<Kv>) -> Self {
        Self {
            kv,
            helper: OnceLock::new(),
            handler: OnceLock::new(),
            parser: OnceLock::new(),
        }
    }

    /// Install the helper and handler and build the change parser from the
    /// helper's accessors. Must be called exactly once, before syncing;
    /// later operations never re-read the accessors.
    pub fn initialize(
        &self,
        helper: Arc<dyn BalanceHelper>,
        handler: Arc<dyn BalanceHandler>,
    ) -> Result<()> {
        let parser = ChangeParser::new(
            helper.asserter(),
            helper.exempt_func(),
            helper.balance_exemptions(),
        );
        if self.helper.set(helper).is_err() {
            return Err(BalanceError::AlreadyInitialized.into());
        }
        let _ = self.handler.set(handler);
        let _ = self.parser.set(Arc::new(parser));
        Ok(())
    }

    pub fn kv(&self) -> &Arc<Kv> {
        &self.kv
    }

    fn helper(&self) -> Result<&Arc<dyn BalanceHelper>> {
        self.helper.get().ok_or_else(|| BalanceError::NotInitialized.into())
    }

    fn handler(&self) -> Result<&Arc<dyn BalanceHandler>> {
        self.handler.get().ok_or_else(|| BalanceError::NotInitialized.into())
    }

    fn parser(&self) -> Result<&Arc<ChangeParser>> {
        self.parser.get().ok_or_else(|| BalanceError::NotInitialized.into())
    }

    /// Apply one balance change inside `tx`.
    ///
    /// Fails with [`BalanceError::DuplicateUpdate`] if the series already
    /// holds an entry at or past the change's index; reorgs must go through
    /// [`BalanceStore::orphan_balance`] instead.
    pub fn update_balance(
        &self,
        ctx: &CancelToken,
        tx: &KvTransaction<'_>,
        change: &BalanceChange,
        parent_block: &BlockIdentifier,
    ) -> Result<()> {
        ctx.check()?;

        let key = account_key(&change.account, &change.currency)?;
        let exists = tx.get(&key)?.is_some();

        // None iff the account was never stored; an existing account with
        // no entry at or before this block reads as "0".
        let mut stored: Option<String> = None;
        if exists {
            match history::balance_at_or_before(
                ctx,
                tx,
                &change.account,
                &change.currency,
                &change.block,
            )? {
                Some((amount, last_update)) => {
                    if last_update.index >= change.block.index {
                        return Err(BalanceError::DuplicateUpdate {
                            account: change.account.to_string(),
                            block: change.block.clone(),
                        }
                        .into());
                    }
                    stored = Some(amount.value);
                }
                None => stored = Some("0".to_string()),
            }
        }

        let exemptions = self.parser()?.find_exemptions(&change.account, &change.currency)?;
        let existing = self.existing_value(ctx, change, parent_block, stored, &exemptions)?;

        let new_value = add_values(&change.difference, &existing)
            .context("unable to add balance change to existing value")?;
        let parsed = match parse_integer(&new_value) {
            Ok(v) => v,
            Err(_) => return Err(BalanceError::InvalidNumber { value: new_value }.into()),
        };
        if parsed < 0 {
            return Err(BalanceError::NegativeBalance {
                account: change.account.to_string(),
                value: new_value,
                block: change.block.clone(),
            }
            .into());
        }

        if !exists {
            let entry = AccountEntry {
                account: change.account.clone(),
                currency: change.currency.clone(),
                last_reconciled: None,
            };
            tx.set(&key, tx.encoder().encode(ACCOUNT_NAMESPACE, &entry)?)?;
        }

        let entry = BalanceEntry {
            account: change.account.clone(),
            amount: Amount::new(new_value, change.currency.clone()),
            block: change.block.clone(),
        };
        let hist_key =
            historical_balance_key(&change.account, &change.currency, change.block.index)?;
        tx.set(&hist_key, tx.encoder().encode(HISTORICAL_BALANCE_NAMESPACE, &entry)?)?;

        Ok(())
    }

    /// Resolve the balance the change applies on top of.
    ///
    /// A brand-new account whose change sits right on top of the parent
    /// starts from "0" (querying the helper here would read the block being
    /// processed). An existing balance with no applicable exemptions is
    /// taken as-is. Otherwise the helper is consulted, and a stored value
    /// that disagrees with the live one must be covered by an exemption —
    /// the series then reseeds to the live value.
    fn existing_value(
        &self,
        ctx: &CancelToken,
        change: &BalanceChange,
        parent_block: &BlockIdentifier,
        stored: Option<String>,
        exemptions: &[BalanceExemption],
    ) -> Result<String> {
        if stored.is_none() && change.block.hash == parent_block.hash {
            return Ok("0".to_string());
        }

        if let Some(stored) = &stored {
            if exemptions.is_empty() {
                return Ok(stored.clone());
            }
        }

        let live = self
            .helper()?
            .account_balance(ctx, &change.account, &change.currency, parent_block)
            .with_context(|| {
                format!(
                    "unable to get previous account balance for {} {} at {}",
                    change.account, change.currency.symbol, parent_block
                )
            })?;

        let Some(stored) = stored else {
            return Ok(live.value);
        };

        let difference = subtract_values(&live.value, &stored)
            .context("unable to calculate difference between live and computed balances")?;
        if match_balance_exemption(exemptions, &difference).is_none() {
            return Err(BalanceError::InvalidLiveBalance {
                account: change.account.to_string(),
                difference,
                block: parent_block.clone(),
            }
            .into());
        }

        Ok(live.value)
    }

    /// Drop every stored state of the series at blocks `>= block.index`.
    /// The account entry survives; only history is rolled back.
    pub fn orphan_balance(
        &self,
        ctx: &CancelToken,
        tx: &KvTransaction<'_>,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
    ) -> Result<()> {
        history::remove_balances_from(ctx, tx, account, currency, block.index)?;
        Ok(())
    }

    /// Overwrite the series with a single known balance, removing all
    /// historical states first. This is the bootstrap/import path and
    /// bypasses normal history accounting.
    pub fn set_balance(
        &self,
        ctx: &CancelToken,
        tx: &KvTransaction<'_>,
        account: &AccountIdentifier,
        amount: &Amount,
        block: &BlockIdentifier,
    ) -> Result<()> {
        history::remove_balances_from(ctx, tx, account, &amount.currency, -1)?;

        let entry = AccountEntry {
            account: account.clone(),
            currency: amount.currency.clone(),
            last_reconciled: None,
        };
        let key = account_key(account, &amount.currency)?;
        tx.set(&key, tx.encoder().encode(ACCOUNT_NAMESPACE, &entry)?)?;

        let entry = BalanceEntry {
            account: account.clone(),
            amount: amount.clone(),
            block: block.clone(),
        };
        let key = historical_balance_key(account, &amount.currency, block.index)?;
        tx.set(&key, tx.encoder().encode(HISTORICAL_BALANCE_NAMESPACE, &entry)?)?;

        Ok(())
    }

    /// Balance of `account` as of `block`, in a fresh transaction. Opens
    /// read-write because an account this store has never seen is fetched
    /// from the helper and persisted before returning.
    pub fn get_balance(
        &self,
        ctx: &CancelToken,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
    ) -> Result<Amount> {
        let tx = self.kv.transaction(true);
        let amount = self
            .get_balance_transactional(ctx, &tx, account, currency, block)
            .context("unable to get balance")?;
        tx.commit(ctx).context("unable to commit account balance transaction")?;
        Ok(amount)
    }

    /// Like [`BalanceStore::get_balance`] but inside the caller's
    /// transaction; committing is the caller's responsibility.
    pub fn get_balance_transactional(
        &self,
        ctx: &CancelToken,
        tx: &KvTransaction<'_>,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
    ) -> Result<Amount> {
        ctx.check()?;

        let key = account_key(account, currency)?;
        if tx.get(&key)?.is_none() {
            // Syncing may have started past this account's first activity;
            // fall back to the node and cache what it reports.
            let amount = self
                .helper()?
                .account_balance(ctx, account, currency, block)
                .context("unable to get account balance from helper")?;
            self.set_balance(ctx, tx, account, &amount, block)
                .context("unable to set account balance")?;
            return Ok(amount);
        }

        match history::balance_at_or_before(ctx, tx, account, currency, block)? {
            Some((amount, _)) => Ok(amount),
            // Account known but no entry at or before this block: read as
            // zero, i.e. before any observed change. If syncing starts
            // after genesis this can understate old balances.
            None => Ok(Amount::zero(currency.clone())),
        }
    }

    /// Seed genesis allocations. Values must be strictly positive integers;
    /// everything runs in one transaction committed once.
    pub fn bootstrap_balances(
        &self,
        ctx: &CancelToken,
        balances: &[BootstrapBalance],
        genesis_block: &BlockIdentifier,
    ) -> Result<()> {
        let tx = self.kv.transaction(true);

        for balance in balances {
            ctx.check()?;
            validate_bootstrap_value(&balance.value)?;

            eprintln!(
                "[balances] setting account {} balance to {} {}",
                balance.account_identifier, balance.value, balance.currency.symbol
            );

            self.set_balance(
                ctx,
                &tx,
                &balance.account_identifier,
                &Amount::new(balance.value.clone(), balance.currency.clone()),
                genesis_block,
            )?;
        }

        tx.commit(ctx)?;
        eprintln!("[balances] {} balances bootstrapped", balances.len());
        Ok(())
    }

    /// Import prefunded accounts at whatever block their balance was read.
    /// Unlike bootstrap there is no positivity check.
    pub fn set_balance_imported(
        &self,
        ctx: &CancelToken,
        balances: &[ImportedBalance],
    ) -> Result<()> {
        let tx = self.kv.transaction(true);

        for imported in balances {
            ctx.check()?;
            eprintln!(
                "[balances] setting account {} balance to {} {}",
                imported.account, imported.amount.value, imported.amount.currency.symbol
            );
            self.set_balance(ctx, &tx, &imported.account, &imported.amount, &imported.block)?;
        }

        tx.commit(ctx)?;
        eprintln!("[balances] {} balances imported", balances.len());
        Ok(())
    }

    /// Advance the account's reconciliation cursor to `block`. The cursor
    /// never moves backwards: inactive reconciliation is allowed to lag the
    /// active backlog, and its stale reports are no-ops.
    pub fn reconciled(
        &self,
        ctx: &CancelToken,
        account: &AccountIdentifier,
        currency: &Currency,
        block: &BlockIdentifier,
    ) -> Result<()> {
        ctx.check()?;
        let tx = self.kv.transaction(true);

        let key = account_key(account, currency)?;
        let raw = tx
            .get(&key)
            .with_context(|| format!("unable to get balance entry for account {account}"))?;
        let Some(raw) = raw else {
            return Err(BalanceError::MissingAccount { account: account.to_string() }.into());
        };

        let mut entry: AccountEntry =
            tx.encoder().decode(ACCOUNT_NAMESPACE, &raw).context("unable to decode account entry")?;

        if entry.last_reconciled.as_ref().is_some_and(|last| last.index > block.index) {
            tx.commit(ctx)?;
            return Ok(());
        }

        entry.last_reconciled = Some(block.clone());
        tx.set(&key, tx.encoder().encode(ACCOUNT_NAMESPACE, &entry)?)
            .context("unable to set account entry")?;
        tx.commit(ctx).context("unable to commit last reconciliation update")
    }

    /// Proportion of accounts in `[0, 1]` reconciled at an index `>=`
    /// `minimum_index`. Zero accounts yields zero coverage.
    pub fn reconciliation_coverage(&self, ctx: &CancelToken, minimum_index: i64) -> Result<f64> {
        let mut seen: u64 = 0;
        let mut valid: u64 = 0;
        self.for_each_account_entry(ctx, |entry| {
            seen += 1;
            if entry.last_reconciled.as_ref().is_some_and(|last| last.index >= minimum_index) {
                valid += 1;
            }
        })
        .context("unable to get all account entries")?;

        if seen == 0 {
            return Ok(0.0);
        }
        Ok(valid as f64 / seen as f64)
    }

    /// Every `(account, currency)` pair ever stored. Used to re-seed a
    /// reconciler after restart.
    pub fn all_account_currencies(&self, ctx: &CancelToken) -> Result<Vec<AccountCurrency>> {
        eprintln!("[balances] loading previously seen accounts (this could take a while)...");

        let mut accounts = Vec::new();
        self.for_each_account_entry(ctx, |entry| {
            accounts.push(AccountCurrency { account: entry.account, currency: entry.currency });
        })
        .context("unable to get all account entries")?;

        Ok(accounts)
    }

    fn for_each_account_entry(
        &self,
        ctx: &CancelToken,
        mut f: impl FnMut(AccountEntry),
    ) -> Result<()> {
        let tx = self.kv.transaction(false);
        let prefix = ACCOUNT_NAMESPACE.as_bytes();
        tx.scan(ctx, prefix, prefix, false, true, |_k, v| {
            let entry: AccountEntry = tx
                .encoder()
                .decode(ACCOUNT_NAMESPACE, v)
                .context("unable to parse account entry")?;
            f(entry);
            Ok(ScanControl::Continue)
        })
        .context("store scan failed")?;
        Ok(())
    }
}

impl BlockWorker for BalanceStore {
    /// Apply the block's changes inside `tx` and hand back the deferred
    /// `block_added` notification for after commit.
    fn adding_block(
        &self,
        ctx: &CancelToken,
        block: &Block,
        tx: &KvTransaction<'_>,
    ) -> Result<CommitWorker> {
        let changes = self
            .parser()?
            .balance_changes(ctx, block, false)
            .context("unable to calculate balance changes")?;

        for change in &changes {
            self.update_balance(ctx, tx, change, &block.parent_block_identifier)?;
        }

        let handler = self.handler()?.clone();
        let block = block.clone();
        Ok(Box::new(move |ctx: &CancelToken| handler.block_added(ctx, &block, &changes)))
    }

    /// Roll the touched series back below the orphaned block and hand back
    /// the deferred `block_removed` notification.
    fn removing_block(
        &self,
        ctx: &CancelToken,
        block: &Block,
        tx: &KvTransaction<'_>,
    ) -> Result<CommitWorker> {
        let changes = self
            .parser()?
            .balance_changes(ctx, block, true)
            .context("unable to calculate balance changes")?;

        for change in &changes {
            self.orphan_balance(ctx, tx, &change.account, &change.currency, &block.block_identifier)?;
        }

        let handler = self.handler()?.clone();
        let block = block.clone();
        Ok(Box::new(move |ctx: &CancelToken| handler.block_removed(ctx, &block, &changes)))
    }
}
