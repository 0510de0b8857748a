//! Shared fixtures for unit and integration tests: a tempdir-backed store,
//! a scripted node helper, a recording handler, and a chain builder.

pub mod chain_builder;
pub mod mock_helper;

use std::sync::Arc;

use tempfile::TempDir;

use crate::modules::balances::BalanceStore;
use crate::runtime::kv::Kv;

pub use chain_builder::{
    block_at, test_account, test_currency, test_sub_account, transfer, ChainBuilder,
};
pub use mock_helper::{MockHelper, RecordingHandler};

/// A small-cache store in a temp dir. Keep the `TempDir` alive for as long
/// as the store is used.
pub fn create_test_kv() -> (Arc<Kv>, TempDir) {
    let tmp = TempDir::new().expect("create temp dir");
    let kv = Kv::open_with_cache(tmp.path(), b"balances:", 1 << 20).expect("open test store");
    (Arc::new(kv), tmp)
}

/// A fully initialized store wired to a mock helper and recording handler.
pub fn create_test_store(
    helper: Arc<MockHelper>,
) -> (BalanceStore, Arc<RecordingHandler>, TempDir) {
    let (kv, tmp) = create_test_kv();
    let handler = Arc::new(RecordingHandler::new());
    let store = BalanceStore::new(kv);
    store.initialize(helper, handler.clone()).expect("initialize balance store");
    (store, handler, tmp)
}
