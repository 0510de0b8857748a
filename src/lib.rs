pub mod config;
pub mod modules;
pub mod runtime;
pub mod schemas;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use modules::balances::{BalanceStore, BootstrapBalance, ImportedBalance};
pub use modules::defs::{BalanceHandler, BalanceHelper, BlockWorker, CommitWorker};
