use thiserror::Error;

use crate::schemas::BlockIdentifier;

/// Failure kinds the balance store can surface. Store and helper errors
/// propagate as plain `anyhow` chains with context; these are the kinds a
/// caller may want to branch on via `downcast_ref`.
#[derive(Debug, Error)]
pub enum BalanceError {
    /// A stored entry at the queried index carries a different hash: a
    /// reorg was missed. Fatal integrity violation.
    #[error("wanted block {wanted} but got {found}")]
    HashMismatch { wanted: BlockIdentifier, found: BlockIdentifier },

    /// A change arrived at or below the latest stored index without the
    /// orphan path running first.
    #[error("cannot update already updated balance for {account} at {block}")]
    DuplicateUpdate { account: String, block: BlockIdentifier },

    #[error("{value} is not an integer")]
    InvalidNumber { value: String },

    /// The computed balance went below zero and no exemption covers it.
    #[error("negative balance {value} for {account} at {block}")]
    NegativeBalance { account: String, value: String, block: BlockIdentifier },

    /// The authoritative balance disagrees with the computed one and no
    /// exemption matches the difference.
    #[error(
        "account {account} balance difference (live - computed) {difference} at {block} \
         is not allowed by any balance exemption"
    )]
    InvalidLiveBalance { account: String, difference: String, block: BlockIdentifier },

    #[error("balance entry is missing for account {account}")]
    MissingAccount { account: String },

    #[error("balance store used before initialize")]
    NotInitialized,

    #[error("balance store already initialized")]
    AlreadyInitialized,
}
