use thiserror::Error;

use crate::model::{UserId, VaultId};

/// Canonical error type returned by every ledger operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input failed a shape or range check.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("vault {0} not found")]
    VaultNotFound(VaultId),

    #[error("vault {0} is inactive")]
    InactiveVault(VaultId),

    /// Non-positive, non-finite or below-minimum amount.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: f64, reason: &'static str },

    #[error("insufficient shares in vault {vault_id} for {user_id}: requested {requested}, held {held}")]
    InsufficientShares {
        vault_id: VaultId,
        user_id: UserId,
        requested: f64,
        held: f64,
    },

    #[error("no rewards to claim in vault {vault_id} for {user_id}")]
    NoRewards { vault_id: VaultId, user_id: UserId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure reported by a [`crate::LedgerStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state document error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt state document: {0}")]
    Corrupt(String),

    /// Another handle holds the state document.
    #[error("state document {0} is locked by another process")]
    Locked(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("transaction {0} already recorded")]
    DuplicateTransaction(String),
}

/// Stable, transport-neutral classification of a [`LedgerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InactiveVault,
    InvalidAmount,
    InsufficientShares,
    NoRewards,
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InactiveVault => "inactive_vault",
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::InsufficientShares => "insufficient_shares",
            ErrorKind::NoRewards => "no_rewards",
            ErrorKind::Store => "store_error",
        }
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::VaultNotFound(_) => ErrorKind::NotFound,
            LedgerError::InactiveVault(_) => ErrorKind::InactiveVault,
            LedgerError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            LedgerError::InsufficientShares { .. } => ErrorKind::InsufficientShares,
            LedgerError::NoRewards { .. } => ErrorKind::NoRewards,
            LedgerError::Store(_) => ErrorKind::Store,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}
