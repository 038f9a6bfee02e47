//! Share-accounting ledger for pooled yield vaults.
//!
//! The crate keeps the books for a set of vaults and the users holding shares
//! in them:
//!
//! * [`ledger`]: [`VaultLedger`], the engine applying deposits, withdrawals,
//!   reward claims and harvests with pre-transaction share pricing.
//! * [`shares`]: the asset/share conversion math shared by every operation.
//! * [`model`]: vaults, positions, the append-only transaction log and the
//!   read models returned to callers.
//! * [`store`]: the [`LedgerStore`] repository seam plus an in-memory and a
//!   JSON-file implementation.
//! * [`snapshot`]: full-state snapshots with a SHA-256 state root and an
//!   invariant audit.
//!
//! Blockchain submission, HTTP serving and presentation belong to the caller.
//! The ledger only does arithmetic over loaded aggregates and hands the
//! result back to the store as a single commit.

pub mod config;
pub mod fees;
pub mod ledger;
pub mod model;
pub mod shares;
pub mod snapshot;
pub mod sources;
pub mod store;

mod error;

pub use config::{LedgerConfig, YieldModel};
pub use error::{ErrorKind, LedgerError, StoreError};
pub use fees::{FeePolicy, NoFees};
pub use ledger::VaultLedger;
pub use model::{
    ClaimReceipt, DepositReceipt, HarvestReceipt, Holding, PerformanceSample, Portfolio,
    Position, RiskLevel, Strategy, Transaction, TransactionKind, UserId, Vault, VaultFilter,
    VaultId, VaultSpec, WithdrawReceipt,
};
pub use snapshot::{AuditViolation, LedgerSnapshot};
pub use sources::{Clock, IdGenerator, ManualClock, RandomIds, SequentialIds, SystemClock};
pub use store::{Commit, JsonFileStore, LedgerStore, MemoryStore, TransactionFilter};
