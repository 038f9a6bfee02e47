//! Persistence seam for the ledger.
//!
//! The ledger never mutates stored records in place: it loads aggregates,
//! computes new values and hands them back as one [`Commit`]. A store must
//! apply a commit entirely or not at all, and answer every read from a single
//! consistent state.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::RwLock,
};

use tracing::debug;

use crate::{
    error::StoreError,
    model::{Position, Transaction, UserId, Vault, VaultId},
    snapshot::{LedgerSnapshot, SnapshotMetadata},
};

mod file;

pub use file::JsonFileStore;

/// Records written together by one ledger operation.
#[derive(Clone, Debug, Default)]
pub struct Commit {
    pub vaults: Vec<Vault>,
    pub positions: Vec<Position>,
    pub transactions: Vec<Transaction>,
}

pub trait LedgerStore: Send + Sync {
    fn get_vault(&self, vault_id: &str) -> Result<Option<Vault>, StoreError>;

    fn list_vaults(&self) -> Result<Vec<Vault>, StoreError>;

    fn get_position(&self, vault_id: &str, user_id: &str) -> Result<Option<Position>, StoreError>;

    fn positions_for_vault(&self, vault_id: &str) -> Result<Vec<Position>, StoreError>;

    /// Every position of `user_id` paired with its vault, read atomically.
    fn holdings(&self, user_id: &str) -> Result<Vec<(Position, Vault)>, StoreError>;

    /// Log entries matching `filter`, in append order.
    fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError>;

    /// Upserts vaults and positions and appends transactions as one unit.
    fn commit(&self, commit: Commit) -> Result<(), StoreError>;

    fn snapshot(&self) -> Result<LedgerSnapshot, StoreError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub vault_id: Option<VaultId>,
    pub user_id: Option<UserId>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(vault_id) = &self.vault_id {
            if &tx.vault_id != vault_id {
                return false;
            }
        }
        match &self.user_id {
            Some(user_id) => tx.user_id.as_ref() == Some(user_id),
            None => true,
        }
    }
}

/// Plain state shared by the store implementations.
#[derive(Clone, Debug, Default)]
pub(crate) struct StoreState {
    height: u64,
    vaults: BTreeMap<VaultId, Vault>,
    positions: BTreeMap<(VaultId, UserId), Position>,
    transactions: Vec<Transaction>,
    transaction_ids: BTreeSet<String>,
}

impl StoreState {
    pub(crate) fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut state = StoreState {
            height: snapshot.meta.height,
            ..StoreState::default()
        };
        for vault in snapshot.vaults {
            state.vaults.insert(vault.id.clone(), vault);
        }
        for position in snapshot.positions {
            let key = (position.vault_id.clone(), position.user_id.clone());
            state.positions.insert(key, position);
        }
        for tx in snapshot.transactions {
            state.transaction_ids.insert(tx.id.clone());
            state.transactions.push(tx);
        }
        state
    }

    pub(crate) fn validate(&self, commit: &Commit) -> Result<(), StoreError> {
        let mut seen = BTreeSet::new();
        for tx in &commit.transactions {
            if self.transaction_ids.contains(&tx.id) || !seen.insert(tx.id.as_str()) {
                return Err(StoreError::DuplicateTransaction(tx.id.clone()));
            }
        }
        Ok(())
    }

    /// Callers run [`StoreState::validate`] first; applying cannot fail.
    pub(crate) fn apply(&mut self, commit: Commit) {
        debug!(
            height = self.height + 1,
            vaults = commit.vaults.len(),
            positions = commit.positions.len(),
            transactions = commit.transactions.len(),
            "applying commit"
        );
        for vault in commit.vaults {
            self.vaults.insert(vault.id.clone(), vault);
        }
        for position in commit.positions {
            let key = (position.vault_id.clone(), position.user_id.clone());
            self.positions.insert(key, position);
        }
        for tx in commit.transactions {
            self.transaction_ids.insert(tx.id.clone());
            self.transactions.push(tx);
        }
        self.height += 1;
    }

    fn vault(&self, vault_id: &str) -> Option<Vault> {
        self.vaults.get(vault_id).cloned()
    }

    fn position(&self, vault_id: &str, user_id: &str) -> Option<Position> {
        self.positions
            .get(&(vault_id.to_string(), user_id.to_string()))
            .cloned()
    }

    fn vault_positions(&self, vault_id: &str) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.vault_id == vault_id)
            .cloned()
            .collect()
    }

    fn filtered_transactions(&self, filter: &TransactionFilter) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect()
    }

    fn holdings(&self, user_id: &str) -> Vec<(Position, Vault)> {
        self.positions
            .values()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| self.vaults.get(&p.vault_id).map(|v| (p.clone(), v.clone())))
            .collect()
    }

    pub(crate) fn snapshot(&self) -> LedgerSnapshot {
        let meta = SnapshotMetadata {
            height: self.height,
            timestamp: self.transactions.last().map(|tx| tx.timestamp).unwrap_or(0),
        };
        LedgerSnapshot::new(
            meta,
            self.vaults.values().cloned().collect(),
            self.positions.values().cloned().collect(),
            self.transactions.clone(),
        )
    }
}

/// Volatile store; everything lives behind one `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            state: RwLock::new(StoreState::from_snapshot(snapshot)),
        }
    }
}

impl LedgerStore for MemoryStore {
    fn get_vault(&self, vault_id: &str) -> Result<Option<Vault>, StoreError> {
        Ok(self.state.read()?.vault(vault_id))
    }

    fn list_vaults(&self) -> Result<Vec<Vault>, StoreError> {
        Ok(self.state.read()?.vaults.values().cloned().collect())
    }

    fn get_position(&self, vault_id: &str, user_id: &str) -> Result<Option<Position>, StoreError> {
        Ok(self.state.read()?.position(vault_id, user_id))
    }

    fn positions_for_vault(&self, vault_id: &str) -> Result<Vec<Position>, StoreError> {
        Ok(self.state.read()?.vault_positions(vault_id))
    }

    fn holdings(&self, user_id: &str) -> Result<Vec<(Position, Vault)>, StoreError> {
        Ok(self.state.read()?.holdings(user_id))
    }

    fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.state.read()?.filtered_transactions(filter))
    }

    fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let mut state = self.state.write()?;
        state.validate(&commit)?;
        state.apply(commit);
        Ok(())
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        Ok(self.state.read()?.snapshot())
    }
}
