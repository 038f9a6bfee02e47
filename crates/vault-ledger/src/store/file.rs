use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};

use fs2::FileExt;
use tracing::{debug, info};

use super::{Commit, LedgerStore, StoreState, TransactionFilter};
use crate::{
    error::StoreError,
    model::{Position, Transaction, Vault},
    snapshot::LedgerSnapshot,
};

/// Durable store: the whole state is one JSON snapshot document, rewritten
/// through a temp file and an atomic rename on every commit.
///
/// A handle holds an exclusive lock on `<path>.lock` until it is dropped, so
/// at most one handle at a time can load and rewrite the document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
    _lock: File,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    ///
    /// Fails with [`StoreError::Locked`] while another handle on the same
    /// path is alive.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock = acquire_lock(&path)?;
        let state = if path.exists() {
            let bytes = fs::read(&path)?;
            let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
            if !snapshot.verify_root() {
                return Err(StoreError::Corrupt(format!(
                    "state root mismatch in {}",
                    path.display()
                )));
            }
            info!(
                path = %path.display(),
                height = snapshot.meta.height,
                vaults = snapshot.vaults.len(),
                "loaded ledger state"
            );
            StoreState::from_snapshot(snapshot)
        } else {
            info!(path = %path.display(), "starting empty ledger state");
            StoreState::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), height = snapshot.meta.height, "persisted ledger state");
        Ok(())
    }
}

fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let lock_path = path.with_extension("json.lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(StoreError::Locked(path.display().to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

impl LedgerStore for JsonFileStore {
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
        let mut next = state.clone();
        next.apply(commit);
        // memory only moves forward once the document is on disk
        self.persist(&next.snapshot())?;
        *state = next;
        Ok(())
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        Ok(self.state.read()?.snapshot())
    }
}
