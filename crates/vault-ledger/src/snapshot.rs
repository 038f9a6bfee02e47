use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{Position, Timestamp, Transaction, UserId, Vault, VaultId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Number of commits applied so far.
    pub height: u64,
    /// Timestamp of the newest transaction, 0 for an empty log.
    pub timestamp: Timestamp,
}

/// Full ledger state as of one commit height.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub vaults: Vec<Vault>,
    pub positions: Vec<Position>,
    pub transactions: Vec<Transaction>,
    /// Hex SHA-256 root over the metadata, every vault and position record
    /// and the transaction log in log order.
    pub state_root: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum AuditViolation {
    NegativeTotals {
        vault_id: VaultId,
        total_assets: f64,
        total_shares: f64,
    },
    AssetsWithoutShares {
        vault_id: VaultId,
        total_assets: f64,
    },
    ShareSumMismatch {
        vault_id: VaultId,
        total_shares: f64,
        position_sum: f64,
    },
    NegativePosition {
        vault_id: VaultId,
        user_id: UserId,
        shares: f64,
    },
    OrphanPosition {
        vault_id: VaultId,
        user_id: UserId,
    },
    OrphanTransaction {
        transaction_id: String,
        vault_id: VaultId,
    },
}

impl LedgerSnapshot {
    pub fn new(
        meta: SnapshotMetadata,
        vaults: Vec<Vault>,
        positions: Vec<Position>,
        transactions: Vec<Transaction>,
    ) -> Self {
        let state_root = hex::encode(compute_state_root(&meta, &vaults, &positions, &transactions));
        Self {
            meta,
            vaults,
            positions,
            transactions,
            state_root,
        }
    }

    /// Recomputes the root and compares it with the recorded one.
    pub fn verify_root(&self) -> bool {
        let root = compute_state_root(&self.meta, &self.vaults, &self.positions, &self.transactions);
        hex::encode(root) == self.state_root
    }

    /// Checks the accounting invariants. `tolerance` bounds the accepted
    /// drift between a vault's total shares and the sum over its positions,
    /// scaled by the vault size.
    pub fn audit(&self, tolerance: f64) -> Vec<AuditViolation> {
        let mut violations = Vec::new();
        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();

        for position in &self.positions {
            if position.shares < 0.0 {
                violations.push(AuditViolation::NegativePosition {
                    vault_id: position.vault_id.clone(),
                    user_id: position.user_id.clone(),
                    shares: position.shares,
                });
            }
            if !self.vaults.iter().any(|v| v.id == position.vault_id) {
                violations.push(AuditViolation::OrphanPosition {
                    vault_id: position.vault_id.clone(),
                    user_id: position.user_id.clone(),
                });
                continue;
            }
            *sums.entry(position.vault_id.as_str()).or_default() += position.shares;
        }

        for vault in &self.vaults {
            if vault.total_assets < 0.0 || vault.total_shares < 0.0 {
                violations.push(AuditViolation::NegativeTotals {
                    vault_id: vault.id.clone(),
                    total_assets: vault.total_assets,
                    total_shares: vault.total_shares,
                });
            }
            if vault.total_shares == 0.0 && vault.total_assets != 0.0 {
                violations.push(AuditViolation::AssetsWithoutShares {
                    vault_id: vault.id.clone(),
                    total_assets: vault.total_assets,
                });
            }
            let position_sum = sums.get(vault.id.as_str()).copied().unwrap_or(0.0);
            let allowed = tolerance * vault.total_shares.abs().max(1.0);
            if (position_sum - vault.total_shares).abs() > allowed {
                violations.push(AuditViolation::ShareSumMismatch {
                    vault_id: vault.id.clone(),
                    total_shares: vault.total_shares,
                    position_sum,
                });
            }
        }

        for tx in &self.transactions {
            if !self.vaults.iter().any(|v| v.id == tx.vault_id) {
                violations.push(AuditViolation::OrphanTransaction {
                    transaction_id: tx.id.clone(),
                    vault_id: tx.vault_id.clone(),
                });
            }
        }

        violations
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_str(hasher: &mut Sha256, s: Option<&str>) {
    match s {
        Some(s) => {
            hasher.update([1]);
            hash_str(hasher, s);
        }
        None => hasher.update([0]),
    }
}

fn vault_leaf(vault: &Vault) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"vault");
    hash_str(&mut hasher, &vault.id);
    hash_str(&mut hasher, &vault.name);
    hash_str(&mut hasher, &vault.description);
    hash_str(&mut hasher, &vault.asset);
    hasher.update([
        vault.strategy as u8,
        vault.risk_level as u8,
        vault.yield_model as u8,
        vault.is_active as u8,
    ]);
    for value in [
        vault.min_deposit,
        vault.performance_fee,
        vault.management_fee,
        vault.apy,
        vault.total_assets,
        vault.total_shares,
    ] {
        hasher.update(value.to_le_bytes());
    }
    hasher.update(vault.created_at.to_le_bytes());
    hasher.update(vault.updated_at.to_le_bytes());
    hasher.update((vault.performance_history.len() as u64).to_le_bytes());
    for sample in &vault.performance_history {
        hasher.update(sample.date.to_le_bytes());
        hasher.update(sample.value.to_le_bytes());
    }
    hasher.finalize().into()
}

fn position_leaf(position: &Position) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"position");
    hash_str(&mut hasher, &position.vault_id);
    hash_str(&mut hasher, &position.user_id);
    hasher.update(position.shares.to_le_bytes());
    hasher.update(position.deposited_amount.to_le_bytes());
    hasher.update(position.earned_amount.to_le_bytes());
    hasher.update(position.last_updated.to_le_bytes());
    hasher.finalize().into()
}

fn transaction_leaf(tx: &Transaction) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"tx");
    hash_str(&mut hasher, &tx.id);
    hasher.update([tx.kind as u8]);
    hash_str(&mut hasher, &tx.vault_id);
    hash_opt_str(&mut hasher, tx.user_id.as_deref());
    hash_str(&mut hasher, &tx.asset);
    hasher.update(tx.amount.to_le_bytes());
    hasher.update(tx.shares.to_le_bytes());
    hasher.update(tx.fee.to_le_bytes());
    hasher.update(tx.timestamp.to_le_bytes());
    hasher.finalize().into()
}

fn compute_state_root(
    meta: &SnapshotMetadata,
    vaults: &[Vault],
    positions: &[Position],
    transactions: &[Transaction],
) -> [u8; 32] {
    let mut sorted_vaults: Vec<&Vault> = vaults.iter().collect();
    sorted_vaults.sort_by(|a, b| a.id.cmp(&b.id));
    let mut sorted_positions: Vec<&Position> = positions.iter().collect();
    sorted_positions.sort_by(|a, b| (&a.vault_id, &a.user_id).cmp(&(&b.vault_id, &b.user_id)));

    let mut leaves: Vec<[u8; 32]> =
        Vec::with_capacity(1 + vaults.len() + positions.len() + transactions.len());
    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update(meta.height.to_le_bytes());
    hasher.update(meta.timestamp.to_le_bytes());
    leaves.push(hasher.finalize().into());

    leaves.extend(sorted_vaults.into_iter().map(vault_leaf));
    leaves.extend(sorted_positions.into_iter().map(position_leaf));
    // the log keeps its order
    leaves.extend(transactions.iter().map(transaction_leaf));
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"vault-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
