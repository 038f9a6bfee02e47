//! The vault accounting engine.
//!
//! Every mutating operation follows the same shape: take the vault's lock,
//! load the vault and the affected positions, price against the totals as
//! they stood before the operation, then hand vault, positions and the log
//! entry to the store as one [`Commit`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::{info, warn};

use crate::{
    config::{LedgerConfig, YieldModel},
    error::{LedgerError, StoreError},
    fees::{FeePolicy, NoFees},
    model::{
        ClaimReceipt, DepositReceipt, HarvestReceipt, Holding, PerformanceSample, Portfolio,
        Position, Timestamp, Transaction, TransactionKind, Vault, VaultFilter, VaultId, VaultSpec,
        WithdrawReceipt,
    },
    shares,
    snapshot::{AuditViolation, LedgerSnapshot},
    sources::{Clock, IdGenerator, RandomIds, SystemClock},
    store::{Commit, LedgerStore, TransactionFilter},
};

pub struct VaultLedger<S> {
    store: S,
    config: LedgerConfig,
    clock: Box<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    fees: Box<dyn FeePolicy>,
    locks: Mutex<HashMap<VaultId, Arc<Mutex<()>>>>,
}

impl<S: LedgerStore> VaultLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock: Box::new(SystemClock),
            ids: Box::new(RandomIds),
            fees: Box::new(NoFees),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn with_fee_policy(mut self, fees: impl FeePolicy + 'static) -> Self {
        self.fees = Box::new(fees);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Lock entries exist only for vaults the store knows about.
    fn vault_lock(&self, vault_id: &str) -> Result<Arc<Mutex<()>>, LedgerError> {
        let mut locks = self.locks.lock().map_err(StoreError::from)?;
        if let Some(lock) = locks.get(vault_id) {
            return Ok(lock.clone());
        }
        self.load_vault(vault_id)?;
        let lock = Arc::new(Mutex::new(()));
        locks.insert(vault_id.to_string(), lock.clone());
        Ok(lock)
    }

    /// Runs `op` while holding the per-vault mutation lock.
    fn serialized<T>(
        &self,
        vault_id: &str,
        op: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let lock = self.vault_lock(vault_id)?;
        let _guard = lock.lock().map_err(StoreError::from)?;
        op()
    }

    fn load_vault(&self, vault_id: &str) -> Result<Vault, LedgerError> {
        self.store
            .get_vault(vault_id)?
            .ok_or_else(|| LedgerError::VaultNotFound(vault_id.to_string()))
    }

    fn record(
        &self,
        kind: TransactionKind,
        vault: &Vault,
        user_id: Option<&str>,
        amount: f64,
        shares: f64,
        now: Timestamp,
    ) -> Transaction {
        Transaction {
            id: self.ids.next_id("tx"),
            kind,
            vault_id: vault.id.clone(),
            user_id: user_id.map(str::to_string),
            asset: vault.asset.clone(),
            amount,
            shares,
            fee: 0.0,
            timestamp: now,
        }
    }

    //==================== administration ====================//

    pub fn create_vault(&self, spec: VaultSpec) -> Result<Vault, LedgerError> {
        validate_spec(&spec).inspect_err(|err| warn!(error = %err, "vault creation rejected"))?;
        let now = self.clock.now_ms();
        let mut vault = Vault::from_spec(self.ids.next_id("vault"), spec, now);
        vault.yield_model = self.config.yield_model;
        self.store.commit(Commit {
            vaults: vec![vault.clone()],
            ..Commit::default()
        })?;
        info!(
            vault_id = %vault.id,
            name = %vault.name,
            asset = %vault.asset,
            model = %vault.yield_model,
            "vault created"
        );
        Ok(vault)
    }

    /// Inactive vaults refuse deposits; withdrawals and claims keep working.
    pub fn set_vault_active(&self, vault_id: &str, active: bool) -> Result<Vault, LedgerError> {
        self.serialized(vault_id, || {
            let mut vault = self.load_vault(vault_id)?;
            if vault.is_active != active {
                vault.is_active = active;
                vault.updated_at = self.clock.now_ms();
                self.store.commit(Commit {
                    vaults: vec![vault.clone()],
                    ..Commit::default()
                })?;
                info!(vault_id, active, "vault activation changed");
            }
            Ok(vault)
        })
    }

    //==================== deposits & withdrawals ====================//

    pub fn deposit(
        &self,
        vault_id: &str,
        user_id: &str,
        amount: f64,
    ) -> Result<DepositReceipt, LedgerError> {
        validate_user(user_id)
            .and_then(|()| {
                self.serialized(vault_id, || self.apply_deposit(vault_id, user_id, amount))
            })
            .inspect_err(|err| warn!(vault_id, user_id, amount, error = %err, "deposit rejected"))
    }

    fn apply_deposit(
        &self,
        vault_id: &str,
        user_id: &str,
        amount: f64,
    ) -> Result<DepositReceipt, LedgerError> {
        let mut vault = self.load_vault(vault_id)?;
        if !vault.is_active {
            return Err(LedgerError::InactiveVault(vault.id));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: "deposit must be a positive number",
            });
        }
        if amount < vault.min_deposit {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: "deposit below the vault minimum",
            });
        }

        let share_price = vault.share_price();
        let minted = shares::shares_for_assets(amount, vault.total_assets, vault.total_shares)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "vault {vault_id} has {} shares outstanding and no assets to price them",
                    vault.total_shares
                ))
            })?;
        let now = self.clock.now_ms();

        vault.total_assets += amount;
        vault.total_shares += minted;
        vault.updated_at = now;

        let mut position = self
            .store
            .get_position(vault_id, user_id)?
            .unwrap_or_else(|| Position::new(user_id.to_string(), vault.id.clone(), now));
        position.shares += minted;
        position.deposited_amount += amount;
        position.last_updated = now;

        let transaction = self.record(
            TransactionKind::Deposit,
            &vault,
            Some(user_id),
            amount,
            minted,
            now,
        );
        self.store.commit(Commit {
            vaults: vec![vault.clone()],
            positions: vec![position.clone()],
            transactions: vec![transaction.clone()],
        })?;

        info!(
            vault_id,
            user_id,
            amount,
            shares_minted = minted,
            share_price,
            total_assets = vault.total_assets,
            total_shares = vault.total_shares,
            "deposit applied"
        );
        Ok(DepositReceipt {
            shares_minted: minted,
            share_price,
            position,
            transaction,
        })
    }

    /// Redeems `shares` at the pre-withdrawal share price.
    pub fn withdraw(
        &self,
        vault_id: &str,
        user_id: &str,
        shares: f64,
    ) -> Result<WithdrawReceipt, LedgerError> {
        self.serialized(vault_id, || self.apply_withdraw(vault_id, user_id, shares))
            .inspect_err(|err| warn!(vault_id, user_id, shares, error = %err, "withdraw rejected"))
    }

    fn apply_withdraw(
        &self,
        vault_id: &str,
        user_id: &str,
        requested: f64,
    ) -> Result<WithdrawReceipt, LedgerError> {
        let eps = self.config.epsilon;
        let mut vault = self.load_vault(vault_id)?;
        if !requested.is_finite() || requested <= 0.0 {
            return Err(LedgerError::InvalidAmount {
                amount: requested,
                reason: "withdrawal must be a positive number of shares",
            });
        }
        let position = self.store.get_position(vault_id, user_id)?;
        let held = position.as_ref().map(|p| p.shares).unwrap_or(0.0);
        let mut position = match position {
            Some(p) if held > 0.0 && requested <= held + eps => p,
            _ => {
                return Err(LedgerError::InsufficientShares {
                    vault_id: vault.id,
                    user_id: user_id.to_string(),
                    requested,
                    held,
                })
            }
        };
        // a remainder within epsilon is burned with the rest
        let redeemed = if held - requested <= eps { held } else { requested };

        let share_price = vault.share_price();
        let mut amount = shares::assets_for_shares(redeemed, vault.total_assets, vault.total_shares);

        let remaining_shares = shares::checked_sub_clamped(vault.total_shares, redeemed, eps)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "vault {vault_id} holds {} shares, cannot redeem {redeemed}",
                    vault.total_shares
                ))
            })?;
        let remaining_assets = if remaining_shares == 0.0 {
            // last shares out take every remaining unit
            amount = vault.total_assets;
            0.0
        } else {
            shares::checked_sub_clamped(vault.total_assets, amount, eps).ok_or_else(|| {
                LedgerError::Validation(format!(
                    "vault {vault_id} holds {} assets, cannot pay {amount}",
                    vault.total_assets
                ))
            })?
        };
        if remaining_shares == 0.0 && vault.total_shares - redeemed != 0.0 {
            warn!(
                vault_id,
                drift = vault.total_shares - redeemed,
                "clamped vault shares to zero"
            );
        }

        let now = self.clock.now_ms();
        vault.total_assets = remaining_assets;
        vault.total_shares = remaining_shares;
        vault.updated_at = now;

        let left = held - redeemed;
        if left == 0.0 {
            position.shares = 0.0;
            position.deposited_amount = 0.0;
        } else {
            position.deposited_amount *= left / held;
            position.shares = left;
        }
        position.last_updated = now;

        let transaction = self.record(
            TransactionKind::Withdraw,
            &vault,
            Some(user_id),
            amount,
            redeemed,
            now,
        );
        self.store.commit(Commit {
            vaults: vec![vault.clone()],
            positions: vec![position.clone()],
            transactions: vec![transaction.clone()],
        })?;

        info!(
            vault_id,
            user_id,
            shares = redeemed,
            amount_withdrawn = amount,
            share_price,
            total_assets = vault.total_assets,
            total_shares = vault.total_shares,
            "withdrawal applied"
        );
        Ok(WithdrawReceipt {
            amount_withdrawn: amount,
            share_price,
            position,
            transaction,
        })
    }

    //==================== yield ====================//

    pub fn claim_rewards(&self, vault_id: &str, user_id: &str) -> Result<ClaimReceipt, LedgerError> {
        self.serialized(vault_id, || {
            let vault = self.load_vault(vault_id)?;
            let mut position = match self.store.get_position(vault_id, user_id)? {
                Some(p) if p.earned_amount > 0.0 => p,
                _ => {
                    return Err(LedgerError::NoRewards {
                        vault_id: vault.id,
                        user_id: user_id.to_string(),
                    })
                }
            };

            let reward = position.earned_amount;
            let now = self.clock.now_ms();
            position.earned_amount = 0.0;
            position.last_updated = now;

            let transaction =
                self.record(TransactionKind::Claim, &vault, Some(user_id), reward, 0.0, now);
            self.store.commit(Commit {
                positions: vec![position.clone()],
                transactions: vec![transaction.clone()],
                ..Commit::default()
            })?;

            info!(vault_id, user_id, reward, "rewards claimed");
            Ok(ClaimReceipt {
                reward_amount: reward,
                position,
                transaction,
            })
        })
        .inspect_err(|err| warn!(vault_id, user_id, error = %err, "claim rejected"))
    }

    /// Records realized yield and the vault's new APY.
    ///
    /// Under [`YieldModel::NavGrowth`] the net yield raises `total_assets`
    /// and therefore the share price. Under [`YieldModel::RewardAccrual`] it
    /// is split across positions by share count into `earned_amount`.
    pub fn harvest(
        &self,
        vault_id: &str,
        new_apy: f64,
        yield_amount: f64,
    ) -> Result<HarvestReceipt, LedgerError> {
        self.serialized(vault_id, || self.apply_harvest(vault_id, new_apy, yield_amount))
            .inspect_err(|err| {
                warn!(vault_id, new_apy, yield_amount, error = %err, "harvest rejected")
            })
    }

    fn apply_harvest(
        &self,
        vault_id: &str,
        new_apy: f64,
        yield_amount: f64,
    ) -> Result<HarvestReceipt, LedgerError> {
        let mut vault = self.load_vault(vault_id)?;
        if vault.yield_model != self.config.yield_model {
            return Err(LedgerError::Validation(format!(
                "vault {vault_id} books yield as {}, ledger is configured for {}",
                vault.yield_model, self.config.yield_model
            )));
        }
        if !new_apy.is_finite() || new_apy < 0.0 {
            return Err(LedgerError::Validation(format!(
                "apy must be a non-negative number, got {new_apy}"
            )));
        }
        if !yield_amount.is_finite() || yield_amount < 0.0 {
            return Err(LedgerError::InvalidAmount {
                amount: yield_amount,
                reason: "yield must be a non-negative number",
            });
        }
        let fee = self.fees.harvest_fee(&vault, yield_amount);
        if !fee.is_finite() || fee < 0.0 || fee > yield_amount {
            return Err(LedgerError::Validation(format!(
                "fee policy returned {fee} for a yield of {yield_amount}"
            )));
        }
        let net = yield_amount - fee;
        let now = self.clock.now_ms();

        let mut positions = Vec::new();
        match vault.yield_model {
            YieldModel::NavGrowth => {
                if net > 0.0 && vault.total_shares <= 0.0 {
                    return Err(LedgerError::Validation(format!(
                        "vault {vault_id} has no shares to carry NAV growth"
                    )));
                }
                vault.total_assets += net;
            }
            YieldModel::RewardAccrual => {
                if net > 0.0 && vault.total_shares > 0.0 {
                    for mut position in self.store.positions_for_vault(vault_id)? {
                        if position.shares <= 0.0 {
                            continue;
                        }
                        position.earned_amount += net * position.shares / vault.total_shares;
                        position.last_updated = now;
                        positions.push(position);
                    }
                } else if net > 0.0 {
                    warn!(vault_id, net, "no shareholders, harvest yield not distributed");
                }
            }
        }

        vault.apy = new_apy;
        vault.updated_at = now;
        vault.performance_history.push(PerformanceSample {
            date: now,
            value: vault.total_assets,
        });

        let mut transaction =
            self.record(TransactionKind::Harvest, &vault, None, yield_amount, 0.0, now);
        transaction.fee = fee;
        self.store.commit(Commit {
            vaults: vec![vault.clone()],
            positions,
            transactions: vec![transaction.clone()],
        })?;

        info!(
            vault_id,
            yield_amount,
            fee,
            apy = new_apy,
            model = %self.config.yield_model,
            total_assets = vault.total_assets,
            share_price = vault.share_price(),
            "harvest recorded"
        );
        Ok(HarvestReceipt {
            vault,
            fee,
            net_yield: net,
            transaction,
        })
    }

    //==================== queries ====================//

    pub fn get_vault(&self, vault_id: &str) -> Result<Vault, LedgerError> {
        self.load_vault(vault_id)
    }

    /// Matching vaults, newest first.
    pub fn list_vaults(&self, filter: &VaultFilter) -> Result<Vec<Vault>, LedgerError> {
        let mut vaults: Vec<Vault> = self
            .store
            .list_vaults()?
            .into_iter()
            .filter(|v| v.matches(filter))
            .collect();
        vaults.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(vaults)
    }

    pub fn get_position(
        &self,
        vault_id: &str,
        user_id: &str,
    ) -> Result<Option<Position>, LedgerError> {
        self.load_vault(vault_id)?;
        Ok(self.store.get_position(vault_id, user_id)?)
    }

    pub fn positions_for_vault(&self, vault_id: &str) -> Result<Vec<Position>, LedgerError> {
        self.load_vault(vault_id)?;
        Ok(self.store.positions_for_vault(vault_id)?)
    }

    /// Holdings with a share balance or unclaimed rewards, valued at each
    /// vault's current share price.
    pub fn get_portfolio(&self, user_id: &str) -> Result<Portfolio, LedgerError> {
        let mut holdings: Vec<Holding> = self
            .store
            .holdings(user_id)?
            .into_iter()
            .filter(|(p, _)| p.shares > 0.0 || p.earned_amount > 0.0)
            .map(|(position, vault)| {
                let share_price = vault.share_price();
                Holding {
                    value: position.shares * share_price,
                    share_price,
                    position,
                }
            })
            .collect();
        holdings.sort_by(|a, b| a.position.vault_id.cmp(&b.position.vault_id));
        let total_value: f64 = holdings.iter().map(|h| h.value).sum();
        Ok(Portfolio {
            user_id: user_id.to_string(),
            holdings,
            total_value,
        })
    }

    /// Log entries matching `filter`, newest first.
    pub fn transaction_history(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut txs = self.store.transactions(filter)?;
        txs.reverse();
        Ok(txs)
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.store.snapshot()?)
    }

    /// Invariant violations in the current state; empty when the books
    /// balance.
    pub fn audit(&self) -> Result<Vec<AuditViolation>, LedgerError> {
        let tolerance = self.config.epsilon.max(LedgerConfig::DEFAULT_EPSILON);
        Ok(self.store.snapshot()?.audit(tolerance))
    }
}

fn validate_user(user_id: &str) -> Result<(), LedgerError> {
    if user_id.trim().is_empty() {
        return Err(LedgerError::Validation("user id must not be empty".into()));
    }
    Ok(())
}

fn validate_spec(spec: &VaultSpec) -> Result<(), LedgerError> {
    if spec.name.trim().is_empty() {
        return Err(LedgerError::Validation("vault name must not be empty".into()));
    }
    if spec.asset.trim().is_empty() {
        return Err(LedgerError::Validation("asset type must not be empty".into()));
    }
    for (label, fee) in [
        ("performance fee", spec.performance_fee),
        ("management fee", spec.management_fee),
    ] {
        if !fee.is_finite() || !(0.0..=1.0).contains(&fee) {
            return Err(LedgerError::Validation(format!(
                "{label} must be a fraction in [0, 1], got {fee}"
            )));
        }
    }
    if !spec.min_deposit.is_finite() || spec.min_deposit < 0.0 {
        return Err(LedgerError::Validation(format!(
            "minimum deposit must be non-negative, got {}",
            spec.min_deposit
        )));
    }
    if !spec.apy.is_finite() || spec.apy < 0.0 {
        return Err(LedgerError::Validation(format!(
            "apy must be non-negative, got {}",
            spec.apy
        )));
    }
    Ok(())
}
