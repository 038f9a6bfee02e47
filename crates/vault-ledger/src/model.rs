use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{config::YieldModel, shares};

pub type VaultId = String;
pub type UserId = String;
pub type TransactionId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level {other:?}")),
        }
    }
}

/// How the vault deploys its pooled assets.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    LiquidityProvision,
    Lending,
    CoveredCall,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lp" | "liquidity-provision" => Ok(Strategy::LiquidityProvision),
            "lending" => Ok(Strategy::Lending),
            "covered-call" => Ok(Strategy::CoveredCall),
            other => Err(format!("unknown strategy {other:?}")),
        }
    }
}

/// Administrative input for [`crate::VaultLedger::create_vault`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VaultSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub asset: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Smallest accepted deposit; zero disables the check.
    #[serde(default)]
    pub min_deposit: f64,
    pub performance_fee: f64,
    pub management_fee: f64,
    #[serde(default)]
    pub apy: f64,
}

impl VaultSpec {
    pub fn new(name: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            asset: asset.into(),
            strategy: Strategy::default(),
            risk_level: RiskLevel::default(),
            min_deposit: 0.0,
            performance_fee: 0.2,
            management_fee: 0.02,
            apy: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSample {
    pub date: Timestamp,
    pub value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Vault {
    pub id: VaultId,
    pub name: String,
    pub description: String,
    pub asset: String,
    pub strategy: Strategy,
    pub risk_level: RiskLevel,
    pub min_deposit: f64,
    pub performance_fee: f64,
    pub management_fee: f64,
    pub apy: f64,
    /// Fixed at creation; every harvest of this vault uses it.
    #[serde(default)]
    pub yield_model: YieldModel,
    pub total_assets: f64,
    pub total_shares: f64,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub performance_history: Vec<PerformanceSample>,
}

impl Vault {
    pub fn from_spec(id: VaultId, spec: VaultSpec, now: Timestamp) -> Self {
        Self {
            id,
            name: spec.name,
            description: spec.description,
            asset: spec.asset,
            strategy: spec.strategy,
            risk_level: spec.risk_level,
            min_deposit: spec.min_deposit,
            performance_fee: spec.performance_fee,
            management_fee: spec.management_fee,
            apy: spec.apy,
            yield_model: YieldModel::default(),
            total_assets: 0.0,
            total_shares: 0.0,
            is_active: true,
            created_at: now,
            updated_at: now,
            performance_history: Vec::new(),
        }
    }

    pub fn share_price(&self) -> f64 {
        shares::share_price(self.total_assets, self.total_shares)
    }

    /// Total value locked; the vault's NAV.
    pub fn tvl(&self) -> f64 {
        self.total_assets
    }

    pub fn matches(&self, filter: &VaultFilter) -> bool {
        if filter.active_only && !self.is_active {
            return false;
        }
        if let Some(asset) = &filter.asset {
            if !self.asset.eq_ignore_ascii_case(asset) {
                return false;
            }
        }
        match filter.risk_level {
            Some(level) => self.risk_level == level,
            None => true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VaultFilter {
    pub active_only: bool,
    pub asset: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

impl VaultFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub user_id: UserId,
    pub vault_id: VaultId,
    pub shares: f64,
    /// Cost basis of the shares still held.
    pub deposited_amount: f64,
    /// Accrued yield not yet claimed.
    pub earned_amount: f64,
    pub last_updated: Timestamp,
}

impl Position {
    pub fn new(user_id: UserId, vault_id: VaultId, now: Timestamp) -> Self {
        Self {
            user_id,
            vault_id,
            shares: 0.0,
            deposited_amount: 0.0,
            earned_amount: 0.0,
            last_updated: now,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Claim,
    Harvest,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::Claim => "claim",
            TransactionKind::Harvest => "harvest",
        };
        f.write_str(name)
    }
}

/// Append-only log entry; never mutated once committed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub vault_id: VaultId,
    pub user_id: Option<UserId>,
    pub asset: String,
    pub amount: f64,
    pub shares: f64,
    /// Fee withheld from a harvest; zero for every other kind.
    #[serde(default)]
    pub fee: f64,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub position: Position,
    pub share_price: f64,
    pub value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    pub user_id: UserId,
    pub holdings: Vec<Holding>,
    pub total_value: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DepositReceipt {
    pub shares_minted: f64,
    pub share_price: f64,
    pub position: Position,
    pub transaction: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WithdrawReceipt {
    pub amount_withdrawn: f64,
    pub share_price: f64,
    pub position: Position,
    pub transaction: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClaimReceipt {
    pub reward_amount: f64,
    pub position: Position,
    pub transaction: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HarvestReceipt {
    pub vault: Vault,
    pub fee: f64,
    pub net_yield: f64,
    pub transaction: Transaction,
}
