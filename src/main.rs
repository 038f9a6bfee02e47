use std::{path::PathBuf, process};

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use vault_ledger::{
    ErrorKind, JsonFileStore, LedgerConfig, LedgerError, RiskLevel, Strategy, TransactionFilter,
    VaultFilter, VaultLedger, VaultSpec, YieldModel,
};

//==================== command line ====================//

#[derive(Parser, Debug)]
#[command(name = "vault", version, about = "Share-accounting ledger for pooled yield vaults")]
struct Cli {
    /// JSON state document; created on the first write.
    #[arg(long, env = "VAULT_STORE", default_value = "vault-ledger.json", global = true)]
    store: PathBuf,

    /// Where harvested yield goes: nav-growth or reward-accrual.
    #[arg(long, env = "VAULT_YIELD_MODEL", default_value = "nav-growth", global = true)]
    yield_model: YieldModel,

    /// Drift tolerance when totals approach zero.
    #[arg(long, env = "VAULT_EPSILON", default_value_t = LedgerConfig::DEFAULT_EPSILON, global = true)]
    epsilon: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new, empty vault.
    CreateVault {
        #[arg(long)]
        name: String,
        #[arg(long)]
        asset: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "lp")]
        strategy: Strategy,
        #[arg(long, default_value = "medium")]
        risk: RiskLevel,
        #[arg(long, default_value_t = 0.0)]
        min_deposit: f64,
        #[arg(long, default_value_t = 0.2)]
        performance_fee: f64,
        #[arg(long, default_value_t = 0.02)]
        management_fee: f64,
        #[arg(long, default_value_t = 0.0)]
        apy: f64,
    },
    /// Deposit assets and mint shares at the current price.
    Deposit {
        vault: String,
        user: String,
        #[arg(allow_negative_numbers = true)]
        amount: f64,
    },
    /// Redeem shares for assets at the current price.
    Withdraw {
        vault: String,
        user: String,
        #[arg(allow_negative_numbers = true)]
        shares: f64,
    },
    /// Pay out a position's accrued rewards.
    Claim { vault: String, user: String },
    /// Record realized yield and the vault's new APY.
    Harvest {
        vault: String,
        #[arg(long)]
        apy: f64,
        #[arg(long = "yield")]
        yield_amount: f64,
    },
    /// Activate or deactivate a vault.
    SetActive {
        vault: String,
        #[arg(action = ArgAction::Set)]
        active: bool,
    },
    /// Show one vault.
    Vault { vault: String },
    /// List vaults, newest first.
    ListVaults {
        #[arg(long)]
        active_only: bool,
        #[arg(long)]
        asset: Option<String>,
        #[arg(long)]
        risk: Option<RiskLevel>,
    },
    /// Holdings and total value of one user.
    Portfolio { user: String },
    /// One user's position in one vault.
    Position { vault: String, user: String },
    /// Transaction log, newest first.
    History {
        #[arg(long)]
        vault: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check the accounting invariants and print the state root.
    Audit,
}

//==================== output ====================//

#[derive(Serialize)]
struct AuditReport {
    height: u64,
    state_root: String,
    vaults: usize,
    positions: usize,
    transactions: usize,
    violations: Vec<vault_ledger::AuditViolation>,
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("error: cannot encode output: {err}");
            process::exit(1);
        }
    }
}

fn exit_code(err: &LedgerError) -> i32 {
    match err.kind() {
        ErrorKind::Store => 1,
        _ => 2,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

//==================== commands ====================//

fn run(cli: Cli) -> Result<(), LedgerError> {
    let config = LedgerConfig {
        yield_model: cli.yield_model,
        epsilon: cli.epsilon,
    };
    let store = JsonFileStore::open(&cli.store)?;
    debug!(store = %store.path().display(), model = %config.yield_model, "ledger opened");
    let ledger = VaultLedger::new(store, config)?;

    match cli.command {
        Command::CreateVault {
            name,
            asset,
            description,
            strategy,
            risk,
            min_deposit,
            performance_fee,
            management_fee,
            apy,
        } => {
            let spec = VaultSpec {
                name,
                description,
                asset,
                strategy,
                risk_level: risk,
                min_deposit,
                performance_fee,
                management_fee,
                apy,
            };
            emit(&ledger.create_vault(spec)?);
        }
        Command::Deposit {
            vault,
            user,
            amount,
        } => emit(&ledger.deposit(&vault, &user, amount)?),
        Command::Withdraw {
            vault,
            user,
            shares,
        } => emit(&ledger.withdraw(&vault, &user, shares)?),
        Command::Claim { vault, user } => emit(&ledger.claim_rewards(&vault, &user)?),
        Command::Harvest {
            vault,
            apy,
            yield_amount,
        } => emit(&ledger.harvest(&vault, apy, yield_amount)?),
        Command::SetActive { vault, active } => emit(&ledger.set_vault_active(&vault, active)?),
        Command::Vault { vault } => emit(&ledger.get_vault(&vault)?),
        Command::ListVaults {
            active_only,
            asset,
            risk,
        } => {
            let filter = VaultFilter {
                active_only,
                asset,
                risk_level: risk,
            };
            emit(&ledger.list_vaults(&filter)?);
        }
        Command::Portfolio { user } => emit(&ledger.get_portfolio(&user)?),
        Command::Position { vault, user } => emit(&ledger.get_position(&vault, &user)?),
        Command::History { vault, user, limit } => {
            let mut txs = ledger.transaction_history(&TransactionFilter {
                vault_id: vault,
                user_id: user,
            })?;
            if let Some(limit) = limit {
                txs.truncate(limit);
            }
            emit(&txs);
        }
        Command::Audit => {
            let snapshot = ledger.snapshot()?;
            let violations = ledger.audit()?;
            let clean = violations.is_empty();
            emit(&AuditReport {
                height: snapshot.meta.height,
                state_root: snapshot.state_root,
                vaults: snapshot.vaults.len(),
                positions: snapshot.positions.len(),
                transactions: snapshot.transactions.len(),
                violations,
            });
            if !clean {
                process::exit(2);
            }
        }
    }
    Ok(())
}

//==================== main ====================//

fn main() {
    let cli = Cli::parse();
    init_tracing();
    if let Err(err) = run(cli) {
        eprintln!("error: {}: {err}", err.kind().as_str());
        process::exit(exit_code(&err));
    }
}
