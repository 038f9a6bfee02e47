use std::{sync::Arc, thread};

use rand::{rngs::StdRng, Rng, SeedableRng};
use vault_ledger::{
    ErrorKind, JsonFileStore, LedgerConfig, LedgerStore, ManualClock, MemoryStore, SequentialIds,
    TransactionKind, VaultFilter, VaultLedger, VaultSpec, YieldModel,
};

const TOL: f64 = 1e-9;

fn nav_ledger() -> VaultLedger<MemoryStore> {
    VaultLedger::new(MemoryStore::new(), LedgerConfig::default())
        .unwrap()
        .with_clock(ManualClock::new(1_700_000_000_000))
        .with_ids(SequentialIds::default())
}

fn assert_books_balance<S: LedgerStore>(ledger: &VaultLedger<S>) {
    let violations = ledger.audit().unwrap();
    assert!(violations.is_empty(), "audit violations: {violations:?}");
}

#[test]
fn two_depositors_and_a_harvest() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("APT Core", "APT")).unwrap();

    let a = ledger.deposit(&vault.id, "alice", 100.0).unwrap();
    assert_eq!(a.shares_minted, 100.0);
    assert_eq!(a.share_price, 1.0);
    let v = ledger.get_vault(&vault.id).unwrap();
    assert_eq!((v.total_assets, v.total_shares), (100.0, 100.0));

    let b = ledger.deposit(&vault.id, "bob", 50.0).unwrap();
    assert_eq!(b.shares_minted, 50.0);
    assert_eq!(b.share_price, 1.0);
    let v = ledger.get_vault(&vault.id).unwrap();
    assert_eq!((v.total_assets, v.total_shares), (150.0, 150.0));

    let h = ledger.harvest(&vault.id, 12.0, 15.0).unwrap();
    assert_eq!(h.vault.total_assets, 165.0);
    assert!((h.vault.share_price() - 1.1).abs() < TOL);
    assert_eq!(h.vault.performance_history.last().unwrap().value, 165.0);

    let w = ledger.withdraw(&vault.id, "alice", 100.0).unwrap();
    assert!((w.amount_withdrawn - 110.0).abs() < TOL);
    let v = ledger.get_vault(&vault.id).unwrap();
    assert!((v.total_assets - 55.0).abs() < TOL);
    assert_eq!(v.total_shares, 50.0);

    assert_books_balance(&ledger);
}

#[test]
fn first_depositor_mints_one_to_one() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("Core", "USDC")).unwrap();
    let receipt = ledger.deposit(&vault.id, "carol", 1234.5).unwrap();
    assert_eq!(receipt.shares_minted, 1234.5);
    assert_eq!(receipt.transaction.kind, TransactionKind::Deposit);
    assert_eq!(receipt.transaction.shares, 1234.5);
    assert_eq!(receipt.position.deposited_amount, 1234.5);
}

#[test]
fn later_depositor_pays_the_grown_price() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
    ledger.deposit(&vault.id, "alice", 100.0).unwrap();
    ledger.harvest(&vault.id, 10.0, 100.0).unwrap();

    // price 2.0: bob must not dilute alice
    let receipt = ledger.deposit(&vault.id, "bob", 100.0).unwrap();
    assert_eq!(receipt.share_price, 2.0);
    assert_eq!(receipt.shares_minted, 50.0);

    let portfolio = ledger.get_portfolio("alice").unwrap();
    assert!((portfolio.total_value - 200.0).abs() < TOL);
}

#[test]
fn deposit_then_withdraw_round_trips() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
    ledger.deposit(&vault.id, "alice", 70.0).unwrap();
    ledger.harvest(&vault.id, 9.0, 7.0).unwrap();

    let dep = ledger.deposit(&vault.id, "bob", 33.3).unwrap();
    let wd = ledger.withdraw(&vault.id, "bob", dep.shares_minted).unwrap();
    assert!((wd.amount_withdrawn - 33.3).abs() < TOL);
    assert_books_balance(&ledger);
}

#[test]
fn over_withdraw_leaves_state_untouched() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
    ledger.deposit(&vault.id, "alice", 10.0).unwrap();
    let before = ledger.snapshot().unwrap();

    let err = ledger.withdraw(&vault.id, "alice", 10.5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientShares);
    let err = ledger.withdraw(&vault.id, "mallory", 1.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientShares);

    assert_eq!(ledger.snapshot().unwrap(), before);
}

#[test]
fn inactive_vault_rejects_deposit_without_side_effects() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
    ledger.deposit(&vault.id, "alice", 10.0).unwrap();
    ledger.set_vault_active(&vault.id, false).unwrap();
    let before = ledger.snapshot().unwrap();

    let err = ledger.deposit(&vault.id, "bob", 5.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InactiveVault);
    assert_eq!(ledger.snapshot().unwrap(), before);
}

#[test]
fn claim_without_rewards_fails() {
    let ledger = nav_ledger();
    let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
    assert_eq!(
        ledger.claim_rewards(&vault.id, "alice").unwrap_err().kind(),
        ErrorKind::NoRewards
    );
    ledger.deposit(&vault.id, "alice", 10.0).unwrap();
    // NAV growth never credits earned_amount
    ledger.harvest(&vault.id, 5.0, 1.0).unwrap();
    assert_eq!(
        ledger.claim_rewards(&vault.id, "alice").unwrap_err().kind(),
        ErrorKind::NoRewards
    );
    assert_eq!(
        ledger.claim_rewards("vault-missing", "alice").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn portfolio_spans_vaults() {
    let ledger = nav_ledger();
    let apt = ledger.create_vault(VaultSpec::new("APT", "APT")).unwrap();
    let usdc = ledger.create_vault(VaultSpec::new("USDC", "USDC")).unwrap();
    ledger.deposit(&apt.id, "alice", 100.0).unwrap();
    ledger.deposit(&usdc.id, "alice", 40.0).unwrap();
    ledger.deposit(&usdc.id, "bob", 60.0).unwrap();
    ledger.harvest(&usdc.id, 3.0, 10.0).unwrap();

    let portfolio = ledger.get_portfolio("alice").unwrap();
    assert_eq!(portfolio.holdings.len(), 2);
    // usdc price 1.1
    assert!((portfolio.total_value - (100.0 + 44.0)).abs() < TOL);

    ledger.withdraw(&apt.id, "alice", 100.0).unwrap();
    let portfolio = ledger.get_portfolio("alice").unwrap();
    assert_eq!(portfolio.holdings.len(), 1);
    assert!(ledger.get_portfolio("nobody").unwrap().holdings.is_empty());

    // zero-share positions stay on record
    let pos = ledger.get_position(&apt.id, "alice").unwrap().unwrap();
    assert_eq!(pos.shares, 0.0);
    assert_eq!(ledger.list_vaults(&VaultFilter::default()).unwrap().len(), 2);
}

#[test]
fn random_operations_keep_the_books_balanced() {
    for model in [YieldModel::NavGrowth, YieldModel::RewardAccrual] {
        let config = LedgerConfig {
            yield_model: model,
            ..LedgerConfig::default()
        };
        let ledger = VaultLedger::new(MemoryStore::new(), config)
            .unwrap()
            .with_ids(SequentialIds::default());
        let vaults: Vec<String> = (0..3)
            .map(|i| {
                ledger
                    .create_vault(VaultSpec::new(format!("v{i}"), "APT"))
                    .unwrap()
                    .id
            })
            .collect();
        let users = ["alice", "bob", "carol", "dave"];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let vault = &vaults[rng.gen_range(0..vaults.len())];
            let user = users[rng.gen_range(0..users.len())];
            match rng.gen_range(0..10) {
                0..=4 => {
                    ledger.deposit(vault, user, rng.gen_range(0.01..1_000.0)).unwrap();
                }
                5..=7 => {
                    let held = ledger
                        .get_position(vault, user)
                        .unwrap()
                        .map(|p| p.shares)
                        .unwrap_or(0.0);
                    if held > 0.0 {
                        let part = if rng.gen_bool(0.3) { held } else { held * rng.gen::<f64>() };
                        if part > 0.0 {
                            ledger.withdraw(vault, user, part).unwrap();
                        }
                    }
                }
                8 => {
                    let has_shares = ledger.get_vault(vault).unwrap().total_shares > 0.0;
                    if has_shares {
                        ledger.harvest(vault, 5.0, rng.gen_range(0.0..50.0)).unwrap();
                    }
                }
                _ => {
                    let _ = ledger.claim_rewards(vault, user);
                }
            }
            for id in &vaults {
                let v = ledger.get_vault(id).unwrap();
                assert!(v.total_assets >= 0.0 && v.total_shares >= 0.0);
                if v.total_shares == 0.0 {
                    assert_eq!(v.total_assets, 0.0);
                }
            }
        }
        assert_books_balance(&ledger);
    }
}

#[test]
fn concurrent_deposits_are_not_lost() {
    let ledger = Arc::new(nav_ledger());
    let hot = ledger.create_vault(VaultSpec::new("Hot", "APT")).unwrap().id;
    let cold = ledger.create_vault(VaultSpec::new("Cold", "APT")).unwrap().id;

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            let hot = hot.clone();
            let cold = cold.clone();
            thread::spawn(move || {
                let user = format!("user-{t}");
                for _ in 0..50 {
                    ledger.deposit(&hot, &user, 2.0).unwrap();
                    ledger.deposit(&cold, &user, 1.0).unwrap();
                }
                ledger.withdraw(&hot, &user, 20.0).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let hot = ledger.get_vault(&hot).unwrap();
    assert_eq!(hot.total_assets, 8.0 * (100.0 - 20.0));
    assert_eq!(hot.total_shares, 8.0 * (100.0 - 20.0));
    assert_eq!(ledger.get_vault(&cold).unwrap().total_assets, 400.0);
    let snapshot = ledger.snapshot().unwrap();
    assert_eq!(snapshot.transactions.len(), 8 * 101);
    assert_books_balance(&*ledger);
}

#[test]
fn file_backed_ledger_reloads_its_books() {
    let dir = std::env::temp_dir().join(format!(
        "vault-ledger-it-{}",
        StdRng::from_entropy().gen::<u64>()
    ));
    let path = dir.join("ledger.json");

    let vault_id = {
        let ledger =
            VaultLedger::new(JsonFileStore::open(&path).unwrap(), LedgerConfig::default()).unwrap();
        let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
        ledger.deposit(&vault.id, "alice", 100.0).unwrap();
        ledger.harvest(&vault.id, 8.0, 10.0).unwrap();
        vault.id
    };

    let ledger =
        VaultLedger::new(JsonFileStore::open(&path).unwrap(), LedgerConfig::default()).unwrap();
    let vault = ledger.get_vault(&vault_id).unwrap();
    assert_eq!(vault.total_assets, 110.0);
    assert_eq!(vault.apy, 8.0);
    assert_eq!(ledger.snapshot().unwrap().transactions.len(), 2);
    let receipt = ledger.withdraw(&vault_id, "alice", 50.0).unwrap();
    assert!((receipt.amount_withdrawn - 55.0).abs() < TOL);
    assert_books_balance(&ledger);

    std::fs::remove_dir_all(dir).ok();
}

fn temp_ledger_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("vault-ledger-{tag}-{}", StdRng::from_entropy().gen::<u64>()))
        .join("ledger.json")
}

fn open_file_ledger(
    path: &std::path::Path,
    model: YieldModel,
) -> Result<VaultLedger<JsonFileStore>, vault_ledger::LedgerError> {
    let config = LedgerConfig {
        yield_model: model,
        ..LedgerConfig::default()
    };
    VaultLedger::new(JsonFileStore::open(path)?, config)
}

#[test]
fn reopening_under_the_other_yield_model_cannot_harvest() {
    let path = temp_ledger_path("model");
    let vault_id = {
        let ledger = open_file_ledger(&path, YieldModel::NavGrowth).unwrap();
        let vault = ledger.create_vault(VaultSpec::new("Core", "APT")).unwrap();
        ledger.deposit(&vault.id, "alice", 100.0).unwrap();
        ledger.harvest(&vault.id, 5.0, 10.0).unwrap();
        vault.id
    };

    let ledger = open_file_ledger(&path, YieldModel::RewardAccrual).unwrap();
    let err = ledger.harvest(&vault_id, 5.0, 10.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let vault = ledger.get_vault(&vault_id).unwrap();
    assert_eq!(vault.total_assets, 110.0);
    assert_eq!(vault.yield_model, YieldModel::NavGrowth);
    let alice = ledger.get_position(&vault_id, "alice").unwrap().unwrap();
    assert_eq!(alice.earned_amount, 0.0);
    assert_eq!(ledger.snapshot().unwrap().transactions.len(), 2);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn one_writer_per_state_document() {
    let path = temp_ledger_path("writers");
    let a = open_file_ledger(&path, YieldModel::NavGrowth).unwrap();
    let vault = a.create_vault(VaultSpec::new("Core", "APT")).unwrap();

    let err = open_file_ledger(&path, YieldModel::NavGrowth).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Store);

    a.deposit(&vault.id, "alice", 100.0).unwrap();
    drop(a);

    let b = open_file_ledger(&path, YieldModel::NavGrowth).unwrap();
    b.deposit(&vault.id, "bob", 50.0).unwrap();
    drop(b);

    let ledger = open_file_ledger(&path, YieldModel::NavGrowth).unwrap();
    let vault = ledger.get_vault(&vault.id).unwrap();
    assert_eq!(vault.total_assets, 150.0);
    assert_eq!(vault.total_shares, 150.0);
    assert_eq!(ledger.get_position(&vault.id, "alice").unwrap().unwrap().shares, 100.0);
    assert_eq!(ledger.get_position(&vault.id, "bob").unwrap().unwrap().shares, 50.0);
    assert_books_balance(&ledger);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}
