//! Wager Ledger Simulation.
//!
//! Walks the ledger through hedging, multi-runner exposure, bookmaker and fancy
//! markets, rejected placements, settle/rollback/resettle, hierarchy commission
//! splits and the async reconciliation pool.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use wager_ledger::*;

type SimResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> SimResult {
    LoggingConfig {
        level: "warn".to_string(),
        format: "pretty".to_string(),
    }
    .init();

    println!("Wager Ledger Simulation");
    println!("Exposure locking, settlement and commission distribution\n");

    scenario_1_hedge_refund()?;
    scenario_2_three_outcome_market()?;
    scenario_3_bookmaker_and_fancy()?;
    scenario_4_insufficient_funds()?;
    scenario_5_settle_rollback_resettle()?;
    scenario_6_reconciliation_pool()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

/// super admin (40%) -> admin (40%) -> agent (75%) -> client, client funded.
fn setup(ledger: &Ledger, funds: Decimal) -> Result<UserId, LedgerError> {
    let root = ledger.create_account(Role::SuperAdmin, None, dec!(40))?;
    let admin = ledger.create_account(Role::Admin, Some(root), dec!(40))?;
    let agent = ledger.create_account(Role::Agent, Some(admin), dec!(75))?;
    let client = ledger.create_account(Role::Client, Some(agent), dec!(0))?;
    ledger.deposit(client, funds)?;
    Ok(client)
}

fn match_odds(ledger: &Ledger, runners: &[&str]) -> Result<SettlementId, LedgerError> {
    ledger.register_market(
        "E1".into(),
        "M1".into(),
        "Match Odds",
        None,
        runners.iter().map(|r| SelectionId::new(*r)).collect(),
    )
}

fn reconcile_all(ledger: &Ledger) -> Result<(), LedgerError> {
    for id in ledger.unreconciled_wagers()? {
        ledger.reconcile(id)?;
    }
    Ok(())
}

fn print_wallet(ledger: &Ledger, user: UserId) -> Result<(), LedgerError> {
    let wallet = ledger.wallet(user)?;
    println!(
        "  balance {} | liability {} | provisional {}",
        wallet.balance, wallet.liability, wallet.locked_exposure
    );
    Ok(())
}

/// A lay against an existing back on the same runner hands the lock back.
fn scenario_1_hedge_refund() -> SimResult {
    println!("Scenario 1: Hedge Refund\n");

    let ledger = Ledger::new(LedgerConfig::development());
    let client = setup(&ledger, dec!(10000))?;
    match_odds(&ledger, &["A", "B"])?;

    let back = ledger.place_wager(WagerRequest::new(client, "E1", "M1", "A", Side::Back, dec!(1000), dec!(2.0)))?;
    println!("  BACK A 1000 @ 2.0 locks {}", back.fast_lock);
    print_wallet(&ledger, client)?;

    let lay = ledger.place_wager(WagerRequest::new(client, "E1", "M1", "A", Side::Lay, dec!(1000), dec!(2.0)))?;
    println!("  LAY A 1000 @ 2.0 locks {}", lay.fast_lock);
    reconcile_all(&ledger)?;
    print_wallet(&ledger, client)?;
    println!(
        "  exact market exposure {}\n",
        ledger.market_exposure(client, &"E1".into(), &"M1".into())?
    );
    Ok(())
}

/// Exposure is the worst of every outcome, including runners nobody backed.
fn scenario_2_three_outcome_market() -> SimResult {
    println!("Scenario 2: Three-Outcome Market\n");

    let ledger = Ledger::new(LedgerConfig::development());
    let client = setup(&ledger, dec!(10000))?;
    match_odds(&ledger, &["A", "B", "C"])?;

    ledger.place_wager(WagerRequest::new(client, "E1", "M1", "A", Side::Back, dec!(100), dec!(3.0)))?;
    ledger.place_wager(WagerRequest::new(client, "E1", "M1", "B", Side::Back, dec!(100), dec!(2.0)))?;
    println!("  BACK A 100 @ 3.0, BACK B 100 @ 2.0");
    print_wallet(&ledger, client)?;

    reconcile_all(&ledger)?;
    println!("  after reconciliation:");
    print_wallet(&ledger, client)?;
    println!();
    Ok(())
}

fn scenario_3_bookmaker_and_fancy() -> SimResult {
    println!("Scenario 3: Bookmaker and Fancy Markets\n");

    let ledger = Ledger::new(LedgerConfig::development());
    let client = setup(&ledger, dec!(10000))?;

    ledger.register_market(
        "E1".into(),
        "BM1".into(),
        "Bookmaker 0 Comm",
        None,
        vec![SelectionId::new("A"), SelectionId::new("B")],
    )?;
    ledger.place_wager(WagerRequest::new(client, "E1", "BM1", "A", Side::Back, dec!(100), dec!(1.5)))?;
    ledger.place_wager(WagerRequest::new(client, "E1", "BM1", "B", Side::Lay, dec!(100), dec!(1.5)))?;
    reconcile_all(&ledger)?;
    println!(
        "  bookmaker BACK A 100 + LAY B 100 @ 1.5 exposure {}",
        ledger.market_exposure(client, &"E1".into(), &"BM1".into())?
    );

    ledger.register_market("E1".into(), "F45".into(), "6 over runs IND", Some("fancy"), vec![])?;
    ledger.place_wager(
        WagerRequest::new(client, "E1", "F45", "F45", Side::Back, dec!(100), dec!(2.0)).line(dec!(45)),
    )?;
    reconcile_all(&ledger)?;

    let result = ledger.settle_market(
        &"E1".into(),
        &"F45".into(),
        Declaration::Score(dec!(50)),
        Operator::Auto,
    )?;
    println!(
        "  fancy line 45 settled at 50: won {} lost {} pnl {}",
        result.won, result.lost, result.total_pnl
    );
    print_wallet(&ledger, client)?;
    println!();
    Ok(())
}

fn scenario_4_insufficient_funds() -> SimResult {
    println!("Scenario 4: Insufficient Funds\n");

    let ledger = Ledger::new(LedgerConfig::development());
    let client = setup(&ledger, dec!(50))?;
    match_odds(&ledger, &["A", "B"])?;

    let rejected = ledger.place_wager(WagerRequest::new(client, "E1", "M1", "A", Side::Back, dec!(100), dec!(2.0)));
    match rejected {
        Err(err) => println!("  BACK 100 with 50 available: {} ({})", err, err.reason_code()),
        Ok(p) => println!("  unexpectedly accepted wager {}", p.wager_id),
    }
    print_wallet(&ledger, client)?;
    println!();
    Ok(())
}

fn scenario_5_settle_rollback_resettle() -> SimResult {
    println!("Scenario 5: Settle, Roll Back, Resettle\n");

    let ledger = Ledger::new(LedgerConfig::development());
    let client = setup(&ledger, dec!(10000))?;
    let settlement_id = match_odds(&ledger, &["A", "B", "C"])?;

    ledger.place_wager(WagerRequest::new(client, "E1", "M1", "A", Side::Back, dec!(100), dec!(3.0)))?;
    ledger.place_wager(WagerRequest::new(client, "E1", "M1", "B", Side::Back, dec!(100), dec!(2.0)))?;
    reconcile_all(&ledger)?;

    let key = DistributionKey {
        user_id: client,
        event_id: "E1".into(),
        family: MarketFamily::MatchOdds,
    };

    let settled = ledger.settle_market(
        &"E1".into(),
        &"M1".into(),
        Declaration::Winner("A".into()),
        Operator::Auto,
    )?;
    println!("  A wins: client pnl {}", settled.total_pnl);
    print_wallet(&ledger, client)?;
    for entry in ledger.hierarchy_entries(&key)? {
        println!("    -> user {} takes {} ({}%)", entry.to_user, entry.amount, entry.percentage);
    }

    let rolled = ledger.rollback_settlement(&settlement_id, Operator::User(UserId(1)))?;
    println!("  rollback reopened {} wagers, relocked {}", rolled.wagers_reverted, rolled.relocked);
    print_wallet(&ledger, client)?;

    let resettled = ledger.settle_market(
        &"E1".into(),
        &"M1".into(),
        Declaration::Winner("B".into()),
        Operator::Auto,
    )?;
    println!("  B wins instead: client pnl {}", resettled.total_pnl);
    print_wallet(&ledger, client)?;
    println!("  settlement records kept: {}\n", ledger.settlement_history(&settlement_id)?.len());
    Ok(())
}

/// Placement hands reconciliation to the tokio pool and returns immediately.
fn scenario_6_reconciliation_pool() -> SimResult {
    println!("Scenario 6: Async Reconciliation Pool\n");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let config = LedgerConfig::development();
        let (handle, receivers) = reconcile_channel(&config.reconcile);
        let ledger = Arc::new(Ledger::new(config).with_scheduler(Arc::new(handle.clone())));
        let _workers = spawn_workers(Arc::clone(&ledger), receivers);

        let client = setup(&ledger, dec!(10000))?;
        match_odds(&ledger, &["A", "B", "C"])?;
        for (runner, stake) in [("A", dec!(100)), ("B", dec!(200)), ("C", dec!(50))] {
            ledger.place_wager(WagerRequest::new(client, "E1", "M1", runner, Side::Back, stake, dec!(4.0)))?;
        }
        println!("  placed 3 wagers, {} jobs in flight", handle.pending());

        for _ in 0..100 {
            if ledger.unreconciled_wagers()?.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        println!("  unreconciled after drain: {}", ledger.unreconciled_wagers()?.len());
        print_wallet(&ledger, client)?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
