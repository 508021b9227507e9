mod support;

use std::time::Duration;

use anyhow::{Context as _, Result};
use uuid::Uuid;

use btc_xmr_swap::swap::SqliteSwapStore;

use support::fakes::{FakeSeller, Scenario, monero_address, test_address, txid};
use support::wait::wait_for;
use support::{TestEngine, seller};

async fn start_swap(engine: &TestEngine) -> Result<Uuid> {
    let swap_id = engine
        .context
        .buy_xmr(
            seller(),
            Some(test_address().to_string()),
            monero_address().to_string(),
        )
        .await
        .context("buy_xmr")?;
    Ok(swap_id)
}

async fn wait_for_lock_broadcast(engine: &TestEngine, scenario: &Scenario) -> Result<()> {
    let chain = engine.chain.clone();
    let lock_txid = scenario.tx_lock_txid();
    wait_for("lock broadcast", Duration::from_secs(10), || {
        let chain = chain.clone();
        async move { Ok(chain.has_broadcast(lock_txid).then_some(())) }
    })
    .await
}

fn assert_monotonic_history(engine: &TestEngine, swap_id: Uuid) -> Result<()> {
    let store = SqliteSwapStore::open(engine.dir.path().join("sqlite").join("swaps.sqlite3"))
        .context("open store read-only")?;
    let history = store.history(swap_id).context("load history")?;
    assert!(!history.is_empty());

    for pair in history.windows(2) {
        assert!(
            pair[1].phase() > pair[0].phase(),
            "non-monotonic history: {} -> {}",
            pair[0].name(),
            pair[1].name()
        );
    }
    Ok(())
}

#[tokio::test]
async fn swap_completes_when_seller_cooperates() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller.clone()).await?;
    engine.spawn_approver(true);

    // The seller locks monero as soon as asked and has already redeemed the
    // bitcoin by the time the swap looks for it.
    engine.monero.set_transfer(
        &scenario.proof.tx_hash,
        1,
        scenario.response.xmr.as_piconero(),
    );
    fake_seller.provide_proof(scenario.proof.clone());
    engine.chain.confirm(txid(9), 101);
    engine.chain.register_spend(
        scenario.lock_outpoint(),
        txid(9),
        scenario.redeem_witness.clone(),
    );

    let swap_id = start_swap(&engine).await?;
    engine.context.coordinator().wait_until_idle().await;

    let info = engine.context.get_swap_info(swap_id).await?;
    assert_eq!(info.state_name, "Released");
    assert!(info.completed);

    assert!(engine.chain.has_broadcast(scenario.tx_lock_txid()));
    assert!(!engine.chain.has_broadcast(scenario.tx_cancel_txid()));
    assert_eq!(fake_seller.received_enc_sigs(), vec![swap_id]);
    assert_eq!(engine.monero.sweeps(), vec![monero_address()]);

    assert_monotonic_history(&engine, swap_id)
}

#[tokio::test]
async fn cancel_timelock_expiry_triggers_autonomous_cancel_and_refund() -> Result<()> {
    let scenario = Scenario::new(48, 96);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller).await?;
    engine.spawn_approver(true);
    engine.chain.set_tip(100);

    // The refund will spend the cancel output once it is published.
    engine
        .chain
        .register_spend(scenario.cancel_outpoint(), scenario.tx_refund_txid(), vec![vec![0x52]]);

    let swap_id = start_swap(&engine).await?;
    wait_for_lock_broadcast(&engine, &scenario).await?;

    // The lock confirmed at height 100 and the seller never acts; at height
    // 148 the cancel timelock of 48 blocks has run out.
    engine.chain.set_tip(148);
    engine.context.coordinator().wait_until_idle().await;

    assert!(engine.chain.has_broadcast(scenario.tx_cancel_txid()));
    assert!(engine.chain.has_broadcast(scenario.tx_refund_txid()));

    let info = engine.context.get_swap_info(swap_id).await?;
    assert_eq!(info.state_name, "BtcRefunded");
    assert!(info.completed);

    assert_monotonic_history(&engine, swap_id)
}

#[tokio::test]
async fn rejected_approval_aborts_without_locking() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller).await?;
    engine.spawn_approver(false);

    let swap_id = start_swap(&engine).await?;
    engine.context.coordinator().wait_until_idle().await;

    let info = engine.context.get_swap_info(swap_id).await?;
    assert_eq!(info.state_name, "SafelyAborted");
    assert!(engine.chain.broadcasts().is_empty());

    Ok(())
}

#[tokio::test]
async fn seller_punish_terminalizes_the_swap() -> Result<()> {
    let scenario = Scenario::new(48, 96);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller).await?;
    engine.spawn_approver(true);
    engine.chain.set_tip(100);

    // A foreign, already-mined transaction spends the cancel output: the
    // seller's punish.
    engine.chain.confirm(txid(7), 150);
    engine
        .chain
        .register_spend(scenario.cancel_outpoint(), txid(7), vec![vec![0x53]]);

    let swap_id = start_swap(&engine).await?;
    wait_for_lock_broadcast(&engine, &scenario).await?;
    engine.chain.set_tip(200);
    engine.context.coordinator().wait_until_idle().await;

    assert!(engine.chain.has_broadcast(scenario.tx_cancel_txid()));

    let info = engine.context.get_swap_info(swap_id).await?;
    assert_eq!(info.state_name, "BtcPunished");
    assert!(info.completed);

    Ok(())
}

#[tokio::test]
async fn invalid_seller_timelocks_abort_before_any_funds_move() -> Result<()> {
    // punish == cancel violates the timelock ordering invariant.
    let scenario = Scenario::new(72, 72);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller).await?;
    engine.spawn_approver(true);

    let swap_id = start_swap(&engine).await?;
    engine.context.coordinator().wait_until_idle().await;

    let info = engine.context.get_swap_info(swap_id).await?;
    assert_eq!(info.state_name, "SafelyAborted");
    assert!(engine.chain.broadcasts().is_empty());

    Ok(())
}

#[tokio::test]
async fn suspended_swap_resumes_to_a_later_state() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller.clone()).await?;
    engine.spawn_approver(true);

    let swap_id = start_swap(&engine).await?;
    wait_for_lock_broadcast(&engine, &scenario).await?;

    // Stop mid-swap at a safe point; the last persisted state stands.
    let suspended = engine.context.suspend_current_swap().await?;
    assert_eq!(suspended, swap_id);

    let before = engine.context.get_swap_info(swap_id).await?;
    assert!(!before.completed);

    // Restart the process over the same data directory, then let the seller
    // cooperate.
    let engine = engine.restart().await?;
    engine.spawn_approver(true);
    engine.monero.set_transfer(
        &scenario.proof.tx_hash,
        1,
        scenario.response.xmr.as_piconero(),
    );
    fake_seller.provide_proof(scenario.proof.clone());
    engine.chain.confirm(txid(9), 105);
    engine.chain.register_spend(
        scenario.lock_outpoint(),
        txid(9),
        scenario.redeem_witness.clone(),
    );

    engine.context.resume_swap(swap_id).await?;
    engine.context.coordinator().wait_until_idle().await;

    let info = engine.context.get_swap_info(swap_id).await?;
    assert_eq!(info.state_name, "Released");

    // Crash safety: the combined history never revisits an earlier state.
    assert_monotonic_history(&engine, swap_id)
}

#[tokio::test]
async fn resuming_a_completed_swap_appends_nothing() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let fake_seller = FakeSeller::new(&scenario);
    let engine = TestEngine::start(fake_seller).await?;
    engine.spawn_approver(false);

    let swap_id = start_swap(&engine).await?;
    engine.context.coordinator().wait_until_idle().await;

    let store = SqliteSwapStore::open(engine.dir.path().join("sqlite").join("swaps.sqlite3"))?;
    let before = store.history(swap_id)?.len();

    engine.context.resume_swap(swap_id).await?;
    engine.context.coordinator().wait_until_idle().await;

    assert_eq!(store.history(swap_id)?.len(), before);
    Ok(())
}
