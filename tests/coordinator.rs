mod support;

use anyhow::Result;
use uuid::Uuid;

use btc_xmr_swap::api::CommandError;

use support::fakes::{FakeSeller, Scenario, monero_address, test_address};
use support::{TestEngine, seller};

async fn start_swap(engine: &TestEngine) -> Result<Uuid, CommandError> {
    engine
        .context
        .buy_xmr(
            seller(),
            Some(test_address().to_string()),
            monero_address().to_string(),
        )
        .await
}

#[tokio::test]
async fn second_buy_xmr_fails_busy_and_creates_no_record() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let engine = TestEngine::start(FakeSeller::new(&scenario)).await?;
    // No approver: the swap parks on its approval request and stays active.

    let swap_id = start_swap(&engine).await?;

    let err = start_swap(&engine).await.unwrap_err();
    assert!(
        matches!(err, CommandError::SwapAlreadyRunning(id) if id == swap_id),
        "unexpected error: {err}"
    );

    // The rejected request left no trace.
    assert_eq!(engine.context.get_swap_infos_all().await?.len(), 1);
    assert_eq!(engine.context.coordinator().current_swap().await, Some(swap_id));

    engine.context.suspend_current_swap().await?;
    Ok(())
}

#[tokio::test]
async fn suspend_without_active_swap_reports_no_swap_running() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let engine = TestEngine::start(FakeSeller::new(&scenario)).await?;

    let err = engine.context.suspend_current_swap().await.unwrap_err();
    assert!(matches!(err, CommandError::NoSwapRunning));
    Ok(())
}

#[tokio::test]
async fn resume_of_unknown_swap_reports_not_found() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let engine = TestEngine::start(FakeSeller::new(&scenario)).await?;

    let missing = Uuid::new_v4();
    let err = engine.context.resume_swap(missing).await.unwrap_err();
    assert!(matches!(err, CommandError::SwapNotFound(id) if id == missing));
    Ok(())
}

#[tokio::test]
async fn suspension_frees_the_active_slot() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let engine = TestEngine::start(FakeSeller::new(&scenario)).await?;

    let first = start_swap(&engine).await?;
    engine.context.suspend_current_swap().await?;
    assert_eq!(engine.context.coordinator().current_swap().await, None);

    let second = start_swap(&engine).await?;
    assert_ne!(first, second);

    engine.context.suspend_current_swap().await?;
    Ok(())
}

#[tokio::test]
async fn insufficient_funds_is_rejected_before_any_record() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let engine = TestEngine::start(FakeSeller::new(&scenario)).await?;
    engine.chain.set_balance_sat(1_000);

    let err = start_swap(&engine).await.unwrap_err();
    assert!(matches!(err, CommandError::InsufficientFunds { .. }));
    assert!(engine.context.get_swap_infos_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn balance_is_cached_until_a_refresh_is_forced() -> Result<()> {
    let scenario = Scenario::new(72, 144);
    let engine = TestEngine::start(FakeSeller::new(&scenario)).await?;

    let initial = engine.context.get_balance(false).await?;
    engine.chain.set_balance_sat(42_000);

    assert_eq!(engine.context.get_balance(false).await?, initial);
    assert_eq!(
        engine.context.get_balance(true).await?,
        bitcoin::Amount::from_sat(42_000)
    );
    Ok(())
}
