mod support;

use anyhow::{Context as _, Result};
use uuid::Uuid;

use btc_xmr_swap::network::BidQuote;
use btc_xmr_swap::swap::{BobState, SqliteSwapStore, SwapMetadata};

use support::fakes::{Scenario, monero_address, test_address};

fn sample_metadata(swap_id: Uuid) -> SwapMetadata {
    SwapMetadata {
        swap_id,
        seller: support::seller(),
        quote: BidQuote {
            price: bitcoin::Amount::from_sat(5_000_000),
            min_quantity: bitcoin::Amount::from_sat(1_000),
            max_quantity: bitcoin::Amount::from_sat(1_000_000_000),
        },
        xmr_receive_address: monero_address(),
        btc_change_address: test_address(),
        started_at: 1_700_000_000,
    }
}

fn started() -> BobState {
    BobState::Started {
        btc_amount: bitcoin::Amount::from_sat(985_000),
    }
}

#[test]
fn sqlite_store_insert_append_latest_list() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("swaps.sqlite3");

    let mut store = SqliteSwapStore::open(path).context("open sqlite store")?;

    let a = Uuid::new_v4();
    store.insert_swap(&sample_metadata(a)).context("insert swap a")?;

    let got = store
        .get_swap(a)
        .context("get swap a")?
        .context("swap a missing")?;
    assert_eq!(got.swap_id, a);
    assert!(store.latest_state(a).context("latest before append")?.is_none());

    store.append_state(a, &started()).context("append started")?;
    let latest = store
        .latest_state(a)
        .context("latest after append")?
        .context("state missing")?;
    assert_eq!(latest, started());

    // Redelivering the same state must not grow the log.
    store.append_state(a, &started()).context("append duplicate")?;
    assert_eq!(store.history(a).context("history")?.len(), 1);

    store
        .append_state(a, &BobState::SafelyAborted)
        .context("append terminal")?;
    let history = store.history(a).context("history after terminal")?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].name(), "Started");
    assert_eq!(history[1].name(), "SafelyAborted");

    let b = Uuid::new_v4();
    store.insert_swap(&sample_metadata(b)).context("insert swap b")?;
    store.append_state(b, &started()).context("append b started")?;

    assert_eq!(store.all_swaps().context("all swaps")?.len(), 2);

    // Only the non-terminal swap shows up for resumption.
    assert_eq!(store.unfinished_swaps().context("unfinished")?, vec![b]);

    Ok(())
}

#[test]
fn rich_states_roundtrip_through_the_store() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store =
        SqliteSwapStore::open(dir.path().join("swaps.sqlite3")).context("open sqlite store")?;

    let swap_id = Uuid::new_v4();
    store
        .insert_swap(&sample_metadata(swap_id))
        .context("insert swap")?;

    let scenario = Scenario::new(72, 144);
    let state2 = btc_xmr_swap::swap::State2 {
        btc: bitcoin::Amount::from_sat(985_000),
        xmr: scenario.response.xmr,
        timelocks: btc_xmr_swap::bitcoin::Timelocks::new(72, 144).expect("valid timelocks"),
        xmr_lock_address: scenario.response.xmr_lock_address.clone(),
        bob_spend_share: btc_xmr_swap::monero::PrivateKey::random(),
        view_key: scenario.response.view_key,
        tx_lock: scenario.response.tx_lock.clone(),
        tx_cancel: scenario.response.tx_cancel.clone(),
        tx_refund: scenario.response.tx_refund.clone(),
        encrypted_signature: scenario.response.encrypted_signature.clone(),
        xmr_target_confirmations: 10,
    };

    let state = BobState::SwapSetupCompleted(state2);
    store.append_state(swap_id, &state).context("append state2")?;

    let loaded = store
        .latest_state(swap_id)
        .context("load state2")?
        .context("state2 missing")?;
    assert_eq!(loaded, state);

    Ok(())
}
