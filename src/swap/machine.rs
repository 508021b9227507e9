use std::sync::Arc;
use std::time::Duration;

use ::bitcoin::OutPoint;
use anyhow::{Context as _, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::approval::{ApprovalPayload, ApprovalRegistry};
use crate::bitcoin::{
    BitcoinChainClient, BlockHeight, EncryptedSignature, ExpiredTimelocks, TimelockEvent,
    TimelockMonitor, Timelocks, TxSpend, TxStatus, Txid, chain::watch_confirmations,
    expired_timelocks,
};
use crate::event::{EventHub, SwapProgress};
use crate::monero::{self, MoneroWallet, TransferStatus};
use crate::network::{ProtocolError, RetryAborted, SellerClient, SetupRequest, SetupResponse,
    retry_until};
use crate::seed::Seed;

use super::{BobState, Database, EnvConfig, State2, SwapMetadata};

/// One swap being driven by this process.
///
/// The runner is strictly sequential: one state-machine step at a time, with
/// every new state persisted before the step acting on it runs.
pub struct Swap {
    pub id: Uuid,
    pub state: BobState,
    pub metadata: SwapMetadata,
    pub db: Database,
    pub bitcoin_chain: Arc<dyn BitcoinChainClient>,
    pub monero_wallet: Arc<dyn MoneroWallet>,
    pub seller: Arc<dyn SellerClient>,
    pub hub: EventHub,
    pub approvals: Arc<ApprovalRegistry>,
    pub seed: Seed,
    pub env: EnvConfig,
    /// Cooperative suspend flag, observed at every suspension point.
    pub suspend: watch::Receiver<bool>,
}

enum Step {
    Next(BobState),
    Suspended,
}

/// Drive the swap to a terminal state (or until suspended).
pub async fn run(swap: Swap) -> Result<BobState> {
    run_until(swap, |_| false).await
}

/// Drive the swap until a terminal state, suspension, or `exit_early`.
pub async fn run_until(mut swap: Swap, exit_early: fn(&BobState) -> bool) -> Result<BobState> {
    let mut timelock_task: Option<AbortOnDrop> = None;

    loop {
        let current = swap.state.clone();

        if current.is_terminal() {
            if let Some(progress) = terminal_progress(&current) {
                swap.hub.emit_swap_progress(swap.id, progress);
            }
            tracing::info!(swap_id = %swap.id, state = %current, "swap reached a terminal state");
            return Ok(current);
        }
        if exit_early(&current) {
            return Ok(current);
        }

        if timelock_task.is_none()
            && let Some((lock_txid, timelocks)) = current.timelock_view()
        {
            timelock_task = Some(AbortOnDrop(spawn_timelock_monitor(
                swap.hub.clone(),
                swap.id,
                swap.bitcoin_chain.clone(),
                swap.env.chain_poll_interval,
                lock_txid,
                timelocks,
            )));
        }

        match next_state(&swap, current.clone()).await? {
            Step::Next(next) => {
                anyhow::ensure!(
                    next.phase() > current.phase(),
                    "refusing non-monotonic transition from {current} to {next}"
                );

                // Persist before the next step acts; a failure here halts
                // the swap rather than risking actions on unpersisted state.
                swap.db
                    .append_state(swap.id, &next)
                    .await
                    .context("persist state before acting on it")?;
                swap.hub.emit_swap_state_change(swap.id, next.name());
                tracing::info!(swap_id = %swap.id, from = %current, to = %next, "swap state advanced");
                swap.state = next;
            }
            Step::Suspended => {
                tracing::info!(swap_id = %swap.id, state = %current, "swap suspended");
                return Ok(current);
            }
        }
    }
}

async fn next_state(swap: &Swap, state: BobState) -> Result<Step> {
    let chain = swap.bitcoin_chain.clone();
    let poll = swap.env.chain_poll_interval;

    match state {
        BobState::Started { btc_amount } => {
            swap.hub
                .emit_swap_progress(swap.id, SwapProgress::RequestingQuote);

            let seller = swap.seller.clone();
            let quote = tokio::select! {
                () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                quote = retry_until(
                    "request quote",
                    tokio::time::sleep(swap.env.setup_timeout),
                    || { let seller = seller.clone(); async move { seller.quote().await } },
                ) => match quote {
                    Ok(quote) => quote,
                    Err(RetryAborted::DeadlineReached) => {
                        anyhow::bail!("seller did not answer the quote request in time")
                    }
                },
            };
            swap.hub
                .emit_swap_progress(swap.id, SwapProgress::ReceivedQuote(quote));

            if btc_amount < quote.min_quantity || btc_amount > quote.max_quantity {
                let err = ProtocolError::AmountOutOfRange {
                    btc: btc_amount,
                    min: quote.min_quantity,
                    max: quote.max_quantity,
                };
                tracing::error!(swap_id = %swap.id, error = %err, "aborting before any funds moved");
                return Ok(Step::Next(BobState::SafelyAborted));
            }

            let decision = tokio::select! {
                () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                decision = swap.approvals.request(
                    ApprovalPayload::LockBitcoin {
                        btc_lock_amount: btc_amount,
                    },
                    swap.env.approval_ttl,
                ) => decision,
            };
            if !decision.is_accepted() {
                tracing::info!(swap_id = %swap.id, ?decision, "bitcoin lock was not approved");
                return Ok(Step::Next(BobState::SafelyAborted));
            }

            swap.hub.emit_swap_progress(
                swap.id,
                SwapProgress::SwapSetupInflight {
                    btc_lock_amount: btc_amount,
                },
            );

            let bob_spend_share = swap.seed.derive_monero_spend_share(swap.id);
            let request = SetupRequest {
                swap_id: swap.id,
                btc: btc_amount,
                bob_spend_share_public: bob_spend_share.public_key_hex(),
                bob_view_share: monero::PrivateKey::random(),
                refund_address: swap.metadata.btc_change_address.clone(),
            };

            let seller = swap.seller.clone();
            let response = tokio::select! {
                () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                response = retry_until(
                    "swap setup",
                    tokio::time::sleep(swap.env.setup_timeout),
                    || {
                        let seller = seller.clone();
                        let request = request.clone();
                        async move { seller.setup_swap(request).await }
                    },
                ) => match response {
                    Ok(response) => response,
                    Err(RetryAborted::DeadlineReached) => {
                        anyhow::bail!("swap setup did not complete before the deadline")
                    }
                },
            };

            match validate_setup(
                btc_amount,
                response,
                bob_spend_share,
                swap.env.xmr_lock_target_confirmations,
            ) {
                Ok(state2) => Ok(Step::Next(BobState::SwapSetupCompleted(state2))),
                Err(err) => {
                    tracing::error!(
                        swap_id = %swap.id,
                        error = %err,
                        "seller sent an unusable setup, aborting before any funds moved"
                    );
                    Ok(Step::Next(BobState::SafelyAborted))
                }
            }
        }

        BobState::SwapSetupCompleted(state2) => {
            if *swap.suspend.borrow() {
                return Ok(Step::Suspended);
            }

            // Recorded before the seller can possibly lock, so the sweep
            // wallet never restores past the lock transfer.
            let monero_restore_height = swap
                .monero_wallet
                .height()
                .await
                .context("query monero height")?;

            let status = chain
                .tx_status(state2.tx_lock.txid)
                .await
                .context("query lock transaction")?;
            if status.is_seen() {
                tracing::debug!(swap_id = %swap.id, txid = %state2.tx_lock.txid, "lock transaction already known to the network");
            } else {
                chain
                    .broadcast(&state2.tx_lock)
                    .await
                    .context("broadcast lock transaction")?;
                tracing::info!(swap_id = %swap.id, txid = %state2.tx_lock.txid, "published bitcoin lock transaction");
            }

            Ok(Step::Next(BobState::BtcLocked(
                state2.btc_locked(monero_restore_height),
            )))
        }

        BobState::BtcLocked(state3) => {
            let lock_txid = state3.tx_lock.txid;
            let target = swap.env.btc_lock_target_confirmations;
            swap.hub.emit_swap_progress(
                swap.id,
                SwapProgress::BtcLockTxInMempool {
                    btc_lock_txid: lock_txid,
                    btc_lock_confirmations: None,
                    btc_lock_target_confirmations: target,
                },
            );

            let mut confirmations = watch_confirmations(chain.clone(), lock_txid, target, poll);

            let seller = swap.seller.clone();
            let swap_id = swap.id;
            let proof = retry_until(
                "wait for transfer proof",
                wait_for_cancel_expiry(chain.clone(), poll, lock_txid, state3.timelocks),
                move || {
                    let seller = seller.clone();
                    async move { seller.wait_for_transfer_proof(swap_id).await }
                },
            );
            tokio::pin!(proof);

            loop {
                tokio::select! {
                    () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                    changed = confirmations.changed() => {
                        if changed.is_ok() {
                            let update = *confirmations.borrow();
                            swap.hub.emit_swap_progress(
                                swap.id,
                                SwapProgress::BtcLockTxInMempool {
                                    btc_lock_txid: lock_txid,
                                    btc_lock_confirmations: update.confirmations,
                                    btc_lock_target_confirmations: update.target,
                                },
                            );
                        }
                    }
                    result = &mut proof => {
                        return Ok(Step::Next(match result {
                            Ok(lock_transfer_proof) => BobState::XmrLockProofReceived {
                                state: state3,
                                lock_transfer_proof,
                            },
                            Err(RetryAborted::DeadlineReached) => {
                                tracing::warn!(
                                    swap_id = %swap.id,
                                    "cancel timelock expired while waiting for the transfer proof"
                                );
                                BobState::CancelTimelockExpired(state3.cancel())
                            }
                        }));
                    }
                }
            }
        }

        BobState::XmrLockProofReceived {
            state,
            lock_transfer_proof,
        } => {
            let target = state.xmr_target_confirmations;
            let expiry =
                wait_for_cancel_expiry(chain.clone(), poll, state.tx_lock.txid, state.timelocks);
            tokio::pin!(expiry);

            loop {
                let status = swap
                    .monero_wallet
                    .check_transfer(&lock_transfer_proof, &state.xmr_lock_address, state.xmr)
                    .await;

                match status {
                    TransferStatus::Valid { confirmations } => {
                        swap.hub.emit_swap_progress(
                            swap.id,
                            SwapProgress::XmrLockTxInMempool {
                                xmr_lock_txid: lock_transfer_proof.tx_hash.clone(),
                                xmr_lock_confirmations: Some(confirmations),
                                xmr_lock_target_confirmations: target,
                            },
                        );
                        if confirmations >= target {
                            return Ok(Step::Next(BobState::XmrLocked(
                                state.xmr_locked(lock_transfer_proof),
                            )));
                        }
                    }
                    TransferStatus::Unknown => {
                        swap.hub.emit_swap_progress(
                            swap.id,
                            SwapProgress::XmrLockTxInMempool {
                                xmr_lock_txid: lock_transfer_proof.tx_hash.clone(),
                                xmr_lock_confirmations: None,
                                xmr_lock_target_confirmations: target,
                            },
                        );
                    }
                    TransferStatus::AmountMismatch { received } => {
                        // Protocol violation. The bitcoin is locked, so the
                        // nearest safe state is the cancel path once the
                        // timelock allows it.
                        tracing::error!(
                            swap_id = %swap.id,
                            expected = %state.xmr,
                            received = %received,
                            "seller's lock transfer pays the wrong amount, waiting out the cancel timelock"
                        );
                        tokio::select! {
                            () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                            () = &mut expiry => {
                                return Ok(Step::Next(BobState::CancelTimelockExpired(state.cancel())));
                            }
                        }
                    }
                }

                tokio::select! {
                    () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                    () = &mut expiry => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            "cancel timelock expired before the monero lock confirmed"
                        );
                        return Ok(Step::Next(BobState::CancelTimelockExpired(state.cancel())));
                    }
                    () = tokio::time::sleep(poll) => {}
                }
            }
        }

        BobState::XmrLocked(state4) => {
            swap.hub.emit_swap_progress(swap.id, SwapProgress::XmrLocked);

            let seller = swap.seller.clone();
            let swap_id = swap.id;
            let signature = state4.encrypted_signature.clone();
            let send = retry_until(
                "send encrypted signature",
                wait_for_cancel_expiry(chain.clone(), poll, state4.tx_lock.txid, state4.timelocks),
                move || {
                    let seller = seller.clone();
                    let signature = signature.clone();
                    async move { seller.send_encrypted_signature(swap_id, signature).await }
                },
            );

            tokio::select! {
                () = suspended(&swap.suspend) => Ok(Step::Suspended),
                result = send => Ok(Step::Next(match result {
                    Ok(()) => BobState::EncSigSent(state4),
                    Err(RetryAborted::DeadlineReached) => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            "cancel timelock expired before the encrypted signature was delivered"
                        );
                        BobState::CancelTimelockExpired(state4.cancel())
                    }
                })),
            }
        }

        BobState::EncSigSent(state4) => {
            swap.hub
                .emit_swap_progress(swap.id, SwapProgress::EncryptedSignatureSent);

            let lock_outpoint = OutPoint {
                txid: state4.tx_lock.txid,
                vout: 0,
            };
            let scan_from = confirmed_height(&chain, state4.tx_lock.txid).await;
            let expiry = wait_for_cancel_expiry(
                chain.clone(),
                poll,
                state4.tx_lock.txid,
                state4.timelocks,
            );
            tokio::pin!(expiry);

            loop {
                match chain.find_spend(lock_outpoint, scan_from).await {
                    Ok(Some(spend)) if spend.txid == state4.tx_cancel.txid => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            "cancel transaction hit the chain while waiting for the redeem"
                        );
                        return Ok(Step::Next(BobState::BtcCancelled(state4.cancel())));
                    }
                    Ok(Some(spend)) => {
                        let seller_spend_share =
                            extract_seller_spend_share(&state4.encrypted_signature, &spend)
                                .context("extract seller key share from redeem witness")?;
                        tracing::info!(
                            swap_id = %swap.id,
                            redeem_txid = %spend.txid,
                            "bitcoin redeemed by the seller"
                        );
                        return Ok(Step::Next(BobState::BtcRedeemed(
                            state4.redeem_seen(seller_spend_share),
                        )));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            error = %format!("{err:#}"),
                            "redeem scan failed"
                        );
                    }
                }

                tokio::select! {
                    () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                    () = &mut expiry => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            "cancel timelock expired before the seller redeemed"
                        );
                        return Ok(Step::Next(BobState::CancelTimelockExpired(state4.cancel())));
                    }
                    () = tokio::time::sleep(poll) => {}
                }
            }
        }

        BobState::BtcRedeemed(state5) => {
            swap.hub.emit_swap_progress(swap.id, SwapProgress::BtcRedeemed);

            let wallet = swap.monero_wallet.clone();
            let spend_key = state5.spend_key();
            let view_key = state5.view_key;
            let lock_address = state5.xmr_lock_address.clone();
            let restore_height = state5.monero_restore_height;
            let receive_address = swap.metadata.xmr_receive_address.clone();

            // The monero is ours now; keep trying until the sweep lands.
            let sweep = retry_until("sweep monero", std::future::pending(), move || {
                let wallet = wallet.clone();
                let lock_address = lock_address.clone();
                let receive_address = receive_address.clone();
                async move {
                    wallet
                        .sweep(
                            &spend_key,
                            &view_key,
                            &lock_address,
                            restore_height,
                            &receive_address,
                        )
                        .await
                }
            });

            tokio::select! {
                () = suspended(&swap.suspend) => Ok(Step::Suspended),
                result = sweep => {
                    let sweep_result = match result {
                        Ok(sweep_result) => sweep_result,
                        Err(RetryAborted::DeadlineReached) => {
                            anyhow::bail!("monero sweep aborted unexpectedly")
                        }
                    };
                    swap.hub.emit_swap_progress(
                        swap.id,
                        SwapProgress::XmrRedeemInMempool {
                            xmr_redeem_txids: sweep_result.tx_hashes.clone(),
                            xmr_redeem_address: swap.metadata.xmr_receive_address.clone(),
                        },
                    );
                    Ok(Step::Next(BobState::Released {
                        tx_lock_id: state5.tx_lock_id,
                        xmr_redeem_txids: sweep_result.tx_hashes,
                    }))
                }
            }
        }

        BobState::CancelTimelockExpired(state6) => {
            swap.hub
                .emit_swap_progress(swap.id, SwapProgress::CancelTimelockExpired);

            if *swap.suspend.borrow() {
                return Ok(Step::Suspended);
            }

            let status = chain
                .tx_status(state6.tx_cancel.txid)
                .await
                .context("query cancel transaction")?;
            if status.is_seen() {
                tracing::debug!(swap_id = %swap.id, txid = %state6.tx_cancel.txid, "cancel transaction already known to the network");
            } else {
                chain
                    .broadcast(&state6.tx_cancel)
                    .await
                    .context("broadcast cancel transaction")?;
                tracing::info!(swap_id = %swap.id, txid = %state6.tx_cancel.txid, "published bitcoin cancel transaction");
            }

            Ok(Step::Next(BobState::BtcCancelled(state6)))
        }

        BobState::BtcCancelled(state6) => {
            swap.hub.emit_swap_progress(
                swap.id,
                SwapProgress::BtcCancelled {
                    btc_cancel_txid: state6.tx_cancel.txid,
                },
            );

            let cancel_outpoint = OutPoint {
                txid: state6.tx_cancel.txid,
                vout: 0,
            };
            let scan_from = confirmed_height(&chain, state6.tx_cancel.txid).await;

            loop {
                match chain.find_spend(cancel_outpoint, scan_from).await {
                    Ok(Some(spend)) if spend.txid != state6.tx_refund.txid => {
                        tracing::error!(
                            swap_id = %swap.id,
                            punish_txid = %spend.txid,
                            "seller punished the swap"
                        );
                        return Ok(Step::Next(BobState::BtcPunished {
                            tx_lock_id: state6.tx_lock.txid,
                        }));
                    }
                    Ok(Some(_)) => {
                        if let Ok(TxStatus::Confirmed { .. }) =
                            chain.tx_status(state6.tx_refund.txid).await
                        {
                            return Ok(Step::Next(BobState::BtcRefunded(state6)));
                        }
                    }
                    Ok(None) => {
                        let refund_status = chain.tx_status(state6.tx_refund.txid).await;
                        if !matches!(refund_status, Ok(status) if status.is_seen()) {
                            match chain.broadcast(&state6.tx_refund).await {
                                Ok(_) => {
                                    tracing::info!(
                                        swap_id = %swap.id,
                                        txid = %state6.tx_refund.txid,
                                        "published bitcoin refund transaction"
                                    );
                                }
                                Err(err) => {
                                    // A conflicting punish spend shows up in
                                    // the scan on the next round.
                                    tracing::warn!(
                                        swap_id = %swap.id,
                                        error = %format!("{err:#}"),
                                        "refund broadcast failed"
                                    );
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            error = %format!("{err:#}"),
                            "punish scan failed"
                        );
                    }
                }

                tokio::select! {
                    () = suspended(&swap.suspend) => return Ok(Step::Suspended),
                    () = tokio::time::sleep(poll) => {}
                }
            }
        }

        terminal @ (BobState::BtcRefunded(_)
        | BobState::BtcPunished { .. }
        | BobState::SafelyAborted
        | BobState::Released { .. }) => {
            // Unreachable: the runner returns before stepping a terminal
            // state.
            anyhow::bail!("state machine stepped on terminal state {terminal}")
        }
    }
}

/// Check the setup response against the invariants the engine depends on.
fn validate_setup(
    btc: crate::bitcoin::Amount,
    response: SetupResponse,
    bob_spend_share: monero::PrivateKey,
    xmr_target_confirmations: u64,
) -> Result<State2, ProtocolError> {
    let timelocks = Timelocks::new(response.cancel_timelock, response.punish_timelock)?;

    if response.xmr == monero::Amount::ZERO {
        return Err(ProtocolError::ZeroXmrAmount);
    }

    let ids = [
        response.tx_lock.txid,
        response.tx_cancel.txid,
        response.tx_refund.txid,
    ];
    if ids[0] == ids[1] || ids[0] == ids[2] || ids[1] == ids[2] {
        return Err(ProtocolError::Malformed(
            "duplicate transaction ids in setup".to_string(),
        ));
    }

    Ok(State2 {
        btc,
        xmr: response.xmr,
        timelocks,
        xmr_lock_address: response.xmr_lock_address,
        bob_spend_share,
        view_key: response.view_key,
        tx_lock: response.tx_lock,
        tx_cancel: response.tx_cancel,
        tx_refund: response.tx_refund,
        encrypted_signature: response.encrypted_signature,
        xmr_target_confirmations,
    })
}

/// The seller's redeem witness publishes the adaptor-decrypted scalar;
/// subtracting the mask yields the seller's Monero spend-key share.
pub fn extract_seller_spend_share(
    encrypted_signature: &EncryptedSignature,
    spend: &TxSpend,
) -> Result<monero::PrivateKey, ProtocolError> {
    let published = spend
        .witness
        .iter()
        .rev()
        .find(|item| item.len() == 32)
        .ok_or_else(|| {
            ProtocolError::Malformed("redeem witness carries no 32-byte scalar".to_string())
        })?;

    let published: [u8; 32] = published
        .as_slice()
        .try_into()
        .expect("length checked above");

    Ok(monero::PrivateKey::unmask(
        published,
        encrypted_signature.mask,
    ))
}

/// Resolves once the cancel timelock has expired (status `Cancel` or
/// `Punish`). Chain errors degrade to waiting, never to a spurious expiry.
async fn wait_for_cancel_expiry(
    chain: Arc<dyn BitcoinChainClient>,
    poll: Duration,
    lock_txid: Txid,
    timelocks: Timelocks,
) {
    loop {
        let lock_height = match chain.tx_status(lock_txid).await {
            Ok(TxStatus::Confirmed { height, .. }) => Some(height),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(
                    txid = %lock_txid,
                    error = %format!("{err:#}"),
                    "timelock poll failed"
                );
                None
            }
        };

        if let Ok(tip) = chain.tip_height().await
            && !matches!(
                expired_timelocks(tip, lock_height, timelocks),
                ExpiredTimelocks::None { .. }
            )
        {
            return;
        }

        tokio::time::sleep(poll).await;
    }
}

async fn confirmed_height(chain: &Arc<dyn BitcoinChainClient>, txid: Txid) -> BlockHeight {
    match chain.tx_status(txid).await {
        Ok(TxStatus::Confirmed { height, .. }) => height,
        _ => BlockHeight(0),
    }
}

/// Resolves when the suspend flag is raised; pends forever otherwise.
async fn suspended(rx: &watch::Receiver<bool>) {
    let mut rx = rx.clone();
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can suspend us anymore.
            std::future::pending::<()>().await;
        }
    }
}

fn terminal_progress(state: &BobState) -> Option<SwapProgress> {
    match state {
        BobState::SafelyAborted => Some(SwapProgress::SafelyAborted),
        BobState::BtcRefunded(state6) => Some(SwapProgress::BtcRefunded {
            btc_refund_txid: state6.tx_refund.txid,
        }),
        BobState::BtcPunished { .. } => Some(SwapProgress::BtcPunished),
        BobState::Released { .. } => Some(SwapProgress::Released),
        _ => None,
    }
}

fn spawn_timelock_monitor(
    hub: EventHub,
    swap_id: Uuid,
    chain: Arc<dyn BitcoinChainClient>,
    poll: Duration,
    lock_txid: Txid,
    timelocks: Timelocks,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = TimelockMonitor::new(timelocks);
        loop {
            let lock_height = match chain.tx_status(lock_txid).await {
                Ok(TxStatus::Confirmed { height, .. }) => Some(height),
                Ok(_) => None,
                Err(_) => {
                    tokio::time::sleep(poll).await;
                    continue;
                }
            };

            if let Ok(tip) = chain.tip_height().await {
                for event in monitor.observe(tip, lock_height) {
                    match event {
                        TimelockEvent::StatusChanged(status) => {
                            hub.emit_timelock_change(swap_id, Some(status));
                        }
                        TimelockEvent::CancelExpired => {
                            tracing::info!(%swap_id, "cancel timelock expired");
                        }
                        TimelockEvent::PunishExpired => {
                            tracing::warn!(%swap_id, "punish timelock expired");
                        }
                    }
                }
            }

            tokio::time::sleep(poll).await;
        }
    })
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
