use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::approval::ApprovalRegistry;
use crate::bitcoin::{self, BitcoinChainClient};
use crate::event::{EventHub, SwapProgress};
use crate::monero::{self, MoneroWallet};
use crate::network::{Seller, SellerClient, SellerTransport};
use crate::seed::Seed;

use super::{BobState, Database, EnvConfig, SwapMetadata, machine};

/// Kept back from the lock amount to pay for the lock transaction itself.
const LOCK_TX_FEE_RESERVE: bitcoin::Amount = bitcoin::Amount::from_sat(15_000);

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("swap {0} is already running")]
    SwapAlreadyRunning(Uuid),
    #[error("no swap is currently running")]
    NoSwapRunning,
    #[error("swap {0} not found")]
    SwapNotFound(Uuid),
    #[error("bitcoin balance {balance} cannot cover a lock transaction")]
    InsufficientFunds { balance: bitcoin::Amount },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

struct ActiveSwap {
    swap_id: Uuid,
    suspend: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    db: Database,
    bitcoin_chain: Arc<dyn BitcoinChainClient>,
    monero_wallet: Arc<dyn MoneroWallet>,
    transport: Arc<dyn SellerTransport>,
    hub: EventHub,
    approvals: Arc<ApprovalRegistry>,
    seed: Seed,
    env: EnvConfig,
    /// The single actively-driven swap. Every start/resume goes through
    /// this slot; it doubles as the advisory per-swap lock during
    /// resumption.
    active: Mutex<Option<ActiveSwap>>,
}

/// Starts, resumes and suspends swaps, enforcing that at most one swap is
/// actively driven by this process at a time.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        bitcoin_chain: Arc<dyn BitcoinChainClient>,
        monero_wallet: Arc<dyn MoneroWallet>,
        transport: Arc<dyn SellerTransport>,
        hub: EventHub,
        approvals: Arc<ApprovalRegistry>,
        seed: Seed,
        env: EnvConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                bitcoin_chain,
                monero_wallet,
                transport,
                hub,
                approvals,
                seed,
                env,
                active: Mutex::new(None),
            }),
        }
    }

    /// Create a new swap with `seller` and start driving it. Fails with
    /// busy while another swap occupies the active slot; no record is
    /// created in that case.
    pub async fn buy_xmr(
        &self,
        seller: Seller,
        change_address: Option<bitcoin::Address>,
        receive_address: monero::Address,
    ) -> Result<Uuid, CoordinatorError> {
        let inner = &self.inner;
        let mut slot = inner.active.lock().await;
        if let Some(active) = slot.as_ref()
            && !active.handle.is_finished()
        {
            return Err(CoordinatorError::SwapAlreadyRunning(active.swap_id));
        }

        let balance = inner
            .bitcoin_chain
            .balance()
            .await
            .context("query bitcoin balance")?;
        let Some(btc_amount) = balance.checked_sub(LOCK_TX_FEE_RESERVE) else {
            return Err(CoordinatorError::InsufficientFunds { balance });
        };
        if btc_amount == bitcoin::Amount::ZERO {
            return Err(CoordinatorError::InsufficientFunds { balance });
        }

        let change_address = match change_address {
            Some(address) => address,
            None => inner
                .bitcoin_chain
                .fresh_address()
                .await
                .context("derive change address")?,
        };

        let seller_client = inner
            .transport
            .connect(&seller)
            .await
            .context("connect to seller")?;
        let quote = seller_client
            .quote()
            .await
            .context("request initial quote")?;

        let swap_id = Uuid::new_v4();
        let metadata = SwapMetadata {
            swap_id,
            seller,
            quote,
            xmr_receive_address: receive_address,
            btc_change_address: change_address,
            started_at: unix_now()?,
        };

        inner
            .db
            .insert_swap(metadata.clone())
            .await
            .context("persist new swap")?;
        let start = BobState::Started { btc_amount };
        inner
            .db
            .append_state(swap_id, &start)
            .await
            .context("persist initial state")?;
        inner.hub.emit_swap_state_change(swap_id, start.name());

        tracing::info!(%swap_id, peer_id = %metadata.seller.peer_id, "starting new swap");
        *slot = Some(spawn_swap(inner.clone(), metadata, start, seller_client));

        Ok(swap_id)
    }

    /// Resume an interrupted swap from its last persisted state.
    pub async fn resume(&self, swap_id: Uuid) -> Result<(), CoordinatorError> {
        let inner = &self.inner;
        let mut slot = inner.active.lock().await;
        if let Some(active) = slot.as_ref()
            && !active.handle.is_finished()
        {
            return Err(CoordinatorError::SwapAlreadyRunning(active.swap_id));
        }

        let metadata = inner
            .db
            .get_swap(swap_id)
            .await
            .context("load swap")?
            .ok_or(CoordinatorError::SwapNotFound(swap_id))?;
        let state = inner
            .db
            .latest_state(swap_id)
            .await
            .context("load latest state")?
            .ok_or(CoordinatorError::SwapNotFound(swap_id))?;

        if state.is_terminal() {
            tracing::info!(%swap_id, state = %state, "swap is already complete, nothing to resume");
            return Ok(());
        }

        inner
            .hub
            .emit_swap_progress(swap_id, SwapProgress::Resuming);

        let seller_client = inner
            .transport
            .connect(&metadata.seller)
            .await
            .context("connect to seller")?;

        tracing::info!(%swap_id, state = %state, "resuming swap");
        *slot = Some(spawn_swap(inner.clone(), metadata, state, seller_client));

        Ok(())
    }

    /// Ask the running swap to stop at its next safe suspension point and
    /// wait until it has.
    pub async fn suspend_current(&self) -> Result<Uuid, CoordinatorError> {
        let (swap_id, mut done) = {
            let slot = self.inner.active.lock().await;
            let Some(active) = slot.as_ref() else {
                return Err(CoordinatorError::NoSwapRunning);
            };
            let _ = active.suspend.send(true);
            tracing::info!(swap_id = %active.swap_id, "requested swap suspension");
            (active.swap_id, active.done.clone())
        };

        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }

        Ok(swap_id)
    }

    /// The swap currently occupying the active slot, if any.
    pub async fn current_swap(&self) -> Option<Uuid> {
        let slot = self.inner.active.lock().await;
        slot.as_ref()
            .filter(|active| !active.handle.is_finished())
            .map(|active| active.swap_id)
    }

    /// Wait for the running swap (if any) to finish or suspend.
    pub async fn wait_until_idle(&self) {
        let done = {
            let slot = self.inner.active.lock().await;
            slot.as_ref().map(|active| active.done.clone())
        };

        if let Some(mut done) = done {
            while !*done.borrow() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

fn spawn_swap(
    inner: Arc<Inner>,
    metadata: SwapMetadata,
    start: BobState,
    seller: Arc<dyn SellerClient>,
) -> ActiveSwap {
    let swap_id = metadata.swap_id;
    let (suspend_tx, suspend_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);

    let handle = tokio::spawn({
        let inner = inner.clone();
        async move {
            let swap = machine::Swap {
                id: swap_id,
                state: start,
                metadata,
                db: inner.db.clone(),
                bitcoin_chain: inner.bitcoin_chain.clone(),
                monero_wallet: inner.monero_wallet.clone(),
                seller,
                hub: inner.hub.clone(),
                approvals: inner.approvals.clone(),
                seed: inner.seed.clone(),
                env: inner.env.clone(),
                suspend: suspend_rx,
            };

            match machine::run(swap).await {
                Ok(state) => {
                    tracing::info!(%swap_id, state = %state, "swap run ended");
                }
                Err(err) => {
                    tracing::error!(
                        %swap_id,
                        error = %format!("{err:#}"),
                        "swap run failed, resume to retry"
                    );
                }
            }

            let mut slot = inner.active.lock().await;
            if let Some(active) = slot.as_ref()
                && active.swap_id == swap_id
            {
                *slot = None;
            }
            drop(slot);

            let _ = done_tx.send(true);
        }
    });

    ActiveSwap {
        swap_id,
        suspend: suspend_tx,
        done: done_rx,
        handle,
    }
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs())
}
