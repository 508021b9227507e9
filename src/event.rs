use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::approval::ApprovalPayload;
use crate::background::Progress;
use crate::bitcoin::{self, ExpiredTimelocks, Txid};
use crate::monero;
use crate::network::BidQuote;

/// Per-swap progress, pushed to observers as the state machine advances.
///
/// At-most-once per logical occurrence, but consumers must tolerate
/// duplicates (resumption re-emits the progress of the state it re-enters).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content")]
pub enum SwapProgress {
    RequestingQuote,
    Resuming,
    ReceivedQuote(BidQuote),
    SwapSetupInflight {
        #[serde(with = "::bitcoin::amount::serde::as_sat")]
        btc_lock_amount: bitcoin::Amount,
    },
    BtcLockTxInMempool {
        btc_lock_txid: Txid,
        btc_lock_confirmations: Option<u32>,
        btc_lock_target_confirmations: u32,
    },
    XmrLockTxInMempool {
        xmr_lock_txid: monero::TxHash,
        xmr_lock_confirmations: Option<u64>,
        xmr_lock_target_confirmations: u64,
    },
    XmrLocked,
    EncryptedSignatureSent,
    BtcRedeemed,
    XmrRedeemInMempool {
        xmr_redeem_txids: Vec<monero::TxHash>,
        xmr_redeem_address: monero::Address,
    },
    CancelTimelockExpired,
    BtcCancelled {
        btc_cancel_txid: Txid,
    },
    BtcRefunded {
        btc_refund_txid: Txid,
    },
    BtcPunished,
    SafelyAborted,
    Released,
}

/// One step of engine initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitStep {
    pub component: &'static str,
    pub complete: bool,
}

/// Lifecycle of the engine context itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "content")]
pub enum ContextStatus {
    NotInitialized,
    Initializing(Vec<InitStep>),
    Available,
    Failed,
}

/// Everything the engine pushes out to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum EngineEvent {
    SwapProgressUpdate {
        swap_id: Uuid,
        progress: SwapProgress,
    },
    SwapDatabaseStateUpdate {
        swap_id: Uuid,
        state_name: String,
    },
    TimelockChange {
        swap_id: Uuid,
        timelock: Option<ExpiredTimelocks>,
    },
    ContextInitProgressUpdate {
        status: ContextStatus,
    },
    BalanceChange {
        #[serde(with = "::bitcoin::amount::serde::as_sat")]
        balance: bitcoin::Amount,
    },
    BackgroundProgress {
        component: String,
        progress: Progress,
    },
    ApprovalRequested {
        request_id: Uuid,
        payload: ApprovalPayload,
    },
    ApprovalResolved {
        request_id: Uuid,
        accepted: bool,
    },
    CliLogEmitted {
        buffer: String,
    },
}

/// Broadcast fan-out of engine events to any number of subscribers.
///
/// Emitting never blocks and never fails: with no subscribers the event is
/// dropped, and a lagging subscriber loses the oldest events rather than
/// stalling the engine.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_swap_progress(&self, swap_id: Uuid, progress: SwapProgress) {
        self.emit(EngineEvent::SwapProgressUpdate { swap_id, progress });
    }

    pub fn emit_swap_state_change(&self, swap_id: Uuid, state_name: &str) {
        self.emit(EngineEvent::SwapDatabaseStateUpdate {
            swap_id,
            state_name: state_name.to_string(),
        });
    }

    pub fn emit_timelock_change(&self, swap_id: Uuid, timelock: Option<ExpiredTimelocks>) {
        self.emit(EngineEvent::TimelockChange { swap_id, timelock });
    }

    pub fn emit_context_status(&self, status: ContextStatus) {
        self.emit(EngineEvent::ContextInitProgressUpdate { status });
    }

    pub fn emit_balance_change(&self, balance: bitcoin::Amount) {
        self.emit(EngineEvent::BalanceChange { balance });
    }

    pub fn emit_background_progress(&self, component: &str, progress: Progress) {
        self.emit(EngineEvent::BackgroundProgress {
            component: component.to_string(),
            progress,
        });
    }

    pub fn emit_cli_log(&self, buffer: String) {
        self.emit(EngineEvent::CliLogEmitted { buffer });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}
