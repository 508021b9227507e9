use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::UnknownApprovalRequest;
use crate::bitcoin;
use crate::network::Seller;
use crate::swap::SwapInfo;
use crate::swap::coordinator::CoordinatorError;

/// The full command surface of the engine, as one tagged enum.
///
/// Addresses arrive as strings and are validated at this boundary; nothing
/// unvalidated reaches the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    BuyXmr {
        seller: Seller,
        bitcoin_change_address: Option<String>,
        monero_receive_address: String,
    },
    ResumeSwap {
        swap_id: Uuid,
    },
    SuspendCurrentSwap,
    GetSwapInfo {
        swap_id: Uuid,
    },
    GetSwapInfosAll,
    WithdrawBtc {
        address: String,
        amount_sat: Option<u64>,
    },
    GetBalance {
        force_refresh: bool,
    },
    ResolveApprovalRequest {
        request_id: Uuid,
        accept: bool,
    },
    MoneroRecovery {
        swap_id: Uuid,
    },
    GetLogs {
        swap_id: Option<Uuid>,
        redact: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum CommandResponse {
    SwapStarted {
        swap_id: Uuid,
    },
    SwapResumed {
        swap_id: Uuid,
    },
    SwapSuspended {
        swap_id: Uuid,
    },
    SwapInfo(SwapInfo),
    SwapInfos(Vec<SwapInfo>),
    Withdrawn {
        txid: bitcoin::Txid,
    },
    Balance {
        balance_sat: u64,
    },
    ApprovalResolved {
        request_id: Uuid,
    },
    MoneroRecovery {
        spend_key: String,
        view_key: String,
    },
    Logs {
        lines: Vec<String>,
    },
}

/// Every failure a command can report. Internal panics never cross this
/// boundary; anything unexpected is folded into `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("another swap is already running: {0}")]
    SwapAlreadyRunning(Uuid),
    #[error("no swap is currently running")]
    NoSwapRunning,
    #[error("swap {0} not found")]
    SwapNotFound(Uuid),
    #[error("bitcoin balance {balance} cannot cover a lock transaction")]
    InsufficientFunds { balance: bitcoin::Amount },
    #[error("invalid bitcoin address: {0}")]
    InvalidBitcoinAddress(String),
    #[error("invalid monero address: {0}")]
    InvalidMoneroAddress(String),
    #[error("approval request {0} not found or already resolved")]
    UnknownApprovalRequest(Uuid),
    #[error("swap {swap_id} is in state {state} which exposes no monero recovery keys")]
    NoRecoveryKeys { swap_id: Uuid, state: String },
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<CoordinatorError> for CommandError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::SwapAlreadyRunning(id) => CommandError::SwapAlreadyRunning(id),
            CoordinatorError::NoSwapRunning => CommandError::NoSwapRunning,
            CoordinatorError::SwapNotFound(id) => CommandError::SwapNotFound(id),
            CoordinatorError::InsufficientFunds { balance } => {
                CommandError::InsufficientFunds { balance }
            }
            CoordinatorError::Internal(err) => CommandError::Internal(err),
        }
    }
}

impl From<UnknownApprovalRequest> for CommandError {
    fn from(err: UnknownApprovalRequest) -> Self {
        CommandError::UnknownApprovalRequest(err.0)
    }
}
