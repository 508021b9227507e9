pub mod coordinator;
pub mod machine;
pub mod store;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitcoin::{self, EncryptedSignature, ExpiredTimelocks, SignedTx, Timelocks, Txid};
use crate::monero;
use crate::network::{BidQuote, Seller};

pub use coordinator::Coordinator;
pub use machine::{Swap, run, run_until};
pub use store::{Database, SqliteSwapStore};

/// Protocol-independent facts about a swap, written once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapMetadata {
    pub swap_id: Uuid,
    pub seller: Seller,
    pub quote: BidQuote,
    pub xmr_receive_address: monero::Address,
    #[serde(with = "crate::bitcoin::address_serde")]
    pub btc_change_address: bitcoin::Address,
    /// Unix timestamp, seconds.
    pub started_at: u64,
}

/// Everything the swap setup negotiated, kept verbatim through the
/// remaining states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State2 {
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub btc: bitcoin::Amount,
    pub xmr: monero::Amount,
    pub timelocks: Timelocks,
    pub xmr_lock_address: monero::Address,
    pub bob_spend_share: monero::PrivateKey,
    pub view_key: monero::PrivateKey,
    pub tx_lock: SignedTx,
    pub tx_cancel: SignedTx,
    pub tx_refund: SignedTx,
    pub encrypted_signature: EncryptedSignature,
    pub xmr_target_confirmations: u64,
}

impl State2 {
    pub fn btc_locked(self, monero_restore_height: monero::BlockHeight) -> State3 {
        State3 {
            btc: self.btc,
            xmr: self.xmr,
            timelocks: self.timelocks,
            xmr_lock_address: self.xmr_lock_address,
            bob_spend_share: self.bob_spend_share,
            view_key: self.view_key,
            tx_lock: self.tx_lock,
            tx_cancel: self.tx_cancel,
            tx_refund: self.tx_refund,
            encrypted_signature: self.encrypted_signature,
            xmr_target_confirmations: self.xmr_target_confirmations,
            monero_restore_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State3 {
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub btc: bitcoin::Amount,
    pub xmr: monero::Amount,
    pub timelocks: Timelocks,
    pub xmr_lock_address: monero::Address,
    pub bob_spend_share: monero::PrivateKey,
    pub view_key: monero::PrivateKey,
    pub tx_lock: SignedTx,
    pub tx_cancel: SignedTx,
    pub tx_refund: SignedTx,
    pub encrypted_signature: EncryptedSignature,
    pub xmr_target_confirmations: u64,
    pub monero_restore_height: monero::BlockHeight,
}

impl State3 {
    pub fn xmr_locked(self, lock_transfer_proof: monero::TransferProof) -> State4 {
        State4 {
            btc: self.btc,
            xmr: self.xmr,
            timelocks: self.timelocks,
            xmr_lock_address: self.xmr_lock_address,
            bob_spend_share: self.bob_spend_share,
            view_key: self.view_key,
            tx_lock: self.tx_lock,
            tx_cancel: self.tx_cancel,
            tx_refund: self.tx_refund,
            encrypted_signature: self.encrypted_signature,
            monero_restore_height: self.monero_restore_height,
            lock_transfer_proof,
        }
    }

    pub fn cancel(self) -> State6 {
        State6 {
            btc: self.btc,
            timelocks: self.timelocks,
            tx_lock: self.tx_lock,
            tx_cancel: self.tx_cancel,
            tx_refund: self.tx_refund,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State4 {
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub btc: bitcoin::Amount,
    pub xmr: monero::Amount,
    pub timelocks: Timelocks,
    pub xmr_lock_address: monero::Address,
    pub bob_spend_share: monero::PrivateKey,
    pub view_key: monero::PrivateKey,
    pub tx_lock: SignedTx,
    pub tx_cancel: SignedTx,
    pub tx_refund: SignedTx,
    pub encrypted_signature: EncryptedSignature,
    pub monero_restore_height: monero::BlockHeight,
    pub lock_transfer_proof: monero::TransferProof,
}

impl State4 {
    pub fn redeem_seen(self, seller_spend_share: monero::PrivateKey) -> State5 {
        State5 {
            tx_lock_id: self.tx_lock.txid,
            xmr_lock_address: self.xmr_lock_address,
            bob_spend_share: self.bob_spend_share,
            seller_spend_share,
            view_key: self.view_key,
            monero_restore_height: self.monero_restore_height,
            lock_transfer_proof: self.lock_transfer_proof,
        }
    }

    pub fn cancel(self) -> State6 {
        State6 {
            btc: self.btc,
            timelocks: self.timelocks,
            tx_lock: self.tx_lock,
            tx_cancel: self.tx_cancel,
            tx_refund: self.tx_refund,
        }
    }
}

/// The Bitcoin is redeemed; both Monero key shares are known and the funds
/// can be swept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State5 {
    pub tx_lock_id: Txid,
    pub xmr_lock_address: monero::Address,
    pub bob_spend_share: monero::PrivateKey,
    pub seller_spend_share: monero::PrivateKey,
    pub view_key: monero::PrivateKey,
    pub monero_restore_height: monero::BlockHeight,
    pub lock_transfer_proof: monero::TransferProof,
}

impl State5 {
    pub fn spend_key(&self) -> monero::PrivateKey {
        self.bob_spend_share + self.seller_spend_share
    }
}

/// The cancel path: everything needed to cancel, refund or recognize a
/// punish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State6 {
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub btc: bitcoin::Amount,
    pub timelocks: Timelocks,
    pub tx_lock: SignedTx,
    pub tx_cancel: SignedTx,
    pub tx_refund: SignedTx,
}

/// The states Bob passes through, persisted after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "content")]
pub enum BobState {
    Started {
        #[serde(with = "::bitcoin::amount::serde::as_sat")]
        btc_amount: bitcoin::Amount,
    },
    SwapSetupCompleted(State2),
    BtcLocked(State3),
    XmrLockProofReceived {
        state: State3,
        lock_transfer_proof: monero::TransferProof,
    },
    XmrLocked(State4),
    EncSigSent(State4),
    BtcRedeemed(State5),
    CancelTimelockExpired(State6),
    BtcCancelled(State6),
    BtcRefunded(State6),
    BtcPunished {
        tx_lock_id: Txid,
    },
    SafelyAborted,
    Released {
        tx_lock_id: Txid,
        xmr_redeem_txids: Vec<monero::TxHash>,
    },
}

impl BobState {
    pub fn name(&self) -> &'static str {
        match self {
            BobState::Started { .. } => "Started",
            BobState::SwapSetupCompleted(_) => "SwapSetupCompleted",
            BobState::BtcLocked(_) => "BtcLocked",
            BobState::XmrLockProofReceived { .. } => "XmrLockProofReceived",
            BobState::XmrLocked(_) => "XmrLocked",
            BobState::EncSigSent(_) => "EncSigSent",
            BobState::BtcRedeemed(_) => "BtcRedeemed",
            BobState::CancelTimelockExpired(_) => "CancelTimelockExpired",
            BobState::BtcCancelled(_) => "BtcCancelled",
            BobState::BtcRefunded(_) => "BtcRefunded",
            BobState::BtcPunished { .. } => "BtcPunished",
            BobState::SafelyAborted => "SafelyAborted",
            BobState::Released { .. } => "Released",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BobState::BtcRefunded(_)
                | BobState::BtcPunished { .. }
                | BobState::SafelyAborted
                | BobState::Released { .. }
        )
    }

    /// Position along the protocol. Every transition strictly increases
    /// this; the runner enforces it.
    pub fn phase(&self) -> u8 {
        match self {
            BobState::Started { .. } => 0,
            BobState::SwapSetupCompleted(_) => 1,
            BobState::BtcLocked(_) => 2,
            BobState::XmrLockProofReceived { .. } => 3,
            BobState::XmrLocked(_) => 4,
            BobState::EncSigSent(_) => 5,
            BobState::BtcRedeemed(_) => 6,
            BobState::CancelTimelockExpired(_) => 7,
            BobState::BtcCancelled(_) => 8,
            BobState::BtcRefunded(_) => 9,
            BobState::BtcPunished { .. } => 10,
            BobState::SafelyAborted => 11,
            BobState::Released { .. } => 12,
        }
    }

    /// Lock txid and timelocks, for states where the timelock clocks are
    /// running.
    pub fn timelock_view(&self) -> Option<(Txid, Timelocks)> {
        match self {
            BobState::SwapSetupCompleted(s) => Some((s.tx_lock.txid, s.timelocks)),
            BobState::BtcLocked(s) => Some((s.tx_lock.txid, s.timelocks)),
            BobState::XmrLockProofReceived { state, .. } => {
                Some((state.tx_lock.txid, state.timelocks))
            }
            BobState::XmrLocked(s) | BobState::EncSigSent(s) => Some((s.tx_lock.txid, s.timelocks)),
            BobState::CancelTimelockExpired(s) | BobState::BtcCancelled(s) => {
                Some((s.tx_lock.txid, s.timelocks))
            }
            _ => None,
        }
    }

    pub fn btc_amount(&self) -> Option<bitcoin::Amount> {
        match self {
            BobState::Started { btc_amount } => Some(*btc_amount),
            BobState::SwapSetupCompleted(s) => Some(s.btc),
            BobState::BtcLocked(s) => Some(s.btc),
            BobState::XmrLockProofReceived { state, .. } => Some(state.btc),
            BobState::XmrLocked(s) | BobState::EncSigSent(s) => Some(s.btc),
            BobState::CancelTimelockExpired(s)
            | BobState::BtcCancelled(s)
            | BobState::BtcRefunded(s) => Some(s.btc),
            _ => None,
        }
    }

    pub fn xmr_amount(&self) -> Option<monero::Amount> {
        match self {
            BobState::SwapSetupCompleted(s) => Some(s.xmr),
            BobState::BtcLocked(s) => Some(s.xmr),
            BobState::XmrLockProofReceived { state, .. } => Some(state.xmr),
            BobState::XmrLocked(s) | BobState::EncSigSent(s) => Some(s.xmr),
            _ => None,
        }
    }

    pub fn tx_lock_id(&self) -> Option<Txid> {
        match self {
            BobState::BtcRedeemed(s) => Some(s.tx_lock_id),
            BobState::BtcPunished { tx_lock_id } => Some(*tx_lock_id),
            BobState::Released { tx_lock_id, .. } => Some(*tx_lock_id),
            BobState::BtcRefunded(s) => Some(s.tx_lock.txid),
            other => other.timelock_view().map(|(txid, _)| txid),
        }
    }
}

impl fmt::Display for BobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BobState::Started { .. } => f.write_str("Started"),
            BobState::SwapSetupCompleted(_) => f.write_str("Swap setup completed"),
            BobState::BtcLocked(_) => f.write_str("Bitcoin locked"),
            BobState::XmrLockProofReceived { .. } => {
                f.write_str("Monero lock transfer proof received")
            }
            BobState::XmrLocked(_) => f.write_str("Monero locked"),
            BobState::EncSigSent(_) => f.write_str("Encrypted signature sent"),
            BobState::BtcRedeemed(_) => f.write_str("Bitcoin redeemed, Monero redeemable"),
            BobState::CancelTimelockExpired(_) => f.write_str("Cancel timelock is expired"),
            BobState::BtcCancelled(_) => f.write_str("Bitcoin cancelled, refundable"),
            BobState::BtcRefunded(_) => f.write_str("Bitcoin refunded"),
            BobState::BtcPunished { .. } => f.write_str("Bitcoin punished"),
            BobState::SafelyAborted => f.write_str("Safely aborted"),
            BobState::Released { .. } => f.write_str("Monero released"),
        }
    }
}

/// Summary of one swap for the command surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapInfo {
    pub swap_id: Uuid,
    pub seller: Seller,
    pub quote: BidQuote,
    pub xmr_receive_address: monero::Address,
    pub state_name: String,
    pub completed: bool,
    pub started_at: u64,
    pub btc_amount_sat: Option<u64>,
    pub xmr_amount_piconero: Option<u64>,
    pub tx_lock_id: Option<Txid>,
    pub timelock: Option<ExpiredTimelocks>,
}

impl SwapInfo {
    pub fn new(
        metadata: &SwapMetadata,
        state: &BobState,
        timelock: Option<ExpiredTimelocks>,
    ) -> Self {
        Self {
            swap_id: metadata.swap_id,
            seller: metadata.seller.clone(),
            quote: metadata.quote,
            xmr_receive_address: metadata.xmr_receive_address.clone(),
            state_name: state.name().to_string(),
            completed: state.is_terminal(),
            started_at: metadata.started_at,
            btc_amount_sat: state.btc_amount().map(|a| a.to_sat()),
            xmr_amount_piconero: state.xmr_amount().map(monero::Amount::as_piconero),
            tx_lock_id: state.tx_lock_id(),
            timelock,
        }
    }
}

/// Tuning knobs of the engine, varying per Bitcoin network.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub bitcoin_network: bitcoin::Network,
    /// Confirmations the Bitcoin lock needs before the seller is expected
    /// to act on it.
    pub btc_lock_target_confirmations: u32,
    /// Confirmations the Monero lock needs before Bob hands out the
    /// encrypted signature.
    pub xmr_lock_target_confirmations: u64,
    pub chain_poll_interval: Duration,
    /// How long an approval request stays open; `None` waits forever.
    pub approval_ttl: Option<Duration>,
    /// How long the setup handshake may keep retrying before the swap run
    /// gives up. The swap stays resumable afterwards.
    pub setup_timeout: Duration,
}

impl EnvConfig {
    pub fn mainnet() -> Self {
        Self {
            bitcoin_network: bitcoin::Network::Bitcoin,
            btc_lock_target_confirmations: 2,
            xmr_lock_target_confirmations: 10,
            chain_poll_interval: Duration::from_secs(15),
            approval_ttl: None,
            setup_timeout: Duration::from_secs(300),
        }
    }

    pub fn testnet() -> Self {
        Self {
            bitcoin_network: bitcoin::Network::Testnet,
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        Self {
            bitcoin_network: bitcoin::Network::Regtest,
            btc_lock_target_confirmations: 1,
            xmr_lock_target_confirmations: 1,
            chain_poll_interval: Duration::from_millis(100),
            approval_ttl: None,
            setup_timeout: Duration::from_secs(30),
        }
    }
}
