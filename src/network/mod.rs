pub mod transport;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitcoin::{self, EncryptedSignature, SignedTx};
use crate::monero::{self, TransferProof};

pub use transport::{SellerTransport, TcpSellerTransport};

/// Network identity of a seller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid peer id: {0}")]
pub struct InvalidPeerId(String);

impl FromStr for PeerId {
    type Err = InvalidPeerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(InvalidPeerId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dialable address of a seller, e.g. `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiaddr(pub String);

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A seller as selected by the user: identity plus dial addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

/// A seller's current offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidQuote {
    /// Price in BTC per XMR.
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub price: bitcoin::Amount,
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub min_quantity: bitcoin::Amount,
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub max_quantity: bitcoin::Amount,
}

/// What Bob submits to the seller to set up a swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRequest {
    pub swap_id: Uuid,
    #[serde(with = "::bitcoin::amount::serde::as_sat")]
    pub btc: bitcoin::Amount,
    /// Bob's Monero key shares entering the shared output.
    pub bob_spend_share_public: String,
    pub bob_view_share: monero::PrivateKey,
    #[serde(with = "crate::bitcoin::address_serde")]
    pub refund_address: bitcoin::Address,
}

/// Everything the setup handshake produces for Bob.
///
/// The transport layer owns the cryptographic handshake; the engine only
/// validates the invariants it depends on before persisting any of this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupResponse {
    pub xmr: monero::Amount,
    pub cancel_timelock: u32,
    pub punish_timelock: u32,
    /// The shared Monero output address both key shares control.
    pub xmr_lock_address: monero::Address,
    /// Full view key of the shared output.
    pub view_key: monero::PrivateKey,
    pub tx_lock: SignedTx,
    pub tx_cancel: SignedTx,
    pub tx_refund: SignedTx,
    /// Bob's adaptor signature over the seller's redeem transaction,
    /// ready to hand out once the Monero side is locked.
    pub encrypted_signature: EncryptedSignature,
}

/// Counterparty failures the engine treats as protocol violations rather
/// than transient I/O.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("amount {btc} outside quote range [{min}, {max}]")]
    AmountOutOfRange {
        btc: bitcoin::Amount,
        min: bitcoin::Amount,
        max: bitcoin::Amount,
    },
    #[error("seller proposed invalid timelocks: {0}")]
    InvalidTimelocks(#[from] bitcoin::InvalidTimelocks),
    #[error("seller proposed a zero monero amount")]
    ZeroXmrAmount,
    #[error("malformed message from seller: {0}")]
    Malformed(String),
}

/// Connection to one seller for the duration of a swap.
#[async_trait]
pub trait SellerClient: Send + Sync {
    async fn quote(&self) -> Result<BidQuote>;

    async fn setup_swap(&self, request: SetupRequest) -> Result<SetupResponse>;

    /// Wait for the seller to announce its Monero lock transfer.
    async fn wait_for_transfer_proof(&self, swap_id: Uuid) -> Result<TransferProof>;

    async fn send_encrypted_signature(
        &self,
        swap_id: Uuid,
        signature: EncryptedSignature,
    ) -> Result<()>;
}

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Retry `op` with exponential backoff until it succeeds or `deadline`
/// resolves, whichever comes first. The deadline (typically a
/// timelock-expiry future) also cuts short an attempt that hangs, so a
/// stalled long poll cannot outlive the timelock.
pub async fn retry_until<T, F, Fut, D>(
    what: &str,
    deadline: D,
    mut op: F,
) -> Result<T, RetryAborted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    D: Future<Output = ()>,
{
    tokio::pin!(deadline);
    let mut delay = BACKOFF_INITIAL;

    loop {
        tokio::select! {
            () = &mut deadline => return Err(RetryAborted::DeadlineReached),
            result = op() => match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        operation = what,
                        retry_in_secs = delay.as_secs_f64(),
                        error = %format!("{err:#}"),
                        "network operation failed, will retry"
                    );
                }
            },
        }

        tokio::select! {
            () = &mut deadline => return Err(RetryAborted::DeadlineReached),
            () = tokio::time::sleep(delay) => {}
        }

        delay = (delay * 2).min(BACKOFF_MAX);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RetryAborted {
    #[error("deadline reached before the operation succeeded")]
    DeadlineReached,
}
