use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::bitcoin::EncryptedSignature;
use crate::monero::TransferProof;

use super::{BidQuote, Seller, SellerClient, SetupRequest, SetupResponse};

/// Dials a seller and hands back a protocol client for the swap's lifetime.
#[async_trait]
pub trait SellerTransport: Send + Sync {
    async fn connect(&self, seller: &Seller) -> Result<Arc<dyn SellerClient>>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum WireRequest {
    Quote,
    SetupSwap(SetupRequest),
    TransferProof { swap_id: Uuid },
    EncryptedSignature {
        swap_id: Uuid,
        signature: EncryptedSignature,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
enum WireResponse {
    Quote(BidQuote),
    SetupSwap(SetupResponse),
    TransferProof(TransferProof),
    Ack,
    Error { message: String },
}

/// Line-delimited JSON over TCP.
///
/// One connection per request keeps the client stateless across the long
/// gaps between protocol messages; the seller correlates by swap id.
pub struct TcpSellerTransport {
    connect_timeout: Duration,
}

impl TcpSellerTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpSellerTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl SellerTransport for TcpSellerTransport {
    async fn connect(&self, seller: &Seller) -> Result<Arc<dyn SellerClient>> {
        anyhow::ensure!(
            !seller.addresses.is_empty(),
            "seller {} has no dialable addresses",
            seller.peer_id
        );

        // Probe the addresses and keep the first that answers.
        for address in &seller.addresses {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address.0)).await
            {
                Ok(Ok(stream)) => {
                    drop(stream);
                    tracing::debug!(peer_id = %seller.peer_id, %address, "selected seller address");
                    return Ok(Arc::new(TcpSellerClient {
                        address: address.0.clone(),
                        connect_timeout: self.connect_timeout,
                    }));
                }
                Ok(Err(err)) => {
                    tracing::warn!(%address, error = %err, "seller address refused connection");
                }
                Err(_) => {
                    tracing::warn!(%address, "seller address timed out");
                }
            }
        }

        anyhow::bail!("none of the seller's addresses responded")
    }
}

struct TcpSellerClient {
    address: String,
    connect_timeout: Duration,
}

impl TcpSellerClient {
    async fn roundtrip(&self, request: &WireRequest) -> Result<WireResponse> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .context("connect timed out")?
            .context("connect to seller")?;

        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(request).context("encode request")?;
        line.push('\n');
        write_half
            .write_all(line.as_bytes())
            .await
            .context("send request")?;

        let mut response = String::new();
        BufReader::new(read_half)
            .read_line(&mut response)
            .await
            .context("read response")?;
        anyhow::ensure!(!response.is_empty(), "seller closed the connection");

        let response: WireResponse =
            serde_json::from_str(response.trim_end()).context("decode response")?;

        if let WireResponse::Error { message } = response {
            anyhow::bail!("seller returned an error: {message}");
        }

        Ok(response)
    }
}

#[async_trait]
impl SellerClient for TcpSellerClient {
    async fn quote(&self) -> Result<BidQuote> {
        match self.roundtrip(&WireRequest::Quote).await? {
            WireResponse::Quote(quote) => Ok(quote),
            other => anyhow::bail!("unexpected response to quote: {other:?}"),
        }
    }

    async fn setup_swap(&self, request: SetupRequest) -> Result<SetupResponse> {
        match self.roundtrip(&WireRequest::SetupSwap(request)).await? {
            WireResponse::SetupSwap(response) => Ok(response),
            other => anyhow::bail!("unexpected response to setup_swap: {other:?}"),
        }
    }

    async fn wait_for_transfer_proof(&self, swap_id: Uuid) -> Result<TransferProof> {
        // Long poll; the seller answers once its lock transfer exists.
        match self.roundtrip(&WireRequest::TransferProof { swap_id }).await? {
            WireResponse::TransferProof(proof) => Ok(proof),
            other => anyhow::bail!("unexpected response to transfer_proof: {other:?}"),
        }
    }

    async fn send_encrypted_signature(
        &self,
        swap_id: Uuid,
        signature: EncryptedSignature,
    ) -> Result<()> {
        match self
            .roundtrip(&WireRequest::EncryptedSignature { swap_id, signature })
            .await?
        {
            WireResponse::Ack => Ok(()),
            other => anyhow::bail!("unexpected response to encrypted_signature: {other:?}"),
        }
    }
}
