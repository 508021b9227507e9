use anyhow::{Context as _, Result};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT as _;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::Deserialize;

use super::{Address, Amount, BlockHeight, PrivateKey, TransferProof, TxHash};

/// What the wallet knows about the seller's lock transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The node could not be reached or does not know the transaction yet.
    Unknown,
    /// The transfer exists and pays the expected amount.
    Valid { confirmations: u64 },
    /// The transfer exists but pays a different amount than negotiated.
    AmountMismatch { received: Amount },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepResult {
    pub tx_hashes: Vec<TxHash>,
}

/// Monero wallet operations the swap engine depends on.
#[async_trait]
pub trait MoneroWallet: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    async fn height(&self) -> Result<BlockHeight>;

    /// Check the seller's transfer proof against the chain: the transfer
    /// must pay `expected` to the shared lock address. Node unavailability
    /// reports `Unknown`, never an error; the watcher keeps polling.
    async fn check_transfer(
        &self,
        proof: &TransferProof,
        lock_address: &Address,
        expected: Amount,
    ) -> TransferStatus;

    /// Claim the swapped funds: restore the shared lock wallet from the
    /// swap keys at `restore_height` and sweep everything to `to`.
    async fn sweep(
        &self,
        spend_key: &PrivateKey,
        view_key: &PrivateKey,
        lock_address: &Address,
        restore_height: BlockHeight,
        to: &Address,
    ) -> Result<SweepResult>;

    async fn balance(&self) -> Result<Amount>;
}

/// `monero-wallet-rpc` backend.
pub struct WalletRpcClient {
    client: HttpClient,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GetHeightResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct CheckTxKeyResponse {
    confirmations: u64,
    received: u64,
    #[allow(dead_code)]
    in_pool: bool,
}

#[derive(Debug, Deserialize)]
struct SweepAllResponse {
    tx_hash_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GetBalanceResponse {
    balance: u64,
}

impl WalletRpcClient {
    pub fn connect(url: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .build(url)
            .with_context(|| format!("create monero-wallet-rpc client for {url}"))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: ObjectParams,
    ) -> Result<T> {
        self.client
            .request(method, params)
            .await
            .with_context(|| format!("monero-wallet-rpc {method}"))
    }
}

#[async_trait]
impl MoneroWallet for WalletRpcClient {
    async fn ping(&self) -> Result<()> {
        let _: GetHeightResponse = self.call("get_height", ObjectParams::new()).await?;
        Ok(())
    }

    async fn height(&self) -> Result<BlockHeight> {
        let resp: GetHeightResponse = self.call("get_height", ObjectParams::new()).await?;
        Ok(BlockHeight(resp.height))
    }

    async fn check_transfer(
        &self,
        proof: &TransferProof,
        lock_address: &Address,
        expected: Amount,
    ) -> TransferStatus {
        let mut params = ObjectParams::new();
        let ok = params.insert("txid", proof.tx_hash.0.as_str()).is_ok()
            && params.insert("tx_key", proof.tx_key.to_hex()).is_ok()
            && params.insert("address", lock_address.as_str()).is_ok();
        if !ok {
            return TransferStatus::Unknown;
        }

        let resp: CheckTxKeyResponse = match self.call("check_tx_key", params).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(
                    tx_hash = %proof.tx_hash,
                    error = %format!("{err:#}"),
                    "transfer proof check failed"
                );
                return TransferStatus::Unknown;
            }
        };

        let received = Amount::from_piconero(resp.received);
        if received < expected {
            return TransferStatus::AmountMismatch { received };
        }

        TransferStatus::Valid {
            confirmations: resp.confirmations,
        }
    }

    async fn sweep(
        &self,
        spend_key: &PrivateKey,
        view_key: &PrivateKey,
        lock_address: &Address,
        restore_height: BlockHeight,
        to: &Address,
    ) -> Result<SweepResult> {
        // Restore a throwaway wallet from the swap keys, then sweep it.
        let mut params = ObjectParams::new();
        params
            .insert("restore_height", restore_height.0)
            .context("encode restore_height")?;
        params
            .insert("filename", format!("swap-sweep-{}", &lock_address.as_str()[..16]))
            .context("encode filename")?;
        params
            .insert("address", lock_address.as_str())
            .context("encode address")?;
        params
            .insert("spendkey", spend_key.to_hex())
            .context("encode spendkey")?;
        params
            .insert("viewkey", view_key.to_hex())
            .context("encode viewkey")?;
        params.insert("password", "").context("encode password")?;
        params
            .insert("autosave_current", true)
            .context("encode autosave_current")?;
        let _: serde_json::Value = self.call("generate_from_keys", params).await?;

        let mut params = ObjectParams::new();
        params
            .insert("address", to.as_str())
            .context("encode address")?;
        let resp: SweepAllResponse = self.call("sweep_all", params).await?;

        Ok(SweepResult {
            tx_hashes: resp.tx_hash_list.into_iter().map(TxHash).collect(),
        })
    }

    async fn balance(&self) -> Result<Amount> {
        let mut params = ObjectParams::new();
        params.insert("account_index", 0u32).context("encode account_index")?;
        let resp: GetBalanceResponse = self.call("get_balance", params).await?;
        Ok(Amount::from_piconero(resp.balance))
    }
}
