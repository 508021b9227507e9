use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use ::bitcoin::{Address, Amount, OutPoint, Txid};
use bitcoincore_rpc::RpcApi as _;
use tokio::sync::watch;

use super::{BlockHeight, SignedTx};

/// Where a transaction currently sits on the Bitcoin chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    NotFound,
    InMempool,
    Confirmed {
        height: BlockHeight,
        confirmations: u32,
    },
}

impl TxStatus {
    pub fn confirmations(&self) -> u32 {
        match self {
            TxStatus::Confirmed { confirmations, .. } => *confirmations,
            _ => 0,
        }
    }

    pub fn is_seen(&self) -> bool {
        !matches!(self, TxStatus::NotFound)
    }
}

/// A confirmed transaction spending a watched output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSpend {
    pub txid: Txid,
    /// Witness stack of the input doing the spend.
    pub witness: Vec<Vec<u8>>,
}

/// One confirmation-progress observation for a watched transaction.
///
/// `confirmations` is `None` while the node cannot be reached; watchers fail
/// soft rather than blocking the swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationUpdate {
    pub confirmations: Option<u32>,
    pub target: u32,
}

impl ConfirmationUpdate {
    pub fn unknown(target: u32) -> Self {
        Self {
            confirmations: None,
            target,
        }
    }
}

/// Read/write access to a Bitcoin node, as needed by the swap engine.
#[async_trait]
pub trait BitcoinChainClient: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    async fn tip_height(&self) -> Result<BlockHeight>;

    async fn tx_status(&self, txid: Txid) -> Result<TxStatus>;

    /// Publish a fully signed transaction. Broadcasting a transaction that
    /// is already known to the network must succeed.
    async fn broadcast(&self, tx: &SignedTx) -> Result<Txid>;

    /// Find the confirmed transaction spending `outpoint`, scanning from
    /// `from_height`.
    async fn find_spend(&self, outpoint: OutPoint, from_height: BlockHeight)
    -> Result<Option<TxSpend>>;

    async fn balance(&self) -> Result<Amount>;

    async fn fresh_address(&self) -> Result<Address>;

    /// Send `amount` to `address`; `None` sweeps the whole wallet balance.
    async fn send_to_address(&self, address: Address, amount: Option<Amount>) -> Result<Txid>;
}

/// Spawn a poll loop reporting confirmation progress for `txid` on a watch
/// channel. The loop ends when every receiver is dropped.
pub fn watch_confirmations(
    client: Arc<dyn BitcoinChainClient>,
    txid: Txid,
    target: u32,
    interval: Duration,
) -> watch::Receiver<ConfirmationUpdate> {
    let (tx, rx) = watch::channel(ConfirmationUpdate::unknown(target));

    tokio::spawn(async move {
        loop {
            let update = match client.tx_status(txid).await {
                Ok(status) => ConfirmationUpdate {
                    confirmations: Some(status.confirmations()),
                    target,
                },
                Err(err) => {
                    tracing::warn!(%txid, error = %format!("{err:#}"), "confirmation poll failed");
                    ConfirmationUpdate::unknown(target)
                }
            };

            if tx.send(update).is_err() {
                break;
            }

            tokio::time::sleep(interval).await;
        }
    });

    rx
}

/// Bitcoin Core JSON-RPC backend.
pub struct CoreRpcClient {
    client: Arc<bitcoincore_rpc::Client>,
    url: String,
}

impl CoreRpcClient {
    pub fn connect(url: &str, auth: bitcoincore_rpc::Auth) -> Result<Self> {
        let client = bitcoincore_rpc::Client::new(url, auth)
            .with_context(|| format!("create bitcoind rpc client for {url}"))?;
        Ok(Self {
            client: Arc::new(client),
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn with_client<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&bitcoincore_rpc::Client) -> Result<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .context("join bitcoind rpc call")?
    }
}

fn is_not_found(err: &bitcoincore_rpc::Error) -> bool {
    // -5: RPC_INVALID_ADDRESS_OR_KEY, returned for unknown transactions.
    matches!(
        err,
        bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Rpc(rpc)) if rpc.code == -5
    )
}

#[async_trait]
impl BitcoinChainClient for CoreRpcClient {
    async fn ping(&self) -> Result<()> {
        self.with_client(|c| {
            c.get_block_count().context("get_block_count")?;
            Ok(())
        })
        .await
    }

    async fn tip_height(&self) -> Result<BlockHeight> {
        let count = self
            .with_client(|c| c.get_block_count().context("get_block_count"))
            .await?;
        let height = u32::try_from(count).context("chain height out of range")?;
        Ok(BlockHeight(height))
    }

    async fn tx_status(&self, txid: Txid) -> Result<TxStatus> {
        self.with_client(move |c| {
            let info = match c.get_raw_transaction_info(&txid, None) {
                Ok(info) => info,
                Err(err) if is_not_found(&err) => return Ok(TxStatus::NotFound),
                Err(err) => return Err(err).context("get_raw_transaction_info"),
            };

            match (info.confirmations, info.blockhash) {
                (Some(confirmations), Some(blockhash)) if confirmations > 0 => {
                    let header = c
                        .get_block_header_info(&blockhash)
                        .context("get_block_header_info")?;
                    let height =
                        u32::try_from(header.height).context("block height out of range")?;
                    Ok(TxStatus::Confirmed {
                        height: BlockHeight(height),
                        confirmations,
                    })
                }
                _ => Ok(TxStatus::InMempool),
            }
        })
        .await
    }

    async fn broadcast(&self, tx: &SignedTx) -> Result<Txid> {
        let txid = tx.txid;
        let tx_hex = tx.tx_hex.clone();
        self.with_client(move |c| {
            match c.send_raw_transaction(tx_hex.as_str()) {
                Ok(txid) => Ok(txid),
                // Re-broadcasting an already mined transaction is fine.
                Err(err) => {
                    let already_known = match c.get_raw_transaction_info(&txid, None) {
                        Ok(_) => true,
                        Err(_) => false,
                    };
                    if already_known {
                        Ok(txid)
                    } else {
                        Err(err).context("send_raw_transaction")
                    }
                }
            }
        })
        .await
    }

    async fn find_spend(
        &self,
        outpoint: OutPoint,
        from_height: BlockHeight,
    ) -> Result<Option<TxSpend>> {
        self.with_client(move |c| {
            let tip = c.get_block_count().context("get_block_count")?;
            let mut height = u64::from(from_height.0);

            while height <= tip {
                let hash = c.get_block_hash(height).context("get_block_hash")?;
                let block = c.get_block(&hash).context("get_block")?;

                for tx in &block.txdata {
                    for input in &tx.input {
                        if input.previous_output == outpoint {
                            return Ok(Some(TxSpend {
                                txid: tx.compute_txid(),
                                witness: input.witness.iter().map(|item| item.to_vec()).collect(),
                            }));
                        }
                    }
                }

                height += 1;
            }

            Ok(None)
        })
        .await
    }

    async fn balance(&self) -> Result<Amount> {
        self.with_client(|c| c.get_balance(None, None).context("get_balance"))
            .await
    }

    async fn fresh_address(&self) -> Result<Address> {
        self.with_client(|c| {
            let address = c
                .get_new_address(None, None)
                .context("get_new_address")?
                .assume_checked();
            Ok(address)
        })
        .await
    }

    async fn send_to_address(&self, address: Address, amount: Option<Amount>) -> Result<Txid> {
        self.with_client(move |c| {
            // A sweep spends the whole balance and lets Core subtract the
            // network fee from the output.
            let (amount, subtract_fee) = match amount {
                Some(amount) => (amount, false),
                None => (c.get_balance(None, None).context("get_balance")?, true),
            };
            c.send_to_address(
                &address,
                amount,
                None,
                None,
                Some(subtract_fee),
                None,
                None,
                None,
            )
            .context("send_to_address")
        })
        .await
    }
}

/// A set of configured Bitcoin node endpoints. `connect` probes them in
/// order and returns the first one that answers.
pub struct NodePool {
    endpoints: Vec<(String, bitcoincore_rpc::Auth)>,
}

impl NodePool {
    pub fn new(endpoints: Vec<(String, bitcoincore_rpc::Auth)>) -> Self {
        Self { endpoints }
    }

    pub async fn connect(&self) -> Result<CoreRpcClient> {
        anyhow::ensure!(!self.endpoints.is_empty(), "no bitcoind endpoints configured");

        for (url, auth) in &self.endpoints {
            let client = match CoreRpcClient::connect(url, auth.clone()) {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(%url, error = %format!("{err:#}"), "bitcoind endpoint rejected");
                    continue;
                }
            };

            match client.ping().await {
                Ok(()) => {
                    tracing::debug!(%url, "selected bitcoind endpoint");
                    return Ok(client);
                }
                Err(err) => {
                    tracing::warn!(%url, error = %format!("{err:#}"), "bitcoind endpoint not live");
                }
            }
        }

        anyhow::bail!("none of the configured bitcoind endpoints responded")
    }
}
