#![allow(dead_code)]

pub mod fakes;
pub mod wait;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tempfile::TempDir;

use btc_xmr_swap::api::{Context, ContextConfig};
use btc_xmr_swap::event::{EngineEvent, EventHub};
use btc_xmr_swap::network::{Multiaddr, PeerId, Seller};
use btc_xmr_swap::swap::EnvConfig;

use fakes::{FakeBitcoinChain, FakeMoneroWallet, FakeSeller, FakeTransport};

pub fn fast_env() -> EnvConfig {
    EnvConfig {
        bitcoin_network: ::bitcoin::Network::Regtest,
        btc_lock_target_confirmations: 1,
        xmr_lock_target_confirmations: 1,
        chain_poll_interval: Duration::from_millis(10),
        approval_ttl: None,
        setup_timeout: Duration::from_secs(5),
    }
}

pub fn seller() -> Seller {
    Seller {
        peer_id: "12D3KooWTestSeller".parse::<PeerId>().expect("valid peer id"),
        addresses: vec![Multiaddr("127.0.0.1:9939".to_string())],
    }
}

/// A fully wired engine over fake chain, wallet and seller.
pub struct TestEngine {
    pub dir: TempDir,
    pub context: Arc<Context>,
    pub chain: Arc<FakeBitcoinChain>,
    pub monero: Arc<FakeMoneroWallet>,
    pub seller: Arc<FakeSeller>,
}

impl TestEngine {
    pub async fn start(seller: Arc<FakeSeller>) -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let chain = FakeBitcoinChain::new();
        let monero = FakeMoneroWallet::new();
        Self::start_in(dir, chain, monero, seller).await
    }

    /// Re-create the engine over the same data dir and fake world, as a
    /// process restart would.
    pub async fn restart(self) -> Result<Self> {
        let Self {
            dir,
            context,
            chain,
            monero,
            seller,
        } = self;
        drop(context);
        Self::start_in(dir, chain, monero, seller).await
    }

    async fn start_in(
        dir: TempDir,
        chain: Arc<FakeBitcoinChain>,
        monero: Arc<FakeMoneroWallet>,
        seller: Arc<FakeSeller>,
    ) -> Result<Self> {
        let context = Context::init(
            ContextConfig {
                data_dir: dir.path().to_path_buf(),
                env: fast_env(),
            },
            chain.clone(),
            monero.clone(),
            Arc::new(FakeTransport(seller.clone())),
            EventHub::default(),
        )
        .await
        .context("init engine context")?;

        Ok(Self {
            dir,
            context,
            chain,
            monero,
            seller,
        })
    }

    /// Answer every approval request with the same decision.
    pub fn spawn_approver(&self, accept: bool) {
        let context = self.context.clone();
        let mut events = context.hub().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::ApprovalRequested { request_id, .. }) => {
                        let _ = context.resolve_approval_request(request_id, accept);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
