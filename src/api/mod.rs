pub mod command;

use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::approval::ApprovalRegistry;
use crate::background::BackgroundProcesses;
use crate::bitcoin::{self, BitcoinChainClient, expired_timelocks};
use crate::event::{ContextStatus, EventHub, InitStep};
use crate::logging;
use crate::monero::{self, MoneroWallet};
use crate::network::{Seller, SellerTransport};
use crate::seed::Seed;
use crate::swap::{BobState, Coordinator, Database, EnvConfig, SwapInfo, SwapMetadata};

pub use command::{Command, CommandError, CommandResponse};

/// Where the engine keeps its durable files.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub data_dir: PathBuf,
    pub env: EnvConfig,
}

impl ContextConfig {
    fn db_path(&self) -> PathBuf {
        self.data_dir.join("sqlite").join("swaps.sqlite3")
    }

    fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// The engine handle the outside world talks to: every command goes through
/// here, every event comes out of the hub.
pub struct Context {
    coordinator: Coordinator,
    db: Database,
    bitcoin_chain: Arc<dyn BitcoinChainClient>,
    approvals: Arc<ApprovalRegistry>,
    background: Arc<BackgroundProcesses>,
    hub: EventHub,
    env: EnvConfig,
    logs_dir: PathBuf,
    cached_balance: Mutex<Option<bitcoin::Amount>>,
}

impl Context {
    /// Bring the engine up: open the database, load the seed, probe both
    /// wallets. Emits `context-init-progress-update` events along the way
    /// and `Failed` if any step does not come up.
    pub async fn init(
        config: ContextConfig,
        bitcoin_chain: Arc<dyn BitcoinChainClient>,
        monero_wallet: Arc<dyn MoneroWallet>,
        transport: Arc<dyn SellerTransport>,
        hub: EventHub,
    ) -> Result<Arc<Self>> {
        let result = Self::init_inner(config, bitcoin_chain, monero_wallet, transport, &hub).await;

        match &result {
            Ok(_) => hub.emit_context_status(ContextStatus::Available),
            Err(_) => hub.emit_context_status(ContextStatus::Failed),
        }

        result
    }

    async fn init_inner(
        config: ContextConfig,
        bitcoin_chain: Arc<dyn BitcoinChainClient>,
        monero_wallet: Arc<dyn MoneroWallet>,
        transport: Arc<dyn SellerTransport>,
        hub: &EventHub,
    ) -> Result<Arc<Self>> {
        let mut init = InitProgress::new(hub.clone());

        init.step("OpeningDatabase");
        let db = Database::open(config.db_path()).context("open swap database")?;
        let seed = Seed::from_file_or_generate(&config.data_dir).context("load seed")?;
        init.done();

        init.step("OpeningBitcoinWallet");
        bitcoin_chain
            .ping()
            .await
            .context("bitcoin node is not reachable")?;
        init.done();

        init.step("OpeningMoneroWallet");
        monero_wallet
            .ping()
            .await
            .context("monero wallet is not reachable")?;
        init.done();

        let approvals = Arc::new(ApprovalRegistry::new(hub.clone()));
        let background = Arc::new(BackgroundProcesses::new(hub.clone()));

        let coordinator = Coordinator::new(
            db.clone(),
            bitcoin_chain.clone(),
            monero_wallet,
            transport,
            hub.clone(),
            approvals.clone(),
            seed,
            config.env.clone(),
        );

        Ok(Arc::new(Self {
            coordinator,
            db,
            bitcoin_chain,
            approvals,
            background,
            hub: hub.clone(),
            env: config.env.clone(),
            logs_dir: config.logs_dir(),
            cached_balance: Mutex::new(None),
        }))
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn background(&self) -> &Arc<BackgroundProcesses> {
        &self.background
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Swaps that were interrupted and can be resumed.
    pub async fn unfinished_swaps(&self) -> Result<Vec<Uuid>, CommandError> {
        Ok(self.db.unfinished_swaps().await?)
    }

    /// Dispatch one typed command.
    pub async fn dispatch(&self, command: Command) -> Result<CommandResponse, CommandError> {
        match command {
            Command::BuyXmr {
                seller,
                bitcoin_change_address,
                monero_receive_address,
            } => {
                let swap_id = self
                    .buy_xmr(seller, bitcoin_change_address, monero_receive_address)
                    .await?;
                Ok(CommandResponse::SwapStarted { swap_id })
            }
            Command::ResumeSwap { swap_id } => {
                self.resume_swap(swap_id).await?;
                Ok(CommandResponse::SwapResumed { swap_id })
            }
            Command::SuspendCurrentSwap => {
                let swap_id = self.suspend_current_swap().await?;
                Ok(CommandResponse::SwapSuspended { swap_id })
            }
            Command::GetSwapInfo { swap_id } => {
                Ok(CommandResponse::SwapInfo(self.get_swap_info(swap_id).await?))
            }
            Command::GetSwapInfosAll => {
                Ok(CommandResponse::SwapInfos(self.get_swap_infos_all().await?))
            }
            Command::WithdrawBtc { address, amount_sat } => {
                let txid = self
                    .withdraw_btc(&address, amount_sat.map(bitcoin::Amount::from_sat))
                    .await?;
                Ok(CommandResponse::Withdrawn { txid })
            }
            Command::GetBalance { force_refresh } => {
                let balance = self.get_balance(force_refresh).await?;
                Ok(CommandResponse::Balance {
                    balance_sat: balance.to_sat(),
                })
            }
            Command::ResolveApprovalRequest { request_id, accept } => {
                self.resolve_approval_request(request_id, accept)?;
                Ok(CommandResponse::ApprovalResolved { request_id })
            }
            Command::MoneroRecovery { swap_id } => {
                let (spend_key, view_key) = self.monero_recovery(swap_id).await?;
                Ok(CommandResponse::MoneroRecovery {
                    spend_key,
                    view_key,
                })
            }
            Command::GetLogs { swap_id, redact } => {
                let lines = self.get_logs(swap_id, redact).await?;
                Ok(CommandResponse::Logs { lines })
            }
        }
    }

    pub async fn buy_xmr(
        &self,
        seller: Seller,
        bitcoin_change_address: Option<String>,
        monero_receive_address: String,
    ) -> Result<Uuid, CommandError> {
        let change_address = bitcoin_change_address
            .map(|address| parse_bitcoin_address(&address, self.env.bitcoin_network))
            .transpose()?;
        let receive_address = parse_monero_address(&monero_receive_address)?;

        Ok(self
            .coordinator
            .buy_xmr(seller, change_address, receive_address)
            .await?)
    }

    pub async fn resume_swap(&self, swap_id: Uuid) -> Result<(), CommandError> {
        Ok(self.coordinator.resume(swap_id).await?)
    }

    pub async fn suspend_current_swap(&self) -> Result<Uuid, CommandError> {
        Ok(self.coordinator.suspend_current().await?)
    }

    pub async fn get_swap_info(&self, swap_id: Uuid) -> Result<SwapInfo, CommandError> {
        let metadata = self
            .db
            .get_swap(swap_id)
            .await?
            .ok_or(CommandError::SwapNotFound(swap_id))?;
        let state = self
            .db
            .latest_state(swap_id)
            .await?
            .ok_or(CommandError::SwapNotFound(swap_id))?;

        let timelock = self.current_timelock(&state).await;
        Ok(SwapInfo::new(&metadata, &state, timelock))
    }

    pub async fn get_swap_infos_all(&self) -> Result<Vec<SwapInfo>, CommandError> {
        let mut infos = Vec::new();
        for metadata in self.db.all_swaps().await? {
            let Some(state) = self.db.latest_state(metadata.swap_id).await? else {
                continue;
            };
            let timelock = self.current_timelock(&state).await;
            infos.push(SwapInfo::new(&metadata, &state, timelock));
        }
        Ok(infos)
    }

    pub async fn withdraw_btc(
        &self,
        address: &str,
        amount: Option<bitcoin::Amount>,
    ) -> Result<bitcoin::Txid, CommandError> {
        let address = parse_bitcoin_address(address, self.env.bitcoin_network)?;

        let txid = self
            .bitcoin_chain
            .send_to_address(address, amount)
            .await
            .context("withdraw bitcoin")?;
        tracing::info!(%txid, "withdrew bitcoin");

        // The wallet balance changed; push the fresh value to observers.
        if let Ok(balance) = self.bitcoin_chain.balance().await {
            *self.cached_balance.lock().await = Some(balance);
            self.hub.emit_balance_change(balance);
        }

        Ok(txid)
    }

    pub async fn get_balance(&self, force_refresh: bool) -> Result<bitcoin::Amount, CommandError> {
        let mut cached = self.cached_balance.lock().await;

        if !force_refresh
            && let Some(balance) = *cached
        {
            return Ok(balance);
        }

        let sync = self.background.start("SyncingBitcoinWallet");
        let balance = self
            .bitcoin_chain
            .balance()
            .await
            .context("query bitcoin balance")?;
        sync.complete();
        drop(sync);

        *cached = Some(balance);
        self.hub.emit_balance_change(balance);

        Ok(balance)
    }

    pub fn resolve_approval_request(
        &self,
        request_id: Uuid,
        accept: bool,
    ) -> Result<(), CommandError> {
        Ok(self.approvals.resolve(request_id, accept)?)
    }

    /// The Monero keys controlling the swap's shared output. Only available
    /// once the Bitcoin side is redeemed and both key shares are known.
    pub async fn monero_recovery(&self, swap_id: Uuid) -> Result<(String, String), CommandError> {
        let state = self
            .db
            .latest_state(swap_id)
            .await?
            .ok_or(CommandError::SwapNotFound(swap_id))?;

        match state {
            BobState::BtcRedeemed(state5) => Ok((
                state5.spend_key().to_hex(),
                state5.view_key.to_hex(),
            )),
            other => Err(CommandError::NoRecoveryKeys {
                swap_id,
                state: other.name().to_string(),
            }),
        }
    }

    /// Read back the engine's log file, optionally filtered to one swap and
    /// with known-sensitive material replaced by placeholders.
    pub async fn get_logs(
        &self,
        swap_id: Option<Uuid>,
        redact: bool,
    ) -> Result<Vec<String>, CommandError> {
        let path = self.logs_dir.join(logging::LOG_FILE);
        let content = tokio::task::spawn_blocking(move || std::fs::read_to_string(&path))
            .await
            .context("join log read")?
            .context("read log file")?;

        let needles = if redact {
            self.redaction_needles().await?
        } else {
            Vec::new()
        };

        let lines = content
            .lines()
            .filter(|line| match swap_id {
                Some(id) => line.contains(&id.to_string()),
                None => true,
            })
            .map(|line| {
                let mut line = line.to_string();
                for (needle, placeholder) in &needles {
                    line = line.replace(needle, placeholder);
                }
                line
            })
            .collect();

        Ok(lines)
    }

    /// Sensitive strings the log redaction must erase, gathered from every
    /// swap on record.
    async fn redaction_needles(&self) -> Result<Vec<(String, &'static str)>, CommandError> {
        let mut needles = Vec::new();
        for metadata in self.db.all_swaps().await? {
            let SwapMetadata {
                swap_id,
                seller,
                xmr_receive_address,
                btc_change_address,
                ..
            } = metadata;

            needles.push((xmr_receive_address.to_string(), "<monero_address>"));
            needles.push((btc_change_address.to_string(), "<bitcoin_address>"));
            needles.push((seller.peer_id.to_string(), "<peer_id>"));
            for address in seller.addresses {
                needles.push((address.to_string(), "<multiaddr>"));
            }

            if let Some(state) = self.db.latest_state(swap_id).await?
                && let Some(txid) = state.tx_lock_id()
            {
                needles.push((txid.to_string(), "<txid>"));
            }
        }
        Ok(needles)
    }

    async fn current_timelock(
        &self,
        state: &BobState,
    ) -> Option<crate::bitcoin::ExpiredTimelocks> {
        let (lock_txid, timelocks) = state.timelock_view()?;

        let lock_height = match self.bitcoin_chain.tx_status(lock_txid).await {
            Ok(crate::bitcoin::TxStatus::Confirmed { height, .. }) => Some(height),
            Ok(_) => None,
            Err(_) => return None,
        };
        let tip = self.bitcoin_chain.tip_height().await.ok()?;

        Some(expired_timelocks(tip, lock_height, timelocks))
    }
}

fn parse_bitcoin_address(
    address: &str,
    network: bitcoin::Network,
) -> Result<bitcoin::Address, CommandError> {
    let unchecked = ::bitcoin::Address::from_str(address)
        .map_err(|err| CommandError::InvalidBitcoinAddress(err.to_string()))?;
    unchecked
        .require_network(network)
        .map_err(|err| CommandError::InvalidBitcoinAddress(err.to_string()))
}

fn parse_monero_address(address: &str) -> Result<monero::Address, CommandError> {
    monero::Address::from_str(address)
        .map_err(|err| CommandError::InvalidMoneroAddress(err.to_string()))
}

/// Tracks which init steps completed and re-emits the whole list on every
/// change, the shape consumers expect.
struct InitProgress {
    hub: EventHub,
    steps: Vec<InitStep>,
}

impl InitProgress {
    fn new(hub: EventHub) -> Self {
        Self {
            hub,
            steps: Vec::new(),
        }
    }

    fn step(&mut self, component: &'static str) {
        self.steps.push(InitStep {
            component,
            complete: false,
        });
        self.emit();
    }

    fn done(&mut self) {
        if let Some(last) = self.steps.last_mut() {
            last.complete = true;
        }
        self.emit();
    }

    fn emit(&self) {
        self.hub
            .emit_context_status(ContextStatus::Initializing(self.steps.clone()));
    }
}
