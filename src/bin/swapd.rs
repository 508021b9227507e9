use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use tracing_subscriber::filter::LevelFilter;
use uuid::Uuid;

use btc_xmr_swap::api::{self, Command, CommandResponse, ContextConfig};
use btc_xmr_swap::bitcoin::{CoreRpcClient, NodePool};
use btc_xmr_swap::event::{EngineEvent, EventHub};
use btc_xmr_swap::logging;
use btc_xmr_swap::monero::WalletRpcClient;
use btc_xmr_swap::network::{Multiaddr, PeerId, Seller, TcpSellerTransport};
use btc_xmr_swap::swap::EnvConfig;

#[derive(Debug, clap::Parser)]
#[command(name = "swapd", about = "Bitcoin/Monero atomic swap engine, Bitcoin-sender side")]
struct Args {
    #[arg(long, default_value = "./swapd-data")]
    data_dir: PathBuf,

    /// mainnet, testnet or regtest.
    #[arg(long, default_value = "regtest")]
    bitcoin_network: String,

    /// bitcoind RPC endpoint; may be given multiple times, the first live
    /// one is used.
    #[arg(long = "bitcoind-url", required = true)]
    bitcoind_urls: Vec<String>,

    #[arg(long)]
    bitcoind_user: Option<String>,

    #[arg(long)]
    bitcoind_pass: Option<String>,

    #[arg(long)]
    bitcoind_cookie: Option<PathBuf>,

    #[arg(long)]
    monero_wallet_rpc_url: String,

    /// Log to the terminal as JSON.
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, clap::Subcommand)]
enum Cmd {
    /// Start a new swap and drive it until it settles or is interrupted.
    BuyXmr {
        #[arg(long)]
        seller_peer_id: String,

        /// Seller address as host:port; may be given multiple times.
        #[arg(long = "seller-addr", required = true)]
        seller_addrs: Vec<String>,

        #[arg(long)]
        receive_address: String,

        #[arg(long)]
        change_address: Option<String>,

        /// Approve the bitcoin lock without prompting.
        #[arg(long)]
        auto_approve: bool,
    },
    /// Resume an interrupted swap from its last persisted state.
    Resume {
        #[arg(long)]
        swap_id: Uuid,

        #[arg(long)]
        auto_approve: bool,
    },
    /// List every swap on record.
    History,
    /// Show the bitcoin wallet balance.
    Balance {
        #[arg(long)]
        force: bool,
    },
    /// Send bitcoin out of the wallet; omit the amount to sweep it.
    Withdraw {
        #[arg(long)]
        address: String,

        #[arg(long)]
        amount_sat: Option<u64>,
    },
    /// Print engine logs, optionally for one swap only.
    Logs {
        #[arg(long)]
        swap_id: Option<Uuid>,

        #[arg(long)]
        redact: bool,
    },
    /// Print the monero keys of a redeemed swap.
    MoneroRecovery {
        #[arg(long)]
        swap_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = match args.bitcoin_network.as_str() {
        "mainnet" => EnvConfig::mainnet(),
        "testnet" => EnvConfig::testnet(),
        "regtest" => EnvConfig::regtest(),
        other => anyhow::bail!("unknown bitcoin network: {other}"),
    };

    let hub = EventHub::default();
    let level = LevelFilter::from_str(&args.log_level).context("parse log level")?;
    let format = if args.json {
        logging::Format::Json
    } else {
        logging::Format::Raw
    };
    logging::init(level, format, args.data_dir.join("logs"), Some(hub.clone()))?;

    let auth = if let Some(cookie) = &args.bitcoind_cookie {
        bitcoincore_rpc::Auth::CookieFile(cookie.clone())
    } else if let (Some(user), Some(pass)) = (&args.bitcoind_user, &args.bitcoind_pass) {
        bitcoincore_rpc::Auth::UserPass(user.clone(), pass.clone())
    } else {
        bitcoincore_rpc::Auth::None
    };

    let pool = NodePool::new(
        args.bitcoind_urls
            .iter()
            .map(|url| (url.clone(), auth.clone()))
            .collect(),
    );
    let bitcoin_chain: Arc<CoreRpcClient> = Arc::new(pool.connect().await?);
    tracing::info!(url = %bitcoin_chain.url(), "bitcoind ready");

    let monero_wallet =
        Arc::new(WalletRpcClient::connect(&args.monero_wallet_rpc_url)?);
    tracing::info!(url = %monero_wallet.url(), "monero-wallet-rpc ready");

    let transport = Arc::new(TcpSellerTransport::default());

    let context = api::Context::init(
        ContextConfig {
            data_dir: args.data_dir.clone(),
            env,
        },
        bitcoin_chain,
        monero_wallet,
        transport,
        hub,
    )
    .await
    .context("initialize engine")?;

    let unfinished = context.unfinished_swaps().await?;
    if !unfinished.is_empty() {
        tracing::warn!(
            count = unfinished.len(),
            swap_ids = ?unfinished,
            "there are unfinished swaps; resume them with `swapd resume`"
        );
    }

    match args.cmd {
        Cmd::BuyXmr {
            seller_peer_id,
            seller_addrs,
            receive_address,
            change_address,
            auto_approve,
        } => {
            let seller = Seller {
                peer_id: PeerId::from_str(&seller_peer_id).context("parse seller peer id")?,
                addresses: seller_addrs.into_iter().map(Multiaddr).collect(),
            };

            spawn_event_printer(context.clone());
            spawn_approval_loop(context.clone(), auto_approve);

            let swap_id = context
                .buy_xmr(seller, change_address, receive_address)
                .await?;
            println!("{swap_id}");

            context.coordinator().wait_until_idle().await;
            print_response(context.dispatch(Command::GetSwapInfo { swap_id }).await?)?;
        }
        Cmd::Resume {
            swap_id,
            auto_approve,
        } => {
            spawn_event_printer(context.clone());
            spawn_approval_loop(context.clone(), auto_approve);

            context.resume_swap(swap_id).await?;
            context.coordinator().wait_until_idle().await;
            print_response(context.dispatch(Command::GetSwapInfo { swap_id }).await?)?;
        }
        Cmd::History => {
            print_response(context.dispatch(Command::GetSwapInfosAll).await?)?;
        }
        Cmd::Balance { force } => {
            print_response(
                context
                    .dispatch(Command::GetBalance {
                        force_refresh: force,
                    })
                    .await?,
            )?;
        }
        Cmd::Withdraw {
            address,
            amount_sat,
        } => {
            print_response(
                context
                    .dispatch(Command::WithdrawBtc {
                        address,
                        amount_sat,
                    })
                    .await?,
            )?;
        }
        Cmd::Logs { swap_id, redact } => {
            if let CommandResponse::Logs { lines } =
                context.dispatch(Command::GetLogs { swap_id, redact }).await?
            {
                for line in lines {
                    println!("{line}");
                }
            }
        }
        Cmd::MoneroRecovery { swap_id } => {
            print_response(context.dispatch(Command::MoneroRecovery { swap_id }).await?)?;
        }
    }

    Ok(())
}

fn print_response(response: CommandResponse) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("encode response")?
    );
    Ok(())
}

/// Mirror swap progress and timelock events to stdout so the run is
/// observable without tailing the log file.
fn spawn_event_printer(context: Arc<api::Context>) {
    let mut events = context.hub().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(
                    event @ (EngineEvent::SwapProgressUpdate { .. }
                    | EngineEvent::TimelockChange { .. }
                    | EngineEvent::SwapDatabaseStateUpdate { .. }),
                ) => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{line}");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Answer approval requests, either automatically or by prompting on the
/// terminal.
fn spawn_approval_loop(context: Arc<api::Context>, auto_approve: bool) {
    let mut events = context.hub().subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let EngineEvent::ApprovalRequested {
                request_id,
                payload,
            } = event
            else {
                continue;
            };

            let accept = if auto_approve {
                true
            } else {
                prompt_approval(&payload).await.unwrap_or(false)
            };

            if let Err(err) = context.resolve_approval_request(request_id, accept) {
                tracing::warn!(%request_id, error = %err, "could not resolve approval");
            }
        }
    });
}

async fn prompt_approval(payload: &btc_xmr_swap::approval::ApprovalPayload) -> Result<bool> {
    let question = serde_json::to_string(payload).context("encode approval payload")?;
    println!("approve? {question} [y/N]");

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("join stdin read")?
    .context("read stdin")?;

    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
