use clap::{
    ArgGroup,
    Args,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use ethers::{
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        U256,
    },
    utils::{
        format_ether,
        parse_ether,
    },
};
use fomoxd_client::{
    GameView,
    Session,
    SessionHandle,
    gateway::{
        EthersGateway,
        GameAddresses,
    },
    orchestrator::{
        BuyRequest,
        PurchaseAmount,
        TxRequest,
    },
    session::SystemClock,
    settings::{
        LocalSettings,
        SessionConfig,
        resolve_settings_path,
    },
    types::{
        Affiliate,
        TxReceipt,
    },
    wallets::{
        find_wallet,
        resolve_wallet_dir,
        unlock_wallet,
        wallet_from_private_key,
    },
};
use std::{
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tracing::{
    info,
    warn,
};
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";
const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "fomoxd.log";
const FIRST_ROUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "fomoxd",
    about = "Follow FoMoXD rounds and send game transactions",
    version,
    group(
        ArgGroup::new("network")
            .args(["local", "testnet", "mainnet"])
    )
)]
struct Cli {
    /// Use the local deployment record (default)
    #[arg(long)]
    local: bool,

    /// Use the testnet deployment record
    #[arg(long)]
    testnet: bool,

    /// Use the mainnet deployment record
    #[arg(long)]
    mainnet: bool,

    /// Override RPC URL (defaults to the recorded deployment's URL)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Keystore file name inside the wallet directory
    #[arg(long)]
    wallet: Option<String>,

    /// Override keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Hex private key used to sign transactions; takes precedence over --wallet
    #[arg(long, env = "FOMOXD_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Game contract address, overriding the deployment record
    #[arg(long, value_parser = parse_address)]
    game: Option<Address>,

    /// NFT contract address, overriding the deployment record
    #[arg(long, value_parser = parse_address)]
    nft: Option<Address>,

    /// Player book address, overriding the deployment record
    #[arg(long, value_parser = parse_address)]
    player_book: Option<Address>,

    /// Settings file (defaults to ~/.fomoxd/settings.json)
    #[arg(long)]
    settings: Option<String>,

    /// Log to stdout instead of logs/
    #[arg(long)]
    log_stdout: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the round and player state whenever it changes
    Watch {
        /// Team to follow for winner highlighting
        #[arg(long)]
        team: Option<u64>,
    },
    /// Print the current round and player state once
    Status,
    /// Buy puffs for a team in the current round
    #[command(group(ArgGroup::new("amount").args(["eth", "puffs"]).required(true)))]
    Buy {
        #[arg(long)]
        team: u64,

        /// ETH to spend, in ether
        #[arg(long)]
        eth: Option<String>,

        /// Puffs to buy, in whole puffs (18 decimals)
        #[arg(long)]
        puffs: Option<String>,

        #[command(flatten)]
        affiliate: AffiliateArgs,
    },
    /// Withdraw every vault balance
    Withdraw,
    /// Register a player name
    RegisterName {
        name: String,

        #[command(flatten)]
        affiliate: AffiliateArgs,
    },
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct AffiliateArgs {
    /// Affiliate address
    #[arg(long, value_parser = parse_address)]
    affiliate_address: Option<Address>,

    /// Affiliate player name
    #[arg(long)]
    affiliate_name: Option<String>,

    /// Affiliate player id
    #[arg(long)]
    affiliate_id: Option<u64>,
}

impl AffiliateArgs {
    fn to_affiliate(&self) -> Option<Affiliate> {
        if let Some(address) = self.affiliate_address {
            Some(Affiliate::by_address(address))
        } else if let Some(name) = &self.affiliate_name {
            Some(Affiliate::by_name(name.clone()))
        } else {
            self.affiliate_id.map(Affiliate::by_id)
        }
    }
}

fn parse_address(raw: &str) -> std::result::Result<Address, String> {
    let trimmed = raw.trim();
    let cleaned = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    Address::from_str(cleaned).map_err(|e| format!("invalid address '{raw}': {e}"))
}

fn init_tracing(log_stdout: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_stdout {
        let _ = fmt().with_env_filter(filter).try_init();
    } else {
        let appender = rolling::daily(LOG_DIR, LOG_FILE_PREFIX);
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(appender)
            .with_ansi(false)
            .try_init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_stdout);

    let env = if cli.testnet {
        DeploymentEnv::Test
    } else if cli.mainnet {
        DeploymentEnv::Main
    } else {
        DeploymentEnv::Local
    };
    let record = load_record(env)?;
    let addresses = resolve_addresses(&cli, record.as_ref())?;
    let rpc_url = cli
        .rpc_url
        .clone()
        .or_else(|| record.as_ref().map(|r| r.network_url.clone()))
        .unwrap_or_else(|| DEFAULT_LOCAL_RPC_URL.to_string());

    let settings_path = resolve_settings_path(cli.settings.as_deref())
        .map_err(|e| eyre!("{e:#}"))?;
    let settings = LocalSettings::load(&settings_path).map_err(|e| eyre!("{e:#}"))?;

    let provider = Provider::<Http>::try_from(rpc_url.as_str())
        .wrap_err_with(|| format!("invalid RPC URL {rpc_url}"))?;
    let chain_id = provider
        .get_chainid()
        .await
        .wrap_err("fetching chain id")?
        .as_u64();
    info!(%env, %rpc_url, chain_id, game = ?addresses.game, "connected");

    match load_signer(&cli, chain_id)? {
        Some(wallet) => {
            let account = wallet.address();
            let client = Arc::new(SignerMiddleware::new(provider, wallet));
            run(client, Some(account), addresses, &settings, cli.command).await
        }
        None => run(Arc::new(provider), None, addresses, &settings, cli.command).await,
    }
}

fn load_record(env: DeploymentEnv) -> Result<Option<DeploymentRecord>> {
    let store = DeploymentStore::new(env).map_err(|e| eyre!("{e:#}"))?;
    store.load().map_err(|e| eyre!("{e:#}"))
}

fn resolve_addresses(
    cli: &Cli,
    record: Option<&DeploymentRecord>,
) -> Result<GameAddresses> {
    let contracts = record.map(|r| &r.contracts);
    Ok(GameAddresses {
        game: pick_address(cli.game, contracts.map(|c| c.game.as_str()), "game")?,
        nft: pick_address(cli.nft, contracts.map(|c| c.nft.as_str()), "nft")?,
        player_book: pick_address(
            cli.player_book,
            contracts.map(|c| c.player_book.as_str()),
            "player-book",
        )?,
    })
}

fn pick_address(
    explicit: Option<Address>,
    recorded: Option<&str>,
    flag: &str,
) -> Result<Address> {
    if let Some(address) = explicit {
        return Ok(address);
    }
    let raw = recorded.ok_or_else(|| {
        eyre!("no deployment recorded; pass --{flag} or run the deploy CLI first")
    })?;
    parse_address(raw).map_err(|e| eyre!("deployment record: {e}"))
}

fn load_signer(cli: &Cli, chain_id: u64) -> Result<Option<LocalWallet>> {
    if let Some(key) = cli.private_key.as_deref() {
        return wallet_from_private_key(key, chain_id).map(Some);
    }
    let Some(name) = cli.wallet.as_deref() else {
        return Ok(None);
    };
    let dir = resolve_wallet_dir(cli.wallet_dir.as_deref())?;
    let descriptor = find_wallet(&dir, name)?;
    unlock_wallet(&descriptor, chain_id).map(Some)
}

async fn run<M: Middleware + 'static>(
    client: Arc<M>,
    account: Option<Address>,
    addresses: GameAddresses,
    settings: &LocalSettings,
    command: Command,
) -> Result<()> {
    let config = SessionConfig::default();
    let gateway = EthersGateway::new(client, addresses, account)
        .with_receipt_poll_interval(config.receipt_poll_interval);
    let (handle, task) =
        Session::spawn(Arc::new(gateway), config, settings.teams.len(), SystemClock);
    handle.on_round_changed(|round| {
        info!(round_id = round.round_id, end_time = round.end_time, "round changed");
    })?;

    let outcome = dispatch(&handle, settings, command).await;

    handle.shutdown();
    task.await.wrap_err("session task failed")?;
    outcome
}

async fn dispatch(
    handle: &SessionHandle,
    settings: &LocalSettings,
    command: Command,
) -> Result<()> {
    let view = wait_for_round(handle).await?;
    match command {
        Command::Status => {
            let player = handle.refresh_player().await?;
            let view = GameView { player, ..view };
            print_view(&view, settings);
        }
        Command::Watch { team } => {
            if let Some(team) = team {
                handle.select_team(team)?;
            }
            watch(handle, settings).await?;
        }
        Command::Buy {
            team,
            eth,
            puffs,
            affiliate,
        } => {
            let amount = match (eth, puffs) {
                (Some(eth), _) => PurchaseAmount::Eth(parse_units(&eth, "--eth")?),
                (None, Some(puffs)) => {
                    PurchaseAmount::Puffs(parse_units(&puffs, "--puffs")?)
                }
                (None, None) => return Err(eyre!("--eth or --puffs is required")),
            };
            let request = TxRequest::Buy(BuyRequest {
                team,
                amount,
                affiliate: affiliate.to_affiliate(),
                round_id: Some(view.round_id),
            });
            let receipt = handle.submit(request).await?;
            print_receipt("Purchase", &receipt);
        }
        Command::Withdraw => {
            handle.refresh_player().await?;
            let receipt = handle.withdraw().await?;
            print_receipt("Withdrawal", &receipt);
        }
        Command::RegisterName { name, affiliate } => {
            handle.refresh_player().await?;
            let receipt = handle.buy_name(name, affiliate.to_affiliate()).await?;
            print_receipt("Name registration", &receipt);
        }
    }
    Ok(())
}

async fn wait_for_round(handle: &SessionHandle) -> Result<GameView> {
    let mut views = handle.subscribe();
    let waiting = views.wait_for(|view| view.round_id != 0);
    let view = tokio::time::timeout(FIRST_ROUND_TIMEOUT, waiting)
        .await
        .map_err(|_| eyre!("no round read from the game contract"))?
        .wrap_err("session stopped before the first round was read")?
        .clone();
    Ok(view)
}

async fn watch(handle: &SessionHandle, settings: &LocalSettings) -> Result<()> {
    let mut views = handle.subscribe();
    print_view(&views.borrow_and_update(), settings);
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("session closed");
                    return Ok(());
                }
                print_view(&views.borrow_and_update(), settings);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, exiting");
                return Ok(());
            }
        }
    }
}

fn parse_units(raw: &str, flag: &str) -> Result<U256> {
    parse_ether(raw.trim()).map_err(|e| eyre!("invalid {flag} value '{raw}': {e}"))
}

fn team_label(settings: &LocalSettings, team: u64) -> String {
    settings
        .teams
        .iter()
        .find(|t| t.id == team)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| format!("team {team}"))
}

fn print_view(view: &GameView, settings: &LocalSettings) {
    let round = &view.round;
    let status = match round.winner_team_id {
        Some(team) if round.ended => {
            let flag = if round.is_winner { " (your team)" } else { "" };
            format!("ended, won by {}{flag}", team_label(settings, team))
        }
        _ => format!("ends at {}", round.end_time),
    };
    println!(
        "Round {}: {status}, pot {} ETH, {} puffs sold",
        view.round_id,
        format_ether(round.pot),
        format_ether(round.puffs),
    );
    if let Some(account) = view.account {
        let player = &view.player;
        println!(
            "  {account:?}: {} puffs, vaults win {} / gen {} / aff {} ETH, {} NFTs",
            format_ether(player.puffs),
            format_ether(player.winning_vault),
            format_ether(player.general_vault),
            format_ether(player.affiliate_vault),
            player.nfts.len(),
        );
        if !player.player_names.is_empty() {
            println!("  names: {}", player.player_names.join(", "));
        }
    }
    for pending in &view.pending {
        println!("  pending {:?}: {:?}", pending.kind, pending.status);
    }
}

fn print_receipt(label: &str, receipt: &TxReceipt) {
    let block = receipt
        .block_number
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());
    let gas = receipt
        .gas_used
        .map(|g| g.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "{label} confirmed: tx {:?} in block {block} (gas used {gas})",
        receipt.tx_hash
    );
}
