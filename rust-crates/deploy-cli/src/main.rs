use anyhow::{
    Context,
    Result,
    anyhow,
};
use clap::{
    ArgGroup,
    Parser,
};
use contracts::{
    artifacts::{
        DEFAULT_ARTIFACTS_DIR,
        HardhatArtifact,
    },
    fomoxd_types::FoMoXD,
    nft_types::FoMoERC721,
    player_book_types::PlayerBook,
};
use deployments::{
    ContractAddresses,
    DeploymentEnv,
};
use ethers::{
    abi::{
        Detokenize,
        Tokenize,
    },
    contract::{
        Contract,
        ContractCall,
        ContractFactory,
    },
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
};
use fomoxd_client::wallets::{
    find_wallet,
    resolve_wallet_dir,
    unlock_wallet,
    wallet_from_private_key,
};
use std::{
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};
use tracing::info;

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";
/// First account of the hardhat/anvil development mnemonic.
const LOCAL_DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

const PXD_SUPPLY: u64 = 1_000_000;
const PXD_NAME: &str = "PowHXD";
const PXD_SYMBOL: &str = "FXD";
const NFT_NAME: &str = "fomoERC721";
const NFT_SYMBOL: &str = "FMO";
const NFT_METADATA_BASE: &str =
    "https://raw.githubusercontent.com/0x171-0/fomoxd/dev/webapp/public/nfts/json/";
const COMMUNITY_THRESHOLD: u64 = 2;
const COMMUNITY_CO_OWNERS: usize = 2;
const ORACLE_SEED: u64 = 1;
const DEFAULT_GAME_NAME: &str = "FoMoXDTest";

#[derive(Parser, Debug)]
#[command(
    name = "fomoxd-deploy",
    about = "Deploy and wire the FoMoXD contract suite",
    version,
    group(
        ArgGroup::new("network")
            .args(["local", "testnet", "mainnet"])
    )
)]
struct Args {
    /// Deploy to a local node (default)
    #[arg(long)]
    local: bool,

    /// Deploy to a testnet
    #[arg(long)]
    testnet: bool,

    /// Deploy to mainnet
    #[arg(long)]
    mainnet: bool,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Keystore file name inside the wallet directory
    #[arg(long)]
    wallet: Option<String>,

    /// Override keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Hex private key of the deployer; local runs fall back to the dev account
    #[arg(long, env = "FOMOXD_DEPLOYER_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Hardhat artifacts directory
    #[arg(long, default_value = DEFAULT_ARTIFACTS_DIR)]
    artifacts: PathBuf,

    /// Community multisig co-owners (defaults to the node's next two accounts)
    #[arg(long = "community-owner")]
    community_owners: Vec<String>,

    /// Name the game is registered under in the player book
    #[arg(long, default_value = DEFAULT_GAME_NAME)]
    game_name: String,
}

/// Deploys hardhat artifacts in order, remembering where the run started.
struct Deployer {
    client: Arc<Client>,
    artifacts: PathBuf,
    first_block: Option<u64>,
}

impl Deployer {
    async fn deploy<T: Tokenize>(&mut self, name: &str, args: T) -> Result<Contract<Client>> {
        let artifact = HardhatArtifact::load(&self.artifacts, name)?;
        let factory =
            ContractFactory::new(artifact.abi, artifact.bytecode, self.client.clone());
        let (contract, receipt) = factory
            .deploy(args)
            .with_context(|| format!("encoding {name} constructor arguments"))?
            .send_with_receipt()
            .await
            .with_context(|| format!("deploying {name}"))?;
        if self.first_block.is_none() {
            self.first_block = receipt.block_number.map(|n| n.as_u64());
        }
        println!("[{name}] Deployed to {:?}", contract.address());
        info!(
            contract = name,
            address = ?contract.address(),
            tx = ?receipt.transaction_hash,
            "deployed"
        );
        Ok(contract)
    }
}

async fn send<D: Detokenize>(call: ContractCall<Client, D>, step: &str) -> Result<()> {
    let pending = call
        .send()
        .await
        .with_context(|| format!("sending {step}"))?;
    let receipt = pending
        .await
        .with_context(|| format!("waiting for {step}"))?
        .ok_or_else(|| anyhow!("{step}: transaction dropped from the mempool"))?;
    if receipt.status.is_some_and(|status| status.is_zero()) {
        anyhow::bail!("{step} reverted (tx {:?})", receipt.transaction_hash);
    }
    info!(step, tx = ?receipt.transaction_hash, "wiring step confirmed");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();
    deployments::ensure_structure().context("initializing deployment directories")?;

    let env = if args.testnet {
        DeploymentEnv::Test
    } else if args.mainnet {
        DeploymentEnv::Main
    } else {
        DeploymentEnv::Local
    };
    let rpc_url = match (&args.rpc_url, env) {
        (Some(url), _) => url.clone(),
        (None, DeploymentEnv::Local) => DEFAULT_LOCAL_RPC_URL.to_string(),
        (None, _) => anyhow::bail!("--rpc-url is required when deploying to {env}"),
    };

    let provider = Provider::<Http>::try_from(rpc_url.as_str())
        .with_context(|| format!("invalid RPC URL {rpc_url}"))?;
    let chain_id = provider
        .get_chainid()
        .await
        .context("fetching chain id")?
        .as_u64();
    let wallet = load_deployer(&args, env, chain_id)?;
    let deployer = wallet.address();
    let balance = provider
        .get_balance(deployer, None)
        .await
        .context("fetching deployer balance")?;
    println!("Deploying contracts with the account: {deployer:?}");
    println!("Account balance: {balance}");

    let owners = community_owners(&provider, &args, deployer).await?;
    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    let suite = deploy_all(client, &args, owners).await?;
    let game_artifact = HardhatArtifact::load(&args.artifacts, "FoMoXD")?;
    let bytecode_hash = deployments::compute_bytecode_hash(&game_artifact.bytecode);

    deployments::record_deployment(
        env,
        suite.addresses,
        bytecode_hash,
        &rpc_url,
        Some(chain_id),
        suite.first_block,
    )
    .context("recording deployment")?;
    println!("Deployment metadata written for {env}");
    Ok(())
}

fn load_deployer(args: &Args, env: DeploymentEnv, chain_id: u64) -> Result<LocalWallet> {
    let wallet = if let Some(key) = args.private_key.as_deref() {
        wallet_from_private_key(key, chain_id)
    } else if let Some(name) = args.wallet.as_deref() {
        resolve_wallet_dir(args.wallet_dir.as_deref())
            .and_then(|dir| find_wallet(&dir, name))
            .and_then(|descriptor| unlock_wallet(&descriptor, chain_id))
    } else if env == DeploymentEnv::Local {
        wallet_from_private_key(LOCAL_DEV_PRIVATE_KEY, chain_id)
    } else {
        anyhow::bail!("--wallet or --private-key is required when deploying to {env}");
    };
    wallet.map_err(|e| anyhow!("loading deployer wallet: {e:#}"))
}

/// Deployer first, then co-owners from flags or the node's unlocked accounts.
async fn community_owners(
    provider: &Provider<Http>,
    args: &Args,
    deployer: Address,
) -> Result<Vec<Address>> {
    let candidates: Vec<Address> = if args.community_owners.is_empty() {
        provider
            .get_accounts()
            .await
            .context("listing node accounts for community owners")?
    } else {
        args.community_owners
            .iter()
            .map(|raw| {
                Address::from_str(raw.trim().trim_start_matches("0x"))
                    .with_context(|| format!("invalid community owner '{raw}'"))
            })
            .collect::<Result<_>>()?
    };
    let mut owners = vec![deployer];
    owners.extend(
        candidates
            .into_iter()
            .filter(|owner| *owner != deployer)
            .take(COMMUNITY_CO_OWNERS),
    );
    if owners.len() <= COMMUNITY_CO_OWNERS {
        anyhow::bail!(
            "community multisig needs {COMMUNITY_CO_OWNERS} co-owners besides the deployer; pass --community-owner"
        );
    }
    Ok(owners)
}

struct DeployedSuite {
    addresses: ContractAddresses,
    first_block: Option<u64>,
}

async fn deploy_all(
    client: Arc<Client>,
    args: &Args,
    owners: Vec<Address>,
) -> Result<DeployedSuite> {
    let mut deployer = Deployer {
        client: client.clone(),
        artifacts: args.artifacts.clone(),
        first_block: None,
    };

    let pxd = deployer
        .deploy(
            "PXD",
            (
                U256::from(PXD_SUPPLY),
                PXD_NAME.to_string(),
                PXD_SYMBOL.to_string(),
            ),
        )
        .await?;

    let nft_contract = deployer.deploy("FoMoERC721", ()).await?;
    let nft = FoMoERC721::new(nft_contract.address(), client.clone());
    send(
        nft.initialize(
            NFT_NAME.to_string(),
            NFT_SYMBOL.to_string(),
            format!("{NFT_METADATA_BASE}mystery_box.json"),
        ),
        "FoMoERC721.initialize",
    )
    .await?;
    send(
        nft.set_round_mystery_uri(
            U256::from(2),
            format!("{NFT_METADATA_BASE}mystery_1.json"),
        ),
        "FoMoERC721.setRoundMysteryURI(2)",
    )
    .await?;
    send(
        nft.set_round_mystery_uri(
            U256::from(3),
            format!("{NFT_METADATA_BASE}mystery_2.json"),
        ),
        "FoMoERC721.setRoundMysteryURI(3)",
    )
    .await?;
    send(
        nft.set_base_uri(NFT_METADATA_BASE.to_string()),
        "FoMoERC721.setBaseURI",
    )
    .await?;

    let community = deployer
        .deploy("Community", (owners, U256::from(COMMUNITY_THRESHOLD)))
        .await?;
    let player_book_contract = deployer
        .deploy("PlayerBook", community.address())
        .await?;
    let divies = deployer.deploy("Divies", pxd.address()).await?;
    let oracle = deployer
        .deploy("SimpleNumOracle", U256::from(ORACLE_SEED))
        .await?;

    let game_args = (
        player_book_contract.address(),
        community.address(),
        pxd.address(),
        nft.address(),
        divies.address(),
        oracle.address(),
    );
    let game_contract = deployer.deploy("FoMoXD", game_args).await?;
    let other_game = deployer.deploy("FoMoXD", game_args).await?;

    let game = FoMoXD::new(game_contract.address(), client.clone());
    let player_book = PlayerBook::new(player_book_contract.address(), client);
    send(
        game.set_other_fomo(other_game.address()),
        "FoMoXD.setOtherFomo",
    )
    .await?;
    send(
        oracle
            .method::<_, ()>("setFoMoGame", game.address())
            .context("encoding SimpleNumOracle.setFoMoGame")?,
        "SimpleNumOracle.setFoMoGame",
    )
    .await?;
    send(nft.set_fo_mo_game(game.address()), "FoMoERC721.setFoMoGame").await?;
    send(
        player_book.add_game(game.address(), args.game_name.clone()),
        "PlayerBook.addGame",
    )
    .await?;
    send(game.activate(), "FoMoXD.activate").await?;

    let hex = |address: Address| format!("{address:?}");
    Ok(DeployedSuite {
        addresses: ContractAddresses {
            pxd: hex(pxd.address()),
            nft: hex(nft.address()),
            community: hex(community.address()),
            player_book: hex(player_book.address()),
            divies: hex(divies.address()),
            oracle: hex(oracle.address()),
            game: hex(game.address()),
            other_game: Some(hex(other_game.address())),
        },
        first_block: deployer.first_block,
    })
}
