use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Local,
    Test,
    Main,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Local => "local",
            DeploymentEnv::Test => "test",
            DeploymentEnv::Main => "main",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Local => "Local",
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Main => "Mainnet",
        };
        write!(f, "{name}")
    }
}

/// Addresses of one full bootstrap run, hex encoded with `0x` prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub pxd: String,
    pub nft: String,
    pub community: String,
    pub player_book: String,
    pub divies: String,
    pub oracle: String,
    pub game: String,
    #[serde(default)]
    pub other_game: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contracts: ContractAddresses,
    pub bytecode_hash: String,
    pub network_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub deployment_block_height: Option<u64>,
}

impl DeploymentRecord {
    pub fn is_compatible_with_hash(&self, hash: &str) -> bool {
        self.bytecode_hash == hash
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(DEPLOYMENTS_ROOT, env)
    }

    /// Store rooted somewhere other than the working directory.
    pub fn in_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: DeploymentRecord) -> Result<()> {
        write_record(&self.path, &record)
    }
}

pub fn compute_bytecode_hash(bytecode: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytecode.as_ref());
    format!("{:x}", hasher.finalize())
}

pub fn ensure_structure() -> Result<()> {
    for env in [DeploymentEnv::Local, DeploymentEnv::Test, DeploymentEnv::Main] {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

pub fn record_deployment(
    env: DeploymentEnv,
    contracts: ContractAddresses,
    bytecode_hash: impl AsRef<str>,
    network_url: impl AsRef<str>,
    chain_id: Option<u64>,
    deployment_block_height: Option<u64>,
) -> Result<()> {
    let store = DeploymentStore::new(env)?;
    let record = DeploymentRecord {
        deployed_at: Utc::now().to_rfc3339(),
        contracts,
        bytecode_hash: bytecode_hash.as_ref().to_string(),
        network_url: network_url.as_ref().to_string(),
        chain_id,
        deployment_block_height,
    };
    store.save(record)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    fn record(game: &str) -> DeploymentRecord {
        DeploymentRecord {
            deployed_at: "2024-01-01T00:00:00+00:00".to_string(),
            contracts: ContractAddresses {
                game: game.to_string(),
                ..Default::default()
            },
            bytecode_hash: compute_bytecode_hash([0x60, 0x80]),
            network_url: "http://localhost:8545".to_string(),
            chain_id: Some(31337),
            deployment_block_height: None,
        }
    }

    #[test]
    fn load__fresh_store__is_empty() {
        // given
        let root = TempDir::new("deployments").unwrap();

        // when
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();

        // then
        assert!(store.path().ends_with("local/deployments.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save__then_load__returns_latest_record() {
        // given
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Test).unwrap();
        store.save(record("0x01")).unwrap();

        // when
        store.save(record("0x02")).unwrap();

        // then
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.contracts.game, "0x02");
        assert!(loaded.is_compatible_with_hash(&compute_bytecode_hash([0x60, 0x80])));
    }

    #[test]
    fn load__list_of_records__takes_the_last() {
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Main).unwrap();
        let json = serde_json::to_vec(&vec![record("0x0a"), record("0x0b")]).unwrap();
        fs::write(store.path(), json).unwrap();

        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.contracts.game, "0x0b");
    }

    #[test]
    fn load__garbage__errors() {
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();
        fs::write(store.path(), b"{not json").unwrap();

        assert!(store.load().is_err());
    }
}
