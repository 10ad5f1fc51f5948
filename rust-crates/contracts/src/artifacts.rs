use anyhow::{
    Context,
    Result,
};
use ethers::{
    abi::Abi,
    types::Bytes,
};
use serde::Deserialize;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

/// Subset of a hardhat build artifact needed to deploy a contract.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardhatArtifact {
    pub contract_name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl HardhatArtifact {
    pub fn load(artifacts_dir: impl AsRef<Path>, contract_name: &str) -> Result<Self> {
        let path = artifact_path(artifacts_dir, contract_name);
        let data = fs::read(&path).with_context(|| {
            format!("Failed to read artifact for {contract_name} at {}", path.display())
        })?;
        let artifact: HardhatArtifact = serde_json::from_slice(&data).with_context(|| {
            format!("Failed to parse artifact JSON at {}", path.display())
        })?;
        if artifact.bytecode.is_empty() {
            anyhow::bail!("Artifact for {contract_name} carries no bytecode (abstract contract?)");
        }
        Ok(artifact)
    }
}

/// `<dir>/contracts/<Name>.sol/<Name>.json`, hardhat's default layout.
pub fn artifact_path(artifacts_dir: impl AsRef<Path>, contract_name: &str) -> PathBuf {
    artifacts_dir
        .as_ref()
        .join("contracts")
        .join(format!("{contract_name}.sol"))
        .join(format!("{contract_name}.json"))
}
