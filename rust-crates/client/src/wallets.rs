use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use ethers::signers::{
    LocalWallet,
    MnemonicBuilder,
    Signer,
    coins_bip39::English,
};
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

const PRIVATE_KEY_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Keystore files in `dir`, sorted by name. Hidden files are skipped.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read wallet directory")? {
        let entry = entry.wrap_err("Failed to read wallet entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| eyre!("Invalid wallet filename {:?}", path))?
            .to_owned();
        if name.starts_with('.') {
            continue;
        }
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    let wallets = list_wallets(dir)?;
    wallets
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

pub fn unlock_wallet(descriptor: &WalletDescriptor, chain_id: u64) -> Result<LocalWallet> {
    let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
    let password = prompt_password(prompt).wrap_err("Failed to read wallet password")?;

    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| eyre!("Invalid password for wallet '{}'", descriptor.name))?;
    wallet_from_secret(&secret, chain_id)
        .ok_or_else(|| eyre!("Wallet '{}' contained unsupported key material", descriptor.name))
}

/// Accepts a raw 32-byte key or a BIP-39 phrase (first account).
pub fn wallet_from_secret(secret: &[u8], chain_id: u64) -> Option<LocalWallet> {
    // `from_bytes` asserts the length instead of returning an error.
    if secret.len() == PRIVATE_KEY_BYTES {
        if let Ok(wallet) = LocalWallet::from_bytes(secret) {
            return Some(wallet.with_chain_id(chain_id));
        }
    }

    let mnemonic = std::str::from_utf8(secret).ok()?;
    if mnemonic.split_whitespace().count() < 12 {
        return None;
    }
    MnemonicBuilder::<English>::default()
        .phrase(mnemonic.trim())
        .build()
        .ok()
        .map(|wallet| wallet.with_chain_id(chain_id))
}

pub fn wallet_from_private_key(key: &str, chain_id: u64) -> Result<LocalWallet> {
    let wallet: LocalWallet = key
        .trim()
        .parse()
        .map_err(|e| eyre!("Invalid private key: {e}"))?;
    Ok(wallet.with_chain_id(chain_id))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use ethers::types::Address;
    use tempdir::TempDir;

    const ANVIL_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_PHRASE: &str =
        "test test test test test test test test test test test junk";

    fn anvil_address() -> Address {
        "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap()
    }

    #[test]
    fn wallet_from_private_key__derives_address_and_chain() {
        let wallet = wallet_from_private_key(ANVIL_KEY, 31337).unwrap();

        assert_eq!(wallet.address(), anvil_address());
        assert_eq!(wallet.chain_id(), 31337);
    }

    #[test]
    fn wallet_from_secret__mnemonic__uses_first_account() {
        let wallet = wallet_from_secret(ANVIL_PHRASE.as_bytes(), 1).unwrap();

        assert_eq!(wallet.address(), anvil_address());
    }

    #[test]
    fn wallet_from_secret__raw_key__uses_key() {
        let key = wallet_from_private_key(ANVIL_KEY, 1).unwrap().signer().to_bytes();

        let wallet = wallet_from_secret(key.as_slice(), 5).unwrap();

        assert_eq!(wallet.address(), anvil_address());
        assert_eq!(wallet.chain_id(), 5);
    }

    #[test]
    fn wallet_from_secret__garbage__is_none() {
        assert!(wallet_from_secret(b"short", 1).is_none());
    }

    #[test]
    fn wallet_from_secret__non_key_length_bytes__is_none_without_panicking() {
        assert!(wallet_from_secret(&[7u8; 31], 1).is_none());
        assert!(wallet_from_secret(&[7u8; 33], 1).is_none());
        assert!(wallet_from_secret(&[], 1).is_none());
    }

    #[test]
    fn list_wallets__sorted_and_skips_hidden_files() {
        // given
        let dir = TempDir::new("keystores").unwrap();
        fs::write(dir.path().join("zed"), b"{}").unwrap();
        fs::write(dir.path().join("alice"), b"{}").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"").unwrap();

        // when
        let wallets = list_wallets(dir.path()).unwrap();

        // then
        let names: Vec<_> = wallets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "zed"]);
    }

    #[test]
    fn find_wallet__missing__errors() {
        let dir = TempDir::new("keystores").unwrap();

        assert!(find_wallet(dir.path(), "bob").is_err());
    }
}
