use anyhow::{
    Context,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};


pub const SETTINGS_DIR: &str = ".fomoxd";
const SETTINGS_FILE: &str = "settings.json";

/// Timer cadence of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Round id polling while no end time is known.
    pub round_poll_interval: Duration,
    pub player_refresh_interval: Duration,
    pub event_poll_interval: Duration,
    pub receipt_poll_interval: Duration,
    pub confirmation_timeout: Duration,
    /// Slack after the round end time before the forced refresh.
    pub deadline_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            round_poll_interval: Duration::from_secs(1),
            player_refresh_interval: Duration::from_secs(5),
            event_poll_interval: Duration::from_secs(2),
            receipt_poll_interval: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(600),
            deadline_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub id: u64,
    pub name: String,
}

/// Locally persisted preferences.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub teams: Vec<TeamInfo>,
    pub muted: bool,
}

impl LocalSettings {
    /// Loads settings from `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(path)
            .with_context(|| format!("Failed to read settings at {}", path.display()))?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse settings at {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let json =
            serde_json::to_vec_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write settings at {}", path.display()))
    }
}

pub fn default_settings_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(SETTINGS_DIR).join(SETTINGS_FILE))
}

pub fn resolve_settings_path(path: Option<&str>) -> Result<PathBuf> {
    match path {
        Some(raw) => Ok(PathBuf::from(shellexpand::tilde(raw).into_owned())),
        None => default_settings_path(),
    }
}
