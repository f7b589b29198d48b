use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Path to the reconciliation ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Google Calendar to mirror into: a calendar name or id.
    /// Defaults to the primary calendar when unset.
    pub target_calendar: Option<String>,

    /// Timezone used for the remote calendar and same-day existence checks
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Extraction window, in days
    #[serde(default = "default_look_behind_days")]
    pub look_behind_days: i64,
    #[serde(default = "default_look_ahead_days")]
    pub look_ahead_days: i64,

    /// Poll interval for monitor mode, in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Provider configurations (OAuth credentials)
    #[serde(default)]
    pub providers: Providers,
}

#[derive(Debug, Default, Deserialize)]
pub struct Providers {
    pub gcal: Option<GcalConfig>,
}

/// OAuth credentials for Google Calendar
#[derive(Debug, Deserialize)]
pub struct GcalConfig {
    pub client_id: String,
    pub client_secret: String,
}

fn default_ledger_path() -> String {
    "~/.local/share/invitesync/ledger.json".to_string()
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_look_behind_days() -> i64 {
    1
}

fn default_look_ahead_days() -> i64 {
    7
}

fn default_interval_secs() -> u64 {
    300
}

impl Config {
    /// Resolve the configured ledger path, expanding `~`.
    pub fn ledger_path(&self) -> PathBuf {
        expand_path(&self.ledger_path)
    }

    /// Parse the configured timezone.
    pub fn target_tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown timezone in config: {}", self.timezone))
    }
}

/// Tokens for the authenticated Google account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Get the config directory path (~/.config/invitesync)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("invitesync");
    Ok(config_dir)
}

/// Get the config file path (~/.config/invitesync/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the tokens file path (~/.config/invitesync/tokens.json)
pub fn tokens_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("tokens.json"))
}

/// Load config from ~/.config/invitesync/config.toml
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}\n\n\
            Create it with your Google OAuth credentials:\n\n\
            [providers.gcal]\n\
            client_id = \"your-client-id.apps.googleusercontent.com\"\n\
            client_secret = \"your-client-secret\"\n\n\
            See README.md for setup instructions.",
            path.display()
        );
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

    Ok(config)
}

/// Load tokens from ~/.config/invitesync/tokens.json
pub fn load_tokens() -> Result<Option<AccountTokens>> {
    let path = tokens_path()?;

    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read tokens file at {}", path.display()))?;

    let tokens: AccountTokens = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse tokens file at {}", path.display()))?;

    Ok(Some(tokens))
}

/// Save tokens to ~/.config/invitesync/tokens.json
pub fn save_tokens(tokens: &AccountTokens) -> Result<()> {
    let path = tokens_path()?;

    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }

    let contents = serde_json::to_string_pretty(tokens)
        .context("Failed to serialize tokens")?;

    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write tokens file at {}", path.display()))?;

    Ok(())
}

/// Expand ~ in paths to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}
