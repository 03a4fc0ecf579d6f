//! Configuration for the wallet client.
//!
//! Read from `~/.wallet/config.toml`. Every section is optional; missing
//! values fall back to the defaults documented on each field. String values
//! may reference environment variables as `${NAME}`.
//!
//! ```toml
//! [platform]
//! url = "https://project.example.co"
//! anon_key = "${WALLET_ANON_KEY}"
//!
//! [balance]
//! table = "users"
//! column = "balance"
//! ```

use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Environment override for `[platform] url`.
pub const URL_ENV: &str = "WALLET_URL";
/// Environment override for `[platform] anon_key`.
pub const ANON_KEY_ENV: &str = "WALLET_ANON_KEY";

const CONFIG_DIR_NAME: &str = ".wallet";
const CONFIG_FILE_NAME: &str = "config.toml";
const SESSION_FILE_NAME: &str = "session.json";

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_TABLE: &str = "users";
pub const DEFAULT_ID_COLUMN: &str = "id";
pub const DEFAULT_BALANCE_COLUMN: &str = "balance";
pub const DEFAULT_CHANNEL: &str = "balance-updates";
pub const DEFAULT_CURRENCY: &str = "€";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct WalletConfig {
    pub app: Option<AppConfig>,
    pub platform: Option<PlatformConfig>,
    pub balance: Option<BalanceConfig>,
    pub session: Option<SessionConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Symbol printed after the amount. Default: "€".
    pub currency: Option<String>,
}

/// Hosted platform endpoint and credentials.
#[derive(Default, Deserialize)]
pub struct PlatformConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    /// Permit `http://` / `ws://` endpoints. Only meant for local development.
    #[serde(default)]
    pub allow_insecure: bool,
    pub request_timeout_secs: Option<u64>,
}

// Manual Debug impl to prevent leaking the anon key in logs.
impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("url", &self.url)
            .field(
                "anon_key",
                &if self.anon_key.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("allow_insecure", &self.allow_insecure)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Location of the balance row.
///
/// ```toml
/// [balance]
/// schema = "public"
/// table = "users"
/// id_column = "id"
/// column = "balance"
/// channel = "balance-updates"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct BalanceConfig {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub id_column: Option<String>,
    pub column: Option<String>,
    /// Realtime channel prefix; the user id is appended per subscription.
    pub channel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Session cache file. Default: `~/.wallet/session.json`.
    pub path: Option<String>,
}

/// Fully resolved balance row location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceTable {
    pub schema: String,
    pub table: String,
    pub id_column: String,
    pub column: String,
    pub channel: String,
}

impl Default for BalanceTable {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            column: DEFAULT_BALANCE_COLUMN.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| expand_env_vars(v).trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_non_blank(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Expand `${NAME}` references from the environment.
///
/// Unset variables expand to the empty string. An unterminated `${` is kept
/// literally.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(value)
}

impl WalletConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load from an explicit path. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Platform base URL. `WALLET_URL` wins over the file.
    #[must_use]
    pub fn platform_url(&self) -> Option<String> {
        env_non_blank(URL_ENV).or_else(|| {
            non_blank(self.platform.as_ref().and_then(|p| p.url.as_ref()))
        })
    }

    /// Anonymous API key. `WALLET_ANON_KEY` wins over the file.
    #[must_use]
    pub fn anon_key(&self) -> Option<String> {
        env_non_blank(ANON_KEY_ENV).or_else(|| {
            non_blank(self.platform.as_ref().and_then(|p| p.anon_key.as_ref()))
        })
    }

    #[must_use]
    pub fn allow_insecure(&self) -> bool {
        self.platform.as_ref().is_some_and(|p| p.allow_insecure)
    }

    #[must_use]
    pub fn request_timeout_secs(&self) -> u64 {
        self.platform
            .as_ref()
            .and_then(|p| p.request_timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    #[must_use]
    pub fn balance_table(&self) -> BalanceTable {
        let defaults = BalanceTable::default();
        let Some(cfg) = self.balance.as_ref() else {
            return defaults;
        };
        BalanceTable {
            schema: non_blank(cfg.schema.as_ref()).unwrap_or(defaults.schema),
            table: non_blank(cfg.table.as_ref()).unwrap_or(defaults.table),
            id_column: non_blank(cfg.id_column.as_ref()).unwrap_or(defaults.id_column),
            column: non_blank(cfg.column.as_ref()).unwrap_or(defaults.column),
            channel: non_blank(cfg.channel.as_ref()).unwrap_or(defaults.channel),
        }
    }

    /// Session cache location, if one can be determined.
    #[must_use]
    pub fn session_path(&self) -> Option<PathBuf> {
        non_blank(self.session.as_ref().and_then(|s| s.path.as_ref()))
            .map(|p| expand_home(&p))
            .or_else(|| config_dir().map(|dir| dir.join(SESSION_FILE_NAME)))
    }

    #[must_use]
    pub fn currency(&self) -> String {
        self.app
            .as_ref()
            .and_then(|app| app.currency.clone())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
    }
}

/// `~/.wallet`
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}
