//! Process configuration, read once from the environment and validated up front.

use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use time::macros::format_description;
use time::UtcOffset;

use crate::domain::{SortKey, UnknownSortKey};
use crate::fetcher::DEFAULT_TARIFF_API_BASE;
use crate::mirror::DEFAULT_SHEET_RANGE;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} is out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },

    #[error("GSHEET_SORT_KEY: {0}")]
    InvalidSortKey(#[from] UnknownSortKey),

    #[error("TARIFFSYNC_UTC_OFFSET must look like +HH:MM, got '{0}'")]
    InvalidOffset(String),
}

/// Credential value that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetsConfig {
    pub spreadsheet_ids: Vec<String>,
    pub access_token: Option<Secret>,
    /// Preferred over `access_token` when set.
    pub service_account: Option<ServiceAccountConfig>,
    pub range: String,
}

/// Google service-account credentials for the JWT-bearer grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountConfig {
    pub client_email: String,
    /// PEM with literal `\n` escapes, or base64 of the PEM.
    pub private_key: Secret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: Secret,
    pub chat_id: String,
}

/// Everything the binary needs to wire the sync flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_token: Option<Secret>,
    pub api_base_url: String,
    pub retry: RetryPolicy,
    pub sort_key: SortKey,
    pub sheets: SheetsConfig,
    /// `None` unless both the bot token and the chat id are set.
    pub telegram: Option<TelegramConfig>,
    pub db_path: PathBuf,
    pub utc_offset: UtcOffset,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed numbers, sort keys or offsets.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(error) if error.not_found() => {}
            Err(error) => tracing::warn!(error = %error, "ignoring unreadable .env"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let attempts = number(&get, "RETRY_MAX_ATTEMPTS", 3)?;
        if attempts == 0 {
            return Err(ConfigError::OutOfRange {
                key: "RETRY_MAX_ATTEMPTS",
                reason: String::from("at least one attempt is required"),
            });
        }
        let attempts = u32::try_from(attempts).map_err(|_| ConfigError::OutOfRange {
            key: "RETRY_MAX_ATTEMPTS",
            reason: format!("{attempts} is too large"),
        })?;
        let base_delay = number(&get, "RETRY_BASE_DELAY_MS", 400)?;
        let max_delay = number(&get, "RETRY_MAX_DELAY_MS", 4_000)?;
        if max_delay < base_delay {
            return Err(ConfigError::OutOfRange {
                key: "RETRY_MAX_DELAY_MS",
                reason: format!("{max_delay} is below RETRY_BASE_DELAY_MS ({base_delay})"),
            });
        }
        let timeout = number(&get, "HTTP_TIMEOUT_MS", 10_000)?;
        if timeout == 0 {
            return Err(ConfigError::OutOfRange {
                key: "HTTP_TIMEOUT_MS",
                reason: String::from("timeout must be positive"),
            });
        }

        let sort_key = match get("GSHEET_SORT_KEY") {
            Some(value) => value.parse::<SortKey>()?,
            None => SortKey::default(),
        };

        let utc_offset = match get("TARIFFSYNC_UTC_OFFSET") {
            Some(value) => parse_offset(&value)?,
            None => UtcOffset::from_hms(3, 0, 0).map_err(|_| ConfigError::InvalidOffset("+03:00".to_string()))?,
        };

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token: Secret::new(bot_token),
                chat_id,
            }),
            _ => None,
        };

        let service_account = match (get("GOOGLE_CLIENT_EMAIL"), get("GOOGLE_PRIVATE_KEY")) {
            (Some(client_email), Some(private_key)) => Some(ServiceAccountConfig {
                client_email,
                private_key: Secret::new(private_key),
            }),
            _ => None,
        };

        let db_path = match get("TARIFFSYNC_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => resolve_home(&get).join("warehouse.duckdb"),
        };

        Ok(Self {
            api_token: get("WB_API_TOKEN").map(Secret::new),
            api_base_url: get("WB_API_BASE_URL").unwrap_or_else(|| DEFAULT_TARIFF_API_BASE.to_string()),
            retry: RetryPolicy::new(
                attempts,
                Duration::from_millis(base_delay),
                Duration::from_millis(max_delay),
                Duration::from_millis(timeout),
            ),
            sort_key,
            sheets: SheetsConfig {
                spreadsheet_ids: get("GSHEETS_IDS")
                    .map(|ids| {
                        ids.split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                access_token: get("GSHEETS_ACCESS_TOKEN").map(Secret::new),
                service_account,
                range: get("GSHEETS_RANGE").unwrap_or_else(|| DEFAULT_SHEET_RANGE.to_string()),
            },
            telegram,
            db_path,
            utc_offset,
        })
    }
}

fn number<F>(get: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}

fn parse_offset(value: &str) -> Result<UtcOffset, ConfigError> {
    UtcOffset::parse(
        value,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|_| ConfigError::InvalidOffset(value.to_string()))
}

fn resolve_home<F>(get: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(home) = get("TARIFFSYNC_HOME") {
        return PathBuf::from(home);
    }
    if let Some(home) = get("HOME") {
        return PathBuf::from(home).join(".tariffsync");
    }
    PathBuf::from(".tariffsync")
}
