//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::dedup::DEFAULT_CAPACITY;
use crate::delivery::DEFAULT_RECENT_SCAN_LIMIT;
use crate::error::Error;
use crate::filter::types::PolicyTier;
use crate::platform::telegram::DEFAULT_API_BASE_URL;
use crate::platform::{BotApiConfig, DestinationId};
use crate::relay::PayloadMode;

/// Environment variable accepted for the bot token when the config has none
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Keys that accept comma-separated values from the environment
const LIST_KEYS: [&str; 4] = [
    "admin.user_ids",
    "sources.chat_ids",
    "sources.sender_ids",
    "delivery.destinations",
];

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
}

impl TelegramConfig {
    pub fn client_config(&self) -> BotApiConfig {
        BotApiConfig {
            bot_token: self.bot_token.clone(),
            api_base_url: self.api_base_url.clone(),
            poll_timeout_secs: self.poll_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            reconnect_delay_ms: self.reconnect_delay_ms,
            max_reconnect_delay_ms: self.max_reconnect_delay_ms,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_api_base_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
        }
    }
}

/// Users allowed to run admin commands
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

/// Watched chats and senders. At least one list must be non-empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub chat_ids: Vec<i64>,
    #[serde(default)]
    pub sender_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Numeric chat ids or @usernames
    #[serde(default)]
    pub destinations: Vec<DestinationId>,
    #[serde(default)]
    pub payload: PayloadMode,
    #[serde(default = "default_recent_scan_limit")]
    pub recent_scan_limit: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            payload: PayloadMode::default(),
            recent_scan_limit: default_recent_scan_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dedup_max_size")]
    pub max_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_dedup_max_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Level used when nothing was saved with /set_and_save
    #[serde(default = "default_tier")]
    pub default_tier: String,
    /// Require addresses to decode as 32-byte base58 keys
    #[serde(default)]
    pub strict_address: bool,
}

impl FilterConfig {
    pub fn policy_tier(&self) -> crate::error::Result<PolicyTier> {
        self.default_tier
            .parse()
            .map_err(|_| Error::Config(format!(
                "filter.default_tier '{}' is not one of: {}",
                self.default_tier,
                PolicyTier::names()
            )))
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            strict_address: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_api_base_url() -> String { DEFAULT_API_BASE_URL.to_string() }
fn default_poll_timeout_secs() -> u64 { 30 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_reconnect_delay_ms() -> u64 { 1000 }
fn default_max_reconnect_delay_ms() -> u64 { 60_000 }
fn default_recent_scan_limit() -> usize { DEFAULT_RECENT_SCAN_LIMIT }
fn default_dedup_max_size() -> usize { DEFAULT_CAPACITY }
fn default_storage_path() -> String { "relay.db".to_string() }
fn default_tier() -> String { PolicyTier::Normal.as_str().to_string() }
fn default_channel_capacity() -> usize { 1024 }

impl Config {
    /// Load configuration from file and environment variables, then validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::load_unchecked(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validation, for offline commands that never connect
    pub fn load_unchecked<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut environment = config::Environment::with_prefix("RELAY")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (e.g. RELAY_TELEGRAM__BOT_TOKEN)
            .add_source(environment)
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if config.telegram.bot_token.is_empty() {
            if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
                config.telegram.bot_token = token.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Startup checks. Any failure here is fatal.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(Error::MissingEnvVar(format!(
                "{} (or telegram.bot_token)",
                BOT_TOKEN_ENV
            )));
        }

        if self.sources.chat_ids.is_empty() && self.sources.sender_ids.is_empty() {
            return Err(Error::Config(
                "no sources configured: set sources.chat_ids and/or sources.sender_ids".to_string(),
            ));
        }

        if self.delivery.destinations.is_empty() {
            return Err(Error::Config(
                "no destinations configured: set delivery.destinations".to_string(),
            ));
        }

        if self.dedup.enabled && self.dedup.max_size == 0 {
            return Err(Error::Config("dedup.max_size must be positive".to_string()));
        }

        if self.intake.channel_capacity == 0 {
            return Err(Error::Config("intake.channel_capacity must be positive".to_string()));
        }

        self.filter.policy_tier()?;

        if self.admin.user_ids.is_empty() {
            tracing::warn!("No admin user ids configured - admin commands will be refused");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let destinations: Vec<String> =
            self.delivery.destinations.iter().map(|d| d.to_string()).collect();

        format!(
            r#"Configuration:
  Telegram:
    bot_token: {}
    api_base_url: {}
    poll_timeout: {}s
    request_timeout: {}s
  Admin:
    user_ids: {:?}
  Sources:
    chat_ids: {:?}
    sender_ids: {:?}
  Delivery:
    destinations: [{}]
    payload: {}
    recent_scan_limit: {}
  Dedup:
    enabled: {}
    max_size: {}
  Storage:
    enabled: {}
    path: {}
  Filter:
    default_tier: {}
    strict_address: {}
  Intake:
    channel_capacity: {}
"#,
            mask_token(&self.telegram.bot_token),
            mask_url(&self.telegram.api_base_url),
            self.telegram.poll_timeout_secs,
            self.telegram.request_timeout_secs,
            self.admin.user_ids,
            self.sources.chat_ids,
            self.sources.sender_ids,
            destinations.join(", "),
            self.delivery.payload,
            self.delivery.recent_scan_limit,
            self.dedup.enabled,
            self.dedup.max_size,
            self.storage.enabled,
            self.storage.path,
            self.filter.default_tier,
            self.filter.strict_address,
            self.intake.channel_capacity,
        )
    }
}

/// Keep the bot id, hide the secret half
fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        _ if token.is_empty() => "(not set)".to_string(),
        Some((bot_id, _)) => format!("{}:***", bot_id),
        None => "***".to_string(),
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
