//! Configuration and settings management
//!
//! Loads broadcast settings from config files and environment variables and
//! defines the engine's tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cooldown between two broadcasts in the same chat.
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;
/// Maximum number of mentions placed in a single message.
pub const DEFAULT_CHUNK_SIZE: usize = 50;
/// Pause between consecutive parts of a multi-part broadcast.
pub const DEFAULT_INTER_MESSAGE_DELAY_MS: u64 = 500;
/// Per-call timeout applied to platform requests issued by the engine.
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 30;
/// Default location of the file-backed member directory.
pub const DEFAULT_MEMBER_DIRECTORY_PATH: &str = "data/members.json";

/// Initial backoff for transport retries.
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff cap for transport retries.
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Attempts made by transport retries.
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// How mentions are separated inside a message.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MentionLayout {
    /// One mention per line.
    #[default]
    Lines,
    /// Mentions on a single line, separated by spaces.
    Inline,
}

impl MentionLayout {
    /// Separator placed between two rendered mentions.
    #[must_use]
    pub const fn separator(self) -> &'static str {
        match self {
            Self::Lines => "\n",
            Self::Inline => " ",
        }
    }
}

/// Broadcast engine settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BroadcastSettings {
    /// Seconds a chat has to wait between two broadcasts
    #[serde(default = "default_cooldown_secs")]
    pub broadcast_cooldown_secs: u64,
    /// Maximum mentions per message
    #[serde(default = "default_chunk_size")]
    pub broadcast_chunk_size: usize,
    /// Separator policy shared by the formatter and the planner
    #[serde(default)]
    pub mention_layout: MentionLayout,
    /// Pause between parts, in milliseconds
    #[serde(default = "default_inter_message_delay_ms")]
    pub inter_message_delay_ms: u64,
    /// Timeout for a single platform call, in seconds
    #[serde(default = "default_platform_timeout_secs")]
    pub platform_timeout_secs: u64,
    /// Path of the JSON member directory
    #[serde(default = "default_member_directory_path")]
    pub member_directory_path: String,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,
}

const fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

const fn default_inter_message_delay_ms() -> u64 {
    DEFAULT_INTER_MESSAGE_DELAY_MS
}

const fn default_platform_timeout_secs() -> u64 {
    DEFAULT_PLATFORM_TIMEOUT_SECS
}

fn default_member_directory_path() -> String {
    DEFAULT_MEMBER_DIRECTORY_PATH.to_string()
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            broadcast_cooldown_secs: DEFAULT_COOLDOWN_SECS,
            broadcast_chunk_size: DEFAULT_CHUNK_SIZE,
            mention_layout: MentionLayout::default(),
            inter_message_delay_ms: DEFAULT_INTER_MESSAGE_DELAY_MS,
            platform_timeout_secs: DEFAULT_PLATFORM_TIMEOUT_SECS,
            member_directory_path: default_member_directory_path(),
            r2_access_key_id: None,
            r2_secret_access_key: None,
            r2_endpoint_url: None,
            r2_bucket_name: None,
        }
    }
}

/// Build the layered configuration shared by every settings struct.
///
/// # Errors
///
/// Returns a `ConfigError` if a source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        // Start off by merging in the "default" configuration file
        .add_source(File::with_name("config/default").required(false))
        // Add in the current environment file
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Add in a local configuration file
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__BROADCAST_COOLDOWN_SECS=60 ./target/app`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Unprefixed variables; empty ones are treated as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl BroadcastSettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(build_config()?)
    }

    /// Deserialize settings from an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a value has the wrong shape.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mut settings: Self = config.try_deserialize()?;
        settings.broadcast_chunk_size = settings.broadcast_chunk_size.max(1);
        settings.platform_timeout_secs = settings.platform_timeout_secs.max(1);
        Ok(settings)
    }

    /// Cooldown between broadcasts in one chat.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.broadcast_cooldown_secs)
    }

    /// Pause between consecutive parts of a broadcast.
    #[must_use]
    pub const fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    /// Timeout for a single platform call.
    #[must_use]
    pub const fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_secs)
    }

    /// Returns true when every R2 credential is present.
    #[must_use]
    pub const fn r2_configured(&self) -> bool {
        self.r2_endpoint_url.is_some()
            && self.r2_access_key_id.is_some()
            && self.r2_secret_access_key.is_some()
            && self.r2_bucket_name.is_some()
    }
}
