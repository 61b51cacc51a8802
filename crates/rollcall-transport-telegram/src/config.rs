//! Telegram transport settings.

use config::{Config, ConfigError};
use rollcall_core::config::BroadcastSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    pub telegram_token: String,
    /// Comma-separated list of chat IDs the bot serves. Empty means every chat.
    #[serde(rename = "allowed_chats")]
    pub allowed_chats_str: Option<String>,
    /// `allowed_chats_str` parsed once at load time.
    #[serde(skip)]
    allowed_chat_ids: HashSet<i64>,
}

/// Combined settings used by the Telegram transport layer.
#[derive(Clone)]
pub struct BotSettings {
    /// Broadcast engine settings shared across transport handlers.
    pub broadcast: Arc<BroadcastSettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(broadcast: BroadcastSettings, telegram: TelegramSettings) -> Self {
        Self {
            broadcast: Arc::new(broadcast),
            telegram: Arc::new(telegram),
        }
    }
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(rollcall_core::config::build_config()?)
    }

    /// Deserialize settings from an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a value has the wrong shape.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mut settings: Self = config.try_deserialize()?;
        settings.allowed_chat_ids = settings
            .allowed_chats_str
            .as_deref()
            .map(parse_chat_ids)
            .unwrap_or_default();
        Ok(settings)
    }

    /// Returns the set of allowed chat IDs.
    #[must_use]
    pub const fn allowed_chats(&self) -> &HashSet<i64> {
        &self.allowed_chat_ids
    }

    /// Whether updates from `chat_id` should be handled.
    #[must_use]
    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chat_ids.is_empty() || self.allowed_chat_ids.contains(&chat_id)
    }
}

/// Parse a list of chat IDs separated by commas, semicolons or whitespace.
/// Tokens that are not integers are skipped.
#[must_use]
pub fn parse_chat_ids(s: &str) -> HashSet<i64> {
    s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .filter_map(|id| id.parse::<i64>().ok())
        .collect()
}
