//! Interface to the messaging platform.
//!
//! The engine only talks to the platform through [`ChatPlatform`]; the
//! Telegram transport provides the real implementation.

use crate::directory::Member;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a platform client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform could not be reached
    #[error("platform unreachable: {0}")]
    Unreachable(String),
    /// The bot lacks the rights for this call
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Any other API-level rejection
    #[error("platform API error: {0}")]
    Api(String),
    /// The call did not complete in time
    #[error("platform call timed out after {0:?}")]
    Timeout(Duration),
}

/// How the platform should interpret message markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Telegram-flavoured HTML.
    Html,
    /// No markup.
    Plain,
}

/// Kind of conversation a command arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one chat with the bot.
    Private,
    /// Basic group.
    Group,
    /// Supergroup.
    Supergroup,
    /// Broadcast channel.
    Channel,
}

impl ChatKind {
    /// Groups and supergroups are the only chats with a member roster.
    #[must_use]
    pub const fn is_group_like(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }
}

/// Reference to a message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    /// Chat the message lives in.
    pub chat_id: i64,
    /// Platform message id.
    pub message_id: i32,
}

/// Outbound operations the broadcast engine needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send a new message to a chat
    async fn send_message(
        &self,
        chat_id: i64,
        text: String,
        render_mode: RenderMode,
        suppress_link_preview: bool,
    ) -> Result<MessageHandle, PlatformError>;
    /// Replace the text of a previously sent message
    async fn edit_message(
        &self,
        handle: MessageHandle,
        text: String,
        render_mode: RenderMode,
        suppress_link_preview: bool,
    ) -> Result<(), PlatformError>;
    /// Fetch the administrators of a chat
    async fn list_administrators(&self, chat_id: i64) -> Result<Vec<Member>, PlatformError>;
}
