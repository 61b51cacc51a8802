//! [`ChatPlatform`] implementation backed by the Telegram Bot API.

use super::resilient::{edit_message_resilient, get_administrators_resilient, send_message_resilient};
use async_trait::async_trait;
use rollcall_core::directory::Member;
use rollcall_core::platform::{ChatPlatform, MessageHandle, PlatformError, RenderMode};
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode, User};
use teloxide::{ApiError, RequestError};

/// Telegram client used by the broadcast engine.
#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    /// Wrap a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Directory entry for a Telegram user.
#[must_use]
pub fn member_from_user(user: &User) -> Member {
    Member {
        id: user.id.0.cast_signed(),
        display_name: user.full_name(),
        handle: user.username.clone(),
        is_bot: user.is_bot,
    }
}

const fn parse_mode(render_mode: RenderMode) -> Option<ParseMode> {
    match render_mode {
        RenderMode::Html => Some(ParseMode::Html),
        RenderMode::Plain => None,
    }
}

fn is_permission_error(error: &ApiError) -> bool {
    if matches!(
        error,
        ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::NotEnoughRightsToPostMessages
    ) {
        return true;
    }
    let text = error.to_string().to_lowercase();
    ["not enough rights", "have no rights", "chat_admin_required", "forbidden"]
        .iter()
        .any(|needle| text.contains(needle))
}

fn to_platform_error(error: &RequestError) -> PlatformError {
    match error {
        RequestError::Network(_) | RequestError::Io(_) => {
            PlatformError::Unreachable(error.to_string())
        }
        RequestError::Api(api) if is_permission_error(api) => {
            PlatformError::PermissionDenied(error.to_string())
        }
        _ => PlatformError::Api(error.to_string()),
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn send_message(
        &self,
        chat_id: i64,
        text: String,
        render_mode: RenderMode,
        suppress_link_preview: bool,
    ) -> Result<MessageHandle, PlatformError> {
        let msg = send_message_resilient(
            &self.bot,
            ChatId(chat_id),
            text,
            parse_mode(render_mode),
            suppress_link_preview,
        )
        .await
        .map_err(|e| to_platform_error(&e))?;

        Ok(MessageHandle {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
        })
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        text: String,
        render_mode: RenderMode,
        suppress_link_preview: bool,
    ) -> Result<(), PlatformError> {
        edit_message_resilient(
            &self.bot,
            ChatId(handle.chat_id),
            MessageId(handle.message_id),
            text,
            parse_mode(render_mode),
            suppress_link_preview,
        )
        .await
        .map(|_| ())
        .map_err(|e| to_platform_error(&e))
    }

    async fn list_administrators(&self, chat_id: i64) -> Result<Vec<Member>, PlatformError> {
        let admins = get_administrators_resilient(&self.bot, ChatId(chat_id))
            .await
            .map_err(|e| to_platform_error(&e))?;
        Ok(admins.iter().map(|m| member_from_user(&m.user)).collect())
    }
}
