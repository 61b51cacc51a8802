//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Network failures and flood-control responses are retried with exponential
//! backoff and jitter. API rejections such as missing rights are returned
//! immediately, since repeating them cannot succeed.
//!
//! # Usage
//!
//! ```ignore
//! use rollcall_transport_telegram::bot::resilient::{send_message_resilient, edit_message_resilient};
//!
//! let msg = send_message_resilient(&bot, chat_id, "🔄 Collecting members...", None, true).await?;
//! edit_message_resilient(&bot, chat_id, msg.id, "📢 ...", Some(ParseMode::Html), true).await?;
//! ```

use rollcall_core::utils::retry_transport_operation_if;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMember, LinkPreviewOptions, Message, MessageId, ParseMode};
use teloxide::RequestError;
use tracing::debug;

const ERROR_NOT_MODIFIED: &str = "message is not modified";

/// Errors worth another attempt.
#[must_use]
pub const fn is_transient(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_)
    )
}

/// Returns true for the "message is not modified" edit rejection.
#[must_use]
pub fn is_not_modified(error: &RequestError) -> bool {
    error.to_string().contains(ERROR_NOT_MODIFIED)
}

const fn disabled_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Send a message, retrying transient failures.
///
/// # Errors
///
/// Returns the first non-transient error, or the last one after all retries
/// are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
    disable_preview: bool,
) -> Result<Message, RequestError> {
    let text = text.into();
    retry_transport_operation_if(
        || async {
            let mut req = bot.send_message(chat_id, text.clone());
            if let Some(pm) = parse_mode {
                req = req.parse_mode(pm);
            }
            if disable_preview {
                req = req.link_preview_options(disabled_link_preview());
            }
            req.await
        },
        is_transient,
    )
    .await
}

/// Edit a message, retrying transient failures.
///
/// Returns `Ok(None)` when Telegram reports the text as unchanged.
///
/// # Errors
///
/// Returns the first non-transient error, or the last one after all retries
/// are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
    disable_preview: bool,
) -> Result<Option<Message>, RequestError> {
    let text = text.into();
    let result = retry_transport_operation_if(
        || async {
            let mut req = bot.edit_message_text(chat_id, msg_id, text.clone());
            if let Some(pm) = parse_mode {
                req = req.parse_mode(pm);
            }
            if disable_preview {
                req = req.link_preview_options(disabled_link_preview());
            }
            req.await
        },
        is_transient,
    )
    .await;

    match result {
        Ok(msg) => Ok(Some(msg)),
        Err(e) if is_not_modified(&e) => {
            debug!("Message update skipped: {ERROR_NOT_MODIFIED}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Fetch the chat's administrators, retrying transient failures.
///
/// # Errors
///
/// Returns the first non-transient error, or the last one after all retries
/// are exhausted.
pub async fn get_administrators_resilient(
    bot: &Bot,
    chat_id: ChatId,
) -> Result<Vec<ChatMember>, RequestError> {
    retry_transport_operation_if(
        || async { bot.get_chat_administrators(chat_id).await },
        is_transient,
    )
    .await
}
