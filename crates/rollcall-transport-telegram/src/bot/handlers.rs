use crate::bot::platform::member_from_user;
use crate::bot::resilient::send_message_resilient;
use crate::config::BotSettings;
use anyhow::Result;
use rollcall_core::engine::{BroadcastEngine, BroadcastOutcome};
use rollcall_core::platform::ChatKind;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{Chat, ParseMode},
    utils::command::BotCommands,
};
use tracing::{info, warn};

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage help
    #[command(description = "Show this help.")]
    Help,
    /// Mention every known member
    #[command(description = "Mention everyone in the chat.")]
    All,
    /// Alias for `/all`
    #[command(description = "Same as /all.")]
    Everyone,
    /// Alias for `/all`
    #[command(description = "Same as /all.")]
    Mention,
    /// Mention administrators only
    #[command(rename = "admin_all", description = "Mention the chat administrators.")]
    AdminAll,
    /// Show what the bot knows about this chat
    #[command(description = "Show chat statistics.")]
    Stats,
}

/// Classify a Telegram chat.
#[must_use]
pub fn chat_kind(chat: &Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else if chat.is_group() {
        ChatKind::Group
    } else {
        ChatKind::Channel
    }
}

/// Record every user a group message reveals: the sender, users who just
/// joined and the author of the replied-to message.
pub async fn observe_message(engine: &BroadcastEngine, msg: &Message) {
    if !chat_kind(&msg.chat).is_group_like() {
        return;
    }

    let chat_id = msg.chat.id.0;
    let users = msg
        .from
        .iter()
        .chain(msg.new_chat_members().into_iter().flatten())
        .chain(msg.reply_to_message().and_then(|reply| reply.from.as_ref()));

    for user in users {
        engine
            .handle_passive_observation(chat_id, &member_from_user(user))
            .await;
    }
}

fn start_text() -> &'static str {
    "👋 <b>Hi!</b>\n\n\
     Add me to a group and send /all to mention everyone I have seen there.\n\
     Send /help for the full command list."
}

fn help_text(settings: &BotSettings) -> String {
    format!(
        "{}\n\n\
         I remember members as they write in the chat. Administrators are \
         used when I know nobody yet.\n\
         One broadcast per chat every {} seconds.",
        Command::descriptions(),
        settings.broadcast.broadcast_cooldown_secs
    )
}

fn stats_text(known: usize, cooldown_secs: u64, refused: u64) -> String {
    format!(
        "📊 <b>Chat statistics</b>\n\n\
         Known members: {known}\n\
         Cooldown: {cooldown_secs}s\n\
         Broadcasts refused by cooldown since start: {refused}"
    )
}

/// Handler for `/start`.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, start_text(), Some(ParseMode::Html), true).await?;
    Ok(())
}

/// Handler for `/help`.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn help(bot: Bot, msg: Message, settings: Arc<BotSettings>) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, help_text(&settings), None, true).await?;
    Ok(())
}

/// Handler for `/stats`.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn stats(bot: Bot, msg: Message, engine: Arc<BroadcastEngine>) -> Result<()> {
    let known = engine.known_members(msg.chat.id.0).await;
    let limiter = engine.rate_limiter();
    send_message_resilient(
        &bot,
        msg.chat.id,
        stats_text(known, limiter.cooldown().as_secs(), limiter.denied_count()),
        Some(ParseMode::Html),
        true,
    )
    .await?;
    Ok(())
}

/// Handler for `/all`, its aliases and `/admin_all`.
///
/// Progress and failures are posted by the engine itself; only refusals are
/// answered here.
///
/// # Errors
///
/// Returns an error if a refusal cannot be sent.
pub async fn broadcast(
    bot: Bot,
    msg: Message,
    engine: Arc<BroadcastEngine>,
    admins_only: bool,
) -> Result<()> {
    let Some(requester) = msg.from.as_ref().map(member_from_user) else {
        warn!(chat_id = msg.chat.id.0, "Broadcast command without a sender, ignoring");
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let kind = chat_kind(&msg.chat);

    let outcome = if admins_only {
        engine
            .handle_admin_broadcast_command(chat_id, kind, &requester)
            .await
    } else {
        engine
            .handle_broadcast_command(chat_id, kind, &requester)
            .await
    };

    match outcome {
        BroadcastOutcome::Rejected(reason) => {
            info!(chat_id, user_id = requester.id, "Broadcast refused: {reason}");
            send_message_resilient(&bot, msg.chat.id, reason, None, true).await?;
        }
        BroadcastOutcome::Failed(reason) => {
            warn!(chat_id, user_id = requester.id, "Broadcast failed: {reason}");
        }
        BroadcastOutcome::Sent(parts) => {
            info!(chat_id, user_id = requester.id, parts, admins_only, "Broadcast sent");
        }
    }
    Ok(())
}
