use crate::bot;
use crate::bot::handlers::{observe_message, Command};
use crate::bot::TelegramPlatform;
use crate::config::BotSettings;
use rollcall_core::directory::MemberDirectory;
use rollcall_core::engine::BroadcastEngine;
use rollcall_core::platform::ChatPlatform;
use rollcall_core::storage::{DirectoryStore, JsonFileStore, R2Storage};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, warn};

/// Run the Telegram transport runtime.
///
/// Returns after Ctrl-C, once the member directory has been flushed.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let store = init_store(&settings).await;
    let directory = init_directory(store).await;

    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let platform: Arc<dyn ChatPlatform> = Arc::new(TelegramPlatform::new(bot.clone()));
    let engine = Arc::new(BroadcastEngine::new(
        platform,
        directory,
        settings.broadcast.as_ref(),
    ));
    info!(
        cooldown_secs = settings.broadcast.broadcast_cooldown_secs,
        chunk_size = settings.broadcast.broadcast_chunk_size,
        "Broadcast engine initialized."
    );

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, engine.clone()])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Shutting down, flushing member directory...");
    match engine.flush().await {
        Ok(()) => info!("Member directory flushed."),
        Err(e) => error!("Failed to flush member directory: {}", e),
    }
}

async fn init_store(settings: &BotSettings) -> Arc<dyn DirectoryStore> {
    if !settings.broadcast.r2_configured() {
        let path = settings.broadcast.member_directory_path.clone();
        info!("Using file-backed member directory at {}", path);
        let store = JsonFileStore::new(path);
        if let Err(e) = store.check_connection().await {
            warn!("Member directory location is not writable yet: {}", e);
        }
        return Arc::new(store);
    }

    match R2Storage::new(settings.broadcast.as_ref()).await {
        Ok(s) => {
            info!("R2 Storage initialized.");
            if s.check_connection().await.is_err() {
                error!("R2 Storage connection check returned error.");
            }
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to initialize R2 Storage: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_directory(store: Arc<dyn DirectoryStore>) -> Arc<MemberDirectory> {
    match MemberDirectory::load(store).await {
        Ok(directory) => {
            let snapshot = directory.snapshot().await;
            info!(chats = snapshot.len(), "Member directory loaded.");
            Arc::new(directory)
        }
        Err(e) => {
            // Starting empty would overwrite the stored directory on the first write
            error!("Failed to load member directory: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .filter(|msg: Message, settings: Arc<BotSettings>| {
            settings.telegram.is_chat_allowed(msg.chat.id.0)
        })
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_observation))
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    engine: Arc<BroadcastEngine>,
    settings: Arc<BotSettings>,
) -> Result<(), teloxide::RequestError> {
    observe_message(&engine, &msg).await;

    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg).await,
        Command::Help => bot::handlers::help(bot, msg, settings).await,
        Command::All | Command::Everyone | Command::Mention => {
            bot::handlers::broadcast(bot, msg, engine, false).await
        }
        Command::AdminAll => bot::handlers::broadcast(bot, msg, engine, true).await,
        Command::Stats => bot::handlers::stats(bot, msg, engine).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_observation(
    msg: Message,
    engine: Arc<BroadcastEngine>,
) -> Result<(), teloxide::RequestError> {
    observe_message(&engine, &msg).await;
    respond(())
}
