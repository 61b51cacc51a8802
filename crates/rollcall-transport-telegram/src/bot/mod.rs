/// Command set and message handlers
pub mod handlers;
/// `ChatPlatform` implementation over the Bot API
pub mod platform;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;

pub use platform::TelegramPlatform;
