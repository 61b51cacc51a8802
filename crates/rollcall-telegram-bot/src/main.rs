use dotenvy::dotenv;
use regex::Regex;
use rollcall_core::config::BroadcastSettings;
use rollcall_transport_telegram::config::{BotSettings, TelegramSettings};
use rollcall_transport_telegram::runner::run_bot;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "rollcall_core=info,rollcall_transport_telegram=info,\
rollcall_telegram_bot=info,teloxide=warn,hyper=warn,reqwest=warn,aws_config=warn";

/// Secrets masked in every log line, applied in order
struct RedactionPatterns {
    rules: Vec<(Regex, &'static str)>,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        let rules = vec![
            (
                Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
                "$1[TELEGRAM_TOKEN]$3",
            ),
            (
                Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
                "[TELEGRAM_TOKEN]",
            ),
            (
                Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
                "$1[TELEGRAM_TOKEN]",
            ),
            (
                Regex::new(r"R2_ACCESS_KEY_ID=[^\s&]+")?,
                "R2_ACCESS_KEY_ID=[MASKED]",
            ),
            (
                Regex::new(r"R2_SECRET_ACCESS_KEY=[^\s&]+")?,
                "R2_SECRET_ACCESS_KEY=[MASKED]",
            ),
        ];
        Ok(Self { rules })
    }

    fn redact(&self, input: &str) -> String {
        self.rules
            .iter()
            .fold(input.to_string(), |acc, (pattern, replacement)| {
                pattern.replace_all(&acc, *replacement).into_owned()
            })
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let redacted = self.patterns.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the caller tracks its own buffer
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Patterns must exist before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting Rollcall TG Bot...");

    let settings = init_settings();

    run_bot(settings).await;

    info!("Rollcall TG Bot stopped.");
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<BotSettings> {
    let broadcast_settings = match BroadcastSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load broadcast configuration: {}", e);
            std::process::exit(1);
        }
    };
    let telegram_settings = match TelegramSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };
    if telegram_settings.telegram_token.trim().is_empty() {
        error!("TELEGRAM_TOKEN is not set.");
        std::process::exit(1);
    }

    info!("Configuration loaded successfully.");
    Arc::new(BotSettings::new(broadcast_settings, telegram_settings))
}
