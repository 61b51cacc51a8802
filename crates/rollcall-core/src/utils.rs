//! Retry helpers for transport operations and text utilities.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TELEGRAM_API_MAX_RETRIES)
}

/// Retry a transport operation with exponential backoff, but only for errors
/// accepted by `is_transient`. Other errors are returned after the first
/// attempt.
///
/// The retry strategy uses exponential backoff with jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (see constants in `config.rs`)
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient one once
/// attempts are exhausted.
pub async fn retry_transport_operation_if<F, Fut, T, E, C>(
    operation: F,
    is_transient: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
    E: Display,
{
    RetryIf::spawn(retry_strategy(), operation, is_transient)
        .await
        .map_err(|e| {
            warn!("Transport operation gave up: {}", e);
            e
        })
}

/// Truncate `s` so that it is at most `max_units` UTF-16 code units long.
///
/// Telegram measures text length in UTF-16 code units, so characters outside
/// the Basic Multilingual Plane count twice.
///
/// # Examples
///
/// ```
/// use rollcall_core::utils::truncate_utf16;
/// assert_eq!(truncate_utf16("Привет, мир!", 6), "Привет");
/// assert_eq!(truncate_utf16("😀😀😀", 4), "😀😀");
/// ```
#[must_use]
pub fn truncate_utf16(s: &str, max_units: usize) -> &str {
    let mut units = 0;
    for (pos, ch) in s.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            return &s[..pos];
        }
    }
    s
}
