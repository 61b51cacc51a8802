#![deny(missing_docs)]
//! Rollcall core library.
//!
//! Mention-broadcast engine: per-chat rate limiting, the passively built
//! member directory, mention rendering and message chunking.

/// Configuration management.
pub mod config;
/// Member directory cache.
pub mod directory;
/// Broadcast orchestration.
pub mod engine;
/// Mention rendering.
pub mod mention;
/// Message chunking.
pub mod planner;
/// Messaging platform interface.
pub mod platform;
/// Per-chat broadcast cooldown.
pub mod rate_limiter;
/// Storage layer for the member directory (local file or R2/S3).
pub mod storage;
/// Utility functions.
pub mod utils;

/// Mock helpers for unit tests.
#[cfg(test)]
pub mod testing;
