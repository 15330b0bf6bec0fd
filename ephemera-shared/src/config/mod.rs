//! # Configuration
//!
//! This module contains the bot configuration structure and the loader that
//! resolves it from files, environment variables, and command-line overrides.

pub mod bot;

pub use bot::{Config, ConfigError, ConfigOverrides, LogFormat, LoggingConfig, RateLimitConfig};
