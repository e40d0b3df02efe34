//! Zero Common - Shared configuration and logging for Zero services.
//!
//! This crate provides:
//! - Configuration types and loading (file, `.env`, environment overrides)
//! - Logging setup and structured logging helpers
//! - Lightweight request metrics

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{
    Config, NetworkConfig, ObservabilityConfig, ScreenerBrowserConfig, ScreenerConfig,
    ScreenerFetchConfig, ScreenerSelectors, ScreenerSessionConfig, SecretsConfig,
    SupabaseSecretsConfig,
};
