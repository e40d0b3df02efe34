//! Configuration management for Zero services.
//!
//! The screener service reads the shared configuration file at
//! `~/.codecoder/config.json` (or the path in `ZERO_CONFIG_PATH`).
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZERO_* prefix, Supabase credentials)
//! 2. Explicit config file values
//! 3. Default values
//!
//! A `.env` file in the working directory is loaded before the
//! environment is consulted.
//!
//! # Environment Variable Mapping
//!
//! - `ZERO_SCREENER_PORT` → services.screener.port
//! - `ZERO_BIND_ADDRESS` → network.bind
//! - `ZERO_LOG_LEVEL` → observability.log_level
//! - `ZERO_LOG_FORMAT` → observability.log_format
//! - `SUPABASE_URL` → secrets.supabase.url
//! - `SUPABASE_ANON_KEY` → secrets.supabase.anon_key
//! - `ZERO_SCREENER_COOKIES` → screener.cookies_path
//! - `ZERO_SCREENER_CHROME` → screener.browser.chrome_executable

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default port for the screener service.
pub const DEFAULT_SCREENER_PORT: u16 = 8765;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codecoder"),
            |dirs| dirs.home_dir().join(".codecoder"),
        )
}

/// Get the configuration file path.
///
/// `ZERO_CONFIG_PATH` takes precedence over the default location.
pub fn config_path() -> PathBuf {
    match std::env::var("ZERO_CONFIG_PATH") {
        Ok(path) if !path.is_empty() => expand_path(&path),
        _ => config_dir().join("config.json"),
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

// ============================================================================
// Network Configuration (Global bind address)
// ============================================================================

/// Global network configuration.
///
/// Default is `127.0.0.1` (local only). Set to `0.0.0.0` to allow remote access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address for all services.
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Public URL for callbacks (optional).
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            public_url: None,
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

// ============================================================================
// Services Port Configuration
// ============================================================================

/// Service port configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    /// Screener service
    #[serde(default)]
    pub screener: ServicePortConfig,
}

/// Individual service port configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicePortConfig {
    /// Port number for the service
    #[serde(default)]
    pub port: Option<u16>,
}

// ============================================================================
// Secrets Configuration
// ============================================================================

/// Grouped secrets configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Supabase project holding the `controls` table
    #[serde(default)]
    pub supabase: SupabaseSecretsConfig,
}

/// Supabase REST credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SupabaseSecretsConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub url: Option<String>,
    /// Anonymous (publishable) API key
    #[serde(default)]
    pub anon_key: Option<String>,
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to pin at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Screener Configuration
// ============================================================================

/// Screener service configuration.
///
/// Everything that tunes the config cache, the browser session and the
/// fetch pipeline lives here; no timing constant is hard-coded elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Host suffix every screener URL must belong to
    #[serde(default = "default_target_site")]
    pub target_site: String,

    /// Path prefix every screener URL must start with
    #[serde(default = "default_screener_path")]
    pub screener_path: String,

    /// Page loaded before cookies are injected
    #[serde(default = "default_home_url")]
    pub home_url: String,

    /// Supabase table holding screener definitions
    #[serde(default = "default_controls_table")]
    pub controls_table: String,

    /// Config cache time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Raw strategy name → canonical strategy key
    #[serde(default = "default_strategy_aliases")]
    pub strategy_aliases: HashMap<String, String>,

    /// Cookie export used to authenticate the browser session
    #[serde(default = "default_cookies_path")]
    pub cookies_path: String,

    /// Cookies that must be present and unexpired
    #[serde(default = "default_required_cookies")]
    pub required_cookies: Vec<String>,

    /// Optional JSON file extending or replacing built-in index tables
    #[serde(default)]
    pub index_constituents_path: Option<String>,

    #[serde(default)]
    pub browser: ScreenerBrowserConfig,

    #[serde(default)]
    pub session: ScreenerSessionConfig,

    #[serde(default)]
    pub fetch: ScreenerFetchConfig,

    #[serde(default)]
    pub selectors: ScreenerSelectors,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            target_site: default_target_site(),
            screener_path: default_screener_path(),
            home_url: default_home_url(),
            controls_table: default_controls_table(),
            cache_ttl_secs: default_cache_ttl_secs(),
            strategy_aliases: default_strategy_aliases(),
            cookies_path: default_cookies_path(),
            required_cookies: default_required_cookies(),
            index_constituents_path: None,
            browser: ScreenerBrowserConfig::default(),
            session: ScreenerSessionConfig::default(),
            fetch: ScreenerFetchConfig::default(),
            selectors: ScreenerSelectors::default(),
        }
    }
}

impl ScreenerConfig {
    /// Resolved cookie file path (`~` and `$VAR` expanded).
    pub fn cookies_file(&self) -> PathBuf {
        expand_path(&self.cookies_path)
    }

    /// Resolved index constituents override file, if configured.
    pub fn index_constituents_file(&self) -> Option<PathBuf> {
        self.index_constituents_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_path)
    }
}

/// Headless browser launch options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerBrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome/Chromium binary; auto-detected when unset
    #[serde(default)]
    pub chrome_executable: Option<String>,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Extra command line switches appended after the built-in ones
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ScreenerBrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            extra_args: Vec::new(),
        }
    }
}

/// Session lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerSessionConfig {
    /// Upper bound for one launch + cookie injection + login check
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Launch attempts per recovery before giving up
    #[serde(default = "default_recovery_attempts")]
    pub recovery_attempts: u32,

    /// Upper bound for a liveness probe
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Background probe interval; 0 disables the monitor
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl Default for ScreenerSessionConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout_secs(),
            recovery_attempts: default_recovery_attempts(),
            probe_timeout_secs: default_probe_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

/// Fetch pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerFetchConfig {
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_export_timeout_secs")]
    pub export_timeout_secs: u64,

    /// Poll interval for render readiness and download detection
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total attempts per fetch (first try + retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Cap on rows collected by the scrape fallback
    #[serde(default)]
    pub scrape_row_limit: Option<usize>,
}

impl Default for ScreenerFetchConfig {
    fn default() -> Self {
        Self {
            render_timeout_secs: default_render_timeout_secs(),
            export_timeout_secs: default_export_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            scrape_row_limit: None,
        }
    }
}

/// DOM selectors for the screener page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerSelectors {
    /// Row selectors, tried in order
    #[serde(default = "default_row_selectors")]
    pub rows: Vec<String>,

    #[serde(default = "default_header_selector")]
    pub header_cells: String,

    #[serde(default = "default_symbol_selector")]
    pub symbol_link: String,

    /// Element whose presence means the user is signed in
    #[serde(default = "default_logged_in_selector")]
    pub logged_in: String,

    #[serde(default = "default_export_menu_xpath")]
    pub export_menu_xpath: String,

    #[serde(default = "default_export_menu_item")]
    pub export_menu_item_text: String,

    #[serde(default = "default_export_button")]
    pub export_button: String,

    #[serde(default = "default_export_button_item")]
    pub export_button_item_text: String,
}

impl Default for ScreenerSelectors {
    fn default() -> Self {
        Self {
            rows: default_row_selectors(),
            header_cells: default_header_selector(),
            symbol_link: default_symbol_selector(),
            logged_in: default_logged_in_selector(),
            export_menu_xpath: default_export_menu_xpath(),
            export_menu_item_text: default_export_menu_item(),
            export_button: default_export_button(),
            export_button_item_text: default_export_button_item(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_target_site() -> String {
    "tradingview.com".into()
}
fn default_screener_path() -> String {
    "/screener/".into()
}
fn default_home_url() -> String {
    "https://in.tradingview.com".into()
}
fn default_controls_table() -> String {
    "controls".into()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cookies_path() -> String {
    "~/.codecoder/cookies.json".into()
}
fn default_required_cookies() -> Vec<String> {
    vec!["sessionid".into()]
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_init_timeout_secs() -> u64 {
    60
}
fn default_recovery_attempts() -> u32 {
    2
}
fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_health_check_interval_secs() -> u64 {
    60
}
fn default_render_timeout_secs() -> u64 {
    30
}
fn default_export_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    2
}

fn default_strategy_aliases() -> HashMap<String, String> {
    [
        ("BTST_STBT", "btst"),
        ("BTST", "btst"),
        ("Swing", "swing"),
        ("swing", "swing"),
        ("position_montly", "position"),
        ("position_monthly", "position"),
        ("position", "position"),
        ("positional", "position"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_row_selectors() -> Vec<String> {
    [
        "table.tv-data-table tbody tr",
        "div[data-role='list'] div[data-role='row']",
        ".tv-screener-table__result-row",
        "tr.tv-screener-table__result-row",
        "tbody tr",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_header_selector() -> String {
    "th, thead td, [data-role='columnheader']".into()
}

fn default_symbol_selector() -> String {
    "a[href*='/symbols/'], .tv-screener-table__symbol".into()
}

fn default_logged_in_selector() -> String {
    "[data-name='header-user-menu-button'], button[aria-label='Open user menu']".into()
}

fn default_export_menu_xpath() -> String {
    "//*[@id='js-screener-container']/div[2]/div/div[1]/div[1]/div[1]/div/h2".into()
}

fn default_export_menu_item() -> String {
    "Export screen results".into()
}

fn default_export_button() -> String {
    "[data-name='screener-export-button']".into()
}

fn default_export_button_item() -> String {
    "Export to CSV".into()
}

// ============================================================================
// Root Config
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Global network configuration (bind address for all services)
    #[serde(default)]
    pub network: NetworkConfig,

    /// Service port configuration
    #[serde(default)]
    pub services: ServicesConfig,

    /// Grouped secrets
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Screener service configuration
    #[serde(default)]
    pub screener: ScreenerConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration, then `.env`, then environment overrides.
    pub fn load_with_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("ZERO_SCREENER_PORT") {
            if let Ok(p) = port.parse() {
                self.services.screener.port = Some(p);
            }
        }

        if let Ok(bind) = std::env::var("ZERO_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Ok(level) = std::env::var("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("ZERO_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(url) = std::env::var("SUPABASE_URL") {
            self.secrets.supabase.url = Some(url);
        }
        if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
            self.secrets.supabase.anon_key = Some(key);
        }

        if let Ok(path) = std::env::var("ZERO_SCREENER_COOKIES") {
            self.screener.cookies_path = path;
        }
        if let Ok(chrome) = std::env::var("ZERO_SCREENER_CHROME") {
            self.screener.browser.chrome_executable = Some(chrome);
        }
    }

    /// Get the effective bind address.
    pub fn bind_address(&self) -> &str {
        &self.network.bind
    }

    /// Get the effective screener service port.
    pub fn screener_port(&self) -> u16 {
        self.services.screener.port.unwrap_or(DEFAULT_SCREENER_PORT)
    }
}
