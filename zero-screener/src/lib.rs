//! zero-screener - TradingView screener results over one persistent,
//! authenticated browser session.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod browser;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod routes;

pub use browser::{
    BrowserLauncher, BrowserPage, ChromeLauncher, CookieJar, ReleaseOutcome, ScrapedTable,
    SessionHandle, SessionHealth, SessionManager, SessionSettings, SessionState,
};
pub use config::{
    ConfigCache, ConfigStatus, ControlRow, ControlsStore, ScreenerDefinition,
    SupabaseControlsStore,
};
pub use dispatch::{FetchRequest, Operation, RequestDispatcher};
pub use error::{ApiError, Result, ScreenerError};
pub use fetch::{FetchSettings, IndexRegistry, ResultSource, ScreenerFetcher, ScreenerResult};
pub use routes::{build_router, AppState};
