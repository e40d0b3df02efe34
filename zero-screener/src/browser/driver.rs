//! Browser driver seam.
//!
//! The session manager and fetcher only talk to these traits; the Chrome
//! implementation lives in `chrome.rs`. Page methods take `&mut self` so a
//! page only has to be `Send`, which is all the session slot requires.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::cookies::CookieJar;
use crate::error::Result;

/// Table read directly from the rendered screener grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Starts authenticated browser pages.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser, inject `cookies`, and return the page to drive.
    async fn launch(&self, cookies: &CookieJar) -> Result<Box<dyn BrowserPage>>;
}

/// One live, authenticated page.
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate and wait for the document load.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Document title; used as the liveness probe.
    async fn title(&mut self) -> Result<String>;

    /// Whether the signed-in indicator is present.
    async fn is_logged_in(&mut self) -> Result<bool>;

    /// Whether the screener grid has finished rendering.
    async fn grid_ready(&mut self) -> Result<bool>;

    /// Start a CSV export that downloads into `download_dir`.
    ///
    /// Returns `false` when no export control could be found.
    async fn trigger_export(&mut self, download_dir: &Path) -> Result<bool>;

    /// Read headers and rows straight from the rendered grid.
    async fn scrape_grid(&mut self, row_limit: Option<usize>) -> Result<ScrapedTable>;

    /// Tear the browser down.
    async fn close(&mut self) -> Result<()>;
}
