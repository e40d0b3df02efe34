//! In-process browser used by unit tests.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::cookies::CookieJar;
use super::driver::{BrowserLauncher, BrowserPage, ScrapedTable};
use crate::error::{Result, ScreenerError};

/// Shared knobs and counters for every page a `MockLauncher` creates.
pub(crate) struct MockBehavior {
    pub logged_in: AtomicBool,
    pub grid_ready: AtomicBool,
    pub title_fails: AtomicBool,
    /// Launches to fail before succeeding
    pub fail_launches: AtomicUsize,
    pub launch_delay_ms: AtomicU64,
    /// Navigations to fail before succeeding
    pub fail_navigations: AtomicUsize,
    /// CSV written by the export; `None` means no export control
    pub csv: Mutex<Option<String>>,
    pub table: Mutex<ScrapedTable>,
    pub closes: AtomicUsize,
    pub navigations: AtomicUsize,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            logged_in: AtomicBool::new(true),
            grid_ready: AtomicBool::new(true),
            title_fails: AtomicBool::new(false),
            fail_launches: AtomicUsize::new(0),
            launch_delay_ms: AtomicU64::new(0),
            fail_navigations: AtomicUsize::new(0),
            csv: Mutex::new(None),
            table: Mutex::new(ScrapedTable::default()),
            closes: AtomicUsize::new(0),
            navigations: AtomicUsize::new(0),
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub(crate) struct MockLauncher {
    pub behavior: Arc<MockBehavior>,
    pub launches: AtomicUsize,
}

impl MockLauncher {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(behavior),
            launches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, _cookies: &CookieJar) -> Result<Box<dyn BrowserPage>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let delay = self.behavior.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if take_one(&self.behavior.fail_launches) {
            return Err(ScreenerError::Browser("chrome exited during startup".into()));
        }
        Ok(Box::new(MockPage {
            behavior: self.behavior.clone(),
        }))
    }
}

struct MockPage {
    behavior: Arc<MockBehavior>,
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        self.behavior.navigations.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.behavior.fail_navigations) {
            return Err(ScreenerError::Browser("net::ERR_CONNECTION_RESET".into()));
        }
        Ok(())
    }

    async fn title(&mut self) -> Result<String> {
        if self.behavior.title_fails.load(Ordering::SeqCst) {
            return Err(ScreenerError::Browser("target closed".into()));
        }
        Ok("Stock Screener".into())
    }

    async fn is_logged_in(&mut self) -> Result<bool> {
        Ok(self.behavior.logged_in.load(Ordering::SeqCst))
    }

    async fn grid_ready(&mut self) -> Result<bool> {
        Ok(self.behavior.grid_ready.load(Ordering::SeqCst))
    }

    async fn trigger_export(&mut self, download_dir: &Path) -> Result<bool> {
        let csv = self.behavior.csv.lock().unwrap().clone();
        match csv {
            Some(content) => {
                std::fs::write(download_dir.join("screener_export.csv"), content)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn scrape_grid(&mut self, row_limit: Option<usize>) -> Result<ScrapedTable> {
        let mut table = self.behavior.table.lock().unwrap().clone();
        if let Some(limit) = row_limit {
            table.rows.truncate(limit);
        }
        Ok(table)
    }

    async fn close(&mut self) -> Result<()> {
        self.behavior.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
