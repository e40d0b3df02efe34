//! One logical screener fetch.
//!
//! resolve definition → resolve index filter → acquire session → navigate →
//! wait for render → CSV export (or scrape fallback) → normalize → release.
//! A transient failure releases the session as failed, which forces a
//! rebuild on the next acquire, and the fetch is retried up to the
//! configured attempt budget.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};
use zero_common::logging::generate_trace_id;

use super::download::wait_for_csv;
use super::indices::{IndexFilter, IndexRegistry};
use super::parse::{self, NormalizedTable, ParseOutcome, ResultSource};
use crate::browser::{BrowserPage, ReleaseOutcome, SessionManager};
use crate::config::{ConfigCache, ScreenerDefinition};
use crate::error::{Result, ScreenerError};

/// Fetch pipeline settings.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub render_timeout: Duration,
    pub export_timeout: Duration,
    pub poll_interval: Duration,
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub scrape_row_limit: Option<usize>,
}

impl FetchSettings {
    pub fn from_config(config: &zero_common::ScreenerConfig) -> Self {
        Self {
            render_timeout: Duration::from_secs(config.fetch.render_timeout_secs),
            export_timeout: Duration::from_secs(config.fetch.export_timeout_secs),
            poll_interval: Duration::from_millis(config.fetch.poll_interval_ms),
            max_attempts: config.fetch.max_attempts,
            scrape_row_limit: config.fetch.scrape_row_limit,
        }
    }
}

/// Per-fetch diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct FetchMetadata {
    pub strategy: String,
    pub url: String,
    pub attempts: u32,
    pub fetch_time_ms: u64,
    pub trace_id: String,
}

/// Parsed rows of one screener run.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenerResult {
    pub rows: Vec<BTreeMap<String, String>>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_filter_applied: Option<String>,
    pub source: ResultSource,
    pub degraded: bool,
    pub metadata: FetchMetadata,
}

/// Drives the shared session through one fetch.
pub struct ScreenerFetcher {
    config: Arc<ConfigCache>,
    session: SessionManager,
    indices: Arc<IndexRegistry>,
    settings: FetchSettings,
}

impl ScreenerFetcher {
    pub fn new(
        config: Arc<ConfigCache>,
        session: SessionManager,
        indices: Arc<IndexRegistry>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            config,
            session,
            indices,
            settings,
        }
    }

    /// Fetch `strategy`, optionally restricted to the constituents of
    /// `index_filter` (one index or a comma-separated list).
    pub async fn fetch(&self, strategy: &str, index_filter: Option<&str>) -> Result<ScreenerResult> {
        let trace_id = generate_trace_id();
        let span = zero_common::request_span!(
            "fetch_screener",
            trace_id,
            strategy = %strategy,
            index_filter = index_filter.unwrap_or("")
        );
        self.fetch_traced(strategy, index_filter, trace_id.clone())
            .instrument(span)
            .await
    }

    async fn fetch_traced(
        &self,
        strategy: &str,
        index_filter: Option<&str>,
        trace_id: String,
    ) -> Result<ScreenerResult> {
        let definition = self.config.get_definition(strategy).await?;

        // Resolve the filter before touching the browser.
        let filter = match index_filter.map(str::trim).filter(|f| !f.is_empty()) {
            Some(raw) => Some(self.indices.resolve(raw)?),
            None => None,
        };

        let started = std::time::Instant::now();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(&definition, filter.as_ref()).await {
                Ok(table) => {
                    let fetch_time_ms = started.elapsed().as_millis() as u64;
                    info!(
                        rows = table.rows.len(),
                        source = ?table.source,
                        attempt,
                        fetch_time_ms,
                        "Screener fetch complete"
                    );
                    return Ok(ScreenerResult {
                        row_count: table.rows.len(),
                        rows: table.rows,
                        columns: table.columns,
                        fetched_at: Utc::now(),
                        index_filter_applied: filter.map(|f| f.label),
                        source: table.source,
                        degraded: table.degraded,
                        metadata: FetchMetadata {
                            strategy: definition.strategy.clone(),
                            url: definition.url.clone(),
                            attempts: attempt,
                            fetch_time_ms,
                            trace_id,
                        },
                    });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "Fetch attempt failed, retrying with a fresh session");
                }
                Err(e) => {
                    warn!(attempt, kind = e.kind(), error = %e, "Screener fetch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(
        &self,
        definition: &ScreenerDefinition,
        filter: Option<&IndexFilter>,
    ) -> Result<NormalizedTable> {
        let mut handle = self.session.acquire().await?;

        let outcome = match handle.page() {
            Ok(page) => self.drive(page, definition, filter).await,
            Err(e) => Err(e),
        };

        let release = match &outcome {
            Ok(_) => ReleaseOutcome::Success,
            Err(e) => ReleaseOutcome::Failure(e.to_string()),
        };
        self.session.release(handle, release);

        outcome
    }

    async fn drive(
        &self,
        page: &mut dyn BrowserPage,
        definition: &ScreenerDefinition,
        filter: Option<&IndexFilter>,
    ) -> Result<NormalizedTable> {
        page.navigate(&definition.url).await?;
        self.wait_for_render(page, &definition.url).await?;

        let outcome = match self.export_csv(page).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "CSV export unavailable, falling back to grid scrape");
                let table = page
                    .scrape_grid(self.settings.scrape_row_limit)
                    .await
                    .map_err(|e| ScreenerError::ExportFailure(format!("scrape failed: {e}")))?;
                parse::from_scrape(table)?
            }
        };

        Ok(parse::normalize(outcome, filter))
    }

    async fn wait_for_render(&self, page: &mut dyn BrowserPage, url: &str) -> Result<()> {
        let poll = self.settings.poll_interval;
        let ready = tokio::time::timeout(self.settings.render_timeout, async {
            loop {
                if page.grid_ready().await? {
                    return Ok::<(), ScreenerError>(());
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        match ready {
            Ok(result) => result,
            Err(_) => Err(ScreenerError::RenderTimeout {
                url: url.to_string(),
                timeout_secs: self.settings.render_timeout.as_secs(),
            }),
        }
    }

    /// Export into a private temp directory; the file and directory are
    /// removed whatever the outcome.
    async fn export_csv(&self, page: &mut dyn BrowserPage) -> Result<ParseOutcome> {
        let dir = tempfile::Builder::new().prefix("tv_screener_").tempdir()?;

        if !page.trigger_export(dir.path()).await? {
            return Err(ScreenerError::ExportFailure(
                "no export control on the page".into(),
            ));
        }

        let file = wait_for_csv(dir.path(), self.settings.export_timeout, self.settings.poll_interval)
            .await?;
        let bytes = file.read().await?;
        drop(file);

        parse::parse_csv(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{MockBehavior, MockLauncher};
    use crate::browser::{ScrapedTable, SessionSettings};
    use crate::config::{ControlRow, ControlsStore};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    struct OneScreener;

    #[async_trait]
    impl ControlsStore for OneScreener {
        fn name(&self) -> &str {
            "one"
        }

        async fn fetch_enabled(&self, _target_site: &str) -> Result<Vec<ControlRow>> {
            Ok(vec![ControlRow {
                strategy: Some("momentum_breakout_with_volume".into()),
                url: Some("https://www.tradingview.com/screener/mbv123/".into()),
                on_off: Some("ON".into()),
                ..Default::default()
            }])
        }
    }

    const EXPORT: &str = "Symbol,Description,Price\n\
        NSE:HDFCBANK,HDFC Bank,1650\n\
        NSE:TCS,TCS,3900\n\
        NSE:AXISBANK,Axis Bank,1100\n";

    struct Harness {
        fetcher: ScreenerFetcher,
        launcher: Arc<MockLauncher>,
        _dir: tempfile::TempDir,
    }

    fn harness(behavior: MockBehavior) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.json");
        std::fs::write(&cookies, r#"[{"name": "sessionid", "value": "abc"}]"#).unwrap();

        let launcher = Arc::new(MockLauncher::new(behavior));
        let session = SessionManager::new(
            launcher.clone(),
            SessionSettings {
                cookies_path: cookies,
                required_cookies: vec!["sessionid".into()],
                init_timeout: Duration::from_secs(5),
                recovery_attempts: 2,
                probe_timeout: Duration::from_secs(1),
                health_check_interval: Duration::ZERO,
            },
        );
        let cache = Arc::new(ConfigCache::new(
            Arc::new(OneScreener),
            &zero_common::ScreenerConfig::default(),
        ));
        let settings = FetchSettings {
            render_timeout: Duration::from_millis(200),
            export_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            max_attempts: 2,
            scrape_row_limit: None,
        };

        Harness {
            fetcher: ScreenerFetcher::new(cache, session, Arc::new(IndexRegistry::builtin()), settings),
            launcher,
            _dir: dir,
        }
    }

    fn with_csv() -> MockBehavior {
        let behavior = MockBehavior::default();
        *behavior.csv.lock().unwrap() = Some(EXPORT.into());
        behavior
    }

    #[tokio::test]
    async fn test_csv_fetch() {
        let h = harness(with_csv());
        let result = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap();

        assert_eq!(result.row_count, 3);
        assert_eq!(result.source, ResultSource::Csv);
        assert!(!result.degraded);
        assert!(result.index_filter_applied.is_none());
        assert_eq!(result.metadata.attempts, 1);
        assert_eq!(result.rows[0]["Symbol"], "NSE:HDFCBANK");
    }

    #[tokio::test]
    async fn test_index_filter() {
        let h = harness(with_csv());
        let result = h
            .fetcher
            .fetch("momentum_breakout_with_volume", Some("NIFTYBANK"))
            .await
            .unwrap();

        assert_eq!(result.row_count, 2);
        assert_eq!(result.index_filter_applied.as_deref(), Some("NIFTYBANK"));
    }

    #[tokio::test]
    async fn test_scrape_fallback_when_no_export() {
        let behavior = MockBehavior::default();
        *behavior.table.lock().unwrap() = ScrapedTable {
            headers: vec!["Symbol".into(), "Price".into()],
            rows: vec![vec!["HDFCBANK".into(), "1650".into()]],
        };
        let h = harness(behavior);
        let result = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap();

        assert_eq!(result.source, ResultSource::Scrape);
        assert!(result.degraded);
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_malformed_export_falls_back() {
        let behavior = MockBehavior::default();
        *behavior.csv.lock().unwrap() = Some("   \n".into());
        *behavior.table.lock().unwrap() = ScrapedTable {
            headers: vec!["Symbol".into()],
            rows: vec![vec!["TCS".into()]],
        };
        let h = harness(behavior);
        let result = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap();
        assert_eq!(result.source, ResultSource::Scrape);
    }

    #[tokio::test]
    async fn test_header_only_export_falls_back_to_grid() {
        let behavior = MockBehavior::default();
        *behavior.csv.lock().unwrap() = Some("Symbol,Description,Close\n".into());
        *behavior.table.lock().unwrap() = ScrapedTable {
            headers: vec!["Symbol".into(), "Close".into()],
            rows: vec![
                vec!["TCS".into(), "3900".into()],
                vec!["INFY".into(), "1500".into()],
            ],
        };
        let h = harness(behavior);
        let result = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap();

        assert_eq!(result.source, ResultSource::Scrape);
        assert!(result.degraded);
        assert_eq!(result.row_count, 2);
    }

    #[tokio::test]
    async fn test_empty_export_and_empty_grid_is_empty_result() {
        let behavior = MockBehavior::default();
        *behavior.csv.lock().unwrap() = Some("Symbol,Description,Close\n".into());
        *behavior.table.lock().unwrap() = ScrapedTable {
            headers: vec!["Symbol".into(), "Close".into()],
            rows: vec![],
        };
        let h = harness(behavior);
        let result = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap();

        assert_eq!(result.source, ResultSource::Scrape);
        assert_eq!(result.row_count, 0);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_strategy_does_not_touch_browser() {
        let h = harness(with_csv());
        let err = h.fetcher.fetch("nonexistent_strategy", None).await.unwrap_err();
        assert_eq!(err.kind(), "UnknownScreenerError");
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_index_does_not_touch_browser() {
        let h = harness(with_csv());
        let err = h
            .fetcher
            .fetch("momentum_breakout_with_volume", Some("NIFTYCRYPTO"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownIndexError");
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once_with_fresh_session() {
        let behavior = with_csv();
        behavior.fail_navigations.store(1, Ordering::SeqCst);
        let h = harness(behavior);

        let result = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap();
        assert_eq!(result.metadata.attempts, 2);
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_render_timeout_after_retry() {
        let behavior = with_csv();
        behavior.grid_ready.store(false, Ordering::SeqCst);
        let h = harness(behavior);

        let err = h.fetcher.fetch("momentum_breakout_with_volume", None).await.unwrap_err();
        assert_eq!(err.kind(), "RenderTimeoutError");
        assert_eq!(h.launcher.behavior.navigations.load(Ordering::SeqCst), 2);
    }
}
