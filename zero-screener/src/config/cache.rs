//! TTL cache over the controls table.
//!
//! The cache holds one immutable snapshot behind an `Arc`. Reloads build a
//! complete new snapshot and swap it in, so readers see either the old or
//! the new table, never a mix. Reloads serialize on `reload_lock`; a reader
//! that waited behind another reload re-checks freshness before loading.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::ControlsStore;
use super::types::{normalize_strategy, validate_rows, ScreenerDefinition, TargetSite};
use crate::error::{Result, ScreenerError};

/// One complete load of the controls table.
#[derive(Debug)]
pub struct ConfigSnapshot {
    entries: BTreeMap<String, ScreenerDefinition>,
    warnings: Vec<String>,
    loaded_at: Instant,
    loaded_at_wall: DateTime<Utc>,
}

impl ConfigSnapshot {
    /// Number of visible definitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All definitions, sorted by strategy key.
    pub fn definitions(&self) -> Vec<ScreenerDefinition> {
        self.entries.values().cloned().collect()
    }

    /// Resolve by exact key, then normalized key, then original name.
    fn lookup(&self, strategy: &str, aliases: &HashMap<String, String>) -> Option<&ScreenerDefinition> {
        let trimmed = strategy.trim();
        self.entries
            .get(trimmed)
            .or_else(|| self.entries.get(&normalize_strategy(trimmed, aliases)))
            .or_else(|| {
                self.entries
                    .values()
                    .find(|d| d.original_name.eq_ignore_ascii_case(trimmed))
            })
    }

    fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.loaded_at)
    }
}

/// Cache status for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    pub loaded_count: usize,
    /// Seconds since the last successful load
    #[serde(rename = "age")]
    pub age_secs: Option<u64>,
    #[serde(rename = "ttl")]
    pub ttl_secs: u64,
    pub is_stale: bool,
    pub last_loaded_at: Option<DateTime<Utc>>,
    /// Successful loads since startup
    pub reload_count: u64,
    pub warnings: Vec<String>,
}

/// Strategy → definition cache with a bounded time-to-live.
pub struct ConfigCache {
    store: Arc<dyn ControlsStore>,
    site: TargetSite,
    aliases: HashMap<String, String>,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<ConfigSnapshot>>>,
    reload_lock: Mutex<()>,
    reload_count: AtomicU64,
}

impl ConfigCache {
    /// Create an empty cache; the first read loads the table.
    pub fn new(store: Arc<dyn ControlsStore>, config: &zero_common::ScreenerConfig) -> Self {
        Self {
            store,
            site: TargetSite::new(config.target_site.clone(), config.screener_path.clone()),
            aliases: config.strategy_aliases.clone(),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            snapshot: RwLock::new(None),
            reload_lock: Mutex::new(()),
            reload_count: AtomicU64::new(0),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get one definition, reloading first if the snapshot is stale.
    pub async fn get_definition(&self, strategy: &str) -> Result<ScreenerDefinition> {
        let snapshot = self.current().await?;
        snapshot
            .lookup(strategy, &self.aliases)
            .cloned()
            .ok_or_else(|| ScreenerError::UnknownScreener(strategy.to_string()))
    }

    /// List all definitions, reloading first if the snapshot is stale.
    pub async fn list_definitions(&self) -> Result<Vec<ScreenerDefinition>> {
        Ok(self.current().await?.definitions())
    }

    /// Reload unconditionally, returning the number of loaded definitions.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn force_refresh(&self) -> Result<usize> {
        let _guard = self.reload_lock.lock().await;
        let snapshot = self.load().await?;
        Ok(snapshot.len())
    }

    /// Current snapshot without triggering a reload.
    pub fn snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Report cache freshness without triggering a reload.
    pub fn status(&self) -> ConfigStatus {
        let snapshot = self.snapshot();
        ConfigStatus {
            loaded_count: snapshot.as_ref().map_or(0, |s| s.len()),
            age_secs: snapshot.as_ref().map(|s| s.age().as_secs()),
            ttl_secs: self.ttl.as_secs(),
            is_stale: snapshot.as_ref().map_or(true, |s| s.age() >= self.ttl),
            last_loaded_at: snapshot.as_ref().map(|s| s.loaded_at_wall),
            reload_count: self.reload_count.load(Ordering::Relaxed),
            warnings: snapshot.map(|s| s.warnings.clone()).unwrap_or_default(),
        }
    }

    fn fresh_snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        self.snapshot().filter(|s| s.age() < self.ttl)
    }

    async fn current(&self) -> Result<Arc<ConfigSnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let _guard = self.reload_lock.lock().await;

        // Another reader may have reloaded while we waited.
        if let Some(snapshot) = self.fresh_snapshot() {
            debug!("Config reloaded by a concurrent reader");
            return Ok(snapshot);
        }

        match self.load().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match self.snapshot() {
                Some(stale) => {
                    warn!(
                        error = %e,
                        age_secs = stale.age().as_secs(),
                        "Config reload failed, serving stale snapshot"
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Load and swap in a new snapshot. Callers hold `reload_lock`.
    async fn load(&self) -> Result<Arc<ConfigSnapshot>> {
        let rows = self.store.fetch_enabled(&self.site.host).await.map_err(|e| {
            warn!(store = self.store.name(), error = %e, "Controls read failed");
            e
        })?;

        let row_count = rows.len();
        let validated = validate_rows(rows, &self.site, &self.aliases);
        for warning in &validated.warnings {
            warn!(warning = %warning, "Dropped controls row");
        }

        let snapshot = Arc::new(ConfigSnapshot {
            entries: validated.entries,
            warnings: validated.warnings,
            loaded_at: Instant::now(),
            loaded_at_wall: Utc::now(),
        });

        match self.snapshot.write() {
            Ok(mut guard) => *guard = Some(snapshot.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(snapshot.clone()),
        }
        self.reload_count.fetch_add(1, Ordering::Relaxed);

        info!(
            rows = row_count,
            loaded = snapshot.len(),
            dropped = snapshot.warnings.len(),
            "Screener config loaded"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ControlRow;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct StaticStore {
        rows: std::sync::Mutex<Vec<ControlRow>>,
        fail: AtomicBool,
        calls: AtomicU64,
    }

    impl StaticStore {
        fn new(rows: Vec<ControlRow>) -> Self {
            Self {
                rows: std::sync::Mutex::new(rows),
                fail: AtomicBool::new(false),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ControlsStore for StaticStore {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_enabled(&self, _target_site: &str) -> Result<Vec<ControlRow>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ScreenerError::DataSource("store offline".into()));
            }
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn row(strategy: &str, id: &str) -> ControlRow {
        ControlRow {
            strategy: Some(strategy.into()),
            url: Some(format!("https://www.tradingview.com/screener/{id}/")),
            on_off: Some("ON".into()),
            ..Default::default()
        }
    }

    fn cache(store: Arc<StaticStore>) -> ConfigCache {
        ConfigCache::new(store, &zero_common::ScreenerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_within_ttl_hit_store_once() {
        let store = Arc::new(StaticStore::new(vec![row("swing", "a")]));
        let cache = cache(store.clone());

        let first = cache.get_definition("swing").await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.get_definition("swing").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_reloads_once() {
        let store = Arc::new(StaticStore::new(vec![row("swing", "a")]));
        let cache = cache(store.clone());

        cache.list_definitions().await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        cache.list_definitions().await.unwrap();
        cache.list_definitions().await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lookup_by_alias_and_original_name() {
        let store = Arc::new(StaticStore::new(vec![
            row("BTST_STBT", "a"),
            row("Momentum Breakout", "b"),
        ]));
        let cache = cache(store);

        assert_eq!(cache.get_definition("btst").await.unwrap().original_name, "BTST_STBT");
        assert_eq!(cache.get_definition("BTST_STBT").await.unwrap().strategy, "btst");
        assert_eq!(
            cache.get_definition("momentum breakout").await.unwrap().strategy,
            "momentum_breakout"
        );
    }

    #[tokio::test]
    async fn test_unknown_strategy() {
        let cache = cache(Arc::new(StaticStore::new(vec![row("swing", "a")])));
        let err = cache.get_definition("nonexistent_strategy").await.unwrap_err();
        assert_eq!(err.kind(), "UnknownScreenerError");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(StaticStore::new(vec![row("swing", "a")]));
        let cache = cache(store.clone());
        assert_eq!(cache.force_refresh().await.unwrap(), 1);

        store.fail.store(true, Ordering::SeqCst);
        let err = cache.force_refresh().await.unwrap_err();
        assert_eq!(err.kind(), "DataSourceError");
        assert!(cache.get_definition("swing").await.is_ok());
        assert_eq!(cache.status().loaded_count, 1);
    }

    #[tokio::test]
    async fn test_failed_first_load_is_data_source_error() {
        let store = Arc::new(StaticStore::new(vec![]));
        store.fail.store(true, Ordering::SeqCst);
        let cache = cache(store);

        let err = cache.list_definitions().await.unwrap_err();
        assert_eq!(err.kind(), "DataSourceError");
        assert!(cache.status().is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_served_when_store_down() {
        let store = Arc::new(StaticStore::new(vec![row("swing", "a")]));
        let cache = cache(store.clone());
        cache.list_definitions().await.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(600)).await;

        assert!(cache.get_definition("swing").await.is_ok());
        assert!(cache.status().is_stale);
    }

    #[tokio::test]
    async fn test_empty_table_is_valid() {
        let cache = cache(Arc::new(StaticStore::new(vec![])));
        assert_eq!(cache.force_refresh().await.unwrap(), 0);
        assert!(cache.list_definitions().await.unwrap().is_empty());
        assert!(!cache.status().is_stale);
    }

    #[tokio::test]
    async fn test_status_reports_warnings() {
        let mut bad = row("bad", "x");
        bad.url = Some("https://example.com/screener/x/".into());
        let cache = cache(Arc::new(StaticStore::new(vec![row("swing", "a"), bad])));
        cache.force_refresh().await.unwrap();

        let status = cache.status();
        assert_eq!(status.loaded_count, 1);
        assert_eq!(status.warnings.len(), 1);
        assert_eq!(status.ttl_secs, 300);
        assert_eq!(status.reload_count, 1);
    }
}
