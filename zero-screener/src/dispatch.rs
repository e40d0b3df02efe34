//! The seven screener operations.
//!
//! `RequestDispatcher` is the only surface the front-end talks to. Every
//! operation returns a typed payload or a classified `ScreenerError`;
//! `dispatch` wraps them behind one tagged `Operation` entry point and
//! records per-operation metrics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use zero_common::logging::{Metrics, MetricsSummary};

use crate::browser::{SessionHealth, SessionManager, SessionState};
use crate::config::{ConfigCache, ConfigStatus, ScreenerDefinition};
use crate::error::{Result, ScreenerError};
use crate::fetch::{FetchSettings, IndexInfo, IndexRegistry, ScreenerFetcher, ScreenerResult};

// ============================================================================
// Requests
// ============================================================================

/// Arguments of `fetch_screener_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(alias = "screener_type")]
    pub strategy: String,
    #[serde(default)]
    pub index_filter: Option<String>,
}

/// One operation request, tagged by tool name.
///
/// ```json
/// {"tool": "fetch_screener_data", "strategy": "swing", "index_filter": "NIFTY50"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Operation {
    ListScreenerTypes,
    ListScreenerIndices,
    FetchScreenerData(FetchRequest),
    GetScreenerSessionHealth,
    RefreshScreenerSession,
    RefreshScreenerConfig,
    GetScreenerConfig,
}

impl Operation {
    pub const NAMES: [&'static str; 7] = [
        "list_screener_types",
        "list_screener_indices",
        "fetch_screener_data",
        "get_screener_session_health",
        "refresh_screener_session",
        "refresh_screener_config",
        "get_screener_config",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListScreenerTypes => Self::NAMES[0],
            Operation::ListScreenerIndices => Self::NAMES[1],
            Operation::FetchScreenerData(_) => Self::NAMES[2],
            Operation::GetScreenerSessionHealth => Self::NAMES[3],
            Operation::RefreshScreenerSession => Self::NAMES[4],
            Operation::RefreshScreenerConfig => Self::NAMES[5],
            Operation::GetScreenerConfig => Self::NAMES[6],
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Entry of `list_screener_types`.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenerTypeInfo {
    pub strategy: String,
    pub name: String,
    pub description: String,
    pub holding_period: String,
    pub trade_type: String,
    pub instrument_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_positions: Option<i64>,
    pub enabled: bool,
}

impl From<ScreenerDefinition> for ScreenerTypeInfo {
    fn from(def: ScreenerDefinition) -> Self {
        Self {
            strategy: def.strategy,
            name: def.original_name,
            description: def.description,
            holding_period: def.holding_period,
            trade_type: def.trade_type,
            instrument_type: def.instrument_type,
            max_positions: def.max_positions,
            enabled: def.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRefresh {
    pub state: SessionState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigRefresh {
    pub loaded_count: usize,
    pub screeners: Vec<String>,
}

/// Payload of `get_screener_config`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub entries: Vec<ScreenerDefinition>,
    #[serde(flatten)]
    pub status: ConfigStatus,
}

/// Service status for `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub session: SessionHealth,
    pub config: ConfigStatus,
    pub indices: usize,
    pub metrics: BTreeMap<&'static str, MetricsSummary>,
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct RequestDispatcher {
    config: Arc<ConfigCache>,
    session: SessionManager,
    indices: Arc<IndexRegistry>,
    fetcher: Arc<ScreenerFetcher>,
    metrics: BTreeMap<&'static str, Metrics>,
    started_at: Instant,
}

impl RequestDispatcher {
    pub fn new(
        config: Arc<ConfigCache>,
        session: SessionManager,
        indices: Arc<IndexRegistry>,
        settings: FetchSettings,
    ) -> Self {
        let fetcher = Arc::new(ScreenerFetcher::new(
            config.clone(),
            session.clone(),
            indices.clone(),
            settings,
        ));

        Self {
            config,
            session,
            indices,
            fetcher,
            metrics: Operation::NAMES
                .iter()
                .map(|name| (*name, Metrics::new()))
                .collect(),
            started_at: Instant::now(),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn list_screener_types(&self) -> Result<Vec<ScreenerTypeInfo>> {
        let definitions = self.config.list_definitions().await?;
        Ok(definitions.into_iter().map(ScreenerTypeInfo::from).collect())
    }

    pub fn list_screener_indices(&self) -> Vec<IndexInfo> {
        self.indices.list()
    }

    /// Run one fetch on its own task; a caller that goes away does not
    /// cancel the navigation in flight.
    pub async fn fetch_screener_data(&self, request: FetchRequest) -> Result<ScreenerResult> {
        let strategy = request.strategy.trim().to_string();
        if strategy.is_empty() {
            return Err(ScreenerError::InvalidRequest("strategy is required".into()));
        }
        let index_filter = request
            .index_filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        let fetcher = self.fetcher.clone();
        tokio::spawn(async move { fetcher.fetch(&strategy, index_filter.as_deref()).await })
            .await
            .map_err(|e| ScreenerError::Internal(format!("fetch task failed: {e}")))?
    }

    pub async fn get_screener_session_health(&self) -> SessionHealth {
        self.session.health_check().await
    }

    /// Runs detached so a dropped request cannot strand the session
    /// half-rebuilt.
    pub async fn refresh_screener_session(&self) -> Result<SessionRefresh> {
        let session = self.session.clone();
        let state = tokio::spawn(async move { session.force_refresh().await })
            .await
            .map_err(|e| ScreenerError::Internal(format!("session refresh task failed: {e}")))??;
        Ok(SessionRefresh { state })
    }

    pub async fn refresh_screener_config(&self) -> Result<ConfigRefresh> {
        let loaded_count = self.config.force_refresh().await?;
        let screeners = self
            .config
            .snapshot()
            .map(|s| s.definitions().into_iter().map(|d| d.strategy).collect())
            .unwrap_or_default();
        info!(loaded_count, "Screener config refreshed");
        Ok(ConfigRefresh {
            loaded_count,
            screeners,
        })
    }

    pub async fn get_screener_config(&self) -> Result<ConfigView> {
        let entries = self.config.list_definitions().await?;
        Ok(ConfigView {
            entries,
            status: self.config.status(),
        })
    }

    /// Run `op`, recording its duration and outcome.
    pub async fn dispatch(&self, op: Operation) -> Result<Value> {
        let name = op.name();
        let started = Instant::now();
        debug!(operation = name, "Dispatching");

        let result = match op {
            Operation::ListScreenerTypes => to_value(self.list_screener_types().await),
            Operation::ListScreenerIndices => to_value(Ok(self.list_screener_indices())),
            Operation::FetchScreenerData(request) => {
                to_value(self.fetch_screener_data(request).await)
            }
            Operation::GetScreenerSessionHealth => {
                to_value(Ok(self.get_screener_session_health().await))
            }
            Operation::RefreshScreenerSession => to_value(self.refresh_screener_session().await),
            Operation::RefreshScreenerConfig => to_value(self.refresh_screener_config().await),
            Operation::GetScreenerConfig => to_value(self.get_screener_config().await),
        };

        if let Some(metrics) = self.metrics.get(name) {
            metrics
                .record_request(started.elapsed().as_millis() as u64, result.is_ok())
                .await;
        }
        result
    }

    /// Like `dispatch`, but folds errors into the `{"error": {kind, message}}` payload.
    pub async fn respond(&self, op: Operation) -> Value {
        match self.dispatch(op).await {
            Ok(value) => value,
            Err(e) => e.to_json(),
        }
    }

    pub async fn status(&self) -> ServiceStatus {
        let mut metrics = BTreeMap::new();
        for (name, m) in &self.metrics {
            metrics.insert(*name, m.summary().await);
        }

        ServiceStatus {
            service: "zero-screener",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            session: self.session.health_check().await,
            config: self.config.status(),
            indices: self.indices.list().len(),
            metrics,
        }
    }
}

fn to_value<T: Serialize>(result: Result<T>) -> Result<Value> {
    let payload = result?;
    serde_json::to_value(payload)
        .map_err(|e| ScreenerError::Internal(format!("failed to encode response: {e}")))
}
