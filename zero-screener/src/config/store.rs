//! Controls table access.
//!
//! The config cache only needs one read: "all enabled rows whose URL is on
//! the target site". `ControlsStore` is the seam; `SupabaseControlsStore`
//! implements it over the Supabase PostgREST API.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::types::{ControlRow, REQUIRED_COLUMNS, SELECT_COLUMNS};
use crate::error::{Result, ScreenerError};

/// Read access to the external controls table.
#[async_trait]
pub trait ControlsStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &str;

    /// Fetch enabled rows whose URL references `target_site`.
    async fn fetch_enabled(&self, target_site: &str) -> Result<Vec<ControlRow>>;
}

/// Supabase REST client for the controls table.
pub struct SupabaseControlsStore {
    base_url: String,
    anon_key: String,
    table: String,
    client: reqwest::Client,
}

impl SupabaseControlsStore {
    /// Create a store for `table` in the project at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            table: table.into(),
            client,
        }
    }

    /// Create from config; `None` when the Supabase credentials are missing.
    pub fn from_config(config: &zero_common::Config) -> Option<Self> {
        let supabase = &config.secrets.supabase;
        let url = supabase.url.as_deref().filter(|u| !u.is_empty())?;
        let key = supabase.anon_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self::new(url, key, config.screener.controls_table.clone()))
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

#[async_trait]
impl ControlsStore for SupabaseControlsStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn fetch_enabled(&self, target_site: &str) -> Result<Vec<ControlRow>> {
        let url = self.endpoint();
        let url_filter = format!("like.*{target_site}*");

        debug!(url = %url, table = %self.table, "Querying controls table");

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .header("Accept", "application/json")
            .query(&[
                ("select", SELECT_COLUMNS),
                ("on_off", "eq.ON"),
                ("url", url_filter.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScreenerError::DataSource("controls query timed out".into())
                } else if e.is_connect() {
                    ScreenerError::DataSource("connection to controls store failed".into())
                } else {
                    ScreenerError::DataSource(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScreenerError::DataSource(format!("HTTP {status}: {body}")));
        }

        let raw: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ScreenerError::DataSource(format!("Failed to parse response: {e}")))?;

        decode_rows(raw)
    }
}

/// Decode raw JSON rows, rejecting the batch if any row lacks a required column.
///
/// A column that is present but null is a row-level problem handled by
/// validation; a column that is absent means the table shape is wrong.
pub fn decode_rows(raw: Vec<serde_json::Value>) -> Result<Vec<ControlRow>> {
    raw.into_iter()
        .enumerate()
        .map(|(idx, value)| {
            let obj = value.as_object().ok_or_else(|| {
                ScreenerError::DataSource(format!("row {idx} is not an object"))
            })?;

            if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !obj.contains_key(**c)) {
                return Err(ScreenerError::DataSource(format!(
                    "row {idx} is missing required column '{missing}'"
                )));
            }

            serde_json::from_value(value)
                .map_err(|e| ScreenerError::DataSource(format!("row {idx}: {e}")))
        })
        .collect()
}
