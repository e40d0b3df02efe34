//! Screener definition types and row validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Columns every controls row must carry.
pub const REQUIRED_COLUMNS: &[&str] = &["strategy", "url", "on_off"];

/// Columns requested from the controls table.
pub const SELECT_COLUMNS: &str =
    "strategy,url,description,holding_period,tradetype,on_off,instrument_type,max_positions";

/// A named, remotely-configured screener.
///
/// Immutable once loaded; a reload produces new values instead of
/// mutating existing ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenerDefinition {
    /// Normalized lookup key
    pub strategy: String,
    /// Raw `strategy` column value
    pub original_name: String,
    pub url: String,
    pub description: String,
    pub holding_period: String,
    pub trade_type: String,
    pub instrument_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_positions: Option<i64>,
    pub enabled: bool,
}

/// One raw row of the controls table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRow {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub holding_period: Option<String>,
    #[serde(default, alias = "trade_type")]
    pub tradetype: Option<String>,
    #[serde(default)]
    pub on_off: Option<String>,
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(default)]
    pub max_positions: Option<serde_json::Value>,
}

/// Where screener URLs are allowed to point.
#[derive(Debug, Clone)]
pub struct TargetSite {
    /// Host suffix, e.g. `tradingview.com`
    pub host: String,
    /// Path prefix, e.g. `/screener/`
    pub screener_path: String,
}

impl TargetSite {
    pub fn new(host: impl Into<String>, screener_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            screener_path: screener_path.into(),
        }
    }

    /// Check that `raw` is an http(s) URL on the target host under the screener path.
    pub fn check_url(&self, raw: &str) -> Result<(), String> {
        let parsed = url::Url::parse(raw.trim()).map_err(|e| format!("malformed url: {e}"))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("unsupported scheme '{}'", parsed.scheme()));
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let target = self.host.to_ascii_lowercase();
        if host != target && !host.ends_with(&format!(".{target}")) {
            return Err(format!("host '{host}' is not on {target}"));
        }

        if !parsed.path().starts_with(&self.screener_path) {
            return Err(format!(
                "path '{}' is not under {}",
                parsed.path(),
                self.screener_path
            ));
        }

        Ok(())
    }
}

/// Normalize a raw strategy name into its lookup key.
///
/// The alias table wins; otherwise the name is lowercased with spaces and
/// dashes folded to underscores.
pub fn normalize_strategy(raw: &str, aliases: &HashMap<String, String>) -> String {
    let trimmed = raw.trim();
    if let Some(alias) = aliases.get(trimmed) {
        return alias.clone();
    }
    trimmed.to_lowercase().replace([' ', '-'], "_")
}

/// Result of validating a batch of controls rows.
#[derive(Debug, Default)]
pub struct ValidatedRows {
    pub entries: BTreeMap<String, ScreenerDefinition>,
    pub warnings: Vec<String>,
}

/// Validate raw rows into definitions keyed by normalized strategy.
///
/// Invalid rows are dropped with a warning; the first row wins on a
/// duplicate key.
pub fn validate_rows(
    rows: Vec<ControlRow>,
    site: &TargetSite,
    aliases: &HashMap<String, String>,
) -> ValidatedRows {
    let mut out = ValidatedRows::default();

    for (idx, row) in rows.into_iter().enumerate() {
        match to_definition(row, site, aliases) {
            Ok(def) => {
                if let Some(existing) = out.entries.get(&def.strategy) {
                    out.warnings.push(format!(
                        "row {idx}: duplicate strategy '{}' (already defined by '{}')",
                        def.strategy, existing.original_name
                    ));
                    continue;
                }
                out.entries.insert(def.strategy.clone(), def);
            }
            Err(reason) => out.warnings.push(format!("row {idx}: {reason}")),
        }
    }

    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn to_definition(
    row: ControlRow,
    site: &TargetSite,
    aliases: &HashMap<String, String>,
) -> Result<ScreenerDefinition, String> {
    let original_name = non_empty(row.strategy).ok_or("missing strategy")?;
    let url = non_empty(row.url).ok_or_else(|| format!("'{original_name}': missing url"))?;
    let on_off = non_empty(row.on_off).ok_or_else(|| format!("'{original_name}': missing on_off"))?;

    if !on_off.eq_ignore_ascii_case("ON") {
        return Err(format!("'{original_name}': disabled (on_off={on_off})"));
    }

    site.check_url(&url)
        .map_err(|reason| format!("'{original_name}': {reason}"))?;

    let max_positions = match row.max_positions {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    Ok(ScreenerDefinition {
        strategy: normalize_strategy(&original_name, aliases),
        original_name,
        url,
        description: non_empty(row.description).unwrap_or_default(),
        holding_period: non_empty(row.holding_period).unwrap_or_else(|| "unknown".into()),
        trade_type: non_empty(row.tradetype).unwrap_or_else(|| "LONG".into()),
        instrument_type: non_empty(row.instrument_type).unwrap_or_else(|| "EQ".into()),
        max_positions,
        enabled: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> HashMap<String, String> {
        [("BTST_STBT", "btst"), ("position_montly", "position")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn site() -> TargetSite {
        TargetSite::new("tradingview.com", "/screener/")
    }

    fn row(strategy: &str, url: &str, on_off: &str) -> ControlRow {
        ControlRow {
            strategy: Some(strategy.into()),
            url: Some(url.into()),
            on_off: Some(on_off.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_strategy() {
        let a = aliases();
        assert_eq!(normalize_strategy("BTST_STBT", &a), "btst");
        assert_eq!(normalize_strategy("position_montly", &a), "position");
        assert_eq!(normalize_strategy("Momentum Breakout-With Volume", &a), "momentum_breakout_with_volume");
        assert_eq!(normalize_strategy("  swing ", &a), "swing");
    }

    #[test]
    fn test_check_url() {
        let s = site();
        assert!(s.check_url("https://www.tradingview.com/screener/abc123/").is_ok());
        assert!(s.check_url("https://in.tradingview.com/screener/abc123/").is_ok());
        assert!(s.check_url("https://tradingview.com/screener/x").is_ok());
        assert!(s.check_url("https://evil-tradingview.com/screener/x").is_err());
        assert!(s.check_url("https://www.tradingview.com/chart/x").is_err());
        assert!(s.check_url("ftp://www.tradingview.com/screener/x").is_err());
        assert!(s.check_url("not a url").is_err());
    }

    #[test]
    fn test_validate_rows_defaults() {
        let rows = vec![row("Swing", "https://www.tradingview.com/screener/mToYMbsV/", "ON")];
        let out = validate_rows(rows, &site(), &aliases());
        let def = out.entries.get("swing").unwrap();
        assert_eq!(def.original_name, "Swing");
        assert_eq!(def.description, "");
        assert_eq!(def.holding_period, "unknown");
        assert_eq!(def.trade_type, "LONG");
        assert_eq!(def.instrument_type, "EQ");
        assert!(def.enabled);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_validate_rows_drops_invalid() {
        let rows = vec![
            row("good", "https://www.tradingview.com/screener/a/", "on"),
            row("off", "https://www.tradingview.com/screener/b/", "OFF"),
            row("elsewhere", "https://example.com/screener/c/", "ON"),
            ControlRow {
                strategy: Some("no_url".into()),
                on_off: Some("ON".into()),
                ..Default::default()
            },
            ControlRow::default(),
        ];
        let out = validate_rows(rows, &site(), &aliases());
        assert_eq!(out.entries.len(), 1);
        assert!(out.entries.contains_key("good"));
        assert_eq!(out.warnings.len(), 4);
    }

    #[test]
    fn test_validate_rows_duplicate_first_wins() {
        let rows = vec![
            row("BTST_STBT", "https://www.tradingview.com/screener/first/", "ON"),
            row("btst", "https://www.tradingview.com/screener/second/", "ON"),
        ];
        let out = validate_rows(rows, &site(), &aliases());
        assert_eq!(out.entries.len(), 1);
        assert!(out.entries["btst"].url.contains("first"));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_max_positions_parsing() {
        let mut r = row("swing", "https://www.tradingview.com/screener/a/", "ON");
        r.max_positions = Some(serde_json::json!("5"));
        let out = validate_rows(vec![r], &site(), &aliases());
        assert_eq!(out.entries["swing"].max_positions, Some(5));
    }
}
