//! Index constituent tables used to filter screener rows.
//!
//! Built-in tables cover the common NSE sectoral indices. A JSON file can
//! add indices or replace built-in constituent lists:
//!
//! ```json
//! { "NIFTYBANK": { "name": "Nifty Bank", "symbols": ["HDFCBANK", "..."] } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::{Result, ScreenerError};

const NIFTY50: &[&str] = &[
    "ADANIENT", "ADANIPORTS", "APOLLOHOSP", "ASIANPAINT", "AXISBANK", "BAJAJ-AUTO",
    "BAJFINANCE", "BAJAJFINSV", "BEL", "BPCL", "BHARTIARTL", "BRITANNIA", "CIPLA",
    "COALINDIA", "DRREDDY", "EICHERMOT", "GRASIM", "HCLTECH", "HDFCBANK", "HDFCLIFE",
    "HEROMOTOCO", "HINDALCO", "HINDUNILVR", "ICICIBANK", "ITC", "INDUSINDBK", "INFY",
    "JSWSTEEL", "KOTAKBANK", "LT", "M&M", "MARUTI", "NTPC", "NESTLEIND", "ONGC",
    "POWERGRID", "RELIANCE", "SBILIFE", "SHRIRAMFIN", "SBIN", "SUNPHARMA", "TCS",
    "TATACONSUM", "TATAMOTORS", "TATASTEEL", "TECHM", "TITAN", "TRENT", "ULTRACEMCO",
    "WIPRO",
];

const NIFTYBANK: &[&str] = &[
    "AUBANK", "AXISBANK", "BANKBARODA", "CANBK", "FEDERALBNK", "HDFCBANK", "ICICIBANK",
    "IDFCFIRSTB", "INDUSINDBK", "KOTAKBANK", "PNB", "SBIN",
];

const NIFTYIT: &[&str] = &[
    "COFORGE", "HCLTECH", "INFY", "LTIM", "LTTS", "MPHASIS", "PERSISTENT", "TCS", "TECHM",
    "WIPRO",
];

const NIFTYMETAL: &[&str] = &[
    "ADANIENT", "APLAPOLLO", "HINDALCO", "HINDCOPPER", "HINDZINC", "JINDALSTEL", "JSL",
    "JSWSTEEL", "NATIONALUM", "NMDC", "RATNAMANI", "SAIL", "TATASTEEL", "VEDL", "WELCORP",
];

const NIFTYPHARMA: &[&str] = &[
    "ABBOTINDIA", "AJANTPHARM", "ALKEM", "AUROPHARMA", "BIOCON", "CIPLA", "DIVISLAB",
    "DRREDDY", "GLAND", "GLENMARK", "GRANULES", "IPCALAB", "JBCHEPHARM", "LAURUSLABS",
    "LUPIN", "MANKIND", "NATCOPHARM", "SUNPHARMA", "TORNTPHARM", "ZYDUSLIFE",
];

const NIFTYAUTO: &[&str] = &[
    "ASHOKLEY", "BAJAJ-AUTO", "BALKRISIND", "BHARATFORG", "BOSCHLTD", "EICHERMOT",
    "EXIDEIND", "HEROMOTOCO", "M&M", "MARUTI", "MOTHERSON", "MRF", "SONACOMS", "TATAMOTORS",
    "TVSMOTOR",
];

const NIFTYFMCG: &[&str] = &[
    "BRITANNIA", "COLPAL", "DABUR", "EMAMILTD", "GODREJCP", "HINDUNILVR", "ITC", "MARICO",
    "NESTLEIND", "PGHH", "RADICO", "TATACONSUM", "UBL", "UNITDSPR", "VBL",
];

const NIFTYENERGY: &[&str] = &[
    "ADANIENSOL", "ADANIGREEN", "ADANIPOWER", "BPCL", "COALINDIA", "GAIL", "HINDPETRO",
    "IOC", "JSWENERGY", "NHPC", "NTPC", "ONGC", "POWERGRID", "RELIANCE", "TATAPOWER",
];

const NIFTYPSUBANK: &[&str] = &[
    "BANKBARODA", "BANKINDIA", "CANBK", "CENTRALBK", "INDIANB", "IOB", "MAHABANK", "PNB",
    "PSB", "SBIN", "UCOBANK", "UNIONBANK",
];

const NIFTYREALTY: &[&str] = &[
    "BRIGADE", "DLF", "GODREJPROP", "LODHA", "OBEROIRLTY", "PHOENIXLTD", "PRESTIGE",
    "RAYMOND", "SOBHA", "SUNTECK",
];

const NIFTYMEDIA: &[&str] = &[
    "DISHTV", "HATHWAY", "NAZARA", "NAVNETEDUL", "NETWORK18", "PVRINOX", "SAREGAMA",
    "SUNTV", "TIPSMUSIC", "ZEEL",
];

/// (code, name, description, constituents)
const BUILTIN: &[(&str, &str, &str, &[&str])] = &[
    ("NIFTY50", "Nifty 50", "Top 50 large-cap companies", NIFTY50),
    ("NIFTYBANK", "Nifty Bank", "Most liquid large-cap banking stocks", NIFTYBANK),
    ("NIFTYIT", "Nifty IT", "Information technology companies", NIFTYIT),
    ("NIFTYMETAL", "Nifty Metal", "Metals and mining companies", NIFTYMETAL),
    ("NIFTYPHARMA", "Nifty Pharma", "Pharmaceutical companies", NIFTYPHARMA),
    ("NIFTYAUTO", "Nifty Auto", "Automobile and auto ancillary companies", NIFTYAUTO),
    ("NIFTYFMCG", "Nifty FMCG", "Fast-moving consumer goods companies", NIFTYFMCG),
    ("NIFTYENERGY", "Nifty Energy", "Oil, gas and power companies", NIFTYENERGY),
    ("NIFTYPSUBANK", "Nifty PSU Bank", "Public sector banks", NIFTYPSUBANK),
    ("NIFTYREALTY", "Nifty Realty", "Real estate companies", NIFTYREALTY),
    ("NIFTYMEDIA", "Nifty Media", "Media and entertainment companies", NIFTYMEDIA),
];

const ALIASES: &[(&str, &str)] = &[
    ("NIFTY", "NIFTY50"),
    ("BANKNIFTY", "NIFTYBANK"),
    ("CNXBANK", "NIFTYBANK"),
    ("CNXIT", "NIFTYIT"),
    ("CNXMETAL", "NIFTYMETAL"),
    ("CNXPHARMA", "NIFTYPHARMA"),
    ("CNXAUTO", "NIFTYAUTO"),
    ("CNXFMCG", "NIFTYFMCG"),
    ("CNXENERGY", "NIFTYENERGY"),
    ("CNXPSUBANK", "NIFTYPSUBANK"),
    ("CNXREALTY", "NIFTYREALTY"),
    ("CNXMEDIA", "NIFTYMEDIA"),
];

/// Canonical form of a ticker: exchange prefix stripped, first line only,
/// uppercased, `-` and `&` folded to `_` (the site writes `M&M` as `M_M`).
pub fn normalize_symbol(raw: &str) -> String {
    let first = raw.lines().next().unwrap_or_default().trim();
    let bare = first.rsplit(':').next().unwrap_or(first).trim();
    bare.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
        .replace(['-', '&'], "_")
}

fn canonical_code(raw: &str) -> String {
    raw.trim()
        .to_ascii_uppercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect()
}

/// An index and its constituents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub code: String,
    pub name: String,
    pub description: String,
    /// Canonical symbols, sorted
    pub constituents: Vec<String>,
}

/// Resolved index filter: the union of one or more indices.
#[derive(Debug, Clone)]
pub struct IndexFilter {
    /// Canonical codes joined with `,`
    pub label: String,
    symbols: HashSet<String>,
}

impl IndexFilter {
    /// Whether `symbol` (raw or canonical) belongs to the filter.
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&normalize_symbol(symbol))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct IndexOverride {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    symbols: Vec<String>,
}

/// Index code → constituents.
#[derive(Debug, Clone)]
pub struct IndexRegistry {
    indices: BTreeMap<String, IndexInfo>,
    aliases: HashMap<String, String>,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl IndexRegistry {
    /// Registry with the built-in tables only.
    pub fn builtin() -> Self {
        let indices = BUILTIN
            .iter()
            .map(|(code, name, description, symbols)| {
                let info = IndexInfo {
                    code: code.to_string(),
                    name: name.to_string(),
                    description: description.to_string(),
                    constituents: canonical_set(symbols.iter().copied()),
                };
                (code.to_string(), info)
            })
            .collect();

        let aliases = ALIASES
            .iter()
            .map(|(alias, code)| (alias.to_string(), code.to_string()))
            .collect();

        Self { indices, aliases }
    }

    /// Built-in tables, extended by the JSON file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut registry = Self::builtin();
        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ScreenerError::Internal(format!(
                    "cannot read index constituents {}: {e}",
                    path.display()
                ))
            })?;
            let merged = registry.merge_json(&content)?;
            info!(path = %path.display(), indices = merged, "Loaded index constituents");
        }
        Ok(registry)
    }

    /// Merge index definitions from JSON; returns the number merged.
    pub fn merge_json(&mut self, content: &str) -> Result<usize> {
        let overrides: BTreeMap<String, IndexOverride> = serde_json::from_str(content)
            .map_err(|e| ScreenerError::Internal(format!("invalid index constituents: {e}")))?;

        let count = overrides.len();
        for (raw_code, entry) in overrides {
            let code = canonical_code(&raw_code);
            let existing = self.indices.remove(&code);
            let info = IndexInfo {
                name: entry
                    .name
                    .or_else(|| existing.as_ref().map(|e| e.name.clone()))
                    .unwrap_or_else(|| code.clone()),
                description: entry
                    .description
                    .or_else(|| existing.as_ref().map(|e| e.description.clone()))
                    .unwrap_or_default(),
                constituents: canonical_set(entry.symbols.iter().map(String::as_str)),
                code: code.clone(),
            };
            self.indices.insert(code, info);
        }
        Ok(count)
    }

    /// All indices, sorted by code.
    pub fn list(&self) -> Vec<IndexInfo> {
        self.indices.values().cloned().collect()
    }

    /// Look up an index by code or alias, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&IndexInfo> {
        let code = canonical_code(name);
        self.indices.get(&code).or_else(|| {
            self.aliases
                .get(&code)
                .and_then(|target| self.indices.get(target))
        })
    }

    /// Resolve a filter expression: one index name or a comma-separated list.
    pub fn resolve(&self, filter: &str) -> Result<IndexFilter> {
        let names: Vec<&str> = filter
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();

        if names.is_empty() {
            return Err(ScreenerError::UnknownIndex(filter.to_string()));
        }

        let mut codes = Vec::new();
        let mut symbols = HashSet::new();
        for name in names {
            let info = self
                .get(name)
                .ok_or_else(|| ScreenerError::UnknownIndex(name.to_string()))?;
            if !codes.contains(&info.code) {
                codes.push(info.code.clone());
            }
            symbols.extend(info.constituents.iter().cloned());
        }

        Ok(IndexFilter {
            label: codes.join(","),
            symbols,
        })
    }
}

fn canonical_set<'a>(symbols: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut set: Vec<String> = symbols
        .map(normalize_symbol)
        .filter(|s| !s.is_empty())
        .collect();
    set.sort();
    set.dedup();
    set
}
