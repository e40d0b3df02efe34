//! Turning an export file or a scraped grid into result rows.
//!
//! Both paths produce a `ParseOutcome`; `normalize` is the single place
//! that names columns, drops blank rows and applies the index filter, so
//! the two paths agree on row identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::indices::{normalize_symbol, IndexFilter};
use crate::browser::ScrapedTable;
use crate::error::{Result, ScreenerError};

/// Column names that carry the ticker, in preference order.
const SYMBOL_COLUMNS: &[&str] = &["Symbol", "Ticker"];

const DELIMITERS: &[u8] = &[b',', b';', b'\t'];

/// Where the rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Csv,
    Scrape,
}

/// Raw table from either acquisition path.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Csv {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Scraped {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        degraded: bool,
    },
}

/// Rows keyed by column name, plus provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
    pub source: ResultSource,
    pub degraded: bool,
}

/// Pick the delimiter that occurs most often in the header line.
fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    DELIMITERS
        .iter()
        .copied()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .fold((b',', 0), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0
}

/// Parse an exported CSV.
///
/// An empty file, one without a header row, or one with no non-blank data
/// row is an `ExportFailure`, so the caller falls back to scraping.
pub fn parse_csv(bytes: &[u8]) -> Result<ParseOutcome> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let content = String::from_utf8_lossy(bytes);

    if content.trim().is_empty() {
        return Err(ScreenerError::ExportFailure("export file is empty".into()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&content))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ScreenerError::ExportFailure(format!("unreadable CSV header: {e}")))?
        .iter()
        .map(String::from)
        .collect();

    if columns.iter().all(|c| c.is_empty()) {
        return Err(ScreenerError::ExportFailure("CSV has no header row".into()));
    }

    let rows = reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(String::from).collect())
                .map_err(|e| ScreenerError::ExportFailure(format!("malformed CSV row: {e}")))
        })
        .collect::<Result<Vec<Vec<String>>>>()?;

    if !rows.iter().any(|r| r.iter().any(|c| !c.is_empty())) {
        return Err(ScreenerError::ExportFailure("export has no data rows".into()));
    }

    Ok(ParseOutcome::Csv { columns, rows })
}

/// Wrap a scraped grid; a grid with neither headers nor rows is an `ExportFailure`.
pub fn from_scrape(table: ScrapedTable) -> Result<ParseOutcome> {
    if table.headers.iter().all(|h| h.is_empty()) && table.rows.is_empty() {
        return Err(ScreenerError::ExportFailure(
            "scrape found no grid on the page".into(),
        ));
    }
    Ok(ParseOutcome::Scraped {
        columns: table.headers,
        rows: table.rows,
        degraded: true,
    })
}

/// Give every column a unique, non-empty name, widening to `width`.
fn name_columns(raw: Vec<String>, width: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(width.max(raw.len()));
    for idx in 0..width.max(raw.len()) {
        let base = raw
            .get(idx)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("column_{}", idx + 1));

        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{base} ({n})");
            n += 1;
        }
        names.push(name);
    }
    names
}

fn symbol_column(columns: &[String]) -> Option<usize> {
    SYMBOL_COLUMNS
        .iter()
        .find_map(|want| columns.iter().position(|c| c.eq_ignore_ascii_case(want)))
        .or(if columns.is_empty() { None } else { Some(0) })
}

/// Extract the canonical symbol of a normalized row.
pub fn row_symbol(columns: &[String], row: &BTreeMap<String, String>) -> Option<String> {
    let idx = symbol_column(columns)?;
    row.get(&columns[idx])
        .map(|v| normalize_symbol(v))
        .filter(|s| !s.is_empty())
}

/// Name columns, drop blank rows, and apply the index filter.
pub fn normalize(outcome: ParseOutcome, filter: Option<&IndexFilter>) -> NormalizedTable {
    let (raw_columns, raw_rows, source, degraded) = match outcome {
        ParseOutcome::Csv { columns, rows } => (columns, rows, ResultSource::Csv, false),
        ParseOutcome::Scraped {
            columns,
            rows,
            degraded,
        } => (columns, rows, ResultSource::Scrape, degraded),
    };

    let width = raw_rows.iter().map(Vec::len).max().unwrap_or(0);
    let columns = name_columns(raw_columns, width);
    let symbol_idx = symbol_column(&columns);

    let rows = raw_rows
        .into_iter()
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .filter(|cells| match (filter, symbol_idx) {
            (Some(filter), Some(idx)) => cells
                .get(idx)
                .map(|s| filter.contains(s))
                .unwrap_or(false),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .map(|cells| {
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = cells.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
                    (name.clone(), value)
                })
                .collect()
        })
        .collect();

    NormalizedTable {
        columns,
        rows,
        source,
        degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::indices::IndexRegistry;

    const EXPORT: &str = "Symbol,Description,Price,Change %\n\
        NSE:HDFCBANK,HDFC Bank Ltd,1650.2,1.2\n\
        NSE:TCS,Tata Consultancy Services,3900,0.4\n\
        NSE:SBIN,State Bank of India,812.5,-0.3\n";

    #[test]
    fn test_parse_csv_basic() {
        let ParseOutcome::Csv { columns, rows } = parse_csv(EXPORT.as_bytes()).unwrap() else {
            panic!("expected csv outcome");
        };
        assert_eq!(columns, vec!["Symbol", "Description", "Price", "Change %"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "NSE:TCS");
    }

    #[test]
    fn test_parse_csv_semicolon_and_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"Ticker;Close\nINFY;1500,5\n");
        let ParseOutcome::Csv { columns, rows } = parse_csv(&bytes).unwrap() else {
            panic!("expected csv outcome");
        };
        assert_eq!(columns, vec!["Ticker", "Close"]);
        assert_eq!(rows[0], vec!["INFY", "1500,5"]);
    }

    #[test]
    fn test_parse_csv_without_data_rows_is_failure() {
        let err = parse_csv(b"Symbol,Price\n").unwrap_err();
        assert_eq!(err.kind(), "ExportFailureError");
        assert!(err.to_string().contains("no data rows"));
        assert_eq!(parse_csv(b"Symbol,Price\n,\n").unwrap_err().kind(), "ExportFailureError");
    }

    #[test]
    fn test_parse_csv_empty_is_failure() {
        assert_eq!(parse_csv(b"").unwrap_err().kind(), "ExportFailureError");
        assert_eq!(parse_csv(b"  \n\n").unwrap_err().kind(), "ExportFailureError");
    }

    #[test]
    fn test_normalize_keeps_values_raw() {
        let table = normalize(parse_csv(EXPORT.as_bytes()).unwrap(), None);
        assert_eq!(table.source, ResultSource::Csv);
        assert!(!table.degraded);
        assert_eq!(table.rows[0]["Price"], "1650.2");
        assert_eq!(table.rows[2]["Change %"], "-0.3");
    }

    #[test]
    fn test_normalize_applies_index_filter() {
        let filter = IndexRegistry::builtin().resolve("NIFTYBANK").unwrap();
        let table = normalize(parse_csv(EXPORT.as_bytes()).unwrap(), Some(&filter));
        let symbols: Vec<_> = table
            .rows
            .iter()
            .filter_map(|r| row_symbol(&table.columns, r))
            .collect();
        assert_eq!(symbols, vec!["HDFCBANK", "SBIN"]);
    }

    #[test]
    fn test_scrape_fills_missing_cells_and_headers() {
        let outcome = from_scrape(ScrapedTable {
            headers: vec!["Symbol".into(), "".into()],
            rows: vec![
                vec!["HDFCBANK".into(), "1650.2".into(), "1.2".into()],
                vec!["TCS".into()],
                vec!["".into(), " ".into()],
            ],
        })
        .unwrap();
        let table = normalize(outcome, None);

        assert_eq!(table.source, ResultSource::Scrape);
        assert!(table.degraded);
        assert_eq!(table.columns, vec!["Symbol", "column_2", "column_3"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1]["column_2"], "");
    }

    #[test]
    fn test_scrape_without_grid_is_failure() {
        let err = from_scrape(ScrapedTable::default()).unwrap_err();
        assert_eq!(err.kind(), "ExportFailureError");
    }

    #[test]
    fn test_duplicate_column_names() {
        let names = name_columns(vec!["Price".into(), "Price".into(), "".into()], 3);
        assert_eq!(names, vec!["Price", "Price (2)", "column_3"]);
    }

    #[test]
    fn test_symbol_column_falls_back_to_first() {
        let columns = vec!["Name".to_string(), "Close".to_string()];
        assert_eq!(symbol_column(&columns), Some(0));
        let columns = vec!["Name".to_string(), "ticker".to_string()];
        assert_eq!(symbol_column(&columns), Some(1));
    }
}
