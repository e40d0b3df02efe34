//! Screener fetch pipeline: export download, parsing, index filtering and
//! the retrying fetcher.

mod download;
mod fetcher;
mod indices;
mod parse;

pub use download::{wait_for_csv, DownloadedFile};
pub use fetcher::{FetchMetadata, FetchSettings, ScreenerFetcher, ScreenerResult};
pub use indices::{normalize_symbol, IndexFilter, IndexInfo, IndexRegistry};
pub use parse::{
    from_scrape, normalize, parse_csv, row_symbol, NormalizedTable, ParseOutcome, ResultSource,
};
