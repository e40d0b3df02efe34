//! Screener definitions: controls table access, validation and the TTL cache.

mod cache;
mod store;
mod types;

pub use cache::{ConfigCache, ConfigSnapshot, ConfigStatus};
pub use store::{decode_rows, ControlsStore, SupabaseControlsStore};
pub use types::{
    normalize_strategy, validate_rows, ControlRow, ScreenerDefinition, TargetSite,
    ValidatedRows, REQUIRED_COLUMNS, SELECT_COLUMNS,
};
