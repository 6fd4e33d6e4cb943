//! Persistent flag table storage.
//!
//! RULE: Only store/ touches the persisted table.
//! Callers go through [`FlagStore`]; every method takes the store's
//! exclusive lock for its whole critical section and releases it on drop,
//! including on error paths. No file handle or connection escapes.
//!
//! Rows are keyed by `(id, run_date)`. Widening joins on that key, and
//! appending skips keys already present, so re-running a date is a no-op.
//! A retry may still fill cells a previous run left empty; stored values
//! are never overwritten.

mod csv_file;
mod lock;
mod sqlite;

pub use csv_file::CsvFlagStore;
pub use sqlite::{SqliteFlagStore, DEFAULT_TABLE as SQLITE_DEFAULT_TABLE};

use crate::{
    batch::FlagBatch,
    error::{FailureKind, FlagResult},
    types::CustomerId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ID_COLUMN: &str = "id";
pub const RUN_DATE_COLUMN: &str = "run_date";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub id:       CustomerId,
    pub run_date: NaiveDate,
}

impl RowKey {
    pub fn new(id: impl Into<CustomerId>, run_date: NaiveDate) -> Self {
        Self { id: id.into(), run_date }
    }
}

/// Column layout of an existing store: the two key columns, then flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    pub flag_columns: Vec<String>,
}

impl StoreSchema {
    pub fn contains(&self, column: &str) -> bool {
        column == ID_COLUMN
            || column == RUN_DATE_COLUMN
            || self.flag_columns.iter().any(|c| c == column)
    }

    pub fn columns(&self) -> Vec<String> {
        let mut all = vec![ID_COLUMN.to_string(), RUN_DATE_COLUMN.to_string()];
        all.extend(self.flag_columns.iter().cloned());
        all
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key:   RowKey,
    pub cells: Vec<Option<bool>>,
}

/// A full in-memory copy of the persisted table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredTable {
    pub flag_columns: Vec<String>,
    pub rows:         Vec<StoredRow>,
}

impl StoredTable {
    pub fn schema(&self) -> StoreSchema {
        StoreSchema { flag_columns: self.flag_columns.clone() }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// `None` if the key or column is unknown; `Some(None)` for an empty cell.
    pub fn value(&self, key: &RowKey, column: &str) -> Option<Option<bool>> {
        let index = self.flag_columns.iter().position(|c| c == column)?;
        self.rows.iter().find(|r| &r.key == key).map(|r| r.cells[index])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendSummary {
    pub appended: usize,
    pub skipped:  usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSummary {
    /// The store did not exist and was created from this batch.
    pub created:         bool,
    pub added_columns:   Vec<String>,
    pub already_present: Vec<String>,
    pub appended_rows:   usize,
    pub skipped_rows:    usize,
    /// Empty cells in existing columns filled from this batch.
    pub filled_cells:    usize,
}

/// What happened to the store. Persist failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistOutcome {
    Applied(PersistSummary),
    Failed { kind: FailureKind, reason: String },
}

/// The shared, append-only flag table.
pub trait FlagStore: Send + Sync {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;

    /// `None` if the store does not exist yet.
    fn read_schema(&self) -> FlagResult<Option<StoreSchema>>;

    fn read_table(&self) -> FlagResult<Option<StoredTable>>;

    /// Add `column` and fill it for matching keys; other rows get no value.
    /// Returns `false` without touching anything if the column exists.
    fn widen(&self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<bool>;

    /// Insert rows whose key is not already stored. Every batch column
    /// must already exist in the store.
    fn append_rows(&self, batch: &FlagBatch) -> FlagResult<AppendSummary>;

    /// The full persist step under a single lock acquisition.
    fn apply_batch(&self, batch: &FlagBatch) -> FlagResult<PersistSummary>;
}

/// A store opened under its exclusive lock. Backends implement this once
/// and share [`apply_locked`].
pub(crate) trait LockedTable {
    fn schema(&self) -> FlagResult<Option<StoreSchema>>;

    fn create(&mut self, batch: &FlagBatch) -> FlagResult<usize>;

    fn add_column(&mut self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<()>;

    /// Set `column` for matching keys whose cell is empty. Returns the
    /// number of cells written.
    fn fill_empty(&mut self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<usize>;

    fn insert_missing(&mut self, batch: &FlagBatch) -> FlagResult<AppendSummary>;
}

pub(crate) fn keyed_values(batch: &FlagBatch, column: &str) -> FlagResult<HashMap<RowKey, bool>> {
    let run_date = batch.run_date();
    Ok(batch
        .column_values(column)?
        .into_iter()
        .map(|(id, flag)| (RowKey::new(id, run_date), flag))
        .collect())
}

pub(crate) fn widen_locked<T: LockedTable + ?Sized>(
    table: &mut T,
    column: &str,
    values: &HashMap<RowKey, bool>,
) -> FlagResult<bool> {
    let exists = table.schema()?.is_some_and(|s| s.contains(column));
    if exists {
        return Ok(false);
    }
    table.add_column(column, values)?;
    Ok(true)
}

/// Create-or-widen-then-append. Caller holds the lock.
pub(crate) fn apply_locked<T: LockedTable + ?Sized>(
    table: &mut T,
    batch: &FlagBatch,
    location: &str,
) -> FlagResult<PersistSummary> {
    let mut summary = PersistSummary::default();

    let Some(schema) = table.schema()? else {
        summary.appended_rows = table.create(batch)?;
        summary.created = true;
        summary.added_columns = batch.columns().to_vec();
        log::info!(
            "Created flag store {location} with columns {:?} ({} rows)",
            batch.columns(),
            summary.appended_rows
        );
        return Ok(summary);
    };

    for column in batch.columns() {
        if schema.contains(column) {
            summary.filled_cells += table.fill_empty(column, &keyed_values(batch, column)?)?;
            summary.already_present.push(column.clone());
            continue;
        }
        table.add_column(column, &keyed_values(batch, column)?)?;
        summary.added_columns.push(column.clone());
    }
    if summary.added_columns.is_empty() {
        log::info!("Columns {:?} already exist in {location}", summary.already_present);
    } else {
        log::info!("Widened {location} with {:?}", summary.added_columns);
    }

    if summary.filled_cells > 0 {
        log::info!("Filled {} empty cells in {location}", summary.filled_cells);
    }

    let appended = table.insert_missing(batch)?;
    summary.appended_rows = appended.appended;
    summary.skipped_rows = appended.skipped;
    if appended.skipped > 0 {
        log::info!(
            "{} rows for {} already stored in {location}",
            appended.skipped,
            batch.run_date()
        );
    }
    Ok(summary)
}
