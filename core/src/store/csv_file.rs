//! Flat CSV file backend.
//!
//! Layout: header `id,run_date,flag_<p>...`, flags written as `1`/`0`,
//! empty cells where a row has no value for a column. The lock lives on a
//! sidecar `<file>.lock` because rewrites replace the data file via rename.

use super::{
    apply_locked, lock::StoreLock, widen_locked, AppendSummary, FlagStore,
    LockedTable, PersistSummary, RowKey, StoreSchema, StoredRow, StoredTable, ID_COLUMN,
    RUN_DATE_COLUMN,
};
use crate::{
    batch::FlagBatch,
    codec,
    error::{FlagError, FlagResult},
    window::parse_date,
};
use csv::Writer;
use std::{
    collections::{HashMap, HashSet},
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::NamedTempFile;

pub struct CsvFlagStore {
    path:         PathBuf,
    lock_path:    PathBuf,
    lock_timeout: Option<Duration>,
}

impl CsvFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self { lock_path: PathBuf::from(lock_name), path, lock_timeout: None }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the loaded table under the lock, writing back only
    /// if it changed something.
    fn with_table<T>(&self, f: impl FnOnce(&mut CsvTable) -> FlagResult<T>) -> FlagResult<T> {
        let _lock = StoreLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut table = CsvTable { table: load(&self.path)?, dirty: false };
        let value = f(&mut table)?;
        if table.dirty {
            if let Some(stored) = &table.table {
                write_atomic(&self.path, stored)?;
            }
        }
        Ok(value)
    }
}

impl FlagStore for CsvFlagStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read_schema(&self) -> FlagResult<Option<StoreSchema>> {
        self.with_table(|t| t.schema())
    }

    fn read_table(&self) -> FlagResult<Option<StoredTable>> {
        self.with_table(|t| Ok(t.table.clone()))
    }

    fn widen(&self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<bool> {
        self.with_table(|t| {
            if t.table.is_none() {
                return Err(FlagError::StoreCorrupt {
                    location: self.location(),
                    reason:   format!("cannot widen with '{column}': store does not exist"),
                });
            }
            widen_locked(t, column, values)
        })
    }

    fn append_rows(&self, batch: &FlagBatch) -> FlagResult<AppendSummary> {
        self.with_table(|t| t.insert_missing(batch))
    }

    fn apply_batch(&self, batch: &FlagBatch) -> FlagResult<PersistSummary> {
        let location = self.location();
        self.with_table(|t| apply_locked(t, batch, &location))
    }
}

struct CsvTable {
    table: Option<StoredTable>,
    dirty: bool,
}

impl LockedTable for CsvTable {
    fn schema(&self) -> FlagResult<Option<StoreSchema>> {
        Ok(self.table.as_ref().map(StoredTable::schema))
    }

    fn create(&mut self, batch: &FlagBatch) -> FlagResult<usize> {
        let run_date = batch.run_date();
        let rows = batch
            .rows()
            .iter()
            .map(|r| StoredRow { key: RowKey::new(r.id.clone(), run_date), cells: r.flags.clone() })
            .collect::<Vec<_>>();
        let count = rows.len();
        self.table = Some(StoredTable { flag_columns: batch.columns().to_vec(), rows });
        self.dirty = true;
        Ok(count)
    }

    fn add_column(&mut self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<()> {
        let Some(table) = self.table.as_mut() else {
            return Ok(());
        };
        table.flag_columns.push(column.to_string());
        for row in &mut table.rows {
            row.cells.push(values.get(&row.key).copied());
        }
        self.dirty = true;
        Ok(())
    }

    fn fill_empty(&mut self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<usize> {
        let Some(table) = self.table.as_mut() else {
            return Ok(0);
        };
        let Some(index) = table.flag_columns.iter().position(|c| c == column) else {
            return Err(FlagError::MissingColumn { column: column.to_string() });
        };
        let mut filled = 0;
        for row in &mut table.rows {
            if row.cells[index].is_some() {
                continue;
            }
            if let Some(flag) = values.get(&row.key) {
                row.cells[index] = Some(*flag);
                filled += 1;
            }
        }
        if filled > 0 {
            self.dirty = true;
        }
        Ok(filled)
    }

    fn insert_missing(&mut self, batch: &FlagBatch) -> FlagResult<AppendSummary> {
        if self.table.is_none() {
            let appended = self.create(batch)?;
            return Ok(AppendSummary { appended, skipped: 0 });
        }
        let Some(table) = self.table.as_mut() else {
            return Ok(AppendSummary::default());
        };

        // Map each store column to its position in the batch.
        let mut sources = Vec::with_capacity(table.flag_columns.len());
        for column in &table.flag_columns {
            sources.push(batch.column_index(column));
        }
        for column in batch.columns() {
            if !table.flag_columns.contains(column) {
                return Err(FlagError::MissingColumn { column: column.clone() });
            }
        }

        let existing: HashSet<RowKey> = table.rows.iter().map(|r| r.key.clone()).collect();
        let mut summary = AppendSummary::default();
        for row in batch.rows() {
            let key = RowKey::new(row.id.clone(), batch.run_date());
            if existing.contains(&key) {
                summary.skipped += 1;
                continue;
            }
            let cells = sources.iter().map(|s| s.and_then(|i| row.flags[i])).collect();
            table.rows.push(StoredRow { key, cells });
            summary.appended += 1;
        }
        if summary.appended > 0 {
            self.dirty = true;
        }
        Ok(summary)
    }
}

fn load(path: &Path) -> FlagResult<Option<StoredTable>> {
    if !path.exists() || fs::metadata(path)?.len() == 0 {
        return Ok(None);
    }
    let corrupt = |reason: String| FlagError::StoreCorrupt {
        location: path.display().to_string(),
        reason,
    };

    let mut rdr = codec::reader(File::open(path)?);
    let headers = rdr.headers()?.clone();
    if headers.get(0) != Some(ID_COLUMN) || headers.get(1) != Some(RUN_DATE_COLUMN) {
        return Err(corrupt(format!("header must start with {ID_COLUMN},{RUN_DATE_COLUMN}")));
    }
    let flag_columns: Vec<String> = headers.iter().skip(2).map(str::to_string).collect();

    let mut table = StoredTable { flag_columns, rows: Vec::new() };
    for record in rdr.records() {
        let record = record?;
        let line = codec::line_of(&record);
        let key = RowKey::new(
            codec::field(&record, 0)?,
            parse_date(codec::field(&record, 1)?)?,
        );
        let cells = record
            .iter()
            .skip(2)
            .map(|cell| codec::parse_flag(cell, line))
            .collect::<FlagResult<Vec<_>>>()?;
        table.rows.push(StoredRow { key, cells });
    }
    if !keyed_unique(&table) {
        log::warn!("Flag store {} contains repeated (id, run_date) rows", path.display());
    }
    Ok(Some(table))
}

fn keyed_unique(table: &StoredTable) -> bool {
    let mut seen = HashSet::with_capacity(table.rows.len());
    table.rows.iter().all(|r| seen.insert(&r.key))
}

/// Write to a temp file beside the target, then rename over it.
fn write_atomic(path: &Path, table: &StoredTable) -> FlagResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir)?;
    {
        let mut wtr = Writer::from_writer(tmp.as_file_mut());
        wtr.write_record(table.schema().columns())?;
        for row in &table.rows {
            let mut record = vec![row.key.id.clone(), row.key.run_date.format("%Y-%m-%d").to_string()];
            record.extend(row.cells.iter().map(|c| codec::flag_cell(*c).to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
    }
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| FlagError::Io(e.error))?;
    log::debug!("Rewrote {} ({} rows)", path.display(), table.rows.len());
    Ok(())
}
