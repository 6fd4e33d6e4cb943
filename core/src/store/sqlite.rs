//! SQLite backend for the flag table.
//!
//! Every operation runs inside a `BEGIN EXCLUSIVE` transaction, which is
//! the store lock. Dropping the transaction on an error path rolls it back.

use super::{
    apply_locked, widen_locked, AppendSummary, FlagStore, LockedTable, PersistSummary, RowKey,
    StoreSchema, StoredRow, StoredTable, ID_COLUMN, RUN_DATE_COLUMN,
};
use crate::{
    batch::FlagBatch,
    error::{FlagError, FlagResult},
    window::parse_date,
};
use rusqlite::{params, params_from_iter, types::Value, Connection, TransactionBehavior};
use std::{collections::HashMap, path::Path, sync::Mutex, time::Duration};

pub const DEFAULT_TABLE: &str = "flags_activity";

/// Longest busy wait SQLite accepts; used when no lock timeout is configured.
const UNBOUNDED_BUSY_WAIT: Duration = Duration::from_millis(i32::MAX as u64);

pub struct SqliteFlagStore {
    location: String,
    table:    String,
    conn:     Mutex<Connection>,
}

impl SqliteFlagStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, table: &str, lock_timeout: Option<Duration>) -> FlagResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        // WAL mode: readers never block the exclusive writer.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Self::with_connection(conn, path.as_ref().display().to_string(), table, lock_timeout)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory(table: &str) -> FlagResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ":memory:".into(), table, None)
    }

    fn with_connection(
        conn: Connection,
        location: String,
        table: &str,
        lock_timeout: Option<Duration>,
    ) -> FlagResult<Self> {
        conn.busy_timeout(lock_timeout.unwrap_or(UNBOUNDED_BUSY_WAIT))?;
        Ok(Self { location, table: table.to_string(), conn: Mutex::new(conn) })
    }

    fn with_table<T>(&self, f: impl FnOnce(&mut SqliteTable<'_>) -> FlagResult<T>) -> FlagResult<T> {
        let mut conn = self.conn.lock().map_err(|_| FlagError::StoreCorrupt {
            location: self.location.clone(),
            reason:   "connection mutex poisoned".into(),
        })?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let value = {
            let mut table = SqliteTable { tx: &tx, name: &self.table };
            f(&mut table)?
        };
        tx.commit()?;
        Ok(value)
    }
}

impl FlagStore for SqliteFlagStore {
    fn location(&self) -> String {
        format!("{}#{}", self.location, self.table)
    }

    fn read_schema(&self) -> FlagResult<Option<StoreSchema>> {
        self.with_table(|t| t.schema())
    }

    fn read_table(&self) -> FlagResult<Option<StoredTable>> {
        self.with_table(|t| t.read_all())
    }

    fn widen(&self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<bool> {
        let location = self.location();
        self.with_table(|t| {
            if t.schema()?.is_none() {
                return Err(FlagError::StoreCorrupt {
                    location,
                    reason: format!("cannot widen with '{column}': table does not exist"),
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

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn flag_value(flag: Option<bool>) -> Value {
    match flag {
        Some(f) => Value::Integer(i64::from(f)),
        None    => Value::Null,
    }
}

struct SqliteTable<'c> {
    tx:   &'c Connection,
    name: &'c str,
}

impl SqliteTable<'_> {
    fn read_all(&self) -> FlagResult<Option<StoredTable>> {
        let Some(schema) = self.schema()? else {
            return Ok(None);
        };
        let columns = schema.columns().iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        let mut stmt = self
            .tx
            .prepare(&format!("SELECT {columns} FROM {} ORDER BY rowid", quote(self.name)))?;
        let width = schema.flag_columns.len();
        let raw = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let run_date: String = row.get(1)?;
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    cells.push(row.get::<_, Option<i64>>(i + 2)?.map(|v| v != 0));
                }
                Ok((id, run_date, cells))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let rows = raw
            .into_iter()
            .map(|(id, run_date, cells)| {
                Ok(StoredRow { key: RowKey::new(id, parse_date(&run_date)?), cells })
            })
            .collect::<FlagResult<Vec<_>>>()?;
        Ok(Some(StoredTable { flag_columns: schema.flag_columns, rows }))
    }
}

impl LockedTable for SqliteTable<'_> {
    fn schema(&self) -> FlagResult<Option<StoreSchema>> {
        let mut stmt = self.tx.prepare(&format!("PRAGMA table_info({})", quote(self.name)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Ok(None);
        }
        if columns.first().map(String::as_str) != Some(ID_COLUMN)
            || columns.get(1).map(String::as_str) != Some(RUN_DATE_COLUMN)
        {
            return Err(FlagError::StoreCorrupt {
                location: self.name.to_string(),
                reason:   format!("table must start with {ID_COLUMN},{RUN_DATE_COLUMN}"),
            });
        }
        Ok(Some(StoreSchema { flag_columns: columns.into_iter().skip(2).collect() }))
    }

    fn create(&mut self, batch: &FlagBatch) -> FlagResult<usize> {
        let mut ddl = format!(
            "CREATE TABLE {} ({ID_COLUMN} TEXT NOT NULL, {RUN_DATE_COLUMN} TEXT NOT NULL",
            quote(self.name)
        );
        for column in batch.columns() {
            ddl.push_str(&format!(", {} INTEGER", quote(column)));
        }
        ddl.push_str(&format!(", PRIMARY KEY ({ID_COLUMN}, {RUN_DATE_COLUMN}))"));
        self.tx.execute_batch(&ddl)?;
        Ok(self.insert_missing(batch)?.appended)
    }

    fn add_column(&mut self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<()> {
        self.tx.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} INTEGER",
            quote(self.name),
            quote(column)
        ))?;
        let mut stmt = self.tx.prepare(&format!(
            "UPDATE {} SET {} = ?1 WHERE {ID_COLUMN} = ?2 AND {RUN_DATE_COLUMN} = ?3",
            quote(self.name),
            quote(column)
        ))?;
        for (key, flag) in values {
            stmt.execute(params![
                i64::from(*flag),
                key.id,
                key.run_date.format("%Y-%m-%d").to_string()
            ])?;
        }
        Ok(())
    }

    fn fill_empty(&mut self, column: &str, values: &HashMap<RowKey, bool>) -> FlagResult<usize> {
        let mut stmt = self.tx.prepare(&format!(
            "UPDATE {} SET {col} = ?1 WHERE {ID_COLUMN} = ?2 AND {RUN_DATE_COLUMN} = ?3 \
             AND {col} IS NULL",
            quote(self.name),
            col = quote(column)
        ))?;
        let mut filled = 0;
        for (key, flag) in values {
            filled += stmt.execute(params![
                i64::from(*flag),
                key.id,
                key.run_date.format("%Y-%m-%d").to_string()
            ])?;
        }
        Ok(filled)
    }

    fn insert_missing(&mut self, batch: &FlagBatch) -> FlagResult<AppendSummary> {
        if let Some(schema) = self.schema()? {
            for column in batch.columns() {
                if !schema.contains(column) {
                    return Err(FlagError::MissingColumn { column: column.clone() });
                }
            }
        }

        let mut columns = vec![ID_COLUMN.to_string(), RUN_DATE_COLUMN.to_string()];
        columns.extend(batch.columns().iter().cloned());
        let names = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        let slots = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let mut stmt = self.tx.prepare(&format!(
            "INSERT OR IGNORE INTO {} ({names}) VALUES ({slots})",
            quote(self.name)
        ))?;

        let run_date = batch.run_date().format("%Y-%m-%d").to_string();
        let mut summary = AppendSummary::default();
        for row in batch.rows() {
            let mut values = vec![Value::Text(row.id.clone()), Value::Text(run_date.clone())];
            values.extend(row.flags.iter().map(|f| flag_value(*f)));
            if stmt.execute(params_from_iter(values.iter()))? == 1 {
                summary.appended += 1;
            } else {
                summary.skipped += 1;
            }
        }
        Ok(summary)
    }
}
