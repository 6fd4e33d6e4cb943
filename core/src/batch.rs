//! The merged, wide result of one run: one row per identifier.

use crate::{
    error::{FlagError, FlagResult},
    types::CustomerId,
};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct FlagRow {
    pub id:    CustomerId,
    /// Aligned with [`FlagBatch::columns`]. `None` where a joined
    /// fragment had no row for this identifier.
    pub flags: Vec<Option<bool>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagBatch {
    run_date: NaiveDate,
    columns:  Vec<String>,
    rows:     Vec<FlagRow>,
}

impl FlagBatch {
    pub fn new(run_date: NaiveDate, columns: Vec<String>, rows: Vec<FlagRow>) -> FlagResult<Self> {
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(FlagError::Config(format!("duplicate batch column '{column}'")));
            }
        }
        let mut ids = HashSet::with_capacity(rows.len());
        for row in &rows {
            if row.flags.len() != columns.len() {
                return Err(FlagError::InvalidRecord {
                    line:   0,
                    reason: format!(
                        "row '{}' has {} flags for {} columns",
                        row.id,
                        row.flags.len(),
                        columns.len()
                    ),
                });
            }
            if !ids.insert(row.id.as_str()) {
                return Err(FlagError::DuplicateIdentifier {
                    product: "merged".into(),
                    id:      row.id.clone(),
                });
            }
        }
        Ok(Self { run_date, columns, rows })
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[FlagRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// The known values of one column, keyed by identifier.
    pub fn column_values(&self, column: &str) -> FlagResult<HashMap<CustomerId, bool>> {
        let index = self
            .column_index(column)
            .ok_or_else(|| FlagError::MissingColumn { column: column.to_string() })?;
        Ok(self
            .rows
            .iter()
            .filter_map(|row| row.flags[index].map(|flag| (row.id.clone(), flag)))
            .collect())
    }

    pub fn value(&self, id: &str, column: &str) -> Option<Option<bool>> {
        let index = self.column_index(column)?;
        self.rows.iter().find(|r| r.id == id).map(|r| r.flags[index])
    }
}
