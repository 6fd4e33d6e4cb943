//! A single product's flag result before merging.

use crate::{
    codec,
    error::{FlagError, FlagResult},
    profit_table::ID_COLUMN,
    types::{CustomerId, Product},
};
use csv::Writer;
use std::collections::{HashMap, HashSet};

/// `(id, flag_<p>)` pairs for one product, one per identifier.
///
/// The flag column name is part of the value rather than discovered from
/// header text, so merging never has to guess which column is the flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    product: Product,
    column:  String,
    flags:   Vec<(CustomerId, bool)>,
}

impl Fragment {
    pub fn new(product: Product, flags: Vec<(CustomerId, bool)>) -> FlagResult<Self> {
        let mut seen = HashSet::with_capacity(flags.len());
        for (id, _) in &flags {
            if !seen.insert(id.as_str()) {
                return Err(FlagError::DuplicateIdentifier {
                    product: product.to_string(),
                    id:      id.clone(),
                });
            }
        }
        Ok(Self { column: product.flag_column(), product, flags })
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn flags(&self) -> &[(CustomerId, bool)] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.flags.iter().filter(|(_, f)| *f).count()
    }

    pub fn lookup(&self) -> HashMap<&str, bool> {
        self.flags.iter().map(|(id, f)| (id.as_str(), *f)).collect()
    }

    /// Serialize as `id,flag_<p>` with `1`/`0` values.
    pub fn to_csv(&self) -> FlagResult<String> {
        let mut wtr = Writer::from_writer(Vec::new());
        wtr.write_record([ID_COLUMN, self.column.as_str()])?;
        for (id, flag) in &self.flags {
            wtr.write_record([id.as_str(), codec::flag_cell(Some(*flag))])?;
        }
        codec::finish(wtr)
    }

    /// Parse a fragment returned over the worker boundary. The header must
    /// be exactly `id,flag_<p>` for the expected product.
    pub fn from_csv(product: &Product, input: &str) -> FlagResult<Self> {
        let mut rdr = codec::reader(input.as_bytes());
        let headers = rdr.headers()?.clone();
        let expected = product.flag_column();
        if headers.get(0) != Some(ID_COLUMN) {
            return Err(FlagError::MissingColumn { column: ID_COLUMN.to_string() });
        }
        if headers.len() != 2 || headers.get(1) != Some(expected.as_str()) {
            return Err(FlagError::MissingColumn { column: expected });
        }

        let mut flags = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let line = codec::line_of(&row);
            let id = codec::field(&row, 0)?;
            let flag = codec::parse_flag(codec::field(&row, 1)?, line)?.ok_or_else(|| {
                FlagError::InvalidRecord { line, reason: format!("empty {expected} value") }
            })?;
            flags.push((id.to_string(), flag));
        }
        Self::new(product.clone(), flags)
    }
}
