//! The raw profit table and its per-product slices.
//!
//! The wide table carries one `sum_<p>` / `count_<p>` column pair per
//! product. Workers only ever see a [`ProductSlice`]: the identifier,
//! month and that single pair, parsed into typed records.

use crate::{
    codec,
    error::{FlagError, FlagResult},
    types::{CustomerId, Product},
    window::parse_date,
};
use chrono::NaiveDate;
use csv::{StringRecord, Writer};
use std::{fs::File, io::Read, path::Path};

pub const ID_COLUMN: &str = "id";
pub const DATE_COLUMN: &str = "date";

/// One (identifier, month) observation for a single product.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id:    CustomerId,
    /// The date cell as it appeared in the source table.
    pub date:  String,
    /// `date` as a calendar date, only when it is spelled exactly
    /// `YYYY-MM-DD`. Any other spelling never matches a window month.
    pub month: Option<NaiveDate>,
    pub sum:   f64,
    pub count: u64,
}

impl TransactionRecord {
    pub fn new(id: impl Into<CustomerId>, date: impl Into<String>, sum: f64, count: u64) -> Self {
        let date = date.into();
        let month = parse_date(&date)
            .ok()
            .filter(|d| d.format("%Y-%m-%d").to_string() == date);
        Self { id: id.into(), date, month, sum, count }
    }
}

/// The wide input table, held as raw CSV records until sliced.
#[derive(Debug, Clone)]
pub struct ProfitTable {
    headers: StringRecord,
    rows:    Vec<StringRecord>,
}

impl ProfitTable {
    pub fn from_reader<R: Read>(input: R) -> FlagResult<Self> {
        let mut rdr = codec::reader(input);
        let headers = rdr.headers()?.clone();
        let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn from_csv(input: &str) -> FlagResult<Self> {
        Self::from_reader(input.as_bytes())
    }

    pub fn load(path: impl AsRef<Path>) -> FlagResult<Self> {
        let file = File::open(path.as_ref())?;
        let table = Self::from_reader(file)?;
        log::info!(
            "Loaded profit table {} ({} rows, columns: {:?})",
            path.as_ref().display(),
            table.row_count(),
            table.columns().collect::<Vec<_>>()
        );
        Ok(table)
    }

    pub(crate) fn from_parts(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers: StringRecord::from(headers),
            rows:    rows.into_iter().map(StringRecord::from).collect(),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Select `id`, `date`, `sum_<p>` and `count_<p>` and parse them.
    pub fn slice(&self, product: &Product) -> FlagResult<ProductSlice> {
        let columns = SliceColumns::locate(&self.headers, product)?;
        let records = self
            .rows
            .iter()
            .map(|row| columns.parse(row))
            .collect::<FlagResult<Vec<_>>>()?;
        Ok(ProductSlice { product: product.clone(), records })
    }

    pub fn to_csv(&self) -> FlagResult<String> {
        let mut wtr = Writer::from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        codec::finish(wtr)
    }
}

/// The four-column view of one product handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSlice {
    pub product: Product,
    pub records: Vec<TransactionRecord>,
}

impl ProductSlice {
    pub fn new(product: Product, records: Vec<TransactionRecord>) -> Self {
        Self { product, records }
    }

    /// Serialize as `id,date,sum_<p>,count_<p>` for the worker boundary.
    pub fn to_csv(&self) -> FlagResult<String> {
        let mut wtr = Writer::from_writer(Vec::new());
        wtr.write_record([
            ID_COLUMN.to_string(),
            DATE_COLUMN.to_string(),
            self.product.sum_column(),
            self.product.count_column(),
        ])?;
        for r in &self.records {
            wtr.write_record([
                r.id.clone(),
                r.date.clone(),
                r.sum.to_string(),
                r.count.to_string(),
            ])?;
        }
        codec::finish(wtr)
    }

    /// Parse a slice received over the worker boundary. Extra columns are
    /// ignored; missing product columns are an input schema error.
    pub fn from_csv(product: &Product, input: &str) -> FlagResult<Self> {
        let mut rdr = codec::reader(input.as_bytes());
        let headers = rdr.headers()?.clone();
        let columns = SliceColumns::locate(&headers, product)?;
        let mut records = Vec::new();
        for row in rdr.records() {
            records.push(columns.parse(&row?)?);
        }
        Ok(Self { product: product.clone(), records })
    }
}

struct SliceColumns {
    id:    usize,
    date:  usize,
    sum:   usize,
    count: usize,
}

impl SliceColumns {
    fn locate(headers: &StringRecord, product: &Product) -> FlagResult<Self> {
        Ok(Self {
            id:    codec::position(headers, ID_COLUMN)?,
            date:  codec::position(headers, DATE_COLUMN)?,
            sum:   codec::position(headers, &product.sum_column())?,
            count: codec::position(headers, &product.count_column())?,
        })
    }

    fn parse(&self, row: &StringRecord) -> FlagResult<TransactionRecord> {
        let line = codec::line_of(row);
        let id = codec::field(row, self.id)?;
        if id.is_empty() {
            return Err(FlagError::InvalidRecord { line, reason: "empty id".into() });
        }
        let date = codec::field(row, self.date)?;

        // Empty numeric cells contribute nothing to the window totals.
        let sum = match codec::field(row, self.sum)? {
            "" => 0.0,
            raw => raw.parse::<f64>().map_err(|_| FlagError::InvalidRecord {
                line,
                reason: format!("sum '{raw}' is not numeric"),
            })?,
        };
        let count = match codec::field(row, self.count)? {
            "" => 0,
            raw => raw.parse::<u64>().map_err(|_| FlagError::InvalidRecord {
                line,
                reason: format!("count '{raw}' is not a non-negative integer"),
            })?,
        };

        let record = TransactionRecord::new(id, date, sum, count);
        if record.month.is_none() {
            log::debug!("line {line}: date '{date}' is not a YYYY-MM-DD month and will not match");
        }
        Ok(record)
    }
}
