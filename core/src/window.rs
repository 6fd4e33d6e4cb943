//! Rolling-window month selection.
//!
//! The window around a target date spans `months_back` months before it
//! through `months_forward` months after it, inclusive. Membership is
//! decided against the month-start dates inside that closed range, so a
//! source row dated anything other than the 1st of a month, or spelled
//! other than `YYYY-MM-DD`, never matches.

use crate::{
    error::{FlagError, FlagResult},
    profit_table::{ProductSlice, TransactionRecord},
    types::Product,
};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSpec {
    pub months_back:    u32,
    pub months_forward: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self { months_back: 2, months_forward: 1 }
    }
}

pub fn parse_date(value: &str) -> FlagResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| FlagError::InvalidDate { value: value.to_string() })
}

#[derive(Debug, Clone)]
pub struct WindowFilter {
    target: NaiveDate,
    months: BTreeSet<NaiveDate>,
}

impl WindowFilter {
    pub fn new(target: NaiveDate, spec: WindowSpec) -> FlagResult<Self> {
        let out_of_range = || FlagError::InvalidDate { value: target.to_string() };
        let start = target
            .checked_sub_months(Months::new(spec.months_back))
            .ok_or_else(out_of_range)?;
        let end = target
            .checked_add_months(Months::new(spec.months_forward))
            .ok_or_else(out_of_range)?;

        let mut month = NaiveDate::from_ymd_opt(start.year(), start.month(), 1)
            .ok_or_else(out_of_range)?;
        if month < start {
            month = month.checked_add_months(Months::new(1)).ok_or_else(out_of_range)?;
        }

        let mut months = BTreeSet::new();
        while month <= end {
            months.insert(month);
            month = month.checked_add_months(Months::new(1)).ok_or_else(out_of_range)?;
        }

        log::debug!("window for {target}: {:?}", months);
        Ok(Self { target, months })
    }

    pub fn parse(target: &str, spec: WindowSpec) -> FlagResult<Self> {
        Self::new(parse_date(target)?, spec)
    }

    pub fn target(&self) -> NaiveDate {
        self.target
    }

    pub fn months(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.months.iter().copied()
    }

    pub fn contains(&self, month: NaiveDate) -> bool {
        self.months.contains(&month)
    }

    pub fn select<'a>(&self, slice: &'a ProductSlice) -> WindowedSlice<'a> {
        WindowedSlice {
            product: &slice.product,
            rows:    slice.records.iter().filter(|r| r.month.is_some_and(|m| self.contains(m))).collect(),
        }
    }
}

/// The rows of one product slice that fall inside the window.
#[derive(Debug, Clone)]
pub struct WindowedSlice<'a> {
    pub product: &'a Product,
    pub rows:    Vec<&'a TransactionRecord>,
}
