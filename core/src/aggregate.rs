//! Window totals per identifier and the activity flag derived from them.

use crate::{
    error::{FlagError, FlagResult},
    fragment::Fragment,
    types::Product,
    window::WindowedSlice,
};
use std::collections::BTreeMap;

/// Totals over the window for one identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowTotals {
    pub sum:   f64,
    pub count: u64,
}

impl WindowTotals {
    /// Active means nonzero net movement AND at least one transaction.
    /// Offsetting debits and credits with a nonzero count are not active.
    pub fn is_active(&self) -> bool {
        activity_flag(self.sum, self.count)
    }
}

pub fn activity_flag(sum: f64, count: u64) -> bool {
    sum != 0.0 && count != 0
}

pub struct Aggregator;

impl Aggregator {
    /// Sum the windowed rows per identifier.
    pub fn totals(windowed: &WindowedSlice<'_>) -> BTreeMap<String, WindowTotals> {
        let mut totals: BTreeMap<String, WindowTotals> = BTreeMap::new();
        for row in &windowed.rows {
            let entry = totals.entry(row.id.clone()).or_default();
            entry.sum += row.sum;
            entry.count = entry.count.saturating_add(row.count);
        }
        totals
    }

    /// Reduce the window to one `flag_<product>` value per identifier.
    ///
    /// The windowed rows must carry this product's sum/count columns;
    /// rows sliced for a different product are reported as a missing
    /// column rather than silently flagged.
    pub fn aggregate(windowed: &WindowedSlice<'_>, product: &Product) -> FlagResult<Fragment> {
        if windowed.product != product {
            log::error!(
                "Expected columns '{}' and '{}' not found in the data (got {} slice)",
                product.sum_column(),
                product.count_column(),
                windowed.product
            );
            return Err(FlagError::MissingColumn { column: product.sum_column() });
        }

        let flags = Self::totals(windowed)
            .into_iter()
            .map(|(id, t)| (id, t.is_active()))
            .collect();
        let fragment = Fragment::new(product.clone(), flags)?;

        log::info!(
            "Aggregated product {product}: {} identifiers, {} active",
            fragment.len(),
            fragment.active_count()
        );
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        profit_table::{ProductSlice, TransactionRecord},
        window::{WindowFilter, WindowSpec},
    };

    fn record(id: &str, month: &str, sum: f64, count: u64) -> TransactionRecord {
        TransactionRecord::new(id, month, sum, count)
    }

    fn flags_for(records: Vec<TransactionRecord>) -> Vec<(String, bool)> {
        let product = Product::parse("a").unwrap();
        let slice = ProductSlice::new(product.clone(), records);
        let window = WindowFilter::parse("2024-03-01", WindowSpec::default()).unwrap();
        Aggregator::aggregate(&window.select(&slice), &product)
            .unwrap()
            .flags()
            .to_vec()
    }

    #[test]
    fn flag_requires_nonzero_sum_and_count() {
        assert!(!activity_flag(0.0, 5));
        assert!(!activity_flag(5.0, 0));
        assert!(activity_flag(5.0, 5));
        assert!(activity_flag(-3.0, 2));
    }

    #[test]
    fn offsetting_months_net_to_inactive() {
        let flags = flags_for(vec![
            record("1", "2024-01-01", 40.0, 2),
            record("1", "2024-02-01", -40.0, 3),
        ]);
        assert_eq!(flags, vec![("1".to_string(), false)]);
    }

    #[test]
    fn totals_accumulate_across_the_window_only() {
        let flags = flags_for(vec![
            record("1", "2023-12-01", 10.0, 1), // before the window
            record("2", "2024-04-01", 7.0, 1),
            record("2", "2024-05-01", 0.0, 0),  // after the window
            record("3", "2023-11-01", 9.0, 9),  // only outside rows
        ]);
        assert_eq!(flags, vec![("2".to_string(), true)]);
    }

    #[test]
    fn huge_counts_saturate_instead_of_overflowing() {
        let product = Product::parse("a").unwrap();
        let slice = ProductSlice::new(
            product,
            vec![record("1", "2024-02-01", 1.0, u64::MAX), record("1", "2024-03-01", 1.0, 5)],
        );
        let window = WindowFilter::parse("2024-03-01", WindowSpec::default()).unwrap();
        let totals = Aggregator::totals(&window.select(&slice));
        assert_eq!(totals["1"].count, u64::MAX);
        assert!(totals["1"].is_active());
    }

    #[test]
    fn mismatched_product_is_a_missing_column() {
        let a = Product::parse("a").unwrap();
        let b = Product::parse("b").unwrap();
        let slice = ProductSlice::new(a, vec![record("1", "2024-03-01", 1.0, 1)]);
        let window = WindowFilter::parse("2024-03-01", WindowSpec::default()).unwrap();
        let err = Aggregator::aggregate(&window.select(&slice), &b).unwrap_err();
        assert!(matches!(err, FlagError::MissingColumn { ref column } if column == "sum_b"));
    }
}
