//! Combining per-product fragments into one wide batch, and persisting it.
//!
//! MERGE ORDER (explicit, configurable):
//!   - The product list is ordered. The base fragment is chosen from it
//!     according to [`BasePolicy`]; its identifiers define the batch rows.
//!   - Every other present product adds exactly one column, left-joined
//!     onto the base by identifier. Absent products add nothing.

use crate::{
    batch::{FlagBatch, FlagRow},
    error::{FailureKind, FlagError, FlagResult},
    fragment::Fragment,
    store::{FlagStore, PersistOutcome},
    types::Product,
    worker::WorkerOutcome,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePolicy {
    /// The first product in order is the base; if it failed, the run
    /// cannot be merged.
    #[default]
    Designated,
    /// The first product in order that succeeded is the base.
    FirstAvailable,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub batch:   FlagBatch,
    pub base:    Product,
    /// Products whose column made it into the batch, base first.
    pub merged:  Vec<Product>,
    pub skipped: Vec<Product>,
}

#[derive(Debug, Clone)]
pub struct IncrementalMerger {
    order:  Vec<Product>,
    policy: BasePolicy,
}

impl IncrementalMerger {
    pub fn new(order: Vec<Product>, policy: BasePolicy) -> FlagResult<Self> {
        if order.is_empty() {
            return Err(FlagError::Config("product order is empty".into()));
        }
        let mut seen = HashSet::new();
        for product in &order {
            if !seen.insert(product) {
                return Err(FlagError::Config(format!("product '{product}' listed twice")));
            }
        }
        Ok(Self { order, policy })
    }

    pub fn order(&self) -> &[Product] {
        &self.order
    }

    pub fn policy(&self) -> BasePolicy {
        self.policy
    }

    fn base<'f>(&self, fragments: &'f HashMap<Product, Fragment>) -> FlagResult<&'f Fragment> {
        let designated = &self.order[0];
        let found = match self.policy {
            BasePolicy::Designated => fragments.get(designated),
            BasePolicy::FirstAvailable => self.order.iter().find_map(|p| fragments.get(p)),
        };
        found.ok_or_else(|| {
            log::error!("No result for base product '{designated}'; cannot build flag table");
            FlagError::MergeBaseUnavailable { product: designated.to_string() }
        })
    }

    /// Left-join every present fragment onto the base, in product order.
    pub fn merge(
        &self,
        run_date: NaiveDate,
        fragments: &HashMap<Product, Fragment>,
    ) -> FlagResult<MergeOutcome> {
        for product in fragments.keys() {
            if !self.order.contains(product) {
                log::warn!("Ignoring result for unlisted product '{product}'");
            }
        }

        let base = self.base(fragments)?;
        let mut columns = vec![base.column().to_string()];
        let mut rows: Vec<FlagRow> = base
            .flags()
            .iter()
            .map(|(id, flag)| FlagRow { id: id.clone(), flags: vec![Some(*flag)] })
            .collect();
        let mut merged = vec![base.product().clone()];
        let mut skipped = Vec::new();

        for product in &self.order {
            if product == base.product() {
                continue;
            }
            let Some(fragment) = fragments.get(product) else {
                log::warn!("No result found for product: {product}");
                skipped.push(product.clone());
                continue;
            };
            let lookup = fragment.lookup();
            for row in &mut rows {
                row.flags.push(lookup.get(row.id.as_str()).copied());
            }
            columns.push(fragment.column().to_string());
            merged.push(product.clone());
        }

        let batch = FlagBatch::new(run_date, columns, rows)?;
        log::info!(
            "Merged {} products onto base '{}' ({} rows, skipped {:?})",
            merged.len(),
            base.product(),
            batch.len(),
            skipped
        );
        Ok(MergeOutcome { batch, base: base.product().clone(), merged, skipped })
    }

    /// Merge straight from worker outcomes; failures count as absent.
    pub fn merge_outcomes(
        &self,
        run_date: NaiveDate,
        outcomes: &[WorkerOutcome],
    ) -> FlagResult<MergeOutcome> {
        let fragments: HashMap<Product, Fragment> = outcomes
            .iter()
            .filter_map(|o| o.fragment().map(|f| (f.product().clone(), f.clone())))
            .collect();
        self.merge(run_date, &fragments)
    }

    /// Write the batch to the store. Never raises: failures are logged and
    /// come back as [`PersistOutcome::Failed`] with [`FailureKind::Store`],
    /// whatever the underlying cause.
    pub fn persist(store: &dyn FlagStore, batch: &FlagBatch) -> PersistOutcome {
        log::info!(
            "Persisting {} rows x {:?} to {}",
            batch.len(),
            batch.columns(),
            store.location()
        );
        match store.apply_batch(batch) {
            Ok(summary) => {
                log::info!("Data successfully written to {}", store.location());
                PersistOutcome::Applied(summary)
            }
            Err(e) => {
                log::error!("Error while writing to {}: {e}", store.location());
                PersistOutcome::Failed { kind: FailureKind::Store, reason: e.to_string() }
            }
        }
    }
}
