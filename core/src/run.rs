//! One flag-computation run: fan out workers, merge, persist, report.
//!
//! EXECUTION ORDER:
//!   1. Every product in the configured order gets its own worker thread.
//!      Workers share nothing but the read-only profit table.
//!   2. Outcomes are collected in product order regardless of finish order.
//!   3. The merger builds the batch. A missing base is the only fatal error.
//!   4. The batch is persisted under the store lock; failures are reported
//!      in the run report, not raised.

use crate::{
    config::FlagConfig,
    error::{FailureKind, FlagResult},
    merger::IncrementalMerger,
    profit_table::ProfitTable,
    store::{FlagStore, PersistOutcome},
    types::{Product, RunId},
    worker::{ProductWorker, WorkerFailure, WorkerOutcome, WorkerTransport},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::thread;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id:       RunId,
    pub target_date:  NaiveDate,
    pub base_product: Product,
    pub succeeded:    Vec<Product>,
    pub failures:     Vec<WorkerFailure>,
    pub columns:      Vec<String>,
    pub rows:         usize,
    pub persist:      PersistOutcome,
}

impl RunReport {
    pub fn persisted(&self) -> bool {
        matches!(self.persist, PersistOutcome::Applied(_))
    }
}

pub struct FlagRun<'a> {
    pub run_id: RunId,
    config:     &'a FlagConfig,
    store:      &'a dyn FlagStore,
    transport:  &'a dyn WorkerTransport,
}

impl<'a> FlagRun<'a> {
    pub fn new(
        config: &'a FlagConfig,
        store: &'a dyn FlagStore,
        transport: &'a dyn WorkerTransport,
    ) -> Self {
        Self { run_id: Uuid::new_v4().to_string(), config, store, transport }
    }

    /// Run every product worker concurrently and return outcomes in
    /// configured product order.
    pub fn compute(&self, table: &ProfitTable) -> Vec<WorkerOutcome> {
        let worker = ProductWorker::new(self.transport, self.config.target_date, self.config.window);
        let worker = &worker;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .config
                .products
                .iter()
                .map(|product| (product, scope.spawn(move || worker.process(table, product))))
                .collect();
            handles
                .into_iter()
                .map(|(product, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        log::error!("Worker thread for product {product} panicked");
                        WorkerOutcome::Failure(WorkerFailure {
                            product: product.clone(),
                            kind:    FailureKind::Transport,
                            reason:  "worker thread panicked".into(),
                        })
                    })
                })
                .collect()
        })
    }

    pub fn execute(&self, table: &ProfitTable) -> FlagResult<RunReport> {
        log::info!(
            "Run {} started: target {}, products {:?}, store {}",
            self.run_id,
            self.config.target_date,
            self.config.products.iter().map(Product::as_str).collect::<Vec<_>>(),
            self.store.location()
        );
        let merger = self.config.merger()?;
        let outcomes = self.compute(table);

        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for outcome in &outcomes {
            match outcome {
                WorkerOutcome::Success(f) => succeeded.push(f.product().clone()),
                WorkerOutcome::Failure(f) => failures.push(f.clone()),
            }
        }

        let merged = merger.merge_outcomes(self.config.target_date, &outcomes)?;
        let persist = IncrementalMerger::persist(self.store, &merged.batch);

        let report = RunReport {
            run_id:       self.run_id.clone(),
            target_date:  self.config.target_date,
            base_product: merged.base,
            succeeded,
            failures,
            columns:      merged.batch.columns().to_vec(),
            rows:         merged.batch.len(),
            persist,
        };
        if report.persisted() {
            log::info!("Run {} finished: {} rows x {:?}", report.run_id, report.rows, report.columns);
        } else {
            log::warn!("Run {} finished without updating the store", report.run_id);
        }
        Ok(report)
    }
}
