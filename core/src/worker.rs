//! Per-product workers and the transport seam they run behind.
//!
//! A worker never fails the run: every error on its path becomes a
//! [`WorkerOutcome::Failure`] that the merger treats as "no result".

use crate::{
    aggregate::Aggregator,
    error::{FailureKind, FlagError, FlagResult},
    fragment::Fragment,
    profit_table::{ProductSlice, ProfitTable},
    types::Product,
    window::{WindowFilter, WindowSpec},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};

/// Window + aggregate for one slice. This is the whole computation a
/// worker performs, wherever it runs.
pub fn compute_fragment(
    slice: &ProductSlice,
    target: NaiveDate,
    window: WindowSpec,
) -> FlagResult<Fragment> {
    let filter = WindowFilter::new(target, window)?;
    let windowed = filter.select(slice);
    log::debug!(
        "product {}: {} of {} rows inside window",
        slice.product,
        windowed.rows.len(),
        slice.records.len()
    );
    Aggregator::aggregate(&windowed, &slice.product)
}

/// How a slice reaches the computation and a fragment comes back.
pub trait WorkerTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(
        &self,
        slice: &ProductSlice,
        target: NaiveDate,
        window: WindowSpec,
    ) -> FlagResult<Fragment>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessTransport;

impl WorkerTransport for InProcessTransport {
    fn name(&self) -> &'static str { "in_process" }

    fn compute(
        &self,
        slice: &ProductSlice,
        target: NaiveDate,
        window: WindowSpec,
    ) -> FlagResult<Fragment> {
        compute_fragment(slice, target, window)
    }
}

/// Runs an external worker program: slice CSV on stdin, fragment CSV on
/// stdout, non-zero exit on failure.
#[derive(Debug, Clone)]
pub struct SubprocessTransport {
    program: PathBuf,
    args:    Vec<String>,
}

impl SubprocessTransport {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl WorkerTransport for SubprocessTransport {
    fn name(&self) -> &'static str { "subprocess" }

    fn compute(
        &self,
        slice: &ProductSlice,
        target: NaiveDate,
        window: WindowSpec,
    ) -> FlagResult<Fragment> {
        let product = &slice.product;
        let transport_err = |reason: String| FlagError::Transport {
            product: product.to_string(),
            reason,
        };

        let input = slice.to_csv()?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--product")
            .arg(product.as_str())
            .arg("--target-date")
            .arg(target.format("%Y-%m-%d").to_string())
            .arg("--months-back")
            .arg(window.months_back.to_string())
            .arg("--months-forward")
            .arg(window.months_forward.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| transport_err(format!("cannot start {}: {e}", self.program.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| transport_err("worker stdin was not captured".into()))?;
        // Feed stdin from its own thread so a chatty child cannot deadlock us.
        let feeder = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child.wait_with_output()?;
        let fed = feeder
            .join()
            .map_err(|_| transport_err("stdin feeder panicked".into()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(transport_err(format!("{}: {}", output.status, stderr.trim())));
        }
        fed.map_err(|e| transport_err(format!("writing slice to worker: {e}")))?;

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| transport_err(format!("worker output is not UTF-8: {e}")))?;
        if stdout.trim().is_empty() {
            return Err(transport_err("worker returned no data".into()));
        }
        Fragment::from_csv(product, &stdout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub product: Product,
    pub kind:    FailureKind,
    pub reason:  String,
}

#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Success(Fragment),
    Failure(WorkerFailure),
}

impl WorkerOutcome {
    pub fn product(&self) -> &Product {
        match self {
            Self::Success(fragment) => fragment.product(),
            Self::Failure(failure)  => &failure.product,
        }
    }

    pub fn fragment(&self) -> Option<&Fragment> {
        match self {
            Self::Success(fragment) => Some(fragment),
            Self::Failure(_)        => None,
        }
    }
}

/// Orchestrates slice → window → aggregate for one product.
pub struct ProductWorker<'t> {
    transport: &'t dyn WorkerTransport,
    target:    NaiveDate,
    window:    WindowSpec,
}

impl<'t> ProductWorker<'t> {
    pub fn new(transport: &'t dyn WorkerTransport, target: NaiveDate, window: WindowSpec) -> Self {
        Self { transport, target, window }
    }

    pub fn process(&self, table: &ProfitTable, product: &Product) -> WorkerOutcome {
        let result = table
            .slice(product)
            .and_then(|slice| self.transport.compute(&slice, self.target, self.window));
        self.settle(product, result)
    }

    pub fn process_slice(&self, slice: &ProductSlice) -> WorkerOutcome {
        let result = self.transport.compute(slice, self.target, self.window);
        self.settle(&slice.product, result)
    }

    fn settle(&self, product: &Product, result: FlagResult<Fragment>) -> WorkerOutcome {
        match result {
            Ok(fragment) => {
                log::info!(
                    "Product {product} processed via {} ({} rows)",
                    self.transport.name(),
                    fragment.len()
                );
                WorkerOutcome::Success(fragment)
            }
            Err(e) => {
                log::error!("Error while processing product {product}: {e}");
                WorkerOutcome::Failure(WorkerFailure {
                    product: product.clone(),
                    kind:    e.failure_kind(),
                    reason:  e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::parse_date;

    const TABLE: &str = "\
id,date,sum_a,count_a
1,2024-02-01,12,3
2,2024-03-01,0,4
";

    #[test]
    fn in_process_worker_produces_fragment() {
        let table = ProfitTable::from_csv(TABLE).unwrap();
        let worker = ProductWorker::new(
            &InProcessTransport,
            parse_date("2024-03-01").unwrap(),
            WindowSpec::default(),
        );
        let outcome = worker.process(&table, &Product::parse("a").unwrap());
        let fragment = outcome.fragment().expect("success");
        assert_eq!(fragment.flags(), &[("1".to_string(), true), ("2".to_string(), false)]);
    }

    #[test]
    fn missing_columns_degrade_to_failure() {
        let table = ProfitTable::from_csv(TABLE).unwrap();
        let worker = ProductWorker::new(
            &InProcessTransport,
            parse_date("2024-03-01").unwrap(),
            WindowSpec::default(),
        );
        match worker.process(&table, &Product::parse("b").unwrap()) {
            WorkerOutcome::Failure(f) => {
                assert_eq!(f.kind, FailureKind::InputSchema);
                assert_eq!(f.product.as_str(), "b");
            }
            WorkerOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn unstartable_subprocess_is_a_transport_failure() {
        let table = ProfitTable::from_csv(TABLE).unwrap();
        let transport = SubprocessTransport::new("/nonexistent/flag-worker", vec![]);
        let worker = ProductWorker::new(
            &transport,
            parse_date("2024-03-01").unwrap(),
            WindowSpec::default(),
        );
        match worker.process(&table, &Product::parse("a").unwrap()) {
            WorkerOutcome::Failure(f) => assert_eq!(f.kind, FailureKind::Transport),
            WorkerOutcome::Success(_) => panic!("expected failure"),
        }
    }
}
