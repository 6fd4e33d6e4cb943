//! flag-worker: out-of-process product worker.
//!
//! Reads one product slice (`id,date,sum_<p>,count_<p>`) on stdin and writes
//! the `id,flag_<p>` fragment to stdout. Any error exits non-zero with the
//! reason on stderr.
//!
//! Usage:
//!   flag-worker --product a --target-date 2024-03-01 [--months-back 2] [--months-forward 1]

use anyhow::{anyhow, Result};
use flag_activity_core::{
    profit_table::ProductSlice,
    types::Product,
    window::{parse_date, WindowSpec},
    worker::compute_fragment,
};
use std::{
    env,
    io::{self, Read, Write},
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let product = Product::parse(required(&args, "--product")?)?;
    let target = parse_date(required(&args, "--target-date")?)?;
    let defaults = WindowSpec::default();
    let window = WindowSpec {
        months_back:    parse_arg(&args, "--months-back", defaults.months_back),
        months_forward: parse_arg(&args, "--months-forward", defaults.months_forward),
    };

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let slice = ProductSlice::from_csv(&product, &input)?;
    let fragment = compute_fragment(&slice, target, window)?;
    log::debug!("product {product}: {} ids, {} active", fragment.len(), fragment.active_count());

    let mut stdout = io::stdout().lock();
    stdout.write_all(fragment.to_csv()?.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn required<'a>(args: &'a [String], flag: &str) -> Result<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .ok_or_else(|| anyhow!("missing required argument {flag}"))
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
