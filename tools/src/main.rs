//! flag-runner: compute activity flags for one target date and append them
//! to the flag store.
//!
//! Usage:
//!   flag-runner --config flags.json --input profit.csv
//!   flag-runner --synthetic 500 --seed 7 --target-date 2024-03-01 --store flags.csv

use anyhow::{bail, Result};
use flag_activity_core::{
    config::{FlagConfig, StoreConfig},
    profit_table::ProfitTable,
    run::FlagRun,
    synthetic::{self, SyntheticSpec},
    window::parse_date,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = string_arg(&args, "--config");
    let input = string_arg(&args, "--input");
    let synthetic_customers = args
        .windows(2)
        .find(|w| w[0] == "--synthetic")
        .and_then(|w| w[1].parse::<usize>().ok());
    let seed = parse_arg(&args, "--seed", 42u64);

    let mut config = match config_path {
        Some(path) => FlagConfig::load(path)?,
        None => {
            let store = string_arg(&args, "--store").unwrap_or("flags_activity.csv");
            FlagConfig::default_test(StoreConfig::Csv { path: store.into() })
        }
    };
    if let Some(date) = string_arg(&args, "--target-date") {
        config.target_date = parse_date(date)?;
    }

    let table = match (input, synthetic_customers) {
        (Some(path), _) => ProfitTable::load(path)?,
        (None, Some(customers)) => synthetic::generate(&SyntheticSpec {
            seed,
            customers,
            products: config.products.clone(),
            ..SyntheticSpec::default()
        })?,
        (None, None) => bail!("either --input <csv> or --synthetic <customers> is required"),
    };

    let store = config.open_store()?;
    let transport = config.transport.build();
    let run = FlagRun::new(&config, store.as_ref(), transport.as_ref());
    let report = run.execute(&table)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.persisted() {
        bail!("flag store {} was not updated", store.location());
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
