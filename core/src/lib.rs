//! Per-product activity flags over a rolling month window, merged into one
//! wide table and appended to a shared store.

pub mod aggregate;
pub mod batch;
mod codec;
pub mod config;
pub mod error;
pub mod fragment;
pub mod merger;
pub mod profit_table;
pub mod run;
pub mod store;
pub mod synthetic;
pub mod types;
pub mod window;
pub mod worker;
