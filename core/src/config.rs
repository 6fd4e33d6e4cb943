use crate::{
    error::{FlagError, FlagResult},
    merger::{BasePolicy, IncrementalMerger},
    store::{CsvFlagStore, FlagStore, SqliteFlagStore, SQLITE_DEFAULT_TABLE},
    types::Product,
    window::WindowSpec,
    worker::{InProcessTransport, SubprocessTransport, WorkerTransport},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Csv {
        path: PathBuf,
    },
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_table")]
        table: String,
    },
}

fn default_table() -> String {
    SQLITE_DEFAULT_TABLE.to_string()
}

impl StoreConfig {
    pub fn open(&self, lock_timeout: Option<Duration>) -> FlagResult<Box<dyn FlagStore>> {
        let store: Box<dyn FlagStore> = match self {
            Self::Csv { path } => {
                Box::new(CsvFlagStore::new(path.clone()).with_lock_timeout(lock_timeout))
            }
            Self::Sqlite { path, table } => {
                Box::new(SqliteFlagStore::open(path, table, lock_timeout)?)
            }
        };
        Ok(store)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    #[default]
    InProcess,
    Subprocess {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl TransportConfig {
    pub fn build(&self) -> Box<dyn WorkerTransport> {
        match self {
            Self::InProcess => Box::new(InProcessTransport),
            Self::Subprocess { program, args } => {
                Box::new(SubprocessTransport::new(program.clone(), args.clone()))
            }
        }
    }
}

fn default_target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagConfig {
    /// Merge order. With the designated policy the first entry is the base.
    #[serde(default = "Product::default_set")]
    pub products: Vec<Product>,
    #[serde(default)]
    pub base_policy: BasePolicy,
    #[serde(default = "default_target_date")]
    pub target_date: NaiveDate,
    #[serde(default)]
    pub window: WindowSpec,
    pub store: StoreConfig,
    /// Absent: wait for the store lock indefinitely.
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl FlagConfig {
    /// Load from a JSON file.
    /// In tests, use FlagConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config = Self::from_json(&content)?;
        log::info!(
            "Loaded config {path}: {} products, target {}",
            config.products.len(),
            config.target_date
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> FlagResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults for the given store, in-process workers.
    pub fn default_test(store: StoreConfig) -> Self {
        Self {
            products:          Product::default_set(),
            base_policy:       BasePolicy::Designated,
            target_date:       default_target_date(),
            window:            WindowSpec::default(),
            store,
            lock_timeout_secs: None,
            transport:         TransportConfig::InProcess,
        }
    }

    pub fn validate(&self) -> FlagResult<()> {
        if self.products.is_empty() {
            return Err(FlagError::Config("at least one product is required".into()));
        }
        let mut seen = HashSet::new();
        for p in &self.products {
            if !seen.insert(p) {
                return Err(FlagError::Config(format!("product '{p}' listed twice")));
            }
        }
        if self.window.months_back == 0 && self.window.months_forward == 0 {
            log::warn!("Window covers only the target month");
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    pub fn merger(&self) -> FlagResult<IncrementalMerger> {
        IncrementalMerger::new(self.products.clone(), self.base_policy)
    }

    pub fn open_store(&self) -> FlagResult<Box<dyn FlagStore>> {
        self.store.open(self.lock_timeout())
    }
}
