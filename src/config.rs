//! TOML configuration (`~/.costledger/config.toml` by default)

use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::anomaly::MIN_BASELINE_DAYS;
use crate::types::{is_valid_service_id, CostLedgerError, Result};

/// Default spike threshold in percent
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 50.0;

/// Default number of trailing days loaded for anomaly detection
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Where the file-backed ledger lives; defaults to `~/.costledger/data`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalyConfig {
    pub threshold_percent: f64,
    pub baseline_days: usize,
    pub lookback_days: u32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            baseline_days: MIN_BASELINE_DAYS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: CollectorKind,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectorKind {
    FileExport {
        path: PathBuf,
    },
    HttpJson {
        url: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl Config {
    /// Default config path (`~/.costledger/config.toml`)
    pub fn default_path() -> Result<PathBuf> {
        Ok(home_dir()?.join(".costledger").join("config.toml"))
    }

    /// Load from `path`, or the default path when `None`.
    /// A missing file yields the defaults with no services.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CostLedgerError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let anomaly = &self.anomaly;
        if !anomaly.threshold_percent.is_finite() {
            return Err(CostLedgerError::Config(
                "anomaly.threshold_percent must be a finite number".into(),
            ));
        }
        if anomaly.baseline_days < MIN_BASELINE_DAYS {
            return Err(CostLedgerError::Config(format!(
                "anomaly.baseline_days must be at least {}",
                MIN_BASELINE_DAYS
            )));
        }
        if (anomaly.lookback_days as usize) <= anomaly.baseline_days {
            return Err(CostLedgerError::Config(
                "anomaly.lookback_days must exceed anomaly.baseline_days".into(),
            ));
        }

        for service in &self.services {
            if !is_valid_service_id(&service.id) {
                return Err(CostLedgerError::Config(format!(
                    "invalid service id {:?} (lowercase letters, digits and '-')",
                    service.id
                )));
            }
        }
        Ok(())
    }

    /// Resolved ledger directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(home_dir()?.join(".costledger").join("data")),
        }
    }
}

fn home_dir() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or_else(|| CostLedgerError::Config("Cannot determine home directory".into()))
}
