//! Collector adapters: the boundary to provider billing sources
//!
//! Each collector turns one provider's billing data into normalized
//! [`CostEntry`] batches. Everything past this boundary treats providers
//! uniformly.

mod file_export;
mod http_json;

pub use file_export::FileExportCollector;
pub use http_json::HttpJsonCollector;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::{CollectorKind, Config};
use crate::types::{day_start, CostEntry, CostLedgerError, ResourceCost, Result};

/// What a collector hands back for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorOutput {
    pub entries: Vec<CostEntry>,
    pub warning: Option<String>,
}

/// Trait for pulling cost data from a billing source
#[async_trait]
pub trait Collector: Send + Sync {
    /// Service id this collector reports for (e.g. "aws")
    fn service_id(&self) -> &str;

    /// Fetch the current batch of daily cost entries
    async fn collect(&self, credentials: &Credentials) -> Result<CollectorOutput>;
}

/// Opaque credential bag handed to a collector
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// Never print secret values
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Credentials").field("keys", &keys).finish()
    }
}

/// Boundary to secret storage
pub trait CredentialSource: Send + Sync {
    fn credentials_for(&self, service_id: &str) -> Result<Credentials>;
}

/// Reads `COSTLEDGER_<SERVICE>_<KEY>` environment variables.
///
/// `COSTLEDGER_GOOGLE_CLOUD_TOKEN` yields key `token` for `google-cloud`.
#[derive(Debug, Default)]
pub struct EnvCredentialSource;

impl EnvCredentialSource {
    pub fn prefix_for(service_id: &str) -> String {
        format!(
            "COSTLEDGER_{}_",
            service_id.replace('-', "_").to_ascii_uppercase()
        )
    }

    fn from_vars(
        service_id: &str,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Credentials {
        let prefix = Self::prefix_for(service_id);
        let values = vars
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_ascii_lowercase(), v))
            })
            .collect();
        Credentials { values }
    }
}

impl CredentialSource for EnvCredentialSource {
    fn credentials_for(&self, service_id: &str) -> Result<Credentials> {
        let prefix = Self::prefix_for(service_id);
        let mut vars = Vec::new();
        for (key, value) in std::env::vars_os() {
            let Some(key) = key.to_str().filter(|k| k.starts_with(&prefix)) else {
                continue;
            };
            let value = value.into_string().map_err(|_| {
                CostLedgerError::Credentials(format!("{} is not valid UTF-8", key))
            })?;
            vars.push((key.to_string(), value));
        }
        Ok(Self::from_vars(service_id, vars.into_iter()))
    }
}

/// Fixed credentials per service, for embedding and tests
#[derive(Debug, Default)]
pub struct StaticCredentialSource {
    by_service: HashMap<String, Credentials>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, service_id: &str, credentials: Credentials) -> Self {
        self.by_service.insert(service_id.to_string(), credentials);
        self
    }
}

impl CredentialSource for StaticCredentialSource {
    fn credentials_for(&self, service_id: &str) -> Result<Credentials> {
        Ok(self.by_service.get(service_id).cloned().unwrap_or_default())
    }
}

/// One day of normalized billing export, as read from files or HTTP
#[derive(Debug, Clone, Deserialize)]
pub struct ExportRecord {
    /// `YYYY-MM-DD` or RFC 3339
    #[serde(alias = "timestamp")]
    pub date: String,
    #[serde(alias = "totalCost")]
    pub total_cost: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceCost>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExportRecord {
    /// Convert to a cost entry; `None` if the date cannot be parsed
    pub fn into_entry(self, service_id: &str) -> Option<CostEntry> {
        let timestamp = parse_export_date(&self.date)?;
        Some(CostEntry {
            service_id: service_id.to_string(),
            timestamp,
            total_cost: self.total_cost,
            currency: self
                .currency
                .unwrap_or_else(|| crate::types::DEFAULT_CURRENCY.to_string()),
            resources: self.resources,
            metadata: self.metadata,
        })
    }
}

/// Parse `YYYY-MM-DD` (as midnight UTC) or an RFC 3339 timestamp
pub fn parse_export_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(day_start(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert export records, reporting how many had unusable dates
pub(crate) fn records_to_entries(
    service_id: &str,
    records: Vec<ExportRecord>,
) -> (Vec<CostEntry>, usize) {
    let mut bad_dates = 0;
    let entries = records
        .into_iter()
        .filter_map(|r| {
            let raw_date = r.date.clone();
            let entry = r.into_entry(service_id);
            if entry.is_none() {
                tracing::warn!(service = service_id, date = %raw_date, "unparseable date, skipping record");
                bad_dates += 1;
            }
            entry
        })
        .collect();
    (entries, bad_dates)
}

/// Registry of configured collectors
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self {
            collectors: Vec::new(),
        }
    }

    /// Build collectors for every `[[services]]` entry in the config
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for service in &config.services {
            let collector: Arc<dyn Collector> = match &service.kind {
                CollectorKind::FileExport { path } => {
                    Arc::new(FileExportCollector::new(&service.id, path.clone()))
                }
                CollectorKind::HttpJson { url, timeout_secs } => Arc::new(
                    HttpJsonCollector::new(&service.id, url, *timeout_secs)?,
                ),
            };
            registry.register(collector)?;
        }
        Ok(registry)
    }

    /// Add a collector; service ids must be unique
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<()> {
        if self.get(collector.service_id()).is_some() {
            return Err(CostLedgerError::Config(format!(
                "duplicate collector for service {}",
                collector.service_id()
            )));
        }
        self.collectors.push(collector);
        Ok(())
    }

    /// Get all registered collectors
    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    /// Find a collector by service id
    pub fn get(&self, service_id: &str) -> Option<Arc<dyn Collector>> {
        self.collectors
            .iter()
            .find(|c| c.service_id() == service_id)
            .cloned()
    }

    /// Registered service ids, ascending
    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .collectors
            .iter()
            .map(|c| c.service_id().to_string())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
