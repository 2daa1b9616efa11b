//! Cost entry and ledger record types

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use super::ValidationIssue;

pub const DEFAULT_CURRENCY: &str = "USD";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Cost of a single billable resource within a day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceCost {
    pub resource_id: String,
    pub name: String,
    /// Free-text classification (e.g. "ec2-instance", "bucket")
    #[serde(rename = "type")]
    pub resource_type: String,
    pub cost: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Normalized cost for one service on one calendar day, as emitted by a collector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostEntry {
    pub service_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_cost: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub resources: Vec<ResourceCost>,
    /// Provenance only, never interpreted
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CostEntry {
    /// UTC calendar day this entry represents. Intra-day time is dropped.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Check the entry against the service it is being reconciled for.
    pub fn validate(&self, expected_service: &str) -> Result<(), ValidationIssue> {
        if self.service_id.trim().is_empty() {
            return Err(ValidationIssue::MissingServiceId);
        }
        if self.service_id != expected_service {
            return Err(ValidationIssue::ServiceMismatch {
                expected: expected_service.to_string(),
                found: self.service_id.clone(),
            });
        }
        if !is_valid_amount(self.total_cost) {
            return Err(ValidationIssue::InvalidTotalCost(self.total_cost));
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(self.resources.len());
        for (idx, resource) in self.resources.iter().enumerate() {
            if resource.resource_id.trim().is_empty() {
                return Err(ValidationIssue::EmptyResourceId(idx));
            }
            if !seen.insert(resource.resource_id.as_str()) {
                return Err(ValidationIssue::DuplicateResourceId(
                    resource.resource_id.clone(),
                ));
            }
            if !is_valid_amount(resource.cost) {
                return Err(ValidationIssue::InvalidResourceCost {
                    resource_id: resource.resource_id.clone(),
                    cost: resource.cost,
                });
            }
        }
        Ok(())
    }
}

fn is_valid_amount(amount: f64) -> bool {
    amount.is_finite() && amount >= 0.0
}

/// Persisted, deduplicated form of a [`CostEntry`]: one per (service, day)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRecord {
    pub service_id: String,
    pub date: NaiveDate,
    /// Midnight UTC of `date`
    pub timestamp: DateTime<Utc>,
    pub total_cost: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub resources: Vec<ResourceCost>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Build a record from an entry, truncating its timestamp to the day.
    pub fn from_entry(
        entry: CostEntry,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let date = entry.date();
        Self {
            service_id: entry.service_id,
            date,
            timestamp: day_start(date),
            total_cost: entry.total_cost,
            currency: entry.currency,
            resources: entry.resources,
            metadata: entry.metadata,
            created_at,
            updated_at,
        }
    }

    pub fn key(&self) -> String {
        ledger_key(&self.service_id, self.date)
    }
}

/// Midnight UTC of the given day
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Composite ledger key: `{service_id}_{YYYY-MM-DD}`
pub fn ledger_key(service_id: &str, date: NaiveDate) -> String {
    format!("{}_{}", service_id, date.format("%Y-%m-%d"))
}

/// Split a ledger key back into service id and date.
///
/// The date is read from the right so the split never depends on
/// what characters the service id contains.
pub fn parse_ledger_key(key: &str) -> Option<(&str, NaiveDate)> {
    let (service_id, date) = key.rsplit_once('_')?;
    if service_id.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((service_id, date))
}

fn service_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("valid regex"))
}

/// Service ids are lowercase ASCII tokens without underscores
pub fn is_valid_service_id(service_id: &str) -> bool {
    service_id_pattern().is_match(service_id)
}

/// Inclusive calendar-day range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` calendar days ending on (and including) `end`
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - chrono::Duration::days(span),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}
