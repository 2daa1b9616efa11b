//! Document store boundary for the ledger and collection statuses

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::types::{CollectionStatus, DateRange, LedgerRecord, Result};

/// Keyed ledger storage. Keys are `{service_id}_{YYYY-MM-DD}`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch all requested keys in one round trip. Absent keys are omitted.
    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, LedgerRecord>>;

    /// Write every record, replacing any existing document under the same key.
    async fn batch_write(&self, records: BTreeMap<String, LedgerRecord>) -> Result<()>;

    /// Records for one service within `range`, ascending by date
    async fn query(&self, service_id: &str, range: DateRange) -> Result<Vec<LedgerRecord>>;

    /// Every service id with at least one record, ascending
    async fn service_ids(&self) -> Result<Vec<String>>;
}

/// One status document per service, overwritten on every put
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn put_status(&self, status: CollectionStatus) -> Result<()>;

    async fn all_statuses(&self) -> Result<BTreeMap<String, CollectionStatus>>;
}

fn select_window<'a>(
    records: impl Iterator<Item = &'a LedgerRecord>,
    service_id: &str,
    range: DateRange,
) -> Vec<LedgerRecord> {
    let mut window: Vec<LedgerRecord> = records
        .filter(|r| r.service_id == service_id && range.contains(r.date))
        .cloned()
        .collect();
    window.sort_by_key(|r| r.date);
    window
}
