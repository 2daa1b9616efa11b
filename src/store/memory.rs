//! In-process store, used by tests and one-shot runs

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{select_window, LedgerStore, StatusStore};
use crate::types::{CollectionStatus, CostLedgerError, DateRange, LedgerRecord, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<BTreeMap<String, LedgerRecord>>,
    statuses: Mutex<BTreeMap<String, CollectionStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger records currently held
    pub fn len(&self) -> usize {
        self.ledger.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct lookup by composite key
    pub fn get(&self, key: &str) -> Option<LedgerRecord> {
        self.ledger.lock().ok()?.get(key).cloned()
    }

    fn ledger(&self) -> Result<MutexGuard<'_, BTreeMap<String, LedgerRecord>>> {
        self.ledger
            .lock()
            .map_err(|_| CostLedgerError::StoreRead("ledger lock poisoned".into()))
    }

    fn statuses(&self) -> Result<MutexGuard<'_, BTreeMap<String, CollectionStatus>>> {
        self.statuses
            .lock()
            .map_err(|_| CostLedgerError::StoreRead("status lock poisoned".into()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, LedgerRecord>> {
        let ledger = self.ledger()?;
        Ok(keys
            .iter()
            .filter_map(|k| ledger.get(k).map(|r| (k.clone(), r.clone())))
            .collect())
    }

    async fn batch_write(&self, records: BTreeMap<String, LedgerRecord>) -> Result<()> {
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| CostLedgerError::StoreWrite("ledger lock poisoned".into()))?;
        ledger.extend(records);
        Ok(())
    }

    async fn query(&self, service_id: &str, range: DateRange) -> Result<Vec<LedgerRecord>> {
        let ledger = self.ledger()?;
        Ok(select_window(ledger.values(), service_id, range))
    }

    async fn service_ids(&self) -> Result<Vec<String>> {
        let ledger = self.ledger()?;
        let ids: BTreeSet<String> = ledger.values().map(|r| r.service_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn put_status(&self, status: CollectionStatus) -> Result<()> {
        let mut statuses = self
            .statuses
            .lock()
            .map_err(|_| CostLedgerError::StoreWrite("status lock poisoned".into()))?;
        statuses.insert(status.service_id.clone(), status);
        Ok(())
    }

    async fn all_statuses(&self) -> Result<BTreeMap<String, CollectionStatus>> {
        Ok(self.statuses()?.clone())
    }
}
