//! Reconciliation of collected cost batches into the ledger
//!
//! A batch is merged with one existence read and one batched write:
//! 1. invalid entries are skipped and reported, the rest keyed by
//!    `{service_id}_{YYYY-MM-DD}`
//! 2. all distinct keys are fetched in a single `batch_get`
//! 3. existing keys keep their `created_at`, new keys get `now`
//! 4. everything is written with a single `batch_write`
//!
//! Within one batch the later entry for a key wins and counts as an
//! update of the earlier one, so `new + updated` always equals the
//! number of valid entries.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::clock::Clock;
use crate::store::LedgerStore;
use crate::types::{
    is_valid_service_id, ledger_key, CostEntry, CostLedgerError, LedgerRecord, Result,
    ValidationIssue,
};

/// An entry left out of reconciliation, by batch position
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub index: usize,
    pub date: NaiveDate,
    pub issue: ValidationIssue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub new_records: usize,
    pub updated_records: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl ReconcileSummary {
    /// Valid entries written (new + updated)
    pub fn processed(&self) -> usize {
        self.new_records + self.updated_records
    }
}

pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Merge `batch` into the ledger for `service_id`.
    ///
    /// A failed existence read aborts before any write. A failed write is
    /// surfaced as-is and may leave the batch partially applied, depending
    /// on the store.
    pub async fn reconcile(
        &self,
        service_id: &str,
        batch: Vec<CostEntry>,
    ) -> Result<ReconcileSummary> {
        if !is_valid_service_id(service_id) {
            return Err(CostLedgerError::Validation(format!(
                "invalid service id {:?}",
                service_id
            )));
        }

        let mut summary = ReconcileSummary::default();
        let mut valid: Vec<(String, CostEntry)> = Vec::with_capacity(batch.len());

        for (index, entry) in batch.into_iter().enumerate() {
            match entry.validate(service_id) {
                Ok(()) => valid.push((ledger_key(service_id, entry.date()), entry)),
                Err(issue) => {
                    tracing::warn!(service = service_id, index, date = %entry.date(), %issue, "skipping invalid cost entry");
                    summary.skipped.push(SkippedEntry {
                        index,
                        date: entry.date(),
                        issue,
                    });
                }
            }
        }

        if valid.is_empty() {
            return Ok(summary);
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(valid.len());
        let keys: Vec<String> = valid
            .iter()
            .filter(|(key, _)| seen.insert(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();

        let existing: HashMap<String, LedgerRecord> =
            self.store.batch_get(&keys).await.map_err(into_read_error)?;

        let now = self.clock.now();
        let mut pending: BTreeMap<String, LedgerRecord> = BTreeMap::new();

        for (key, entry) in valid {
            let prior = existing.get(&key).or_else(|| pending.get(&key));
            let created_at = match prior {
                Some(record) => {
                    summary.updated_records += 1;
                    record.created_at
                }
                None => {
                    summary.new_records += 1;
                    now
                }
            };
            pending.insert(key, LedgerRecord::from_entry(entry, created_at, now));
        }

        let written = pending.len();
        self.store
            .batch_write(pending)
            .await
            .map_err(into_write_error)?;

        tracing::info!(
            service = service_id,
            new = summary.new_records,
            updated = summary.updated_records,
            skipped = summary.skipped.len(),
            written,
            "ledger reconciled"
        );
        Ok(summary)
    }
}

fn into_read_error(err: CostLedgerError) -> CostLedgerError {
    match err {
        CostLedgerError::StoreRead(_) => err,
        other => CostLedgerError::StoreRead(other.to_string()),
    }
}

fn into_write_error(err: CostLedgerError) -> CostLedgerError {
    match err {
        CostLedgerError::StoreWrite(_) => err,
        other => CostLedgerError::StoreWrite(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::{DateRange, ResourceCost};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_entry(service: &str, day: u32, cost: f64) -> CostEntry {
        CostEntry {
            service_id: service.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, day, 0, 0, 0).unwrap(),
            total_cost: cost,
            currency: "USD".into(),
            resources: vec![],
            metadata: BTreeMap::new(),
        }
    }

    fn setup() -> (Reconciler, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 10, 2, 6, 0, 0).unwrap(),
        ));
        let reconciler = Reconciler::new(store.clone(), clock.clone());
        (reconciler, store, clock)
    }

    /// Store that counts round trips and can be told to fail
    #[derive(Default)]
    struct ProbeStore {
        inner: MemoryStore,
        reads: AtomicUsize,
        writes: AtomicUsize,
        fail_read: bool,
        fail_write: bool,
    }

    #[async_trait]
    impl LedgerStore for ProbeStore {
        async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, LedgerRecord>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_read {
                return Err(CostLedgerError::Io(std::io::Error::other("disk gone")));
            }
            self.inner.batch_get(keys).await
        }

        async fn batch_write(&self, records: BTreeMap<String, LedgerRecord>) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_write {
                return Err(CostLedgerError::StoreWrite("quota exceeded".into()));
            }
            self.inner.batch_write(records).await
        }

        async fn query(&self, service_id: &str, range: DateRange) -> Result<Vec<LedgerRecord>> {
            self.inner.query(service_id, range).await
        }

        async fn service_ids(&self) -> Result<Vec<String>> {
            self.inner.service_ids().await
        }
    }

    // ========== idempotence ==========

    #[tokio::test]
    async fn test_reconcile_twice_is_idempotent() {
        let (reconciler, store, _clock) = setup();
        let batch = vec![make_entry("aws", 1, 12.0)];

        let first = reconciler.reconcile("aws", batch.clone()).await.unwrap();
        assert_eq!(first.new_records, 1);
        assert_eq!(first.updated_records, 0);

        let second = reconciler.reconcile("aws", batch).await.unwrap();
        assert_eq!(second.new_records, 0);
        assert_eq!(second.updated_records, 1);

        assert_eq!(store.len(), 1);
        let record = store.get("aws_2025-10-01").unwrap();
        assert_eq!(record.total_cost, 12.0);
    }

    #[tokio::test]
    async fn test_second_run_reports_batch_size_updates() {
        let (reconciler, store, _clock) = setup();
        let batch: Vec<CostEntry> = (1..=5).map(|d| make_entry("aws", d, d as f64)).collect();

        reconciler.reconcile("aws", batch.clone()).await.unwrap();
        let snapshot: Vec<f64> = (1..=5)
            .map(|d| store.get(&format!("aws_2025-10-0{}", d)).unwrap().total_cost)
            .collect();

        let second = reconciler.reconcile("aws", batch).await.unwrap();
        assert_eq!(second.new_records, 0);
        assert_eq!(second.updated_records, 5);
        let after: Vec<f64> = (1..=5)
            .map(|d| store.get(&format!("aws_2025-10-0{}", d)).unwrap().total_cost)
            .collect();
        assert_eq!(snapshot, after);
    }

    // ========== timestamps ==========

    #[tokio::test]
    async fn test_created_at_stable_across_updates() {
        let (reconciler, store, clock) = setup();
        let first_run = clock.now();

        reconciler
            .reconcile("aws", vec![make_entry("aws", 1, 10.0)])
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(6));
        reconciler
            .reconcile("aws", vec![make_entry("aws", 1, 11.0)])
            .await
            .unwrap();

        let record = store.get("aws_2025-10-01").unwrap();
        assert_eq!(record.created_at, first_run);
        assert_eq!(record.updated_at, first_run + chrono::Duration::hours(6));
        assert_eq!(record.total_cost, 11.0);
    }

    #[tokio::test]
    async fn test_insert_sets_both_timestamps() {
        let (reconciler, store, clock) = setup();
        reconciler
            .reconcile("aws", vec![make_entry("aws", 3, 1.0)])
            .await
            .unwrap();

        let record = store.get("aws_2025-10-03").unwrap();
        assert_eq!(record.created_at, clock.now());
        assert_eq!(record.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_update_replaces_whole_record() {
        let (reconciler, store, _clock) = setup();
        let mut first = make_entry("aws", 1, 10.0);
        first.resources = vec![ResourceCost {
            resource_id: "i-1".into(),
            name: "web".into(),
            resource_type: "ec2".into(),
            cost: 10.0,
            tags: BTreeMap::new(),
        }];
        reconciler.reconcile("aws", vec![first]).await.unwrap();

        // Newer run without resources wins outright; no field merge
        reconciler
            .reconcile("aws", vec![make_entry("aws", 1, 4.0)])
            .await
            .unwrap();

        let record = store.get("aws_2025-10-01").unwrap();
        assert_eq!(record.total_cost, 4.0);
        assert!(record.resources.is_empty());
    }

    // ========== keys and truncation ==========

    #[tokio::test]
    async fn test_intra_day_timestamp_is_truncated() {
        let (reconciler, store, _clock) = setup();
        let mut morning = make_entry("aws", 1, 1.0);
        morning.timestamp = Utc.with_ymd_and_hms(2025, 10, 1, 9, 15, 0).unwrap();
        let mut evening = make_entry("aws", 1, 2.0);
        evening.timestamp = Utc.with_ymd_and_hms(2025, 10, 1, 22, 40, 0).unwrap();

        reconciler.reconcile("aws", vec![morning]).await.unwrap();
        let second = reconciler.reconcile("aws", vec![evening]).await.unwrap();

        assert_eq!(second.updated_records, 1);
        assert_eq!(store.len(), 1);
        let record = store.get("aws_2025-10-01").unwrap();
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_in_batch_duplicate_last_wins() {
        let (reconciler, store, _clock) = setup();
        let batch = vec![
            make_entry("aws", 1, 1.0),
            make_entry("aws", 2, 5.0),
            make_entry("aws", 1, 3.0),
        ];

        let summary = reconciler.reconcile("aws", batch.clone()).await.unwrap();

        assert_eq!(summary.new_records, 2);
        assert_eq!(summary.updated_records, 1);
        assert_eq!(summary.processed(), 3);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("aws_2025-10-01").unwrap().total_cost, 3.0);

        let again = reconciler.reconcile("aws", batch).await.unwrap();
        assert_eq!(again.new_records, 0);
        assert_eq!(again.updated_records, 3);
        assert_eq!(store.get("aws_2025-10-01").unwrap().total_cost, 3.0);
    }

    // ========== validation ==========

    #[tokio::test]
    async fn test_invalid_entries_skipped_valid_processed() {
        let (reconciler, store, _clock) = setup();
        let batch = vec![
            make_entry("aws", 1, 1.0),
            make_entry("aws", 2, -4.0),
            make_entry("gcp", 3, 1.0),
            make_entry("aws", 4, 2.0),
        ];

        let summary = reconciler.reconcile("aws", batch).await.unwrap();

        assert_eq!(summary.new_records, 2);
        assert_eq!(summary.skipped.len(), 2);
        assert_eq!(summary.skipped[0].index, 1);
        assert_eq!(
            summary.skipped[0].issue,
            ValidationIssue::InvalidTotalCost(-4.0)
        );
        assert_eq!(summary.skipped[1].index, 2);
        assert!(matches!(
            summary.skipped[1].issue,
            ValidationIssue::ServiceMismatch { .. }
        ));
        assert_eq!(store.len(), 2);
        assert!(store.get("aws_2025-10-02").is_none());
    }

    #[tokio::test]
    async fn test_invalid_service_id_rejected_before_io() {
        let store = Arc::new(ProbeStore::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reconciler = Reconciler::new(store.clone(), clock);

        let err = reconciler
            .reconcile("AWS", vec![make_entry("AWS", 1, 1.0)])
            .await
            .unwrap_err();

        assert!(matches!(err, CostLedgerError::Validation(_)));
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let store = Arc::new(ProbeStore::default());
        let reconciler = Reconciler::new(store.clone(), Arc::new(ManualClock::new(Utc::now())));

        let summary = reconciler.reconcile("aws", vec![]).await.unwrap();

        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    // ========== store interaction ==========

    #[tokio::test]
    async fn test_single_read_and_write_per_batch() {
        let store = Arc::new(ProbeStore::default());
        let reconciler = Reconciler::new(store.clone(), Arc::new(ManualClock::new(Utc::now())));
        let batch: Vec<CostEntry> = (1..=20).map(|d| make_entry("aws", d, 1.0)).collect();

        reconciler.reconcile("aws", batch).await.unwrap();

        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_before_write() {
        let store = Arc::new(ProbeStore {
            fail_read: true,
            ..Default::default()
        });
        let reconciler = Reconciler::new(store.clone(), Arc::new(ManualClock::new(Utc::now())));

        let err = reconciler
            .reconcile("aws", vec![make_entry("aws", 1, 1.0)])
            .await
            .unwrap_err();

        assert!(matches!(err, CostLedgerError::StoreRead(_)));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_surfaced() {
        let store = Arc::new(ProbeStore {
            fail_write: true,
            ..Default::default()
        });
        let reconciler = Reconciler::new(store.clone(), Arc::new(ManualClock::new(Utc::now())));

        let err = reconciler
            .reconcile("aws", vec![make_entry("aws", 1, 1.0)])
            .await
            .unwrap_err();

        match err {
            CostLedgerError::StoreWrite(msg) => assert_eq!(msg, "quota exceeded"),
            other => panic!("expected write error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_services_do_not_collide() {
        let (reconciler, store, _clock) = setup();
        reconciler
            .reconcile("aws", vec![make_entry("aws", 1, 1.0)])
            .await
            .unwrap();
        let gcp = reconciler
            .reconcile("gcp", vec![make_entry("gcp", 1, 2.0)])
            .await
            .unwrap();

        assert_eq!(gcp.new_records, 1);
        assert_eq!(store.len(), 2);
    }
}
