//! File-backed store: `ledger.json` and `status.json` under the data directory
//!
//! Every access holds an fs2 lock on `store.lock` (shared for reads,
//! exclusive for read-modify-write) so that concurrent processes never
//! interleave a write. Documents are replaced via temp file + rename.

use async_trait::async_trait;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::{select_window, LedgerStore, StatusStore};
use crate::types::{CollectionStatus, CostLedgerError, DateRange, LedgerRecord, Result};

const LEDGER_FILE: &str = "ledger.json";
const STATUS_FILE: &str = "status.json";
const LOCK_FILE: &str = "store.lock";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LedgerDocument {
    updated_at: i64,
    records: BTreeMap<String, LedgerRecord>,
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE)
    }

    fn open_lock(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.data_dir.join(LOCK_FILE))
    }

    fn with_shared_lock<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let lock = self
            .open_lock()
            .map_err(|e| CostLedgerError::StoreRead(format!("Failed to open lock file: {}", e)))?;
        lock.lock_shared().map_err(|e| {
            CostLedgerError::StoreRead(format!("Failed to acquire read lock: {}", e))
        })?;
        let result = f(self);
        let _ = lock.unlock();
        result
    }

    fn with_exclusive_lock<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let lock = self
            .open_lock()
            .map_err(|e| CostLedgerError::StoreWrite(format!("Failed to open lock file: {}", e)))?;
        lock.lock_exclusive().map_err(|e| {
            CostLedgerError::StoreWrite(format!("Failed to acquire write lock: {}", e))
        })?;
        let result = f(self);
        let _ = lock.unlock();
        result
    }

    /// Run blocking file I/O off the async runtime
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(JsonFileStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| CostLedgerError::Io(std::io::Error::other(e.to_string())))?
    }

    fn load_ledger(&self) -> Result<LedgerDocument> {
        read_document(&self.ledger_path())
    }

    fn load_statuses(&self) -> Result<BTreeMap<String, CollectionStatus>> {
        read_document(&self.status_path())
    }
}

/// Raw file content, `None` when the file does not exist yet
fn read_content(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut content = String::new();
    File::open(path)
        .and_then(|f| std::io::BufReader::new(f).read_to_string(&mut content))
        .map_err(|e| {
            CostLedgerError::StoreRead(format!("Failed to read {}: {}", path.display(), e))
        })?;
    Ok(Some(content))
}

/// Missing file reads as an empty document; unreadable or corrupt data is an error.
fn read_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let Some(content) = read_content(path)? else {
        return Ok(T::default());
    };

    serde_json::from_str(&content).map_err(|e| {
        CostLedgerError::StoreRead(format!("Corrupted store file {}: {}", path.display(), e))
    })
}

/// Atomic replace: write temp file, fsync, rename over the target.
fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| CostLedgerError::StoreWrite(format!("Serialization failed: {}", e)))?;

    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&temp_path)
            .map_err(|e| CostLedgerError::StoreWrite(format!("Failed to create temp file: {}", e)))?;
        file.write_all(content.as_bytes())
            .map_err(|e| CostLedgerError::StoreWrite(format!("Failed to write temp file: {}", e)))?;
        file.sync_all()
            .map_err(|e| CostLedgerError::StoreWrite(format!("Failed to sync temp file: {}", e)))?;
    }

    fs::rename(&temp_path, path)
        .map_err(|e| CostLedgerError::StoreWrite(format!("Failed to rename temp file: {}", e)))
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, LedgerRecord>> {
        let keys = keys.to_vec();
        self.blocking(move |store| {
            store.with_shared_lock(|s| {
                let mut document = s.load_ledger()?;
                Ok(keys
                    .into_iter()
                    .filter_map(|k| document.records.remove(&k).map(|r| (k, r)))
                    .collect())
            })
        })
        .await
    }

    async fn batch_write(&self, records: BTreeMap<String, LedgerRecord>) -> Result<()> {
        self.blocking(move |store| {
            store.with_exclusive_lock(|s| {
                let mut document = s.load_ledger().map_err(|e| match e {
                    CostLedgerError::StoreRead(msg) => CostLedgerError::StoreWrite(msg),
                    other => other,
                })?;
                document.records.extend(records);
                document.updated_at = chrono::Utc::now().timestamp();
                write_document(&s.ledger_path(), &document)
            })
        })
        .await
    }

    async fn query(&self, service_id: &str, range: DateRange) -> Result<Vec<LedgerRecord>> {
        let service_id = service_id.to_string();
        self.blocking(move |store| {
            store.with_shared_lock(|s| {
                let document = s.load_ledger()?;
                Ok(select_window(document.records.values(), &service_id, range))
            })
        })
        .await
    }

    async fn service_ids(&self) -> Result<Vec<String>> {
        self.blocking(|store| {
            store.with_shared_lock(|s| {
                let document = s.load_ledger()?;
                let ids: BTreeSet<String> = document
                    .records
                    .into_values()
                    .map(|r| r.service_id)
                    .collect();
                Ok(ids.into_iter().collect())
            })
        })
        .await
    }
}

#[async_trait]
impl StatusStore for JsonFileStore {
    async fn put_status(&self, status: CollectionStatus) -> Result<()> {
        self.blocking(move |store| {
            store.with_exclusive_lock(|s| {
                let path = s.status_path();
                let content = read_content(&path).map_err(|e| match e {
                    CostLedgerError::StoreRead(msg) => CostLedgerError::StoreWrite(msg),
                    other => other,
                })?;

                // A corrupt status file is rebuilt; an unreadable one fails the write
                let mut statuses: BTreeMap<String, CollectionStatus> = match content {
                    None => BTreeMap::new(),
                    Some(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                        tracing::warn!(path = %path.display(), error = %e, "corrupted status file, rebuilding");
                        BTreeMap::new()
                    }),
                };
                statuses.insert(status.service_id.clone(), status);
                write_document(&path, &statuses)
            })
        })
        .await
    }

    async fn all_statuses(&self) -> Result<BTreeMap<String, CollectionStatus>> {
        self.blocking(|store| store.with_shared_lock(|s| s.load_statuses()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CostEntry;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().to_path_buf()).unwrap();
        (store, temp_dir)
    }

    fn record(service: &str, day: u32, cost: f64) -> LedgerRecord {
        let now = Utc::now();
        let entry = CostEntry {
            service_id: service.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, day, 0, 0, 0).unwrap(),
            total_cost: cost,
            currency: "USD".into(),
            resources: vec![],
            metadata: BTreeMap::new(),
        };
        LedgerRecord::from_entry(entry, now, now)
    }

    fn batch(records: Vec<LedgerRecord>) -> BTreeMap<String, LedgerRecord> {
        records.into_iter().map(|r| (r.key(), r)).collect()
    }

    #[tokio::test]
    async fn test_empty_store_reads_empty() {
        let (store, _temp) = create_test_store();
        let found = store.batch_get(&["aws_2025-10-01".into()]).await.unwrap();
        assert!(found.is_empty());
        assert!(store.service_ids().await.unwrap().is_empty());
        assert!(store.all_statuses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let (store, _temp) = create_test_store();
        store
            .batch_write(batch(vec![record("aws", 1, 12.0), record("aws", 2, 3.0)]))
            .await
            .unwrap();

        let found = store
            .batch_get(&["aws_2025-10-01".into(), "aws_2025-10-03".into()])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found["aws_2025-10-01"].total_cost, 12.0);
        assert!(store.ledger_path().exists());
    }

    #[tokio::test]
    async fn test_write_persists_across_instances() {
        let (store, temp) = create_test_store();
        store
            .batch_write(batch(vec![record("gcp", 4, 1.5)]))
            .await
            .unwrap();

        let reopened = JsonFileStore::new(temp.path().to_path_buf()).unwrap();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 31).unwrap(),
        );
        let window = reopened.query("gcp", range).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].total_cost, 1.5);
    }

    #[tokio::test]
    async fn test_corrupted_ledger_is_read_error() {
        let (store, _temp) = create_test_store();
        fs::write(store.ledger_path(), "not valid json {{{").unwrap();

        let err = store
            .batch_get(&["aws_2025-10-01".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, CostLedgerError::StoreRead(_)));
    }

    #[tokio::test]
    async fn test_corrupted_ledger_blocks_write() {
        let (store, _temp) = create_test_store();
        fs::write(store.ledger_path(), "not valid json {{{").unwrap();

        let err = store
            .batch_write(batch(vec![record("aws", 1, 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, CostLedgerError::StoreWrite(_)));
        // The corrupt file is left for inspection, not silently replaced
        assert_eq!(
            fs::read_to_string(store.ledger_path()).unwrap(),
            "not valid json {{{"
        );
    }

    #[tokio::test]
    async fn test_status_round_trip_and_overwrite() {
        let (store, _temp) = create_test_store();
        store
            .put_status(CollectionStatus::success("aws", Utc::now(), 2, None))
            .await
            .unwrap();
        store
            .put_status(CollectionStatus::success(
                "gcp",
                Utc::now(),
                5,
                Some("partial".into()),
            ))
            .await
            .unwrap();
        store
            .put_status(CollectionStatus::failure("aws", Utc::now(), "denied".into()))
            .await
            .unwrap();

        let all = store.all_statuses().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["aws"].error.as_deref(), Some("denied"));
        assert_eq!(all["gcp"].warning.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_corrupted_status_file_is_rebuilt() {
        let (store, _temp) = create_test_store();
        store
            .put_status(CollectionStatus::success("aws", Utc::now(), 2, None))
            .await
            .unwrap();
        let full = fs::read_to_string(store.status_path()).unwrap();
        fs::write(store.status_path(), &full[..full.len() / 2]).unwrap();

        assert!(matches!(
            store.all_statuses().await.unwrap_err(),
            CostLedgerError::StoreRead(_)
        ));

        store
            .put_status(CollectionStatus::failure("gcp", Utc::now(), "timeout".into()))
            .await
            .unwrap();

        let all = store.all_statuses().await.unwrap();
        let ids: Vec<&str> = all.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["gcp"]);
    }

    #[tokio::test]
    async fn test_unreadable_status_file_fails_put() {
        let (store, _temp) = create_test_store();
        // A directory in place of the file cannot be read as a document
        fs::create_dir(store.status_path()).unwrap();

        let err = store
            .put_status(CollectionStatus::success("aws", Utc::now(), 1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, CostLedgerError::StoreWrite(_)));
        assert!(store.status_path().is_dir());
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let (store, _temp) = create_test_store();
        store
            .batch_write(batch(vec![record("aws", 1, 1.0)]))
            .await
            .unwrap();
        assert!(!store.ledger_path().with_extension("json.tmp").exists());
    }
}
