//! Collection trigger boundary
//!
//! Runs collect → reconcile → record-status as one unit of work per
//! service, guarded so that two attempts for the same service never
//! interleave. Different services run independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinSet;

use super::anomaly::AnomalyDetector;
use super::clock::Clock;
use super::reconciler::{Reconciler, SkippedEntry};
use super::status_tracker::StatusTracker;
use crate::collectors::{Collector, CollectorRegistry, CredentialSource};
use crate::config::AnomalyConfig;
use crate::store::{LedgerStore, StatusStore};
use crate::types::{
    AnomalyEvent, CollectionStatus, CostLedgerError, DateRange, LedgerRecord, Result,
};

/// Summary returned to the trigger caller after a successful collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOutcome {
    pub service_id: String,
    /// Entries the collector returned
    pub costs_collected: usize,
    pub new_records: usize,
    pub updated_records: usize,
    pub warning: Option<String>,
    pub skipped: Vec<SkippedEntry>,
}

/// One async mutex per service id, created on first use
#[derive(Default)]
struct ServiceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ServiceLocks {
    async fn acquire(&self, service_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(service_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct CollectionService {
    registry: CollectorRegistry,
    credentials: Arc<dyn CredentialSource>,
    ledger: Arc<dyn LedgerStore>,
    reconciler: Reconciler,
    tracker: StatusTracker,
    detector: AnomalyDetector,
    anomaly: AnomalyConfig,
    clock: Arc<dyn Clock>,
    locks: ServiceLocks,
}

impl CollectionService {
    pub fn new(
        registry: CollectorRegistry,
        credentials: Arc<dyn CredentialSource>,
        ledger: Arc<dyn LedgerStore>,
        statuses: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        anomaly: AnomalyConfig,
    ) -> Self {
        Self {
            registry,
            credentials,
            reconciler: Reconciler::new(ledger.clone(), clock.clone()),
            tracker: StatusTracker::new(statuses, clock.clone()),
            detector: AnomalyDetector::with_baseline_days(anomaly.baseline_days),
            ledger,
            anomaly,
            clock,
            locks: ServiceLocks::default(),
        }
    }

    /// Registered service ids, ascending
    pub fn service_ids(&self) -> Vec<String> {
        self.registry.service_ids()
    }

    /// Collect and reconcile one service.
    ///
    /// Exactly one of success/failure is recorded per attempt. A failure to
    /// record the status is logged and never replaces the collection result.
    pub async fn trigger_collection(&self, service_id: &str) -> Result<CollectionOutcome> {
        let collector = self
            .registry
            .get(service_id)
            .ok_or_else(|| CostLedgerError::UnknownService(service_id.to_string()))?;

        let _guard = self.locks.acquire(service_id).await;
        tracing::info!(service = service_id, "collection started");

        let result = self.run_collection(collector.as_ref(), service_id).await;

        let recorded = match &result {
            Ok(outcome) => {
                self.tracker
                    .record_success(service_id, outcome.costs_collected, outcome.warning.clone())
                    .await
            }
            Err(err) => {
                tracing::warn!(service = service_id, error = %err, "collection failed");
                self.tracker
                    .record_failure(service_id, &err.to_string())
                    .await
            }
        };
        if let Err(status_err) = recorded {
            tracing::error!(service = service_id, error = %status_err, "failed to record collection status");
        }

        result
    }

    async fn run_collection(
        &self,
        collector: &dyn Collector,
        service_id: &str,
    ) -> Result<CollectionOutcome> {
        let credentials = self.credentials.credentials_for(service_id)?;
        let output = collector.collect(&credentials).await?;
        let costs_collected = output.entries.len();

        let summary = self.reconciler.reconcile(service_id, output.entries).await?;

        if let Some(warning) = &output.warning {
            tracing::warn!(service = service_id, %warning, "collector reported a warning");
        }
        let warning = combine_warnings(output.warning, &summary.skipped);

        tracing::info!(
            service = service_id,
            collected = costs_collected,
            new = summary.new_records,
            updated = summary.updated_records,
            "collection finished"
        );

        Ok(CollectionOutcome {
            service_id: service_id.to_string(),
            costs_collected,
            new_records: summary.new_records,
            updated_records: summary.updated_records,
            warning,
            skipped: summary.skipped,
        })
    }

    /// Collect every registered service concurrently; results ordered by service id.
    /// A task that panics is reported, and recorded, as a failure of its service.
    pub async fn collect_all(self: &Arc<Self>) -> Vec<(String, Result<CollectionOutcome>)> {
        let mut tasks = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
        for service_id in self.service_ids() {
            let service = Arc::clone(self);
            let id = service_id.clone();
            let handle = tasks.spawn(async move { service.trigger_collection(&id).await });
            names.insert(handle.id(), service_id);
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task_id, result)) => {
                    if let Some(service_id) = names.remove(&task_id) {
                        results.push((service_id, result));
                    }
                }
                Err(join_err) => {
                    let Some(service_id) = names.remove(&join_err.id()) else {
                        continue;
                    };
                    tracing::error!(service = %service_id, error = %join_err, "collection task failed");
                    let message = format!("collection task failed: {}", join_err);
                    if let Err(status_err) = self.tracker.record_failure(&service_id, &message).await {
                        tracing::error!(service = %service_id, error = %status_err, "failed to record collection status");
                    }
                    let err = CostLedgerError::Adapter {
                        service: service_id.clone(),
                        message,
                    };
                    results.push((service_id, Err(err)));
                }
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Spike events for one service, or for every service in the ledger.
    /// `threshold_percent` defaults to the configured threshold.
    pub async fn get_anomalies(
        &self,
        service_id: Option<&str>,
        threshold_percent: Option<f64>,
    ) -> Result<Vec<AnomalyEvent>> {
        let threshold = threshold_percent.unwrap_or(self.anomaly.threshold_percent);
        if !threshold.is_finite() {
            return Err(CostLedgerError::Validation(format!(
                "threshold must be a finite number, got {}",
                threshold
            )));
        }

        let services = match service_id {
            Some(id) => vec![id.to_string()],
            None => self.ledger.service_ids().await?,
        };

        let range = self.detection_range();
        let mut windows: BTreeMap<String, Vec<LedgerRecord>> = BTreeMap::new();
        for id in services {
            let window = self.ledger.query(&id, range).await?;
            windows.insert(id, window);
        }

        let events = self.detector.detect_all(&windows, threshold);
        tracing::debug!(
            services = windows.len(),
            anomalies = events.len(),
            resource_spikes = events.iter().filter(|e| e.is_resource_spike()).count(),
            "anomaly scan"
        );
        Ok(events)
    }

    pub async fn get_collection_statuses(&self) -> Result<BTreeMap<String, CollectionStatus>> {
        self.tracker.get_all().await
    }

    /// Ledger records for the last `days` days (including today), ascending
    pub async fn ledger_window(&self, service_id: &str, days: u32) -> Result<Vec<LedgerRecord>> {
        let range = DateRange::trailing(self.clock.now().date_naive(), days);
        self.ledger.query(service_id, range).await
    }

    fn detection_range(&self) -> DateRange {
        DateRange::trailing(self.clock.now().date_naive(), self.anomaly.lookback_days)
    }
}

fn combine_warnings(collector_warning: Option<String>, skipped: &[SkippedEntry]) -> Option<String> {
    let skipped_note =
        (!skipped.is_empty()).then(|| format!("skipped {} invalid entries", skipped.len()));
    match (collector_warning, skipped_note) {
        (Some(w), Some(s)) => Some(format!("{}; {}", w, s)),
        (w, s) => w.or(s),
    }
}
