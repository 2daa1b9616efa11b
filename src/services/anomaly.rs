//! Trailing-average spike detection over ledger windows
//!
//! The most recent record in a service's window is compared against the
//! mean of the records immediately before it (the baseline). The same
//! comparison runs per resource, using only the baseline days that listed
//! that resource.

use std::collections::{BTreeMap, HashMap};

use crate::types::{AnomalyEvent, AnomalyKind, LedgerRecord, Severity};

/// Baseline length below which no anomaly can be asserted
pub const MIN_BASELINE_DAYS: usize = 7;

/// Percent change of `current` over `average`; 0 when the average is 0.
pub fn percent_change(current: f64, average: f64) -> f64 {
    if average == 0.0 {
        return 0.0;
    }
    (current - average) / average * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyDetector {
    baseline_days: usize,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            baseline_days: MIN_BASELINE_DAYS,
        }
    }

    /// Longer baselines are allowed; shorter ones are raised to the floor.
    pub fn with_baseline_days(baseline_days: usize) -> Self {
        Self {
            baseline_days: baseline_days.max(MIN_BASELINE_DAYS),
        }
    }

    pub fn baseline_days(&self) -> usize {
        self.baseline_days
    }

    /// Detect spikes for one service.
    ///
    /// Records belonging to other services are ignored. The window need not
    /// be sorted. Returns nothing unless there are at least `baseline_days`
    /// records before the most recent one.
    pub fn detect(
        &self,
        service_id: &str,
        window: &[LedgerRecord],
        threshold_percent: f64,
    ) -> Vec<AnomalyEvent> {
        let mut sorted: Vec<&LedgerRecord> = window
            .iter()
            .filter(|r| r.service_id == service_id)
            .collect();
        if sorted.len() <= self.baseline_days {
            return Vec::new();
        }
        sorted.sort_by_key(|r| r.timestamp);

        let (today, prior) = match sorted.split_last() {
            Some((today, prior)) => (*today, prior),
            None => return Vec::new(),
        };
        let baseline = &prior[prior.len() - self.baseline_days..];

        let mut events = Vec::new();

        let average = baseline.iter().map(|r| r.total_cost).sum::<f64>() / baseline.len() as f64;
        let change = percent_change(today.total_cost, average);
        if change > threshold_percent {
            events.push(AnomalyEvent {
                service_id: service_id.to_string(),
                kind: AnomalyKind::CostSpike,
                severity: Severity::from_percent_change(change),
                current_cost: today.total_cost,
                average_cost: average,
                percent_change: change,
                timestamp: today.timestamp,
            });
        }

        // (sum, days listed) per resource over the baseline
        let mut resource_totals: HashMap<&str, (f64, usize)> = HashMap::new();
        for record in baseline {
            for resource in &record.resources {
                let slot = resource_totals
                    .entry(resource.resource_id.as_str())
                    .or_insert((0.0, 0));
                slot.0 += resource.cost;
                slot.1 += 1;
            }
        }

        // Output follows today's resource order
        for resource in &today.resources {
            let Some(&(sum, days)) = resource_totals.get(resource.resource_id.as_str()) else {
                continue;
            };
            let average = sum / days as f64;
            let change = percent_change(resource.cost, average);
            if change > threshold_percent {
                events.push(AnomalyEvent {
                    service_id: service_id.to_string(),
                    kind: AnomalyKind::ResourceSpike {
                        resource_id: resource.resource_id.clone(),
                        resource_name: resource.name.clone(),
                        resource_type: resource.resource_type.clone(),
                    },
                    severity: Severity::from_percent_change(change),
                    current_cost: resource.cost,
                    average_cost: average,
                    percent_change: change,
                    timestamp: today.timestamp,
                });
            }
        }

        events
    }

    /// Detect across several services, each against its own window only.
    /// Services are visited in ascending id order.
    pub fn detect_all(
        &self,
        windows: &BTreeMap<String, Vec<LedgerRecord>>,
        threshold_percent: f64,
    ) -> Vec<AnomalyEvent> {
        windows
            .iter()
            .flat_map(|(service_id, window)| self.detect(service_id, window, threshold_percent))
            .collect()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}
