//! Anomaly events (computed on demand, never persisted)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Percent increase above which a spike is `High` rather than `Medium`
pub const HIGH_SEVERITY_PERCENT: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn from_percent_change(percent_change: f64) -> Self {
        if percent_change > HIGH_SEVERITY_PERCENT {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Whole-service daily total jumped
    CostSpike,
    /// A single resource's daily cost jumped
    ResourceSpike {
        resource_id: String,
        resource_name: String,
        resource_type: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyEvent {
    pub service_id: String,
    #[serde(flatten)]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub current_cost: f64,
    pub average_cost: f64,
    pub percent_change: f64,
    /// The day being flagged
    pub timestamp: DateTime<Utc>,
}

impl AnomalyEvent {
    pub fn is_resource_spike(&self) -> bool {
        matches!(self.kind, AnomalyKind::ResourceSpike { .. })
    }
}
