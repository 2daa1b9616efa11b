//! Per-service collection outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectionState {
    Success,
    Error,
}

/// Outcome of the most recent collection attempt for one service.
/// Overwritten on every attempt; no history is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStatus {
    pub service_id: String,
    pub status: CollectionState,
    pub last_run: DateTime<Utc>,
    /// Entries processed by the attempt, 0 on error
    pub costs_collected: usize,
    #[serde(default)]
    pub warning: Option<String>,
    /// Present only when `status` is `Error`
    #[serde(default)]
    pub error: Option<String>,
}

impl CollectionStatus {
    pub fn success(
        service_id: &str,
        last_run: DateTime<Utc>,
        costs_collected: usize,
        warning: Option<String>,
    ) -> Self {
        Self {
            service_id: service_id.to_string(),
            status: CollectionState::Success,
            last_run,
            costs_collected,
            warning,
            error: None,
        }
    }

    pub fn failure(service_id: &str, last_run: DateTime<Utc>, error: String) -> Self {
        Self {
            service_id: service_id.to_string(),
            status: CollectionState::Error,
            last_run,
            costs_collected: 0,
            warning: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CollectionState::Success
    }
}
