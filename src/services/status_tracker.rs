//! Last collection outcome per service, for health reporting

use std::collections::BTreeMap;
use std::sync::Arc;

use super::clock::Clock;
use crate::store::StatusStore;
use crate::types::{CollectionStatus, Result};

pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn StatusStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn record_success(
        &self,
        service_id: &str,
        count: usize,
        warning: Option<String>,
    ) -> Result<()> {
        let status = CollectionStatus::success(service_id, self.clock.now(), count, warning);
        self.store.put_status(status).await
    }

    pub async fn record_failure(&self, service_id: &str, error_message: &str) -> Result<()> {
        let status =
            CollectionStatus::failure(service_id, self.clock.now(), error_message.to_string());
        self.store.put_status(status).await
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, CollectionStatus>> {
        self.store.all_statuses().await
    }
}
