//! Collector for billing endpoints that serve normalized JSON
//!
//! GETs a JSON array of export records. A `token` credential, when
//! present, is sent as a bearer token.

use async_trait::async_trait;
use std::time::Duration;

use super::{records_to_entries, Collector, CollectorOutput, Credentials, ExportRecord};
use crate::types::{CostLedgerError, Result};

/// HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct HttpJsonCollector {
    service_id: String,
    url: String,
    client: reqwest::Client,
}

impl HttpJsonCollector {
    pub fn new(service_id: &str, url: &str, timeout_secs: Option<u64>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| CostLedgerError::Config(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            service_id: service_id.to_string(),
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn adapter_error(&self, message: String) -> CostLedgerError {
        CostLedgerError::Adapter {
            service: self.service_id.clone(),
            message,
        }
    }
}

#[async_trait]
impl Collector for HttpJsonCollector {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    async fn collect(&self, credentials: &Credentials) -> Result<CollectorOutput> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = credentials.get("token") {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.adapter_error(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.adapter_error(format!("billing endpoint returned {}", status)));
        }

        let records: Vec<ExportRecord> = response
            .json()
            .await
            .map_err(|e| self.adapter_error(format!("JSON parse error: {}", e)))?;

        let (entries, bad_dates) = records_to_entries(&self.service_id, records);
        Ok(CollectorOutput {
            entries,
            warning: (bad_dates > 0)
                .then(|| format!("skipped {} records with unparseable dates", bad_dates)),
        })
    }
}
