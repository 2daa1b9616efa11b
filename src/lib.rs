//! costledger: idempotent multi-provider cost ledger with spike detection
//!
//! Collectors pull daily billing data, the reconciler merges it into a
//! keyed ledger, and the anomaly detector compares each day against a
//! trailing baseline.

pub mod collectors;
pub mod config;
pub mod services;
pub mod store;
pub mod types;
