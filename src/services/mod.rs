//! Services for reconciliation, anomaly detection and collection runs

pub mod anomaly;
pub mod clock;
pub mod collection;
pub mod reconciler;
pub mod status_tracker;

pub use anomaly::{percent_change, AnomalyDetector, MIN_BASELINE_DAYS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{CollectionOutcome, CollectionService};
pub use reconciler::{ReconcileSummary, Reconciler, SkippedEntry};
pub use status_tracker::StatusTracker;
