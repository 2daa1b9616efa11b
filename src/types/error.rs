use thiserror::Error;

/// costledger error types
#[derive(Error, Debug)]
pub enum CostLedgerError {
    /// A collector adapter failed (auth, network, provider-side error)
    #[error("collector error for {service}: {message}")]
    Adapter { service: String, message: String },

    /// Ledger or status read failed; nothing was written
    #[error("store read error: {0}")]
    StoreRead(String),

    /// Ledger or status write failed; the batch may be partially applied
    #[error("store write error: {0}")]
    StoreWrite(String),

    /// Request rejected before any store I/O
    #[error("validation error: {0}")]
    Validation(String),

    /// No collector is registered for the service
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Credentials could not be resolved
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Failed to parse JSON/JSONL/TOML
    #[error("parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for costledger
pub type Result<T> = std::result::Result<T, CostLedgerError>;

/// Why a single cost entry was rejected before key derivation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    #[error("missing service id")]
    MissingServiceId,

    #[error("entry belongs to service {found:?}, batch is for {expected:?}")]
    ServiceMismatch { expected: String, found: String },

    #[error("invalid total cost {0}")]
    InvalidTotalCost(f64),

    #[error("resource at position {0} has an empty id")]
    EmptyResourceId(usize),

    #[error("resource {0:?} listed more than once")]
    DuplicateResourceId(String),

    #[error("resource {resource_id:?} has invalid cost {cost}")]
    InvalidResourceCost { resource_id: String, cost: f64 },
}
