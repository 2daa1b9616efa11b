//! Type definitions for costledger

mod anomaly;
mod cost;
mod error;
mod status;

pub use anomaly::*;
pub use cost::*;
pub use error::*;
pub use status::*;
