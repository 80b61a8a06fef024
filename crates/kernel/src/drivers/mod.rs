/// Device drivers

// M8: Driver hardening infrastructure
pub mod timeout;   // Timeout utilities for hardware operations
pub mod error;     // Common driver error types

pub mod char;
pub mod virtio_blk;

// Re-export common types for convenience
pub use error::{DriverError, DriverResult, Validator};
pub use timeout::{Timeout, TimeoutError};
