/// Core Module for scopedb
///
/// Holds the scoped connection manager, the driver seam it talks to and
/// the shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, ScopeDbError};
