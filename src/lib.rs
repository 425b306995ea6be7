//! scopedb: a scoped database connection manager.
//!
//! A [`Database`](crate::core::db::Database) opens one transactional connection per scope and
//! tracks every cursor taken from it. When the scope ends, normally or not,
//! everything is closed in reverse acquisition order.

// Core infrastructure modules
pub mod core;

pub mod config;
pub mod logging;

pub use crate::config::Settings;
pub use crate::core::db::{Database, Scope};
pub use crate::core::{Result, ScopeDbError};

#[cfg(test)]
mod test_utils;
