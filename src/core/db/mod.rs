/// Database Module
///
/// ## Architecture
///
/// - **Driver seam** (`driver.rs`): the traits a database client must implement
/// - **Scoped manager** (`manager.rs`): `Database` and the `Scope` guard that
///   owns the connection and every cursor taken from it
/// - **SQLite driver** (`sqlite.rs`): the bundled rusqlite implementation
///
/// ## Error Handling
///
/// All operations return `ScopeDbError`. Close failures during scope exit are
/// logged and never returned.
pub mod driver;
pub mod manager;
pub mod sqlite;

pub use driver::*;
pub use manager::*;
pub use sqlite::*;
