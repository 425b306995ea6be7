/// Scoped Connection Manager Module
///
/// `Database` holds settings and a driver. Entering it opens a connection and
/// returns a `Scope`, a guard that owns that connection and every cursor
/// taken from it. However the scope ends (`exit`, early return, `?`, panic
/// unwind) the guard closes all of them, most recent first, and never fails
/// while doing so.

use super::driver::{Connection, Driver, Resource, RowShape};
use super::sqlite::SqliteDriver;
use crate::config::Settings;
use crate::core::{Result, ScopeDbError};
use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Not-entered state: settings plus the driver used to connect.
#[derive(Debug, Clone)]
pub struct Database<D: Driver> {
    settings: Settings,
    driver: D,
}

impl<D: Driver> Database<D> {
    /// Stores the settings. No connection is made until `enter`.
    pub fn new(settings: Settings, driver: D) -> Self {
        Database { settings, driver }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens a connection and returns the guard that owns it.
    ///
    /// Rows are requested as field-name keyed mappings and auto-commit is
    /// disabled, so every statement joins an explicit transaction ended by
    /// `commit` or `rollback`.
    ///
    /// # Errors
    ///
    /// Whatever the driver's connect reports, unchanged. Nothing is tracked
    /// in that case, so nothing is closed.
    ///
    /// # Examples
    ///
    /// ```
    /// use scopedb::{config::Settings, core::db::{Cursor, Database}};
    ///
    /// let settings = Settings::new("localhost", ":memory:", "app", "")?;
    /// let db = Database::sqlite(settings);
    /// let mut scope = db.enter()?;
    /// scope.cursor()?.execute("CREATE TABLE t (id INTEGER)", &[])?;
    /// scope.commit()?;
    /// scope.exit();
    /// # Ok::<(), scopedb::core::ScopeDbError>(())
    /// ```
    pub fn enter(&self) -> Result<Scope<'_, D::Connection>> {
        debug!(host = %self.settings.host(), database = %self.settings.name(), "Opening connection...");
        let mut connection = self.driver.connect(&self.settings, RowShape::Mapping)?;

        if let Err(e) = connection.set_autocommit(false) {
            safe_close(&mut connection);
            return Err(e);
        }

        Ok(Scope {
            settings: &self.settings,
            connection: Some(connection),
            tracked: vec![Tracked::Connection],
        })
    }

    /// Runs `f` inside a fresh scope and exits it afterwards.
    ///
    /// The closure's result is returned as is; exit runs first either way.
    pub fn scope<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Scope<'_, D::Connection>) -> Result<T>,
    {
        let mut scope = self.enter()?;
        let outcome = f(&mut scope);
        scope.exit();
        outcome
    }
}

impl Database<SqliteDriver> {
    /// Manager backed by the bundled SQLite driver.
    pub fn sqlite(settings: Settings) -> Self {
        Database::new(settings, SqliteDriver)
    }
}

/// Position of a cursor in its scope's tracked resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(usize);

enum Tracked<K> {
    Connection,
    Cursor(K),
}

/// Entered state. Owns the connection and every cursor derived from it.
///
/// The connection sits at the bottom of the tracked stack and closes last.
pub struct Scope<'db, C: Connection> {
    settings: &'db Settings,
    connection: Option<C>,
    tracked: Vec<Tracked<C::Cursor>>,
}

impl<'db, C: Connection> Scope<'db, C> {
    pub fn settings(&self) -> &'db Settings {
        self.settings
    }

    /// Number of resources that will be closed on exit, the connection included.
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Creates and tracks a new cursor, returning a reference to it.
    pub fn cursor(&mut self) -> Result<&mut C::Cursor> {
        let id = self.acquire_cursor()?;
        self.cursor_mut(id)
    }

    /// Creates and tracks a new cursor, returning its id for later use with
    /// `cursor_mut`.
    pub fn acquire_cursor(&mut self) -> Result<CursorId> {
        let cursor = self.connection()?.cursor()?;
        self.tracked.push(Tracked::Cursor(cursor));
        Ok(CursorId(self.tracked.len() - 1))
    }

    /// Reaches a cursor previously acquired in this scope.
    pub fn cursor_mut(&mut self, id: CursorId) -> Result<&mut C::Cursor> {
        match self.tracked.get_mut(id.0) {
            Some(Tracked::Cursor(cursor)) => Ok(cursor),
            _ => Err(ScopeDbError::Cursor(format!("no cursor tracked at position {}", id.0))),
        }
    }

    /// Commits the current transaction. The next statement starts a new one.
    pub fn commit(&mut self) -> Result<()> {
        self.connection()?.commit()
    }

    /// Discards the current transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.connection()?.rollback()
    }

    /// Ends the scope, closing every tracked resource. Never fails.
    pub fn exit(mut self) {
        self.drain();
    }

    fn connection(&mut self) -> Result<&mut C> {
        self.connection
            .as_mut()
            .ok_or_else(|| ScopeDbError::Connection("scope has no open connection".to_string()))
    }

    fn drain(&mut self) {
        while let Some(resource) = self.tracked.pop() {
            match resource {
                Tracked::Cursor(mut cursor) => safe_close(&mut cursor),
                Tracked::Connection => {
                    if let Some(mut connection) = self.connection.take() {
                        safe_close(&mut connection);
                    }
                }
            }
        }
    }
}

impl<C: Connection> Drop for Scope<'_, C> {
    fn drop(&mut self) {
        if self.tracked.is_empty() {
            return;
        }
        if std::thread::panicking() {
            debug!("Scope unwinding, closing {} tracked resources", self.tracked.len());
        }
        self.drain();
    }
}

/// Closes `resource`, logging instead of returning any failure.
///
/// A panicking close is caught and logged like an error. A close that
/// panics while the thread is already unwinding still aborts the process.
fn safe_close<R: Resource + ?Sized>(resource: &mut R) {
    debug!("Closing {}", resource);
    let failure = match panic::catch_unwind(AssertUnwindSafe(|| resource.close())) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => error_chain(&e),
        Err(payload) => format!("close panicked: {}", panic_message(payload.as_ref())),
    };
    error!(
        resource = %resource,
        error = %failure,
        backtrace = %Backtrace::force_capture(),
        "While trying to close open resource"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        // thiserror's `{0}` display already embeds the wrapped error
        let cause_message = cause.to_string();
        if !message.ends_with(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
