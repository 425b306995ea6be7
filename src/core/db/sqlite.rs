/// SQLite Driver Module
///
/// rusqlite implementation of the driver seam. SQLite has no server, so the
/// settings map onto a file path: `DB_NAME` is the file, `DB_HOST` the
/// directory holding it (`localhost` meaning the working directory), and
/// `:memory:` an in-memory database. `DB_USER` and `DB_PASS` are unused.
///
/// Cursors are buffered: `execute` runs the statement to completion and the
/// `fetch_*` calls drain the stored rows.

use super::driver::{Connection, Cursor, Driver, Resource, Row, RowShape, Value};
use crate::config::Settings;
use crate::core::{Result, ScopeDbError};
use rusqlite::types::{Value as SqlValue, ValueRef};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use tracing::trace;

const MEMORY: &str = ":memory:";
const LOCALHOST: &str = "localhost";

/// Driver opening rusqlite connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Database file (or `:memory:`) the settings point at.
    pub fn resolve_path(settings: &Settings) -> String {
        let name = settings.name();
        if name == MEMORY || settings.host() == LOCALHOST {
            name.to_string()
        } else {
            Path::new(settings.host()).join(name).to_string_lossy().into_owned()
        }
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn connect(&self, settings: &Settings, row_shape: RowShape) -> Result<SqliteConnection> {
        let path = Self::resolve_path(settings);
        trace!(user = %settings.user(), "SQLite ignores user and password");

        let conn = if path == MEMORY {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| ScopeDbError::Connection(format!("unable to open {}: {}", path, e)))?;

        Ok(SqliteConnection {
            shared: Some(Rc::new(Shared {
                conn,
                autocommit: Cell::new(true),
                row_shape,
            })),
            path,
            cursors_opened: 0,
        })
    }
}

/// State every cursor of a connection shares with it.
struct Shared {
    conn: rusqlite::Connection,
    autocommit: Cell<bool>,
    row_shape: RowShape,
}

impl Shared {
    /// Opens a transaction when auto-commit is off and none is running.
    fn begin_if_needed(&self) -> rusqlite::Result<()> {
        if !self.autocommit.get() && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn finish(&self, sql: &str) -> Result<()> {
        // SQLite reports auto-commit while no transaction is open
        if !self.conn.is_autocommit() {
            self.conn.execute_batch(sql).map_err(|e| ScopeDbError::Transaction {
                message: format!("{} failed: {}", sql, e),
                source: Some(e),
            })?;
        }
        Ok(())
    }
}

pub struct SqliteConnection {
    shared: Option<Rc<Shared>>,
    path: String,
    cursors_opened: usize,
}

impl SqliteConnection {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.shared.as_ref().map(|s| !s.conn.is_autocommit()).unwrap_or(false)
    }

    fn shared(&self) -> Result<&Rc<Shared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| ScopeDbError::Connection(format!("{} is closed", self)))
    }
}

impl fmt::Display for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sqlite connection {}", self.path)
    }
}

impl Resource for SqliteConnection {
    fn close(&mut self) -> Result<()> {
        let Some(shared) = self.shared.take() else {
            return Ok(());
        };
        match Rc::try_unwrap(shared) {
            Ok(shared) => shared.conn.close().map_err(|(_, e)| ScopeDbError::Database(e)),
            Err(shared) => {
                let holders = Rc::strong_count(&shared) - 1;
                self.shared = Some(shared);
                Err(ScopeDbError::Close(format!(
                    "{} is still held by {} open cursor(s)",
                    self, holders
                )))
            }
        }
    }
}

impl Connection for SqliteConnection {
    type Cursor = SqliteCursor;

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        let shared = self.shared()?;
        if enabled {
            shared.finish("COMMIT")?;
        }
        shared.autocommit.set(enabled);
        Ok(())
    }

    fn cursor(&mut self) -> Result<SqliteCursor> {
        let shared = Rc::clone(self.shared()?);
        self.cursors_opened += 1;
        Ok(SqliteCursor {
            shared: Some(shared),
            id: self.cursors_opened,
            path: self.path.clone(),
            rows: VecDeque::new(),
            columns: Vec::new(),
            rowcount: 0,
        })
    }

    fn commit(&mut self) -> Result<()> {
        self.shared()?.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.shared()?.finish("ROLLBACK")
    }
}

pub struct SqliteCursor {
    shared: Option<Rc<Shared>>,
    id: usize,
    path: String,
    rows: VecDeque<Row>,
    columns: Vec<String>,
    rowcount: usize,
}

impl fmt::Display for SqliteCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sqlite cursor #{} on {}", self.id, self.path)
    }
}

impl Resource for SqliteCursor {
    fn close(&mut self) -> Result<()> {
        self.shared = None;
        self.rows.clear();
        Ok(())
    }
}

impl Cursor for SqliteCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let shared = self.shared()?;
        self.run(&shared, sql, params).map_err(|e| ScopeDbError::Statement {
            message: format!("{}: {}", sql.trim(), e),
            source: Some(e),
        })
    }

    fn fetch_one(&mut self) -> Result<Option<Row>> {
        self.shared()?;
        Ok(self.rows.pop_front())
    }

    fn rowcount(&self) -> usize {
        self.rowcount
    }

    fn description(&self) -> &[String] {
        &self.columns
    }
}

impl SqliteCursor {
    fn shared(&self) -> Result<Rc<Shared>> {
        self.shared
            .clone()
            .ok_or_else(|| ScopeDbError::Cursor(format!("{} is closed", self)))
    }

    fn run(&mut self, shared: &Shared, sql: &str, params: &[Value]) -> rusqlite::Result<usize> {
        shared.begin_if_needed()?;

        let mut stmt = shared.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let bound: Vec<SqlValue> = params.iter().map(to_sql).collect();
        let params = rusqlite::params_from_iter(bound.iter());

        self.rows.clear();
        if columns.is_empty() {
            self.rowcount = stmt.execute(params)?;
        } else {
            let mut rows = stmt.query(params)?;
            while let Some(row) = rows.next()? {
                let values = (0..columns.len())
                    .map(|i| row.get_ref(i).map(from_sql))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                self.rows.push_back(Row::from_columns(shared.row_shape, &columns, values));
            }
            self.rowcount = self.rows.len();
        }
        self.columns = columns;
        Ok(self.rowcount)
    }
}

/// BLOBs travel as arrays of byte values, so an array whose items all fit
/// in a byte binds back as a BLOB. Other arrays and objects bind as JSON text.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(items) => match bytes_of(items) {
            Some(bytes) => SqlValue::Blob(bytes),
            None => SqlValue::Text(value.to_string()),
        },
        Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        // Text that is not valid UTF-8 keeps its raw bytes
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => byte_array(bytes),
        },
        ValueRef::Blob(bytes) => byte_array(bytes),
    }
}

fn byte_array(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

fn bytes_of(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}
