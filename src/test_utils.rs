/// # Test Utilities Module
///
/// Testing infrastructure for scopedb:
/// - `RecordingDriver`, a fake driver that records every call it receives
///   and fails on demand
/// - `LogCapture`, which collects tracing output for assertions

use crate::config::Settings;
use crate::core::db::driver::{Connection, Cursor, Driver, Resource, Row, RowShape, Value};
use crate::core::{Result, ScopeDbError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

/// A call observed by the recording driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect {
        host: String,
        database: String,
        user: String,
        password: String,
        row_shape: RowShape,
    },
    Autocommit(bool),
    Cursor(usize),
    Execute { cursor: usize, sql: String },
    Commit,
    Rollback,
    Close(String),
}

/// Which calls the recording driver should fail, plus canned query rows.
///
/// Cursor numbers in `close_cursors` and `panic_cursors` are 1-based, in
/// acquisition order.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub connect: bool,
    pub autocommit: bool,
    pub cursor: bool,
    pub commit: bool,
    pub rollback: bool,
    pub close_cursors: Vec<usize>,
    pub panic_cursors: Vec<usize>,
    pub close_connection: bool,
    pub rows: Vec<Value>,
}

type EventLog = Rc<RefCell<Vec<Event>>>;

/// Fake driver. Clones share one event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    events: EventLog,
    plan: Rc<FailurePlan>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(plan: FailurePlan) -> Self {
        RecordingDriver {
            events: EventLog::default(),
            plan: Rc::new(plan),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Identities of closed resources, in close order.
    pub fn closes(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Close(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count<F: Fn(&Event) -> bool>(&self, predicate: F) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }
}

fn record(events: &EventLog, event: Event) {
    events.borrow_mut().push(event);
}

impl Driver for RecordingDriver {
    type Connection = FakeConnection;

    fn connect(&self, settings: &Settings, row_shape: RowShape) -> Result<FakeConnection> {
        if self.plan.connect {
            return Err(ScopeDbError::Connection("connect refused".to_string()));
        }
        record(
            &self.events,
            Event::Connect {
                host: settings.host().to_string(),
                database: settings.name().to_string(),
                user: settings.user().to_string(),
                password: settings.password().to_string(),
                row_shape,
            },
        );
        Ok(FakeConnection {
            events: Rc::clone(&self.events),
            plan: Rc::clone(&self.plan),
            cursors_opened: 0,
        })
    }
}

pub struct FakeConnection {
    events: EventLog,
    plan: Rc<FailurePlan>,
    cursors_opened: usize,
}

impl fmt::Display for FakeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection")
    }
}

impl Resource for FakeConnection {
    fn close(&mut self) -> Result<()> {
        record(&self.events, Event::Close(self.to_string()));
        if self.plan.close_connection {
            return Err(ScopeDbError::Close("connection reset".to_string()));
        }
        Ok(())
    }
}

impl Connection for FakeConnection {
    type Cursor = FakeCursor;

    fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        if self.plan.autocommit {
            return Err(ScopeDbError::transaction("autocommit not supported"));
        }
        record(&self.events, Event::Autocommit(enabled));
        Ok(())
    }

    fn cursor(&mut self) -> Result<FakeCursor> {
        if self.plan.cursor {
            return Err(ScopeDbError::Cursor("out of cursors".to_string()));
        }
        self.cursors_opened += 1;
        record(&self.events, Event::Cursor(self.cursors_opened));
        Ok(FakeCursor {
            id: self.cursors_opened,
            events: Rc::clone(&self.events),
            plan: Rc::clone(&self.plan),
            rows: VecDeque::new(),
            columns: Vec::new(),
            rowcount: 0,
        })
    }

    fn commit(&mut self) -> Result<()> {
        if self.plan.commit {
            return Err(ScopeDbError::transaction("commit failed"));
        }
        record(&self.events, Event::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.plan.rollback {
            return Err(ScopeDbError::transaction("rollback failed"));
        }
        record(&self.events, Event::Rollback);
        Ok(())
    }
}

/// Fake cursor. Statements containing `FAIL` fail; `SELECT`s yield the
/// plan's canned rows.
pub struct FakeCursor {
    id: usize,
    events: EventLog,
    plan: Rc<FailurePlan>,
    rows: VecDeque<Row>,
    columns: Vec<String>,
    rowcount: usize,
}

impl fmt::Display for FakeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor#{}", self.id)
    }
}

impl Resource for FakeCursor {
    fn close(&mut self) -> Result<()> {
        record(&self.events, Event::Close(self.to_string()));
        if self.plan.panic_cursors.contains(&self.id) {
            panic!("{} blew up", self);
        }
        if self.plan.close_cursors.contains(&self.id) {
            return Err(ScopeDbError::Close(format!("{} already gone", self)));
        }
        Ok(())
    }
}

impl Cursor for FakeCursor {
    fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<usize> {
        record(
            &self.events,
            Event::Execute {
                cursor: self.id,
                sql: sql.to_string(),
            },
        );
        if sql.contains("FAIL") {
            return Err(ScopeDbError::statement(format!("cannot run {}", sql)));
        }

        self.rows.clear();
        self.columns.clear();
        if sql.trim_start().to_uppercase().starts_with("SELECT") {
            for value in &self.plan.rows {
                let row = match value {
                    Value::Object(map) => Row::Mapping(map.clone()),
                    other => Row::Sequence(vec![other.clone()]),
                };
                self.rows.push_back(row);
            }
            if let Some(Value::Object(map)) = self.plan.rows.first() {
                self.columns = map.keys().cloned().collect();
            }
        }
        self.rowcount = self.rows.len();
        Ok(self.rowcount)
    }

    fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn rowcount(&self) -> usize {
        self.rowcount
    }

    fn description(&self) -> &[String] {
        &self.columns
    }
}

/// Collects formatted tracing output emitted inside `run`.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with a debug-level subscriber writing into this capture.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing::{debug, error};

    #[test]
    fn test_recording_driver_logs_calls() {
        let driver = RecordingDriver::new();
        let settings = Settings::new("h", "d", "u", "p").unwrap();

        let mut conn = driver.connect(&settings, RowShape::Sequence).unwrap();
        let mut cursor = conn.cursor().unwrap();
        cursor.execute("INSERT INTO t VALUES (1)", &[json!(1)]).unwrap();
        conn.commit().unwrap();

        assert_eq!(driver.count(|e| matches!(e, Event::Execute { cursor: 1, .. })), 1);
        assert_eq!(driver.events().last(), Some(&Event::Commit));
    }

    #[test]
    fn test_canned_rows_are_returned_for_selects() {
        let driver = RecordingDriver::with_plan(FailurePlan {
            rows: vec![json!({"id": 1, "name": "ada"})],
            ..Default::default()
        });
        let settings = Settings::new("h", "d", "u", "p").unwrap();
        let mut cursor = driver.connect(&settings, RowShape::Mapping).unwrap().cursor().unwrap();

        assert_eq!(cursor.execute("select * from t", &[]).unwrap(), 1);
        assert_eq!(cursor.description(), ["id", "name"]);
        let row = cursor.fetch_one().unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&json!("ada")));
    }

    #[test]
    fn test_log_capture_collects_output() {
        let logs = LogCapture::new();
        logs.run(|| {
            debug!("first line");
            error!(code = 7, "second line");
        });

        let output = logs.contents();
        assert!(output.contains("first line"));
        assert!(output.contains("second line"));
        assert!(output.contains("code=7"));
    }
}
