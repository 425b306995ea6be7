/// Driver Seam Module
///
/// The scoped manager never talks to a database client directly. It goes
/// through the traits below, which cover exactly what it needs: connect,
/// toggle auto-commit, hand out cursors, commit, rollback and close.

use crate::config::Settings;
use crate::core::Result;
use std::collections::HashSet;
use std::fmt;

/// A single column value.
pub type Value = serde_json::Value;

/// Shape in which a cursor returns fetched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowShape {
    /// Field-name keyed mapping, in column order
    #[default]
    Mapping,
    /// Positional sequence, in column order
    Sequence,
}

/// A fetched row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Mapping(serde_json::Map<String, Value>),
    Sequence(Vec<Value>),
}

impl Row {
    /// Builds a row of the requested shape from column names and values.
    ///
    /// Mapping rows keep one entry per column; see `mapping_keys` for how
    /// repeated names are told apart.
    pub fn from_columns(shape: RowShape, columns: &[String], values: Vec<Value>) -> Self {
        match shape {
            RowShape::Mapping => Row::Mapping(mapping_keys(columns).into_iter().zip(values).collect()),
            RowShape::Sequence => Row::Sequence(values),
        }
    }

    /// Looks a value up by field name. Always `None` for sequence rows.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Row::Mapping(map) => map.get(field),
            Row::Sequence(_) => None,
        }
    }

    /// Looks a value up by column position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Row::Mapping(map) => map.values().nth(index),
            Row::Sequence(values) => values.get(index),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Row::Mapping(map) => map.len(),
            Row::Sequence(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Field names for mapping rows, one per column and all distinct.
///
/// The first column with a given name keeps it. Later repeats, as in
/// `SELECT * FROM a JOIN b` where both tables have `id`, get the lowest
/// `name_N` suffix (from 2) that no other column already uses.
pub fn mapping_keys(columns: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(columns.len());
    let mut keys = Vec::with_capacity(columns.len());
    for name in columns {
        let mut key = name.clone();
        let mut suffix = 2;
        // Suffixed keys never reuse a real column name, so first
        // occurrences always keep theirs
        while taken.contains(&key) {
            let candidate = format!("{}_{}", name, suffix);
            suffix += 1;
            if !columns.contains(&candidate) {
                key = candidate;
            }
        }
        taken.insert(key.clone());
        keys.push(key);
    }
    keys
}

/// Anything the manager tracks and must close on scope exit.
///
/// `Display` is the resource's identity in log output.
pub trait Resource: fmt::Display {
    fn close(&mut self) -> Result<()>;
}

/// A database client able to open connections.
pub trait Driver {
    type Connection: Connection;

    /// Opens a connection for `settings`, configured to return rows as `row_shape`.
    fn connect(&self, settings: &Settings, row_shape: RowShape) -> Result<Self::Connection>;
}

/// A live connection.
pub trait Connection: Resource {
    type Cursor: Cursor;

    /// Turns implicit per-statement commits on or off.
    fn set_autocommit(&mut self, enabled: bool) -> Result<()>;

    /// Creates a new cursor bound to this connection.
    fn cursor(&mut self) -> Result<Self::Cursor>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// A handle for executing statements and reading their rows.
pub trait Cursor: Resource {
    /// Executes `sql` with positional `params`, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Returns the next row of the last result set, if any.
    fn fetch_one(&mut self) -> Result<Option<Row>>;

    /// Returns up to `size` rows of the last result set.
    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            match self.fetch_one()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Returns every remaining row of the last result set.
    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows affected (DML) or produced (queries) by the last statement.
    fn rowcount(&self) -> usize;

    /// Column names of the last result set.
    fn description(&self) -> &[String];
}
