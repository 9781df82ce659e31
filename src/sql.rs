//! SQL literal rendering for the bulk content loaders.
//!
//! Interactive queries in this crate use sqlx bound parameters. The one
//! exception is bulk loading (thousands of verses per batch), where a single
//! multi-row INSERT would need far more bind variables than SQLite's default
//! limit of 999 allows. Those statements are assembled as text here, and this
//! module is the only place in the crate allowed to do that: every value
//! passes through [`SqlValue::write_literal`], which handles quote doubling
//! and NUL stripping.

use chrono::{DateTime, Utc};

/// A scalar rendered into SQL literal text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Append this value's literal form to `out`. Total over all inputs.
    ///
    /// - `Null` renders as unquoted `NULL`.
    /// - Integers and finite reals render as their plain decimal form.
    ///   Non-finite reals render as `NULL`: SQLite has no literal for them
    ///   and emitting `NaN` would break the statement.
    /// - Text is wrapped in single quotes with embedded quotes doubled.
    ///   NUL bytes are stripped first: the engine truncates at the first NUL
    ///   instead of erroring, which would silently drop the rest of the
    ///   value.
    pub fn write_literal(&self, out: &mut String) {
        match self {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Int(n) => {
                out.push_str(&n.to_string());
            }
            SqlValue::Real(x) if !x.is_finite() => out.push_str("NULL"),
            SqlValue::Real(x) => {
                out.push_str(&x.to_string());
            }
            SqlValue::Text(s) => write_quoted(out, s),
        }
    }

    pub fn to_literal(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\0' => {}
            '\'' => out.push_str("''"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
}

/// Quote a string for direct embedding in a statement.
pub fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    write_quoted(&mut out, s);
    out
}

/// Escape LIKE metacharacters so user text matches itself. The query must
/// declare `ESCAPE '\'`.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Text(v.to_rfc3339())
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// Conflict handling for bulk inserts, matching the two modes the content
/// loaders need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    Ignore,
    Replace,
}

impl OnConflict {
    fn keyword(&self) -> &'static str {
        match self {
            OnConflict::Ignore => "INSERT OR IGNORE",
            OnConflict::Replace => "INSERT OR REPLACE",
        }
    }
}

const DEFAULT_ROWS_PER_STATEMENT: usize = 500;

/// Builder for chunked multi-row INSERT statements.
#[derive(Debug)]
pub struct BulkInsert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    on_conflict: OnConflict,
    rows_per_statement: usize,
}

impl BulkInsert {
    pub fn new(table: &str, columns: &[&str], on_conflict: OnConflict) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
            on_conflict,
            rows_per_statement: DEFAULT_ROWS_PER_STATEMENT,
        }
    }

    /// Override the chunk size. SQLite caps a single statement at about a
    /// megabyte by default; 500 rows keeps verse batches well under it.
    pub fn rows_per_statement(mut self, n: usize) -> Self {
        self.rows_per_statement = n.max(1);
        self
    }

    pub fn push_row(&mut self, row: Vec<SqlValue>) {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "bulk insert row arity must match column list"
        );
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render all queued rows as one statement per chunk.
    pub fn statements(&self) -> Vec<String> {
        let mut out = Vec::new();
        for chunk in self.rows.chunks(self.rows_per_statement) {
            let mut stmt = String::new();
            stmt.push_str(self.on_conflict.keyword());
            stmt.push_str(" INTO ");
            stmt.push_str(&self.table);
            stmt.push_str(" (");
            stmt.push_str(&self.columns.join(", "));
            stmt.push_str(") VALUES ");
            for (i, row) in chunk.iter().enumerate() {
                if i > 0 {
                    stmt.push_str(", ");
                }
                stmt.push('(');
                for (j, value) in row.iter().enumerate() {
                    if j > 0 {
                        stmt.push_str(", ");
                    }
                    value.write_literal(&mut stmt);
                }
                stmt.push(')');
            }
            out.push(stmt);
        }
        out
    }
}
