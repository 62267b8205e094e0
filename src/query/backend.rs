//! Relational execution seam.

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use tracing::trace;

use crate::query::sql::SelectQuery;
use crate::query::{Row, Value};
use crate::store::{execution_error, SqliteStore};
use crate::types::Result;

/// Executes or renders finished statements.
pub trait RelationalBackend {
    /// Runs the statement and returns every row.
    fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>>;

    /// Renders the statement text for display.
    fn render(&self, query: &SelectQuery, formatted: bool) -> String {
        query.render(formatted)
    }
}

/// Backend executing statements on a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteBackend {
    store: SqliteStore,
}

impl SqliteBackend {
    /// Creates a backend over the given store.
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

impl RelationalBackend for SqliteBackend {
    fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let (sql, params) = query.to_sql(false);
        trace!(sql = %sql, params = params.len(), "fetching");
        self.store
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let names: Vec<String> =
                    stmt.column_names().into_iter().map(str::to_owned).collect();
                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut record = Row::new();
                    for (idx, name) in names.iter().enumerate() {
                        record.insert(name.clone(), from_sql(row.get_ref(idx)?));
                    }
                    out.push(record);
                }
                Ok(out)
            })
            .map_err(execution_error)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
