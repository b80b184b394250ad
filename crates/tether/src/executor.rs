//! Statement execution and decoded rows.

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tether_core::SqlValue;

use crate::context::Context;
use crate::error::QueryFailure;

/// A row decoded into column name / value pairs, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, SqlValue)>,
}

impl Record {
    /// An empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.push((column.into(), value));
    }

    /// Value of the first column named `column`.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Columns in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, SqlValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

/// Runs SQL with positional `?` parameters.
///
/// Implemented for [`SqlitePool`]; wrap it to observe or count statements.
/// Every call must honour `ctx`, usually through [`Context::run`].
pub trait Executor: Send + Sync {
    /// Runs a statement and returns every row.
    fn query_rows<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<Record>, QueryFailure>>;
}

impl Executor for SqlitePool {
    fn query_rows<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<Record>, QueryFailure>> {
        Box::pin(async move {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_param(query, arg.clone());
            }
            let rows = ctx.run(query.fetch_all(self)).await??;
            rows.iter().map(decode_row).collect()
        })
    }
}

/// Binds a SqlValue parameter to a raw query.
fn bind_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

/// Decodes each value by its storage class, ignoring declared column types.
fn decode_row(row: &SqliteRow) -> Result<Record, QueryFailure> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "NUMERIC" => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        record.push(column.name(), value);
    }
    Ok(record)
}
