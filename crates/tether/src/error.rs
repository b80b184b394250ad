//! Error types for the ORM.

use std::fmt;

use tether_core::{IdentifierError, KeyError, SqlValue};
use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// A relation name is not registered on the parent entity.
    #[error(transparent)]
    Relation(#[from] RelationError),

    /// A table or column name failed the identifier whitelist.
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    /// A relation resolved to a shape that cannot be loaded.
    #[error("relation `{relation}` on `{parent}` is misconfigured: {reason}")]
    InvalidRelation {
        /// Relation name.
        relation: String,
        /// Parent entity type name.
        parent: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A relation path could not be parsed.
    #[error("invalid relation path `{0}`")]
    InvalidPath(String),

    /// The executor failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A key value has no canonical encoding.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// A column value could not be written into its field.
    #[error("cannot decode column `{column}` of `{entity}`: {reason}")]
    Decode {
        /// Entity type name.
        entity: String,
        /// Column name.
        column: String,
        /// Decoder message.
        reason: String,
    },

    /// No object found matching the query.
    #[error("object not found")]
    NotFound,

    /// Multiple objects found when exactly one was expected.
    #[error("multiple objects returned when one was expected")]
    MultipleObjectsReturned,
}

impl OrmError {
    /// Returns the wrapped query error, if any.
    #[must_use]
    pub const fn as_query(&self) -> Option<&QueryError> {
        match self {
            Self::Query(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this error means no row was found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound) || self.as_query().is_some_and(QueryError::is_not_found)
    }

    /// Whether this error is a constraint violation reported by the database.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        self.as_query()
            .is_some_and(QueryError::is_constraint_violation)
    }

    /// Whether this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.as_query().is_some_and(QueryError::is_timeout)
    }

    /// Whether this error is a connection failure.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        self.as_query().is_some_and(QueryError::is_connection_failure)
    }

    /// Whether this error comes from a cancelled context.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.as_query().is_some_and(QueryError::is_cancelled)
    }
}

/// A relation name that is not registered on the parent entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("relation `{relation}` not found on `{parent}`")]
pub struct RelationError {
    /// Requested relation name.
    pub relation: String,
    /// Parent entity type name.
    pub parent: String,
}

/// The kind of statement that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    /// Top-level select of a query set.
    Select,
    /// Count query.
    Count,
    /// Batch query against a related table.
    Relation,
    /// Batch query against a pivot table.
    Pivot,
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::Count => write!(f, "count"),
            Self::Relation => write!(f, "relation"),
            Self::Pivot => write!(f, "pivot"),
        }
    }
}

/// Failure reported by an [`Executor`](crate::Executor).
#[derive(Debug, Error)]
pub enum QueryFailure {
    /// Error from sqlx.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// The context was cancelled before the statement completed.
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed before the statement completed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A failed statement with the SQL and arguments that produced it.
#[derive(Debug, Error)]
#[error("{op} query failed: {source} (sql: {sql})")]
pub struct QueryError {
    /// Operation kind.
    pub op: QueryOp,
    /// SQL text.
    pub sql: String,
    /// Bound arguments.
    pub args: Vec<SqlValue>,
    /// Underlying cause.
    #[source]
    pub source: QueryFailure,
}

impl QueryError {
    fn database(&self) -> Option<&sqlx::Error> {
        match &self.source {
            QueryFailure::Database(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the statement found no row.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.database(), Some(sqlx::Error::RowNotFound))
    }

    /// Whether the database rejected the statement on a constraint.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        match self.database() {
            Some(sqlx::Error::Database(db)) => !matches!(db.kind(), sqlx::error::ErrorKind::Other),
            _ => false,
        }
    }

    /// Whether the statement ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.source, QueryFailure::DeadlineExceeded)
            || matches!(self.database(), Some(sqlx::Error::PoolTimedOut))
    }

    /// Whether the connection to the database failed.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self.database(),
            Some(sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed)
        )
    }

    /// Whether the context was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.source, QueryFailure::Cancelled)
    }
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
