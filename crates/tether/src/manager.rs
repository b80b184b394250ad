//! Per-entity entry point for queries.
//!
//! Every entity gets a manager through `Entity::objects()`. Managers carry no
//! state and can be created freely.

use std::fmt;
use std::marker::PhantomData;

use tether_core::ToSqlValue;

use crate::context::Context;
use crate::db::Db;
use crate::error::Result;
use crate::query::Q;
use crate::queryset::QuerySet;
use crate::schema::Entity;

/// Query entry point for one entity type.
///
/// # Example
///
/// ```ignore
/// let book = Book::objects().get(&ctx, &db, 1).await?;
/// let recent = Book::objects()
///     .with(["Author"])
///     .order_by("-id")
///     .limit(10)
///     .execute(&ctx, &db)
///     .await?;
/// ```
pub struct Manager<E: Entity> {
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Manager<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: Entity> Copy for Manager<E> {}

impl<E: Entity> Default for Manager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> fmt::Debug for Manager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager").finish()
    }
}

impl<E: Entity> Manager<E> {
    /// Creates a manager.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// A query over every row.
    #[must_use]
    pub fn all(&self) -> QuerySet<E> {
        QuerySet::new()
    }

    /// A query restricted by `q`.
    #[must_use]
    pub fn filter(&self, q: Q) -> QuerySet<E> {
        QuerySet::new().filter(q)
    }

    /// A query excluding rows matching `q`.
    #[must_use]
    pub fn exclude(&self, q: Q) -> QuerySet<E> {
        QuerySet::new().exclude(q)
    }

    /// A query with no results.
    #[must_use]
    pub fn none(&self) -> QuerySet<E> {
        QuerySet::none()
    }

    /// A query over every row with relation paths requested.
    #[must_use]
    pub fn with<I, S>(&self, paths: I) -> QuerySet<E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        QuerySet::new().with(paths)
    }

    /// Gets a row by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`](crate::OrmError::NotFound) when no row
    /// has that key.
    pub async fn get(&self, ctx: &Context, db: &Db, pk: impl ToSqlValue) -> Result<E> {
        let pk_column = db.catalog().metadata::<E>().primary_key().to_string();
        self.filter(Q::eq(&pk_column, pk)).get(ctx, db).await
    }

    /// Gets a row by primary key, or `None`.
    ///
    /// # Errors
    ///
    /// Returns query failures; a missing row is `Ok(None)`.
    pub async fn get_or_none(&self, ctx: &Context, db: &Db, pk: impl ToSqlValue) -> Result<Option<E>> {
        let pk_column = db.catalog().metadata::<E>().primary_key().to_string();
        self.filter(Q::eq(&pk_column, pk)).first(ctx, db).await
    }

    /// Number of rows in the table.
    ///
    /// # Errors
    ///
    /// Returns the query failure.
    pub async fn count(&self, ctx: &Context, db: &Db) -> Result<i64> {
        self.all().count(ctx, db).await
    }

    /// Whether the table has any row.
    ///
    /// # Errors
    ///
    /// Returns the query failure.
    pub async fn exists(&self, ctx: &Context, db: &Db) -> Result<bool> {
        self.all().exists(ctx, db).await
    }

    /// The first row, or `None`.
    ///
    /// # Errors
    ///
    /// Returns the query failure.
    pub async fn first(&self, ctx: &Context, db: &Db) -> Result<Option<E>> {
        self.all().first(ctx, db).await
    }

    /// The row with the highest primary key, or `None`.
    ///
    /// # Errors
    ///
    /// Returns the query failure.
    pub async fn last(&self, ctx: &Context, db: &Db) -> Result<Option<E>> {
        let pk_column = db.catalog().metadata::<E>().primary_key().to_string();
        self.all()
            .order_by(&format!("-{pk_column}"))
            .first(ctx, db)
            .await
    }
}
