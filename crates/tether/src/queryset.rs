//! QuerySet implementation for lazy, chainable database queries.
//!
//! QuerySets are lazy: nothing runs until `execute()`, `first()`, `get()`,
//! `count()` or `exists()` is awaited. Relations requested with `with()` are
//! resolved before the main select and loaded right after it.

use std::fmt;
use std::marker::PhantomData;

use tether_core::{validate_identifier, validate_identifiers};

use crate::context::Context;
use crate::db::Db;
use crate::error::{OrmError, QueryOp, Result};
use crate::loader::{Eager, Loader};
use crate::query::{Scope, Q};
use crate::relation::MorphMap;
use crate::schema::Entity;

/// A lazy, chainable query over one entity type.
///
/// # Example
///
/// ```ignore
/// let books = Book::objects()
///     .filter(Q::gt("id", 0))
///     .order_by("-id")
///     .with(["Author", "Tags:id,name"])
///     .with_callback("Tags", |scope| scope.order_by("name"))
///     .execute(&ctx, &db)
///     .await?;
/// ```
pub struct QuerySet<E: Entity> {
    scope: Scope,
    columns: Option<Vec<String>>,
    eager: Eager,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for QuerySet<E> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            columns: self.columns.clone(),
            eager: self.eager.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for QuerySet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("scope", &self.scope)
            .field("columns", &self.columns)
            .field("eager", &self.eager)
            .finish()
    }
}

impl<E: Entity> Default for QuerySet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> QuerySet<E> {
    /// Creates an unrestricted QuerySet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scope: Scope::new(),
            columns: None,
            eager: Eager::new(),
            _marker: PhantomData,
        }
    }

    /// Adds a filter; multiple filters are combined with AND.
    #[must_use]
    pub fn filter(mut self, q: Q) -> Self {
        self.scope = self.scope.filter(q);
        self
    }

    /// Excludes rows matching the filter.
    #[must_use]
    pub fn exclude(mut self, q: Q) -> Self {
        self.scope = self.scope.exclude(q);
        self
    }

    /// Appends an ordering; use a `-` prefix for descending order.
    #[must_use]
    pub fn order_by(mut self, spec: &str) -> Self {
        self.scope = self.scope.order_by(spec);
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub fn limit(mut self, n: i64) -> Self {
        self.scope = self.scope.limit(n);
        self
    }

    /// Sets the offset for pagination.
    #[must_use]
    pub fn offset(mut self, n: i64) -> Self {
        self.scope = self.scope.offset(n);
        self
    }

    /// Selects specific columns; unselected fields keep their defaults.
    #[must_use]
    pub fn only(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Makes the query return distinct rows.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.scope = self.scope.distinct();
        self
    }

    /// Returns a QuerySet with no results.
    #[must_use]
    pub fn none() -> Self {
        Self::new().filter(Q::nothing())
    }

    /// Requests relation paths, optionally dotted and column-projected
    /// (`"Posts.Comments:id,body,post_id"`).
    #[must_use]
    pub fn with<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.eager = self.eager.with(paths);
        self
    }

    /// Narrows the batch query of one relation path.
    #[must_use]
    pub fn with_callback<F>(mut self, path: &str, constraint: F) -> Self
    where
        F: Fn(Scope) -> Scope + Send + Sync + 'static,
    {
        self.eager = self.eager.with_callback(path, constraint);
        self
    }

    /// Supplies the discriminator map of a morph-to path.
    #[must_use]
    pub fn with_morph(mut self, path: &str, types: MorphMap) -> Self {
        self.eager = self.eager.with_morph(path, types);
        self
    }

    fn select_columns(&self, db: &Db) -> Result<Vec<String>> {
        match &self.columns {
            Some(columns) => {
                validate_identifiers(columns.iter().map(String::as_str))?;
                Ok(columns
                    .iter()
                    .map(|c| db.catalog().resolve_column::<E>(c).unwrap_or_else(|| c.clone()))
                    .collect())
            }
            None => Ok(db.catalog().metadata::<E>().column_names()),
        }
    }

    /// Executes the query and returns all matching rows with the requested
    /// relations loaded.
    ///
    /// # Errors
    ///
    /// Fails before any statement runs when a relation path or identifier is
    /// invalid; otherwise returns the first query or decode failure.
    pub async fn execute(&self, ctx: &Context, db: &Db) -> Result<Vec<E>> {
        let schema = db.catalog().schema::<E>();
        let table = schema.metadata().table();
        validate_identifier(table)?;
        self.scope.validate()?;
        let columns = self.select_columns(db)?;
        let (loader, nodes) = Loader::plan::<E>(db, ctx, &self.eager)?;

        let (sql, args) = self.scope.build_select(table, &columns);
        let records = db.run(ctx, QueryOp::Select, sql, args).await?;
        let mut entities = records
            .iter()
            .map(|record| schema.scan(record))
            .collect::<Result<Vec<E>>>()?;

        loader.run(&nodes, &mut entities).await?;
        Ok(entities)
    }

    /// Returns the first matching row, or `None`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn first(&self, ctx: &Context, db: &Db) -> Result<Option<E>> {
        let rows = self.clone().limit(1).execute(ctx, db).await?;
        Ok(rows.into_iter().next())
    }

    /// Returns exactly one matching row.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] when nothing matches and
    /// [`OrmError::MultipleObjectsReturned`] when more than one row does.
    pub async fn get(&self, ctx: &Context, db: &Db) -> Result<E> {
        let mut rows = self.clone().limit(2).execute(ctx, db).await?;
        match rows.len() {
            0 => Err(OrmError::NotFound),
            1 => rows.pop().ok_or(OrmError::NotFound),
            _ => Err(OrmError::MultipleObjectsReturned),
        }
    }

    /// Returns the number of matching rows.
    ///
    /// # Errors
    ///
    /// Returns the query failure, or a decode error if the count is not an
    /// integer.
    pub async fn count(&self, ctx: &Context, db: &Db) -> Result<i64> {
        let metadata = db.catalog().metadata::<E>();
        validate_identifier(metadata.table())?;
        self.scope.validate()?;
        let (sql, args) = self.scope.build_count(metadata.table());
        let records = db.run(ctx, QueryOp::Count, sql, args).await?;
        records
            .first()
            .and_then(|record| record.iter().next())
            .and_then(|(_, value)| value.as_int())
            .ok_or_else(|| OrmError::Decode {
                entity: metadata.type_name().to_string(),
                column: String::from("COUNT(*)"),
                reason: String::from("count query returned no integer"),
            })
    }

    /// Returns whether any row matches.
    ///
    /// # Errors
    ///
    /// See [`count`](Self::count).
    pub async fn exists(&self, ctx: &Context, db: &Db) -> Result<bool> {
        Ok(self.count(ctx, db).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityDef;

    #[derive(Debug, Clone, Default)]
    struct Note {
        id: i64,
        body: String,
    }

    impl Entity for Note {
        fn define(def: &mut EntityDef<Self>) {
            def.column("id", |n| &n.id, |n| &mut n.id);
            def.column("body", |n| &n.body, |n| &mut n.body);
        }
    }

    #[test]
    fn builders_accumulate_in_the_scope() {
        let qs: QuerySet<Note> = QuerySet::new()
            .filter(Q::eq("body", "x"))
            .exclude(Q::eq("id", 3))
            .order_by("-id")
            .limit(5)
            .offset(10);
        let (sql, params) = qs.scope.build_select("notes", &["id".to_string()]);
        assert_eq!(
            sql,
            "SELECT id FROM notes WHERE body = ? AND NOT (id = ?) ORDER BY id DESC LIMIT 5 OFFSET 10"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn with_callback_requests_the_path() {
        let qs: QuerySet<Note> = QuerySet::new()
            .with(["Author"])
            .with_callback("Tags", |scope| scope.limit(3));
        assert_eq!(qs.eager.paths(), ["Author", "Tags"]);
    }

    #[test]
    fn none_matches_nothing() {
        let qs: QuerySet<Note> = QuerySet::none();
        let (sql, _) = qs.scope.build_count("notes");
        assert_eq!(sql, "SELECT COUNT(*) FROM notes WHERE 1 = 0");
    }
}
