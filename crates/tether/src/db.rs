//! Database handle: an executor plus the catalog describing its entities.

use std::fmt;
use std::sync::Arc;

use tether_core::SqlValue;
use tracing::debug;

use crate::catalog::Catalog;
use crate::context::Context;
use crate::error::{QueryError, QueryOp, Result};
use crate::executor::{Executor, Record};
use crate::loader::{Eager, Loader};
use crate::relation::MorphMap;
use crate::schema::Entity;

/// Entry point for queries and relation loading.
///
/// Cheap to clone; clones share the executor and the catalog.
///
/// ```ignore
/// let pool = SqlitePool::connect("sqlite::memory:").await?;
/// let db = Db::new(pool);
/// let ctx = Context::background();
///
/// let mut books = Book::objects().all().execute(&ctx, &db).await?;
/// db.load_slice(&ctx, &mut books, &["Author"]).await?;
/// ```
#[derive(Clone)]
pub struct Db {
    executor: Arc<dyn Executor>,
    catalog: Arc<Catalog>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Wraps `executor` with a fresh catalog.
    pub fn new<X: Executor + 'static>(executor: X) -> Self {
        Self::with_catalog(executor, Arc::new(Catalog::new()))
    }

    /// Wraps `executor` with a shared catalog.
    pub fn with_catalog<X: Executor + 'static>(executor: X, catalog: Arc<Catalog>) -> Self {
        Self {
            executor: Arc::new(executor),
            catalog,
        }
    }

    /// The catalog used by this handle.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs raw SQL with bound arguments.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Query`](crate::OrmError::Query) when the executor fails.
    pub async fn query_rows(&self, ctx: &Context, sql: &str, args: &[SqlValue]) -> Result<Vec<Record>> {
        self.run(ctx, QueryOp::Select, sql.to_string(), args.to_vec())
            .await
    }

    pub(crate) async fn run(
        &self,
        ctx: &Context,
        op: QueryOp,
        sql: String,
        args: Vec<SqlValue>,
    ) -> Result<Vec<Record>> {
        debug!(op = %op, sql = %sql, args = args.len(), "executing statement");
        let result = self.executor.query_rows(ctx, &sql, &args).await;
        result.map_err(|source| {
            QueryError {
                op,
                sql,
                args,
                source,
            }
            .into()
        })
    }

    /// Loads relations onto one entity.
    ///
    /// # Errors
    ///
    /// See [`preload`](Self::preload).
    pub async fn load<E: Entity>(&self, ctx: &Context, entity: &mut E, names: &[&str]) -> Result<()> {
        self.load_slice(ctx, std::slice::from_mut(entity), names)
            .await
    }

    /// Loads relations onto a batch of entities, one query per relation
    /// level.
    ///
    /// # Errors
    ///
    /// See [`preload`](Self::preload).
    pub async fn load_slice<E: Entity>(
        &self,
        ctx: &Context,
        entities: &mut [E],
        names: &[&str],
    ) -> Result<()> {
        let eager = Eager::new().with(names.iter().copied());
        self.preload(ctx, entities, &eager).await
    }

    /// Loads a morph-to relation using an explicit discriminator map.
    ///
    /// # Errors
    ///
    /// See [`preload`](Self::preload).
    pub async fn load_morph<E: Entity>(
        &self,
        ctx: &Context,
        entities: &mut [E],
        name: &str,
        types: MorphMap,
    ) -> Result<()> {
        let eager = Eager::new().with_morph(name, types);
        self.preload(ctx, entities, &eager).await
    }

    /// Loads every path of `eager` onto `entities`.
    ///
    /// An empty batch returns immediately. Otherwise every path is resolved
    /// and validated first, so a bad relation name, an invalid identifier or
    /// a malformed path fails before any statement runs.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Relation`](crate::OrmError::Relation) for unknown
    /// relation names, [`OrmError::InvalidIdentifier`](crate::OrmError::InvalidIdentifier)
    /// for names failing the whitelist, and
    /// [`OrmError::Query`](crate::OrmError::Query) when a statement fails.
    /// Levels loaded before a failure keep their assignments.
    pub async fn preload<E: Entity>(&self, ctx: &Context, entities: &mut [E], eager: &Eager) -> Result<()> {
        if entities.is_empty() || eager.is_empty() {
            return Ok(());
        }
        let (loader, nodes) = Loader::plan::<E>(self, ctx, eager)?;
        loader.run(&nodes, entities).await
    }
}
