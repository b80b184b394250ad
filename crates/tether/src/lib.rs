//! # tether
//!
//! Typed entities over SQL tables with batched eager loading of relations.
//!
//! This crate provides:
//! - [`Entity`] registration, derived or written by hand
//! - [`Catalog`]: per-type metadata built once and cached
//! - Seven relation kinds: has-one, has-many, belongs-to, many-to-many,
//!   morph-one, morph-many and morph-to
//! - [`Db::load`] / [`Db::load_slice`] / [`Db::preload`]: one query per
//!   relation level, never one per parent row
//! - [`QuerySet`] / [`Manager`]: lazy, chainable queries with `with()` for
//!   eager loading
//! - [`Context`]: cancellation and deadlines honoured by every statement
//!
//! ## Quick Start
//!
//! ```ignore
//! use tether::{Context, Db, Entity, Q};
//! use sqlx::SqlitePool;
//!
//! #[derive(Debug, Clone, Default, Entity)]
//! struct Author {
//!     #[column(primary_key)]
//!     id: i64,
//!     name: String,
//!     #[relation(has_many)]
//!     books: Vec<Book>,
//! }
//!
//! #[derive(Debug, Clone, Default, Entity)]
//! struct Book {
//!     #[column(primary_key)]
//!     id: i64,
//!     title: String,
//!     author_id: i64,
//!     #[relation(belongs_to)]
//!     author: Option<Author>,
//! }
//!
//! async fn example(pool: SqlitePool) -> tether::Result<()> {
//!     let db = Db::new(pool);
//!     let ctx = Context::background();
//!
//!     // Two statements: the books, then every referenced author at once.
//!     let books = Book::objects()
//!         .filter(Q::gt("id", 0))
//!         .with(["Author"])
//!         .execute(&ctx, &db)
//!         .await?;
//!
//!     // Nested paths and column projections.
//!     let mut authors = Author::objects().all().execute(&ctx, &db).await?;
//!     db.load_slice(&ctx, &mut authors, &["Books:id,title,author_id"]).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Identifier Safety
//!
//! Every table and column name that reaches SQL goes through
//! [`validate_identifier`]: quotes, semicolons, comment markers and statement
//! keywords are rejected. The whole relation tree is resolved before the
//! first statement runs, so a misconfigured relation fails without touching
//! the database. Values are always bound as parameters.

extern crate self as tether;

mod cache;
mod catalog;
mod config;
mod context;
mod db;
mod error;
mod executor;
mod loader;
mod manager;
pub mod query;
mod queryset;
mod relation;
mod schema;

pub use cache::ShardedLru;
pub use catalog::Catalog;
pub use config::CatalogConfig;
pub use context::Context;
pub use db::Db;
pub use error::{OrmError, QueryError, QueryFailure, QueryOp, RelationError, Result};
pub use executor::{Executor, Record};
pub use loader::{Constraint, Eager};
pub use manager::Manager;
pub use query::{CompareOp, FilterExpr, OrderBy, OrderDirection, Scope, Q};
pub use queryset::QuerySet;
pub use relation::{
    BelongsToRelation, HasRelation, MorphMap, MorphRelation, MorphToDescriptor, Morphed,
    PivotRelation, RelationDescriptor, RelationKind, RelationOptions,
};
pub use schema::{ColumnOptions, ColumnType, Entity, EntityDef, EntityMetadata, EntitySchema, FieldInfo};
pub use tether_derive::Entity;

pub use tether_core::{
    encode_key, is_zero, validate_identifier, IdentifierError, Key, KeyError, SqlValue, ToKey,
    ToSqlValue,
};
