//! Per-type schema registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use heck::ToSnakeCase;
use parking_lot::RwLock;
use tracing::trace;

use crate::cache::ShardedLru;
use crate::config::CatalogConfig;
use crate::schema::{short_type_name, Entity, EntityMetadata, EntitySchema};

type ErasedSchema = Arc<dyn Any + Send + Sync>;

/// Owns the schema of every entity type seen so far and the string caches
/// used while deriving and resolving names.
///
/// A schema is built the first time its type is requested and kept until the
/// catalog is dropped. Concurrent first requests may each build a schema;
/// only the first one stored is kept and every caller receives it.
///
/// # Example
///
/// ```ignore
/// let catalog = Catalog::new();
/// let meta = catalog.metadata::<Book>();
/// assert_eq!(meta.table(), "books");
/// assert_eq!(meta.primary_key(), "id");
/// ```
pub struct Catalog {
    entities: RwLock<HashMap<TypeId, ErasedSchema>>,
    snake: ShardedLru<String, String>,
    columns: ShardedLru<(TypeId, String), Option<String>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("entities", &self.len())
            .finish_non_exhaustive()
    }
}

impl Catalog {
    /// Creates a catalog with the default cache sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&CatalogConfig::default())
    }

    /// Creates a catalog sized by `config`.
    #[must_use]
    pub fn with_config(config: &CatalogConfig) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            snake: ShardedLru::new(config.cache_capacity, config.cache_shards),
            columns: ShardedLru::new(config.cache_capacity, config.cache_shards),
        }
    }

    /// Returns the schema of `E`, building it on first use.
    ///
    /// # Panics
    ///
    /// Panics if `E` registers no columns.
    pub fn schema<E: Entity>(&self) -> Arc<EntitySchema<E>> {
        let id = TypeId::of::<E>();
        if let Some(schema) = self.entities.read().get(&id) {
            return downcast(schema);
        }

        // Built without holding the lock: registration may consult the caches.
        let built: ErasedSchema = Arc::new(EntitySchema::<E>::build(self));

        let mut entities = self.entities.write();
        let schema = entities.entry(id).or_insert_with(|| {
            trace!(entity = short_type_name::<E>(), "registered entity schema");
            built
        });
        downcast(schema)
    }

    /// Returns the metadata of `E`, building it on first use.
    pub fn metadata<E: Entity>(&self) -> Arc<EntityMetadata> {
        Arc::clone(self.schema::<E>().metadata())
    }

    /// Number of entity types registered so far.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Whether no entity type has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// snake_case conversion, cached.
    pub fn snake_case(&self, name: &str) -> String {
        self.snake
            .get_or_insert_with(name, || name.to_snake_case())
    }

    /// Resolves a field or column name of `E` to its column name.
    ///
    /// Accepts the column name itself, the Rust field name, or any casing
    /// whose snake_case form is a column.
    pub fn resolve_column<E: Entity>(&self, name: &str) -> Option<String> {
        let key = (TypeId::of::<E>(), name.to_string());
        if let Some(resolved) = self.columns.load(&key) {
            return resolved;
        }
        let metadata = self.metadata::<E>();
        let resolved = metadata
            .column(name)
            .or_else(|| metadata.field(name))
            .or_else(|| metadata.column(&self.snake_case(name)))
            .map(|field| field.column.clone());
        self.columns.store(key, resolved.clone());
        resolved
    }

    /// Drops cached string conversions and column lookups.
    ///
    /// Entity schemas are kept.
    pub fn clear_caches(&self) {
        self.snake.clear();
        self.columns.clear();
    }
}

fn downcast<E: Entity>(schema: &ErasedSchema) -> Arc<EntitySchema<E>> {
    Arc::clone(schema)
        .downcast::<EntitySchema<E>>()
        .unwrap_or_else(|_| unreachable!("schema stored under the TypeId of another type"))
}
