//! Polymorphic owners: discriminator maps and the morph-to loader.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use tether_core::{validate_identifier, SqlValue};
use tracing::debug;

use super::{
    morph_columns, unmapped, ErasedRelation, MorphToDescriptor, RelationDescriptor, RelationInfo,
};
use crate::catalog::Catalog;
use crate::error::{OrmError, QueryOp, Result};
use crate::loader::{KeyIndex, Loader, PathNode};
use crate::query::{Scope, Q};
use crate::schema::{short_type_name, Entity, EntityMetadata};

/// An owner loaded through a morph-to relation.
///
/// The concrete type depends on the discriminator stored in the row, so the
/// value is held type-erased and recovered with [`downcast_ref`](Self::downcast_ref).
#[derive(Clone)]
pub struct Morphed {
    discriminator: String,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for Morphed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Morphed")
            .field("discriminator", &self.discriminator)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl Morphed {
    /// Wraps a loaded owner.
    pub fn new<T: Entity>(discriminator: impl Into<String>, value: T) -> Self {
        Self {
            discriminator: discriminator.into(),
            type_name: short_type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Discriminator value the owner was loaded under.
    #[must_use]
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Short name of the owner type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the owner is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrows the owner as a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Clones the owner out as a `T`.
    #[must_use]
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }
}

/// Maps discriminator values to owner types.
///
/// ```ignore
/// let types = MorphMap::new()
///     .register::<Post>("posts")
///     .register::<Video>("videos");
/// db.load_morph(&ctx, &mut comments, "Commentable", types).await?;
/// ```
#[derive(Clone, Default)]
pub struct MorphMap {
    targets: HashMap<String, Arc<dyn MorphTarget>>,
}

impl fmt::Debug for MorphMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(&str, &str)> = self
            .targets
            .iter()
            .map(|(d, t)| (d.as_str(), t.type_name()))
            .collect();
        entries.sort_unstable();
        f.debug_map().entries(entries).finish()
    }
}

impl MorphMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `discriminator` to `T`, replacing any previous entry.
    #[must_use]
    pub fn register<T: Entity>(mut self, discriminator: &str) -> Self {
        self.insert(
            discriminator.to_string(),
            Arc::new(TypedMorphTarget::<T>::new()),
        );
        self
    }

    /// Whether `discriminator` is mapped.
    #[must_use]
    pub fn contains(&self, discriminator: &str) -> bool {
        self.targets.contains_key(discriminator)
    }

    /// Number of mapped discriminators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no discriminator is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Mapped discriminators, sorted.
    #[must_use]
    pub fn discriminators(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub(crate) fn get(&self, discriminator: &str) -> Option<&Arc<dyn MorphTarget>> {
        self.targets.get(discriminator)
    }

    pub(crate) fn insert(&mut self, discriminator: String, target: Arc<dyn MorphTarget>) {
        self.targets.insert(discriminator, target);
    }

    fn targets(&self) -> impl Iterator<Item = &Arc<dyn MorphTarget>> {
        self.targets.values()
    }
}

/// One owner type of a morph-to relation, erased.
pub(crate) trait MorphTarget: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Discriminator the owner type is stored under by default.
    fn alias(&self, catalog: &Catalog) -> String;

    fn resolve(&self, catalog: &Catalog, column: &str) -> Option<String>;

    fn prepare(&self, loader: &mut Loader<'_>, node: &PathNode) -> Result<()>;

    /// Loads owners whose key column is in `ids`, returning them with their
    /// encoded keys.
    fn load<'a>(
        &'a self,
        loader: &'a Loader<'_>,
        node: &'a PathNode,
        owner_key: Option<&'a str>,
        discriminator: &'a str,
        ids: Vec<SqlValue>,
    ) -> BoxFuture<'a, Result<Vec<(String, Morphed)>>>;
}

pub(crate) struct TypedMorphTarget<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedMorphTarget<T> {
    pub(crate) const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> MorphTarget for TypedMorphTarget<T> {
    fn type_name(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn alias(&self, catalog: &Catalog) -> String {
        catalog.metadata::<T>().morph_alias().to_string()
    }

    fn resolve(&self, catalog: &Catalog, column: &str) -> Option<String> {
        catalog.resolve_column::<T>(column)
    }

    fn prepare(&self, loader: &mut Loader<'_>, node: &PathNode) -> Result<()> {
        loader.prepare::<T>(&node.children)
    }

    fn load<'a>(
        &'a self,
        loader: &'a Loader<'_>,
        node: &'a PathNode,
        owner_key: Option<&'a str>,
        discriminator: &'a str,
        ids: Vec<SqlValue>,
    ) -> BoxFuture<'a, Result<Vec<(String, Morphed)>>> {
        Box::pin(async move {
            let catalog = loader.catalog();
            let schema = catalog.schema::<T>();
            let metadata = schema.metadata();
            let column = match owner_key {
                Some(key) => catalog
                    .resolve_column::<T>(key)
                    .ok_or_else(|| unmapped(node, metadata, key))?,
                None => metadata.primary_key().to_string(),
            };
            let access = schema
                .access(&column)
                .ok_or_else(|| unmapped(node, metadata, &column))?;

            let scope = loader.constrain(node, Scope::new().filter(Q::in_list(&column, ids)))?;
            let columns = loader.projection::<T>(node);
            let records = loader
                .fetch(QueryOp::Relation, metadata.table(), &columns, &scope)
                .await?;
            let mut owners = records
                .iter()
                .map(|record| schema.scan(record))
                .collect::<Result<Vec<T>>>()?;

            if !node.children.is_empty() {
                let mut refs: Vec<&mut T> = owners.iter_mut().collect();
                loader.load::<T>(&mut refs, &node.children).await?;
            }

            let mut loaded = Vec::with_capacity(owners.len());
            for owner in owners {
                if access.is_zero(&owner) {
                    continue;
                }
                let encoded = access.key(&owner)?.encode();
                loaded.push((encoded, Morphed::new(discriminator, owner)));
            }
            debug!(
                relation = %node.path,
                discriminator,
                owner = short_type_name::<T>(),
                rows = records.len(),
                "loaded morph owners"
            );
            Ok(loaded)
        })
    }
}

type MorphSlot<E> = Arc<dyn Fn(&mut E) -> &mut Option<Morphed> + Send + Sync>;

/// Morph-to loader: groups parents by discriminator and loads each owner
/// type with one query.
pub(crate) struct MorphToRelation<E> {
    slot: MorphSlot<E>,
}

impl<E> MorphToRelation<E> {
    pub(crate) fn new(slot: MorphSlot<E>) -> Self {
        Self { slot }
    }
}

impl<E: Entity> ErasedRelation<E> for MorphToRelation<E> {
    fn describe(
        &self,
        catalog: &Catalog,
        parent: &EntityMetadata,
        info: &RelationInfo,
        morph: Option<&MorphMap>,
    ) -> Result<RelationDescriptor> {
        let (morph_type, morph_id) = morph_columns(info, parent)?;
        let morph_type = info.mapped_column::<E>(catalog, parent, &morph_type)?;
        let morph_id = info.mapped_column::<E>(catalog, parent, &morph_id)?;

        let owner_key = info.config.owner_key.clone();
        if let Some(key) = &owner_key {
            validate_identifier(key)?;
        }

        let types = morph.cloned().unwrap_or_else(|| {
            let mut types = MorphMap::new();
            for (discriminator, target) in &info.config.targets {
                let discriminator = discriminator
                    .clone()
                    .unwrap_or_else(|| target.alias(catalog));
                types.insert(discriminator, Arc::clone(target));
            }
            types
        });

        if let Some(key) = &owner_key {
            for target in types.targets() {
                if target.resolve(catalog, key).is_none() {
                    return Err(info.misconfigured(
                        parent,
                        format!("column `{key}` is not mapped on `{}`", target.type_name()),
                    ));
                }
            }
        }

        Ok(RelationDescriptor::MorphTo(MorphToDescriptor {
            morph_type,
            morph_id,
            owner_key,
            types,
        }))
    }

    fn prepare_children(
        &self,
        loader: &mut Loader<'_>,
        descriptor: &RelationDescriptor,
        node: &PathNode,
    ) -> Result<()> {
        if let RelationDescriptor::MorphTo(descriptor) = descriptor {
            for target in descriptor.types.targets() {
                target.prepare(loader, node)?;
            }
        }
        Ok(())
    }

    fn load<'p, 'q>(
        &'p self,
        loader: &'p Loader<'_>,
        descriptor: &'p RelationDescriptor,
        parents: &'p mut [&'q mut E],
        node: &'p PathNode,
    ) -> BoxFuture<'p, Result<()>> {
        Box::pin(async move {
            let catalog = loader.catalog();
            let schema = catalog.schema::<E>();
            let metadata = schema.metadata();
            let RelationDescriptor::MorphTo(descriptor) = descriptor else {
                return Err(OrmError::InvalidRelation {
                    relation: node.name.clone(),
                    parent: metadata.type_name().to_string(),
                    reason: String::from("descriptor does not match a morph-to relation"),
                });
            };
            let type_access = schema
                .access(&descriptor.morph_type)
                .ok_or_else(|| unmapped(node, metadata, &descriptor.morph_type))?;
            let id_access = schema
                .access(&descriptor.morph_id)
                .ok_or_else(|| unmapped(node, metadata, &descriptor.morph_id))?;

            // Sorted so owner types are queried in a stable order.
            let mut groups: BTreeMap<String, KeyIndex> = BTreeMap::new();
            for (position, parent) in parents.iter().enumerate() {
                let discriminator = match type_access.read(parent) {
                    SqlValue::Text(text) if !text.is_empty() => text,
                    _ => continue,
                };
                if id_access.is_zero(parent) {
                    continue;
                }
                let key = id_access.key(parent)?;
                groups.entry(discriminator).or_default().insert(
                    key.encode(),
                    id_access.read(parent),
                    position,
                );
            }

            // Every owner type is fetched before any parent is touched.
            let mut staged: Vec<(usize, Morphed)> = Vec::new();
            for (discriminator, index) in groups {
                let Some(target) = descriptor.types.get(&discriminator) else {
                    debug!(
                        relation = %node.path,
                        discriminator = %discriminator,
                        parents = index.groups.values().map(Vec::len).sum::<usize>(),
                        "skipping unmapped morph discriminator"
                    );
                    continue;
                };
                let owners = target
                    .load(
                        loader,
                        node,
                        descriptor.owner_key.as_deref(),
                        &discriminator,
                        index.values.clone(),
                    )
                    .await?;
                for (encoded, owner) in owners {
                    if let Some(positions) = index.get(&encoded) {
                        staged.extend(positions.iter().map(|&position| (position, owner.clone())));
                    }
                }
            }

            for parent in parents.iter_mut() {
                *(self.slot)(&mut **parent) = None;
            }
            for (position, owner) in staged {
                let field = (self.slot)(&mut *parents[position]);
                if field.is_none() {
                    *field = Some(owner);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityDef;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Video {
        id: i64,
        title: String,
    }

    impl Entity for Video {
        fn define(def: &mut EntityDef<Self>) {
            def.column("id", |v| &v.id, |v| &mut v.id);
            def.column("title", |v| &v.title, |v| &mut v.title);
        }
    }

    #[test]
    fn morphed_downcasts_to_its_type() {
        let video = Video {
            id: 3,
            title: String::from("intro"),
        };
        let morphed = Morphed::new("videos", video.clone());
        assert_eq!(morphed.discriminator(), "videos");
        assert_eq!(morphed.type_name(), "Video");
        assert!(morphed.is::<Video>());
        assert!(!morphed.is::<String>());
        assert_eq!(morphed.downcast_ref::<Video>(), Some(&video));
        assert_eq!(morphed.downcast::<Video>(), Some(video));
    }

    #[test]
    fn morph_map_lists_sorted_discriminators() {
        let map = MorphMap::new()
            .register::<Video>("videos")
            .register::<Video>("clips");
        assert_eq!(map.len(), 2);
        assert!(map.contains("clips"));
        assert!(!map.contains("posts"));
        assert_eq!(map.discriminators(), vec!["clips", "videos"]);
        assert_eq!(format!("{map:?}"), r#"{"clips": "Video", "videos": "Video"}"#);
    }

    #[test]
    fn default_alias_is_the_table_name() {
        let catalog = Catalog::new();
        let target = TypedMorphTarget::<Video>::new();
        assert_eq!(target.alias(&catalog), "videos");
        assert_eq!(target.resolve(&catalog, "Title").as_deref(), Some("title"));
    }
}
