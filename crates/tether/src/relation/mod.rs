//! Relation kinds, their registration and their resolved descriptors.
//!
//! A relation is registered on the parent entity with the field that receives
//! the loaded rows. Resolving it against the catalog applies the naming
//! defaults, validates every identifier that will reach SQL, and produces a
//! [`RelationDescriptor`] the loader executes.

mod keyed;
mod morph;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use heck::ToUpperCamelCase;
use tether_core::validate_identifier;

use crate::catalog::Catalog;
use crate::error::{OrmError, Result};
use crate::loader::{Loader, PathNode};
use crate::schema::{Entity, EntityDef, EntityMetadata};

use keyed::{KeyedRelation, Slot};
pub(crate) use morph::MorphTarget;
pub use morph::{MorphMap, Morphed};
use morph::{MorphToRelation, TypedMorphTarget};

/// The seven relation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// The related table holds a foreign key to the parent; at most one row.
    HasOne,
    /// The related table holds a foreign key to the parent; any number of rows.
    HasMany,
    /// The parent holds a foreign key to the related table.
    BelongsTo,
    /// Parent and related rows are paired through a pivot table.
    BelongsToMany,
    /// Polymorphic has-one through a type/id column pair on the related table.
    MorphOne,
    /// Polymorphic has-many through a type/id column pair on the related table.
    MorphMany,
    /// The parent holds a type/id column pair naming its owner.
    MorphTo,
}

impl RelationKind {
    /// Whether the relation fills a collection.
    #[must_use]
    pub const fn is_many(self) -> bool {
        matches!(self, Self::HasMany | Self::BelongsToMany | Self::MorphMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::BelongsTo => "belongs_to",
            Self::BelongsToMany => "belongs_to_many",
            Self::MorphOne => "morph_one",
            Self::MorphMany => "morph_many",
            Self::MorphTo => "morph_to",
        };
        f.write_str(name)
    }
}

/// Has-one / has-many: `table.foreign_key` references `parent.owner_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasRelation {
    /// Related table.
    pub table: String,
    /// Column on the related table.
    pub foreign_key: String,
    /// Column on the parent table.
    pub owner_key: String,
}

/// Belongs-to: `parent.foreign_key` references `table.owner_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BelongsToRelation {
    /// Related table.
    pub table: String,
    /// Column on the parent table.
    pub foreign_key: String,
    /// Column on the related table.
    pub owner_key: String,
}

/// Many-to-many through a pivot table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotRelation {
    /// Related table.
    pub table: String,
    /// Pivot table.
    pub pivot_table: String,
    /// Pivot column referencing the parent.
    pub foreign_pivot_key: String,
    /// Pivot column referencing the related row.
    pub related_pivot_key: String,
    /// Parent column stored in `foreign_pivot_key`.
    pub parent_key: String,
    /// Related column stored in `related_pivot_key`.
    pub related_key: String,
}

/// Morph-one / morph-many: the related table names its owner by type and id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphRelation {
    /// Related table.
    pub table: String,
    /// Discriminator column on the related table.
    pub morph_type: String,
    /// Owner id column on the related table.
    pub morph_id: String,
    /// Discriminator value identifying the parent type.
    pub morph_value: String,
    /// Parent column stored in `morph_id`.
    pub owner_key: String,
}

/// Morph-to: the parent names its owner by type and id.
#[derive(Debug, Clone)]
pub struct MorphToDescriptor {
    /// Discriminator column on the parent table.
    pub morph_type: String,
    /// Owner id column on the parent table.
    pub morph_id: String,
    /// Column on the owner tables matched against `morph_id`; each owner's
    /// primary key when unset.
    pub owner_key: Option<String>,
    /// Discriminator value to owner type.
    pub types: MorphMap,
}

/// A fully resolved relation.
#[derive(Debug, Clone)]
pub enum RelationDescriptor {
    /// See [`RelationKind::HasOne`].
    HasOne(HasRelation),
    /// See [`RelationKind::HasMany`].
    HasMany(HasRelation),
    /// See [`RelationKind::BelongsTo`].
    BelongsTo(BelongsToRelation),
    /// See [`RelationKind::BelongsToMany`].
    BelongsToMany(PivotRelation),
    /// See [`RelationKind::MorphOne`].
    MorphOne(MorphRelation),
    /// See [`RelationKind::MorphMany`].
    MorphMany(MorphRelation),
    /// See [`RelationKind::MorphTo`].
    MorphTo(MorphToDescriptor),
}

impl RelationDescriptor {
    /// The kind of this descriptor.
    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        match self {
            Self::HasOne(_) => RelationKind::HasOne,
            Self::HasMany(_) => RelationKind::HasMany,
            Self::BelongsTo(_) => RelationKind::BelongsTo,
            Self::BelongsToMany(_) => RelationKind::BelongsToMany,
            Self::MorphOne(_) => RelationKind::MorphOne,
            Self::MorphMany(_) => RelationKind::MorphMany,
            Self::MorphTo(_) => RelationKind::MorphTo,
        }
    }
}

/// Overrides recorded at registration time.
#[derive(Clone, Default)]
pub(crate) struct RelationConfig {
    pub(crate) foreign_key: Option<String>,
    pub(crate) owner_key: Option<String>,
    pub(crate) table: Option<String>,
    pub(crate) pivot_table: Option<String>,
    pub(crate) foreign_pivot_key: Option<String>,
    pub(crate) related_pivot_key: Option<String>,
    pub(crate) related_key: Option<String>,
    pub(crate) morph_name: Option<String>,
    pub(crate) morph_type: Option<String>,
    pub(crate) morph_id: Option<String>,
    pub(crate) targets: Vec<(Option<String>, Arc<dyn MorphTarget>)>,
}

/// Registration data of one relation.
#[derive(Clone)]
pub(crate) struct RelationInfo {
    pub(crate) name: String,
    pub(crate) field: String,
    pub(crate) index: Vec<usize>,
    pub(crate) kind: RelationKind,
    pub(crate) config: RelationConfig,
}

impl RelationInfo {
    pub(crate) fn misconfigured(&self, parent: &EntityMetadata, reason: impl Into<String>) -> OrmError {
        OrmError::InvalidRelation {
            relation: self.name.clone(),
            parent: parent.type_name().to_string(),
            reason: reason.into(),
        }
    }

    /// Validates an identifier and checks it names a column of `E`.
    pub(crate) fn mapped_column<E: Entity>(
        &self,
        catalog: &Catalog,
        parent: &EntityMetadata,
        name: &str,
    ) -> Result<String> {
        validate_identifier(name)?;
        catalog.resolve_column::<E>(name).ok_or_else(|| {
            self.misconfigured(
                parent,
                format!(
                    "column `{name}` is not mapped on `{}`",
                    catalog.metadata::<E>().type_name()
                ),
            )
        })
    }
}

/// A registered relation and its typed loader.
pub(crate) struct RelationDef<E> {
    pub(crate) info: RelationInfo,
    pub(crate) loader: Arc<dyn ErasedRelation<E>>,
}

/// Per-kind resolution and loading, erased over the related type.
pub(crate) trait ErasedRelation<E>: Send + Sync {
    /// Applies defaults and validation, producing the descriptor.
    fn describe(
        &self,
        catalog: &Catalog,
        parent: &EntityMetadata,
        info: &RelationInfo,
        morph: Option<&MorphMap>,
    ) -> Result<RelationDescriptor>;

    /// Resolves the nested paths below this relation.
    fn prepare_children(
        &self,
        loader: &mut Loader<'_>,
        descriptor: &RelationDescriptor,
        node: &PathNode,
    ) -> Result<()>;

    /// Loads the relation for a batch of parents and recurses into children.
    fn load<'p, 'q>(
        &'p self,
        loader: &'p Loader<'_>,
        descriptor: &'p RelationDescriptor,
        parents: &'p mut [&'q mut E],
        node: &'p PathNode,
    ) -> BoxFuture<'p, Result<()>>;
}

/// Options for a registered relation.
///
/// Every name passed here is validated against the identifier whitelist when
/// the relation is first resolved.
pub struct RelationOptions<'a, E> {
    relation: &'a mut RelationDef<E>,
}

#[allow(clippy::return_self_not_must_use)]
impl<E: Entity> RelationOptions<'_, E> {
    fn config(&mut self) -> &mut RelationConfig {
        &mut self.relation.info.config
    }

    /// Overrides the relation name (default: UpperCamelCase of the field).
    pub fn named(self, name: &str) -> Self {
        self.relation.info.name = name.to_string();
        self
    }

    /// Overrides the foreign-key column.
    pub fn foreign_key(mut self, column: &str) -> Self {
        self.config().foreign_key = Some(column.to_string());
        self
    }

    /// Overrides the owner-key column.
    pub fn owner_key(mut self, column: &str) -> Self {
        self.config().owner_key = Some(column.to_string());
        self
    }

    /// Overrides the related table.
    pub fn table(mut self, table: &str) -> Self {
        self.config().table = Some(table.to_string());
        self
    }

    /// Overrides the pivot table of a many-to-many relation.
    pub fn pivot(mut self, table: &str) -> Self {
        self.config().pivot_table = Some(table.to_string());
        self
    }

    /// Overrides the pivot columns referencing the parent and related rows.
    pub fn pivot_keys(mut self, foreign: &str, related: &str) -> Self {
        let config = self.config();
        config.foreign_pivot_key = Some(foreign.to_string());
        config.related_pivot_key = Some(related.to_string());
        self
    }

    /// Overrides the related column stored in the pivot table.
    pub fn related_key(mut self, column: &str) -> Self {
        self.config().related_key = Some(column.to_string());
        self
    }

    /// Overrides the morph type and id columns.
    pub fn morph_columns(mut self, type_column: &str, id_column: &str) -> Self {
        let config = self.config();
        config.morph_type = Some(type_column.to_string());
        config.morph_id = Some(id_column.to_string());
        self
    }

    /// Adds a conventional morph-to owner type, keyed by its morph alias.
    pub fn target<T: Entity>(mut self) -> Self {
        self.config()
            .targets
            .push((None, Arc::new(TypedMorphTarget::<T>::new())));
        self
    }

    /// Adds a morph-to owner type under an explicit discriminator.
    pub fn target_as<T: Entity>(mut self, discriminator: &str) -> Self {
        self.config().targets.push((
            Some(discriminator.to_string()),
            Arc::new(TypedMorphTarget::<T>::new()),
        ));
        self
    }
}

impl<E: Entity> EntityDef<E> {
    fn relation(
        &mut self,
        field: &str,
        kind: RelationKind,
        config: RelationConfig,
        loader: Arc<dyn ErasedRelation<E>>,
    ) -> RelationOptions<'_, E> {
        let index = self.next_index();
        self.relations.push(RelationDef {
            info: RelationInfo {
                name: field.to_upper_camel_case(),
                field: field.to_string(),
                index: vec![index],
                kind,
                config,
            },
            loader,
        });
        let last = self.relations.len() - 1;
        RelationOptions {
            relation: &mut self.relations[last],
        }
    }

    /// Registers a has-one relation filling an `Option<R>` field.
    pub fn has_one<R, F>(&mut self, field: &str, slot: F) -> RelationOptions<'_, E>
    where
        R: Entity,
        F: Fn(&mut E) -> &mut Option<R> + Send + Sync + 'static,
    {
        let loader = KeyedRelation::<E, R>::new(Slot::One(Arc::new(slot)));
        self.relation(field, RelationKind::HasOne, RelationConfig::default(), Arc::new(loader))
    }

    /// Registers a has-many relation filling a `Vec<R>` field.
    pub fn has_many<R, F>(&mut self, field: &str, slot: F) -> RelationOptions<'_, E>
    where
        R: Entity,
        F: Fn(&mut E) -> &mut Vec<R> + Send + Sync + 'static,
    {
        let loader = KeyedRelation::<E, R>::new(Slot::Many(Arc::new(slot)));
        self.relation(field, RelationKind::HasMany, RelationConfig::default(), Arc::new(loader))
    }

    /// Registers a belongs-to relation filling an `Option<R>` field.
    pub fn belongs_to<R, F>(&mut self, field: &str, slot: F) -> RelationOptions<'_, E>
    where
        R: Entity,
        F: Fn(&mut E) -> &mut Option<R> + Send + Sync + 'static,
    {
        let loader = KeyedRelation::<E, R>::new(Slot::One(Arc::new(slot)));
        self.relation(field, RelationKind::BelongsTo, RelationConfig::default(), Arc::new(loader))
    }

    /// Registers a many-to-many relation through a pivot table.
    pub fn many_to_many<R, F>(&mut self, field: &str, slot: F) -> RelationOptions<'_, E>
    where
        R: Entity,
        F: Fn(&mut E) -> &mut Vec<R> + Send + Sync + 'static,
    {
        let loader = KeyedRelation::<E, R>::new(Slot::Many(Arc::new(slot)));
        self.relation(
            field,
            RelationKind::BelongsToMany,
            RelationConfig::default(),
            Arc::new(loader),
        )
    }

    /// Registers a polymorphic has-one relation.
    ///
    /// `morph` names the column pair on the related table: `commentable`
    /// means `commentable_type` and `commentable_id`.
    pub fn morph_one<R, F>(&mut self, field: &str, morph: &str, slot: F) -> RelationOptions<'_, E>
    where
        R: Entity,
        F: Fn(&mut E) -> &mut Option<R> + Send + Sync + 'static,
    {
        let loader = KeyedRelation::<E, R>::new(Slot::One(Arc::new(slot)));
        self.relation(field, RelationKind::MorphOne, morph_config(morph), Arc::new(loader))
    }

    /// Registers a polymorphic has-many relation.
    pub fn morph_many<R, F>(&mut self, field: &str, morph: &str, slot: F) -> RelationOptions<'_, E>
    where
        R: Entity,
        F: Fn(&mut E) -> &mut Vec<R> + Send + Sync + 'static,
    {
        let loader = KeyedRelation::<E, R>::new(Slot::Many(Arc::new(slot)));
        self.relation(field, RelationKind::MorphMany, morph_config(morph), Arc::new(loader))
    }

    /// Registers the owning side of a polymorphic relation.
    ///
    /// Owner types come from [`RelationOptions::target`] unless the caller
    /// supplies a [`MorphMap`] when loading.
    pub fn morph_to<F>(&mut self, field: &str, morph: &str, slot: F) -> RelationOptions<'_, E>
    where
        F: Fn(&mut E) -> &mut Option<Morphed> + Send + Sync + 'static,
    {
        let loader = MorphToRelation::<E>::new(Arc::new(slot));
        self.relation(field, RelationKind::MorphTo, morph_config(morph), Arc::new(loader))
    }
}

fn morph_config(morph: &str) -> RelationConfig {
    RelationConfig {
        morph_name: Some(morph.to_string()),
        ..RelationConfig::default()
    }
}

/// A resolved column that has no accessor on `entity`.
pub(crate) fn unmapped(node: &PathNode, entity: &EntityMetadata, column: &str) -> OrmError {
    OrmError::InvalidRelation {
        relation: node.name.clone(),
        parent: entity.type_name().to_string(),
        reason: format!("column `{column}` is not mapped"),
    }
}

/// Identifiers resolved by default from a morph name.
pub(crate) fn morph_columns(info: &RelationInfo, parent: &EntityMetadata) -> Result<(String, String)> {
    let config = &info.config;
    let name = config
        .morph_name
        .as_deref()
        .ok_or_else(|| info.misconfigured(parent, "morph name is missing"))?;
    let morph_type = config
        .morph_type
        .clone()
        .unwrap_or_else(|| format!("{name}_type"));
    let morph_id = config
        .morph_id
        .clone()
        .unwrap_or_else(|| format!("{name}_id"));
    Ok((morph_type, morph_id))
}

/// Default pivot table: both snake_case type names, sorted, joined by `_`.
pub(crate) fn pivot_table_name(left: &str, right: &str) -> String {
    let mut names = [left, right];
    names.sort_unstable();
    names.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_names_are_order_independent() {
        assert_eq!(pivot_table_name("user", "role"), "role_user");
        assert_eq!(pivot_table_name("role", "user"), "role_user");
        assert_eq!(pivot_table_name("post", "tag"), "post_tag");
    }

    #[test]
    fn many_kinds() {
        assert!(RelationKind::HasMany.is_many());
        assert!(RelationKind::BelongsToMany.is_many());
        assert!(RelationKind::MorphMany.is_many());
        assert!(!RelationKind::BelongsTo.is_many());
        assert!(!RelationKind::MorphTo.is_many());
        assert_eq!(RelationKind::BelongsToMany.to_string(), "belongs_to_many");
    }
}
