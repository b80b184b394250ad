//! Loaders for the six relation kinds joined on a single key column.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use tether_core::{validate_identifier, Key};
use tracing::debug;

use super::{
    morph_columns, pivot_table_name, unmapped, BelongsToRelation, ErasedRelation, HasRelation,
    MorphMap, MorphRelation, PivotRelation, RelationDescriptor, RelationInfo, RelationKind,
};
use crate::catalog::Catalog;
use crate::error::{OrmError, QueryOp, Result};
use crate::executor::Record;
use crate::loader::{KeyIndex, Loader, PathNode};
use crate::query::{Scope, Q};
use crate::schema::{Access, Entity, EntityMetadata};

type OneSlot<E, R> = Arc<dyn Fn(&mut E) -> &mut Option<R> + Send + Sync>;
type ManySlot<E, R> = Arc<dyn Fn(&mut E) -> &mut Vec<R> + Send + Sync>;

/// The parent field receiving loaded rows.
pub(crate) enum Slot<E, R> {
    One(OneSlot<E, R>),
    Many(ManySlot<E, R>),
}

impl<E, R> Slot<E, R> {
    fn reset(&self, parent: &mut E) {
        match self {
            Self::One(slot) => *slot(parent) = None,
            Self::Many(slot) => slot(parent).clear(),
        }
    }

    /// One-kinds keep the first row assigned.
    fn assign(&self, parent: &mut E, child: R) {
        match self {
            Self::One(slot) => {
                let field = slot(parent);
                if field.is_none() {
                    *field = Some(child);
                }
            }
            Self::Many(slot) => slot(parent).push(child),
        }
    }

    fn children<'a>(&self, parent: &'a mut E, out: &mut Vec<&'a mut R>) {
        match self {
            Self::One(slot) => out.extend(slot(parent).as_mut()),
            Self::Many(slot) => out.extend(slot(parent).iter_mut()),
        }
    }
}

/// Columns joining a parent batch to the related table.
struct Join<'d> {
    kind: RelationKind,
    table: &'d str,
    /// Column on the parent holding the key.
    parent_column: &'d str,
    /// Column on the related table matched against it.
    child_column: &'d str,
    /// Extra `column = value` condition on the related table.
    discriminator: Option<(&'d str, &'d str)>,
}

/// Has-one, has-many, belongs-to, belongs-to-many, morph-one and morph-many
/// between `E` and `R`.
pub(crate) struct KeyedRelation<E, R> {
    slot: Slot<E, R>,
    _marker: PhantomData<fn() -> R>,
}

impl<E: Entity, R: Entity> KeyedRelation<E, R> {
    pub(crate) const fn new(slot: Slot<E, R>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// Replaces the field of every parent with its staged rows, in order.
    ///
    /// Only called once the whole level has been fetched and decoded, so a
    /// failed or cancelled level leaves the fields as they were.
    fn commit(&self, parents: &mut [&mut E], staged: Vec<(usize, R)>) {
        for parent in parents.iter_mut() {
            self.slot.reset(parent);
        }
        for (position, child) in staged {
            self.slot.assign(&mut *parents[position], child);
        }
    }

    /// Pairs each fetched row with the parent positions its key points at.
    fn correlate(
        matcher: Option<&Access<R>>,
        children: Vec<R>,
        index: &KeyIndex,
    ) -> Result<Vec<(usize, R)>> {
        // Unprojected join columns scan as zero and never match.
        let Some(matcher) = matcher else {
            return Ok(Vec::new());
        };
        let mut staged = Vec::new();
        for child in children {
            if matcher.is_zero(&child) {
                continue;
            }
            let Some(positions) = index.get(&matcher.key(&child)?.encode()) else {
                continue;
            };
            if let Some((&last, rest)) = positions.split_last() {
                staged.extend(rest.iter().map(|&position| (position, child.clone())));
                staged.push((last, child));
            }
        }
        Ok(staged)
    }

    fn scan_all(catalog: &Catalog, records: &[Record]) -> Result<Vec<R>> {
        let schema = catalog.schema::<R>();
        records.iter().map(|record| schema.scan(record)).collect()
    }

    /// Groups parents by the encoded value of `column`, skipping zero keys.
    fn index(
        catalog: &Catalog,
        parents: &[&mut E],
        column: &str,
        node: &PathNode,
    ) -> Result<KeyIndex> {
        let schema = catalog.schema::<E>();
        let access = schema
            .access(column)
            .ok_or_else(|| unmapped(node, schema.metadata(), column))?;
        let mut index = KeyIndex::default();
        for (position, parent) in parents.iter().enumerate() {
            if access.is_zero(parent) {
                continue;
            }
            let key = access.key(parent)?;
            index.insert(key.encode(), access.read(parent), position);
        }
        Ok(index)
    }

    async fn recurse(
        &self,
        loader: &Loader<'_>,
        parents: &mut [&mut E],
        node: &PathNode,
    ) -> Result<()> {
        if node.children.is_empty() {
            return Ok(());
        }
        let mut children: Vec<&mut R> = Vec::new();
        for parent in parents.iter_mut() {
            self.slot.children(parent, &mut children);
        }
        loader.load::<R>(&mut children, &node.children).await
    }

    async fn load_keyed(
        &self,
        loader: &Loader<'_>,
        join: Join<'_>,
        parents: &mut [&mut E],
        node: &PathNode,
    ) -> Result<()> {
        let catalog = loader.catalog();
        let index = Self::index(catalog, parents, join.parent_column, node)?;
        if index.is_empty() {
            debug!(relation = %node.path, kind = %join.kind, "no parent keys, skipping query");
            self.commit(parents, Vec::new());
            return Ok(());
        }

        let mut scope = Scope::new().filter(Q::in_list(join.child_column, index.values.clone()));
        if let Some((column, value)) = join.discriminator {
            scope = scope.filter(Q::eq(column, value));
        }
        let scope = loader.constrain(node, scope)?;
        let columns = loader.projection::<R>(node);
        let records = loader
            .fetch(QueryOp::Relation, join.table, &columns, &scope)
            .await?;

        let children = Self::scan_all(catalog, &records)?;
        let schema = catalog.schema::<R>();
        let staged = Self::correlate(schema.access(join.child_column), children, &index)?;
        debug!(
            relation = %node.path,
            kind = %join.kind,
            parents = parents.len(),
            rows = records.len(),
            assigned = staged.len(),
            "loaded relation"
        );
        self.commit(parents, staged);

        self.recurse(loader, parents, node).await
    }

    async fn load_pivot(
        &self,
        loader: &Loader<'_>,
        relation: &PivotRelation,
        parents: &mut [&mut E],
        node: &PathNode,
    ) -> Result<()> {
        let catalog = loader.catalog();
        let index = Self::index(catalog, parents, &relation.parent_key, node)?;
        if index.is_empty() {
            debug!(relation = %node.path, kind = %RelationKind::BelongsToMany, "no parent keys, skipping query");
            self.commit(parents, Vec::new());
            return Ok(());
        }

        let pivot_scope =
            Scope::new().filter(Q::in_list(&relation.foreign_pivot_key, index.values.clone()));
        let pivot_columns = [
            relation.foreign_pivot_key.clone(),
            relation.related_pivot_key.clone(),
        ];
        let pivot_rows = loader
            .fetch(
                QueryOp::Pivot,
                &relation.pivot_table,
                &pivot_columns,
                &pivot_scope,
            )
            .await?;

        // Related key -> parent positions, in pivot order. Repeated pivot
        // rows link a parent to the same target once.
        let mut related = KeyIndex::default();
        let mut linked: HashSet<(String, usize)> = HashSet::new();
        for row in &pivot_rows {
            let (Some(owner), Some(target)) = (
                row.get(&relation.foreign_pivot_key),
                row.get(&relation.related_pivot_key),
            ) else {
                continue;
            };
            let owner = Key::try_from(owner)?;
            let target_key = Key::try_from(target)?;
            if owner.is_zero() || target_key.is_zero() {
                continue;
            }
            let Some(positions) = index.get(&owner.encode()) else {
                continue;
            };
            let encoded = target_key.encode();
            for &position in positions {
                if linked.insert((encoded.clone(), position)) {
                    related.insert(encoded.clone(), target.clone(), position);
                }
            }
        }
        if related.is_empty() {
            debug!(relation = %node.path, pivot_rows = pivot_rows.len(), "no pivot rows, skipping related query");
            self.commit(parents, Vec::new());
            return Ok(());
        }

        let scope = Scope::new().filter(Q::in_list(&relation.related_key, related.values.clone()));
        let scope = loader.constrain(node, scope)?;
        let columns = loader.projection::<R>(node);
        let records = loader
            .fetch(QueryOp::Relation, &relation.table, &columns, &scope)
            .await?;

        let children = Self::scan_all(catalog, &records)?;
        let schema = catalog.schema::<R>();
        let staged = Self::correlate(schema.access(&relation.related_key), children, &related)?;
        debug!(
            relation = %node.path,
            kind = %RelationKind::BelongsToMany,
            parents = parents.len(),
            pivot_rows = pivot_rows.len(),
            rows = records.len(),
            assigned = staged.len(),
            "loaded relation"
        );
        self.commit(parents, staged);

        self.recurse(loader, parents, node).await
    }
}

impl<E: Entity, R: Entity> ErasedRelation<E> for KeyedRelation<E, R> {
    fn describe(
        &self,
        catalog: &Catalog,
        parent: &EntityMetadata,
        info: &RelationInfo,
        _morph: Option<&MorphMap>,
    ) -> Result<RelationDescriptor> {
        let related = catalog.metadata::<R>();
        let config = &info.config;
        let table = config
            .table
            .clone()
            .unwrap_or_else(|| related.table().to_string());
        validate_identifier(&table)?;
        let owner_key = config
            .owner_key
            .as_deref()
            .unwrap_or_else(|| parent.primary_key());

        match info.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                let default_fk = format!("{}_id", catalog.snake_case(parent.type_name()));
                let relation = HasRelation {
                    table,
                    foreign_key: info.mapped_column::<R>(
                        catalog,
                        parent,
                        config.foreign_key.as_deref().unwrap_or(&default_fk),
                    )?,
                    owner_key: info.mapped_column::<E>(catalog, parent, owner_key)?,
                };
                Ok(if info.kind == RelationKind::HasOne {
                    RelationDescriptor::HasOne(relation)
                } else {
                    RelationDescriptor::HasMany(relation)
                })
            }
            RelationKind::BelongsTo => {
                let default_fk = format!("{}_id", catalog.snake_case(related.type_name()));
                Ok(RelationDescriptor::BelongsTo(BelongsToRelation {
                    table,
                    foreign_key: info.mapped_column::<E>(
                        catalog,
                        parent,
                        config.foreign_key.as_deref().unwrap_or(&default_fk),
                    )?,
                    owner_key: info.mapped_column::<R>(
                        catalog,
                        parent,
                        config
                            .owner_key
                            .as_deref()
                            .unwrap_or_else(|| related.primary_key()),
                    )?,
                }))
            }
            RelationKind::BelongsToMany => {
                let left = catalog.snake_case(parent.type_name());
                let right = catalog.snake_case(related.type_name());
                let pivot_table = config
                    .pivot_table
                    .clone()
                    .unwrap_or_else(|| pivot_table_name(&left, &right));
                let foreign_pivot_key = config
                    .foreign_pivot_key
                    .clone()
                    .unwrap_or_else(|| format!("{left}_id"));
                let related_pivot_key = config
                    .related_pivot_key
                    .clone()
                    .unwrap_or_else(|| format!("{right}_id"));
                validate_identifier(&pivot_table)?;
                validate_identifier(&foreign_pivot_key)?;
                validate_identifier(&related_pivot_key)?;
                Ok(RelationDescriptor::BelongsToMany(PivotRelation {
                    table,
                    pivot_table,
                    foreign_pivot_key,
                    related_pivot_key,
                    parent_key: info.mapped_column::<E>(catalog, parent, owner_key)?,
                    related_key: info.mapped_column::<R>(
                        catalog,
                        parent,
                        config
                            .related_key
                            .as_deref()
                            .unwrap_or_else(|| related.primary_key()),
                    )?,
                }))
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                let (morph_type, morph_id) = morph_columns(info, parent)?;
                let relation = MorphRelation {
                    table,
                    morph_type: info.mapped_column::<R>(catalog, parent, &morph_type)?,
                    morph_id: info.mapped_column::<R>(catalog, parent, &morph_id)?,
                    morph_value: parent.morph_alias().to_string(),
                    owner_key: info.mapped_column::<E>(catalog, parent, owner_key)?,
                };
                Ok(if info.kind == RelationKind::MorphOne {
                    RelationDescriptor::MorphOne(relation)
                } else {
                    RelationDescriptor::MorphMany(relation)
                })
            }
            RelationKind::MorphTo => Err(info.misconfigured(
                parent,
                "morph_to relations must be registered with `morph_to`",
            )),
        }
    }

    fn prepare_children(
        &self,
        loader: &mut Loader<'_>,
        _descriptor: &RelationDescriptor,
        node: &PathNode,
    ) -> Result<()> {
        loader.prepare::<R>(&node.children)
    }

    fn load<'p, 'q>(
        &'p self,
        loader: &'p Loader<'_>,
        descriptor: &'p RelationDescriptor,
        parents: &'p mut [&'q mut E],
        node: &'p PathNode,
    ) -> BoxFuture<'p, Result<()>> {
        Box::pin(async move {
            let kind = descriptor.kind();
            let join = match descriptor {
                RelationDescriptor::HasOne(relation) | RelationDescriptor::HasMany(relation) => {
                    Join {
                        kind,
                        table: &relation.table,
                        parent_column: &relation.owner_key,
                        child_column: &relation.foreign_key,
                        discriminator: None,
                    }
                }
                RelationDescriptor::BelongsTo(relation) => Join {
                    kind,
                    table: &relation.table,
                    parent_column: &relation.foreign_key,
                    child_column: &relation.owner_key,
                    discriminator: None,
                },
                RelationDescriptor::MorphOne(relation) | RelationDescriptor::MorphMany(relation) => {
                    Join {
                        kind,
                        table: &relation.table,
                        parent_column: &relation.owner_key,
                        child_column: &relation.morph_id,
                        discriminator: Some((
                            relation.morph_type.as_str(),
                            relation.morph_value.as_str(),
                        )),
                    }
                }
                RelationDescriptor::BelongsToMany(relation) => {
                    return self.load_pivot(loader, relation, parents, node).await;
                }
                RelationDescriptor::MorphTo(_) => {
                    let parent = loader.catalog().metadata::<E>();
                    return Err(OrmError::InvalidRelation {
                        relation: node.name.clone(),
                        parent: parent.type_name().to_string(),
                        reason: String::from("descriptor does not match a keyed relation"),
                    });
                }
            };
            self.load_keyed(loader, join, parents, node).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Parent {
        one: Option<u8>,
        many: Vec<u8>,
    }

    fn one(parent: &mut Parent) -> &mut Option<u8> {
        &mut parent.one
    }

    fn many(parent: &mut Parent) -> &mut Vec<u8> {
        &mut parent.many
    }

    #[test]
    fn one_slot_keeps_first_match() {
        let slot: Slot<Parent, u8> = Slot::One(Arc::new(one));
        let mut parent = Parent::default();
        slot.assign(&mut parent, 1);
        slot.assign(&mut parent, 2);
        assert_eq!(parent.one, Some(1));
        slot.reset(&mut parent);
        assert_eq!(parent.one, None);
    }

    #[test]
    fn many_slot_resets_to_empty() {
        let slot: Slot<Parent, u8> = Slot::Many(Arc::new(many));
        let mut parent = Parent {
            one: None,
            many: vec![9, 9],
        };
        slot.reset(&mut parent);
        assert!(parent.many.is_empty());
        slot.assign(&mut parent, 3);
        slot.assign(&mut parent, 4);
        let mut out = Vec::new();
        slot.children(&mut parent, &mut out);
        assert_eq!(out.len(), 2);
    }
}
