//! Entity registration and the per-type schema built from it.
//!
//! Instead of inspecting types at runtime, every entity describes itself once
//! through [`Entity::define`]: which fields are columns, which are embedded
//! structs, and which hold related entities. The [`Catalog`](crate::Catalog)
//! runs that registration the first time a type is used and keeps the result
//! for the life of the catalog.

mod column;
mod metadata;

use std::collections::HashMap;
use std::sync::Arc;

use tether_core::{Key, KeyError, SqlValue};
use tracing::trace;

use crate::catalog::Catalog;
use crate::error::{OrmError, Result};
use crate::executor::Record;
use crate::manager::Manager;
use crate::relation::RelationDef;

pub use column::ColumnType;
pub use metadata::{EntityMetadata, FieldInfo};

/// A struct mapped onto a table.
///
/// Usually derived:
///
/// ```ignore
/// use tether::Entity;
///
/// #[derive(Debug, Clone, Default, Entity)]
/// #[entity(table = "books")]
/// struct Book {
///     #[column(primary_key)]
///     id: i64,
///     title: String,
///     author_id: i64,
///     #[relation(belongs_to)]
///     author: Option<Author>,
/// }
/// ```
///
/// or registered by hand:
///
/// ```ignore
/// impl Entity for Book {
///     fn define(def: &mut EntityDef<Self>) {
///         def.table("books");
///         def.column("id", |b| &b.id, |b| &mut b.id).primary_key();
///         def.column("title", |b| &b.title, |b| &mut b.title);
///         def.column("author_id", |b| &b.author_id, |b| &mut b.author_id);
///         def.belongs_to("author", |b| &mut b.author);
///     }
/// }
/// ```
pub trait Entity: Default + Clone + Send + Sync + 'static {
    /// Registers the columns and relations of this entity.
    fn define(def: &mut EntityDef<Self>);

    /// Returns the default manager for this entity.
    #[must_use]
    fn objects() -> Manager<Self> {
        Manager::new()
    }
}

pub(crate) type Getter<E, T> = Arc<dyn Fn(&E) -> T + Send + Sync>;

/// Type-erased access to one column of `E`.
pub(crate) struct Access<E> {
    read: Getter<E, SqlValue>,
    key: Getter<E, std::result::Result<Key, KeyError>>,
    zero: Getter<E, bool>,
    write: Arc<dyn Fn(&mut E, SqlValue) -> std::result::Result<(), String> + Send + Sync>,
}

impl<E> Clone for Access<E> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
            key: Arc::clone(&self.key),
            zero: Arc::clone(&self.zero),
            write: Arc::clone(&self.write),
        }
    }
}

impl<E: 'static> Access<E> {
    fn of<T, G, M>(get: G, get_mut: M) -> Self
    where
        T: ColumnType,
        G: Fn(&E) -> &T + Send + Sync + 'static,
        M: Fn(&mut E) -> &mut T + Send + Sync + 'static,
    {
        let get = Arc::new(get);
        let read = Arc::clone(&get);
        let key = Arc::clone(&get);
        Self {
            read: Arc::new(move |e: &E| read(e).to_sql()),
            key: Arc::new(move |e: &E| key(e).to_key()),
            zero: Arc::new(move |e: &E| get(e).is_zero()),
            write: Arc::new(move |e: &mut E, value: SqlValue| {
                *get_mut(e) = T::from_sql(value)?;
                Ok(())
            }),
        }
    }

    /// Re-roots this accessor on an outer struct embedding `E`.
    fn lift<O, G, M>(self, get: &Arc<G>, get_mut: &Arc<M>) -> Access<O>
    where
        O: 'static,
        G: Fn(&O) -> &E + Send + Sync + 'static,
        M: Fn(&mut O) -> &mut E + Send + Sync + 'static,
    {
        let Self {
            read,
            key,
            zero,
            write,
        } = self;
        let (g1, g2, g3) = (Arc::clone(get), Arc::clone(get), Arc::clone(get));
        let m = Arc::clone(get_mut);
        Access {
            read: Arc::new(move |o: &O| read(g1(o))),
            key: Arc::new(move |o: &O| key(g2(o))),
            zero: Arc::new(move |o: &O| zero(g3(o))),
            write: Arc::new(move |o: &mut O, value: SqlValue| write(m(o), value)),
        }
    }

    pub(crate) fn read(&self, entity: &E) -> SqlValue {
        (self.read)(entity)
    }

    pub(crate) fn key(&self, entity: &E) -> Result<Key> {
        Ok((self.key)(entity)?)
    }

    pub(crate) fn is_zero(&self, entity: &E) -> bool {
        (self.zero)(entity)
    }

    fn write(&self, entity: &mut E, value: SqlValue) -> std::result::Result<(), String> {
        (self.write)(entity, value)
    }
}

pub(crate) struct ColumnDef<E> {
    field: String,
    column: Option<String>,
    index: Vec<usize>,
    primary_key: bool,
    auto: bool,
    value_type: &'static str,
    access: Access<E>,
}

/// Options for a registered column.
pub struct ColumnOptions<'a, E> {
    column: &'a mut ColumnDef<E>,
}

impl<E> ColumnOptions<'_, E> {
    /// Overrides the column name (default: snake_case of the field name).
    #[allow(clippy::return_self_not_must_use)]
    pub fn name(self, column: &str) -> Self {
        self.column.column = Some(column.to_string());
        self
    }

    /// Marks this column as the primary key.
    #[allow(clippy::return_self_not_must_use)]
    pub fn primary_key(self) -> Self {
        self.column.primary_key = true;
        self
    }

    /// Marks this column as generated by the database.
    #[allow(clippy::return_self_not_must_use)]
    pub fn auto(self) -> Self {
        self.column.auto = true;
        self
    }
}

/// Registration builder passed to [`Entity::define`].
pub struct EntityDef<E> {
    table: Option<String>,
    primary_key: Option<String>,
    morph_alias: Option<String>,
    columns: Vec<ColumnDef<E>>,
    pub(crate) relations: Vec<RelationDef<E>>,
    next_index: usize,
}

impl<E: Entity> EntityDef<E> {
    pub(crate) const fn new() -> Self {
        Self {
            table: None,
            primary_key: None,
            morph_alias: None,
            columns: Vec::new(),
            relations: Vec::new(),
            next_index: 0,
        }
    }

    pub(crate) fn next_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Overrides the table name (default: snake_case of the type name plus `s`).
    pub fn table(&mut self, table: &str) -> &mut Self {
        self.table = Some(table.to_string());
        self
    }

    /// Overrides the primary-key column.
    pub fn primary_key(&mut self, column: &str) -> &mut Self {
        self.primary_key = Some(column.to_string());
        self
    }

    /// Overrides the value other tables store in morph type columns to point
    /// at this entity (default: its table name).
    pub fn morph_alias(&mut self, alias: &str) -> &mut Self {
        self.morph_alias = Some(alias.to_string());
        self
    }

    /// Registers a column-backed field.
    pub fn column<T, G, M>(&mut self, field: &str, get: G, get_mut: M) -> ColumnOptions<'_, E>
    where
        T: ColumnType,
        G: Fn(&E) -> &T + Send + Sync + 'static,
        M: Fn(&mut E) -> &mut T + Send + Sync + 'static,
    {
        let index = self.next_index();
        self.columns.push(ColumnDef {
            field: field.to_string(),
            column: None,
            index: vec![index],
            primary_key: false,
            auto: false,
            value_type: std::any::type_name::<T>(),
            access: Access::of(get, get_mut),
        });
        let last = self.columns.len() - 1;
        ColumnOptions {
            column: &mut self.columns[last],
        }
    }

    /// Flattens the columns of an embedded entity into this one.
    ///
    /// Relations registered on the embedded type are not carried over.
    pub fn embed<T, G, M>(&mut self, field: &str, get: G, get_mut: M) -> &mut Self
    where
        T: Entity,
        G: Fn(&E) -> &T + Send + Sync + 'static,
        M: Fn(&mut E) -> &mut T + Send + Sync + 'static,
    {
        let index = self.next_index();
        let mut inner = EntityDef::<T>::new();
        T::define(&mut inner);
        let get = Arc::new(get);
        let get_mut = Arc::new(get_mut);
        for column in inner.columns {
            let mut path = Vec::with_capacity(column.index.len() + 1);
            path.push(index);
            path.extend(column.index);
            self.columns.push(ColumnDef {
                field: column.field,
                column: column.column,
                index: path,
                primary_key: column.primary_key,
                auto: column.auto,
                value_type: column.value_type,
                access: column.access.lift(&get, &get_mut),
            });
        }
        trace!(field, embedded = short_type_name::<T>(), "flattened embedded entity");
        self
    }
}

/// Short type name without module path or generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Metadata plus the erased accessors and relation registry for `E`.
pub struct EntitySchema<E> {
    metadata: Arc<EntityMetadata>,
    access: Vec<Access<E>>,
    relations: HashMap<String, RelationDef<E>>,
}

impl<E: Entity> EntitySchema<E> {
    /// Runs the registration of `E` and derives its metadata.
    ///
    /// # Panics
    ///
    /// Panics when `E` registers no columns: such a type cannot be mapped and
    /// this is a programming error, not a runtime condition.
    pub(crate) fn build(catalog: &Catalog) -> Self {
        let mut def = EntityDef::<E>::new();
        E::define(&mut def);

        let type_name = short_type_name::<E>();
        assert!(
            !def.columns.is_empty(),
            "entity `{type_name}` registers no columns"
        );

        let table = def
            .table
            .unwrap_or_else(|| format!("{}s", catalog.snake_case(type_name)));

        let mut fields = Vec::with_capacity(def.columns.len());
        let mut access = Vec::with_capacity(def.columns.len());
        for column in def.columns {
            let name = column
                .column
                .unwrap_or_else(|| catalog.snake_case(&column.field));
            fields.push(FieldInfo {
                field: column.field,
                column: name,
                index: column.index,
                primary_key: column.primary_key,
                auto: column.auto,
                value_type: column.value_type,
            });
            access.push(column.access);
        }

        let primary_key = def
            .primary_key
            .or_else(|| fields.iter().find(|f| f.primary_key).map(|f| f.column.clone()))
            .or_else(|| {
                fields
                    .iter()
                    .find(|f| f.field.eq_ignore_ascii_case("id"))
                    .map(|f| f.column.clone())
            })
            .unwrap_or_else(|| String::from("id"));
        for field in &mut fields {
            field.primary_key = field.column == primary_key;
        }

        let by_field = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.field.clone(), i))
            .collect();
        let by_column = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.column.clone(), i))
            .collect();

        let mut relation_fields = HashMap::new();
        let mut relation_kinds = HashMap::new();
        let mut relations = HashMap::new();
        for relation in def.relations {
            relation_fields.insert(relation.info.field.clone(), relation.info.index.clone());
            relation_kinds.insert(relation.info.name.clone(), relation.info.kind);
            relations.insert(relation.info.name.clone(), relation);
        }

        let morph_alias = def.morph_alias.unwrap_or_else(|| table.clone());
        trace!(
            entity = type_name,
            table = %table,
            columns = fields.len(),
            relations = relations.len(),
            "built entity metadata"
        );

        Self {
            metadata: Arc::new(EntityMetadata {
                type_name,
                table,
                primary_key,
                morph_alias,
                columns: fields,
                by_field,
                by_column,
                relation_fields,
                relations: relation_kinds,
            }),
            access,
            relations,
        }
    }

    /// The derived metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    pub(crate) fn access(&self, column: &str) -> Option<&Access<E>> {
        self.metadata.by_column.get(column).map(|&i| &self.access[i])
    }

    pub(crate) fn relation(&self, name: &str) -> Option<&RelationDef<E>> {
        self.relations.get(name)
    }

    /// Builds an entity from a row, ignoring columns that are not mapped.
    pub(crate) fn scan(&self, record: &Record) -> Result<E> {
        let mut entity = E::default();
        for (column, value) in record.iter() {
            if let Some(access) = self.access(column) {
                access
                    .write(&mut entity, value.clone())
                    .map_err(|reason| OrmError::Decode {
                        entity: self.metadata.type_name.to_string(),
                        column: column.to_string(),
                        reason,
                    })?;
            }
        }
        Ok(entity)
    }
}
