//! Immutable per-type mapping metadata.

use std::collections::HashMap;

use crate::relation::RelationKind;

/// Mapping of one struct field onto a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name.
    pub field: String,
    /// Column name.
    pub column: String,
    /// Position of the field, one index per level of embedding.
    pub index: Vec<usize>,
    /// Whether this column is the primary key.
    pub primary_key: bool,
    /// Whether the database generates the value.
    pub auto: bool,
    /// Declared Rust type.
    pub value_type: &'static str,
}

/// Everything the catalog derives about one entity type.
///
/// Built once per type by [`Catalog`](crate::Catalog) and shared by reference
/// afterwards; nothing mutates it after construction.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub(crate) type_name: &'static str,
    pub(crate) table: String,
    pub(crate) primary_key: String,
    pub(crate) morph_alias: String,
    pub(crate) columns: Vec<FieldInfo>,
    pub(crate) by_field: HashMap<String, usize>,
    pub(crate) by_column: HashMap<String, usize>,
    pub(crate) relation_fields: HashMap<String, Vec<usize>>,
    pub(crate) relations: HashMap<String, RelationKind>,
}

impl EntityMetadata {
    /// Short type name of the entity.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary-key column.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Discriminator written into morph type columns for this entity.
    #[must_use]
    pub fn morph_alias(&self) -> &str {
        &self.morph_alias
    }

    /// Columns in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.columns.iter()
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|f| f.column.clone()).collect()
    }

    /// Looks a column up by field name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.by_field.get(name).map(|&i| &self.columns[i])
    }

    /// Looks a column up by column name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&FieldInfo> {
        self.by_column.get(name).map(|&i| &self.columns[i])
    }

    /// Index path of a relation field.
    #[must_use]
    pub fn relation_field(&self, field: &str) -> Option<&[usize]> {
        self.relation_fields.get(field).map(Vec::as_slice)
    }

    /// Kind of a registered relation.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<RelationKind> {
        self.relations.get(name).copied()
    }

    /// Registered relation names, sorted.
    #[must_use]
    pub fn relation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.relations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
