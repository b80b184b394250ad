//! Batched eager loading.
//!
//! Loading runs in two passes. The first resolves every requested path
//! against the catalog: relation names, descriptors, identifiers, projections
//! and constraint callbacks are all checked before a single statement runs.
//! The second walks the path tree level by level, issuing one query per
//! relation (two for pivot relations) for the whole batch of parents, then
//! recursing into the freshly assigned children.

mod path;

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tether_core::{validate_identifier, validate_identifiers, SqlValue};

use crate::catalog::Catalog;
use crate::context::Context;
use crate::db::Db;
use crate::error::{QueryOp, RelationError, Result};
use crate::executor::Record;
use crate::query::Scope;
use crate::relation::{MorphMap, RelationDescriptor};
use crate::schema::Entity;

pub(crate) use path::PathNode;
use path::parse_paths;

/// A constraint applied to the batch query of one relation path.
pub type Constraint = Arc<dyn Fn(Scope) -> Scope + Send + Sync>;

/// The relations to load alongside a fetch, with their per-path options.
///
/// Callbacks and morph maps are keyed by the full dotted path without the
/// column projection (`"Posts.Comments"`), and registering either also
/// requests the path.
///
/// # Example
///
/// ```ignore
/// let eager = Eager::new()
///     .with(["Posts.Comments:id,body,post_id", "Profile"])
///     .with_callback("Posts", |scope| scope.order_by("-id").limit(50))
///     .with_morph("Posts.Comments.Commentable", MorphMap::new().register::<Video>("videos"));
/// db.preload(&ctx, &mut users, &eager).await?;
/// ```
#[derive(Clone, Default)]
pub struct Eager {
    paths: Vec<String>,
    callbacks: HashMap<String, Constraint>,
    morphs: HashMap<String, MorphMap>,
}

impl fmt::Debug for Eager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut callbacks: Vec<&String> = self.callbacks.keys().collect();
        callbacks.sort();
        f.debug_struct("Eager")
            .field("paths", &self.paths)
            .field("callbacks", &callbacks)
            .field("morphs", &self.morphs)
            .finish()
    }
}

impl Eager {
    /// An empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn request(&mut self, path: &str) {
        let requested = self
            .paths
            .iter()
            .any(|p| p.split(':').next() == Some(path) || p == path);
        if !requested {
            self.paths.push(path.to_string());
        }
    }

    /// Requests relation paths.
    #[must_use]
    pub fn with<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.paths
            .extend(paths.into_iter().map(|p| p.as_ref().to_string()));
        self
    }

    /// Attaches a constraint to the batch query of `path`.
    #[must_use]
    pub fn with_callback<F>(mut self, path: &str, constraint: F) -> Self
    where
        F: Fn(Scope) -> Scope + Send + Sync + 'static,
    {
        self.request(path);
        self.callbacks.insert(path.to_string(), Arc::new(constraint));
        self
    }

    /// Supplies the discriminator map of a morph-to relation at `path`.
    #[must_use]
    pub fn with_morph(mut self, path: &str, types: MorphMap) -> Self {
        self.request(path);
        self.morphs.insert(path.to_string(), types);
        self
    }

    /// Whether nothing was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Requested paths, as given.
    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub(crate) fn callback(&self, path: &str) -> Option<&Constraint> {
        self.callbacks.get(path)
    }

    pub(crate) fn morph(&self, path: &str) -> Option<&MorphMap> {
        self.morphs.get(path)
    }
}

/// One eager-loading run over a batch of parents.
pub(crate) struct Loader<'a> {
    db: &'a Db,
    ctx: &'a Context,
    eager: &'a Eager,
    descriptors: HashMap<(TypeId, String), RelationDescriptor>,
}

impl<'a> Loader<'a> {
    fn new(db: &'a Db, ctx: &'a Context, eager: &'a Eager) -> Self {
        Self {
            db,
            ctx,
            eager,
            descriptors: HashMap::new(),
        }
    }

    /// Parses `eager` and resolves every path against `E`.
    ///
    /// Nothing is executed; all relation, identifier and callback errors
    /// surface here.
    pub(crate) fn plan<E: Entity>(
        db: &'a Db,
        ctx: &'a Context,
        eager: &'a Eager,
    ) -> Result<(Self, Vec<PathNode>)> {
        let nodes = parse_paths(eager.paths())?;
        let mut loader = Self::new(db, ctx, eager);
        loader.prepare::<E>(&nodes)?;
        Ok((loader, nodes))
    }

    /// Loads planned paths onto `entities`.
    pub(crate) async fn run<E: Entity>(&self, nodes: &[PathNode], entities: &mut [E]) -> Result<()> {
        if entities.is_empty() || nodes.is_empty() {
            return Ok(());
        }
        let mut parents: Vec<&mut E> = entities.iter_mut().collect();
        self.load::<E>(&mut parents, nodes).await
    }

    pub(crate) fn catalog(&self) -> &'a Catalog {
        self.db.catalog()
    }

    /// Resolves and validates `nodes` on `E` and everything below them.
    pub(crate) fn prepare<E: Entity>(&mut self, nodes: &[PathNode]) -> Result<()> {
        let catalog = self.catalog();
        let schema = catalog.schema::<E>();
        let parent = schema.metadata();
        for node in nodes {
            let relation = schema.relation(&node.name).ok_or_else(|| RelationError {
                relation: node.name.clone(),
                parent: parent.type_name().to_string(),
            })?;
            let descriptor = relation.loader.describe(
                catalog,
                parent,
                &relation.info,
                self.eager.morph(&node.path),
            )?;
            if let Some(columns) = &node.columns {
                validate_identifiers(columns.iter().map(String::as_str))?;
            }
            if let Some(constraint) = self.eager.callback(&node.path) {
                constraint(Scope::new()).validate()?;
            }
            relation.loader.prepare_children(self, &descriptor, node)?;
            self.descriptors
                .insert((TypeId::of::<E>(), node.path.clone()), descriptor);
        }
        Ok(())
    }

    /// Loads `nodes` onto `parents`, level by level.
    pub(crate) fn load<'p, 'q, E: Entity>(
        &'p self,
        parents: &'p mut [&'q mut E],
        nodes: &'p [PathNode],
    ) -> BoxFuture<'p, Result<()>> {
        Box::pin(async move {
            if parents.is_empty() || nodes.is_empty() {
                return Ok(());
            }
            let schema = self.catalog().schema::<E>();
            for node in nodes {
                let missing = || RelationError {
                    relation: node.name.clone(),
                    parent: schema.metadata().type_name().to_string(),
                };
                let relation = schema.relation(&node.name).ok_or_else(missing)?;
                let descriptor = self
                    .descriptors
                    .get(&(TypeId::of::<E>(), node.path.clone()))
                    .ok_or_else(missing)?;
                relation
                    .loader
                    .load(self, descriptor, &mut *parents, node)
                    .await?;
            }
            Ok(())
        })
    }

    /// The batch scope for `node` after its constraint callback.
    pub(crate) fn constrain(&self, node: &PathNode, scope: Scope) -> Result<Scope> {
        let scope = match self.eager.callback(&node.path) {
            Some(constraint) => constraint(scope),
            None => scope,
        };
        scope.validate()?;
        Ok(scope)
    }

    /// Columns selected for `node`: the explicit projection resolved against
    /// `R`, or every mapped column of `R`. Join columns missing from a
    /// projection are not added.
    pub(crate) fn projection<R: Entity>(&self, node: &PathNode) -> Vec<String> {
        let catalog = self.catalog();
        node.columns.as_ref().map_or_else(
            || catalog.metadata::<R>().column_names(),
            |columns| {
                columns
                    .iter()
                    .map(|column| {
                        catalog
                            .resolve_column::<R>(column)
                            .unwrap_or_else(|| column.clone())
                    })
                    .collect()
            },
        )
    }

    /// Runs one batch select.
    pub(crate) async fn fetch(
        &self,
        op: QueryOp,
        table: &str,
        columns: &[String],
        scope: &Scope,
    ) -> Result<Vec<Record>> {
        validate_identifier(table)?;
        let (sql, args) = scope.build_select(table, columns);
        self.db.run(self.ctx, op, sql, args).await
    }
}

/// Parents grouped by encoded key, with the distinct key values in first-seen
/// order for the `IN` list.
#[derive(Debug, Default)]
pub(crate) struct KeyIndex {
    pub(crate) groups: HashMap<String, Vec<usize>>,
    pub(crate) values: Vec<SqlValue>,
}

impl KeyIndex {
    pub(crate) fn insert(&mut self, encoded: String, value: SqlValue, position: usize) {
        match self.groups.entry(encoded) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut().push(position),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.values.push(value);
                entry.insert(vec![position]);
            }
        }
    }

    pub(crate) fn get(&self, encoded: &str) -> Option<&[usize]> {
        self.groups.get(encoded).map(Vec::as_slice)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_request_their_path() {
        let eager = Eager::new()
            .with(["Posts:id,title"])
            .with_callback("Posts", |scope| scope.limit(5))
            .with_callback("Profile", |scope| scope);
        assert_eq!(eager.paths(), ["Posts:id,title", "Profile"]);
        assert!(eager.callback("Posts").is_some());
        assert!(eager.callback("Posts:id,title").is_none());
    }

    #[test]
    fn key_index_keeps_first_seen_values() {
        let mut index = KeyIndex::default();
        index.insert(String::from("1"), SqlValue::Int(1), 0);
        index.insert(String::from("2"), SqlValue::Int(2), 1);
        index.insert(String::from("1"), SqlValue::Int(1), 2);
        assert_eq!(index.values, vec![SqlValue::Int(1), SqlValue::Int(2)]);
        assert_eq!(index.get("1"), Some(&[0, 2][..]));
        assert!(index.get("3").is_none());
    }
}
