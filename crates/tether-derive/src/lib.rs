//! Derive macro for tether entities.
//!
//! `#[derive(Entity)]` generates the `Entity::define` registration that would
//! otherwise be written by hand: one `column` call per plain field, one
//! `embed` call per `#[embed]` field and one relation call per
//! `#[relation(...)]` field.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitStr, Meta, Path, Token};

/// Derives `tether::Entity` for a struct with named fields.
///
/// # Struct Attributes
///
/// - `#[entity(table = "books")]` - table name (default: snake_case of the
///   struct name plus `s`)
/// - `#[entity(primary_key = "book_id")]` - primary-key column
/// - `#[entity(morph_alias = "book")]` - value other tables store in morph
///   type columns to point at this entity
///
/// # Field Attributes
///
/// - `#[column(name = "col")]`, `#[column(primary_key)]`, `#[column(auto)]`
/// - `#[column(skip)]` - not mapped
/// - `#[embed]` - flattens another entity's columns into this one
/// - `#[relation(belongs_to)]` and the other kinds: `has_one`, `has_many`,
///   `many_to_many`, `morph_one`, `morph_many`, `morph_to`. Options:
///   `name`, `foreign_key`, `owner_key`, `table`, `pivot`,
///   `foreign_pivot_key` + `related_pivot_key`, `related_key`, `morph`,
///   `morph_type` + `morph_id`, `targets(Post, Video = "clips")`.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Entity)]
/// #[entity(table = "comments")]
/// struct Comment {
///     #[column(primary_key)]
///     id: i64,
///     body: String,
///     commentable_type: String,
///     commentable_id: i64,
///     #[relation(morph_to, targets(Post, Video))]
///     commentable: Option<Morphed>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, column, embed, relation))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_entity_impl(&input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn derive_entity_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let entity = parse_entity_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Entity derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Entity derive only supports structs",
            ));
        }
    };

    let mut statements = Vec::new();
    if let Some(table) = &entity.table {
        statements.push(quote! { def.table(#table); });
    }
    if let Some(pk) = &entity.primary_key {
        statements.push(quote! { def.primary_key(#pk); });
    }
    if let Some(alias) = &entity.morph_alias {
        statements.push(quote! { def.morph_alias(#alias); });
    }

    let mut columns = 0_usize;
    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let name = ident.to_string();

        if let Some(relation) = parse_relation_attrs(&field.attrs, ident)? {
            statements.push(relation.expand(ident)?);
            continue;
        }
        if field.attrs.iter().any(|a| a.path().is_ident("embed")) {
            statements.push(quote! {
                def.embed(#name, |e: &Self| &e.#ident, |e: &mut Self| &mut e.#ident);
            });
            columns += 1;
            continue;
        }

        let attrs = parse_column_attrs(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let mut options = Vec::new();
        if let Some(column) = &attrs.name {
            options.push(quote! { .name(#column) });
        }
        if attrs.primary_key {
            options.push(quote! { .primary_key() });
        }
        if attrs.auto {
            options.push(quote! { .auto() });
        }
        statements.push(quote! {
            def.column(#name, |e: &Self| &e.#ident, |e: &mut Self| &mut e.#ident) #(#options)*;
        });
        columns += 1;
    }

    if columns == 0 {
        return Err(syn::Error::new_spanned(
            input,
            "Entity derive requires at least one column",
        ));
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::tether::Entity for #struct_name #ty_generics #where_clause {
            fn define(def: &mut ::tether::EntityDef<Self>) {
                #(#statements)*
            }
        }
    })
}

#[derive(Default)]
struct EntityAttrs {
    table: Option<String>,
    primary_key: Option<String>,
    morph_alias: Option<String>,
}

#[derive(Default)]
struct ColumnAttrs {
    name: Option<String>,
    primary_key: bool,
    auto: bool,
    skip: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany,
    MorphOne,
    MorphMany,
    MorphTo,
}

impl Kind {
    fn parse(path: &Path) -> Option<Self> {
        let ident = path.get_ident()?.to_string();
        Some(match ident.as_str() {
            "has_one" => Self::HasOne,
            "has_many" => Self::HasMany,
            "belongs_to" => Self::BelongsTo,
            "many_to_many" => Self::ManyToMany,
            "morph_one" => Self::MorphOne,
            "morph_many" => Self::MorphMany,
            "morph_to" => Self::MorphTo,
            _ => return None,
        })
    }

    const fn is_morph(self) -> bool {
        matches!(self, Self::MorphOne | Self::MorphMany | Self::MorphTo)
    }
}

struct RelationAttrs {
    attr: Attribute,
    kind: Option<Kind>,
    name: Option<String>,
    foreign_key: Option<String>,
    owner_key: Option<String>,
    table: Option<String>,
    pivot: Option<String>,
    foreign_pivot_key: Option<String>,
    related_pivot_key: Option<String>,
    related_key: Option<String>,
    morph: Option<String>,
    morph_type: Option<String>,
    morph_id: Option<String>,
    targets: Vec<(Path, Option<String>)>,
}

impl RelationAttrs {
    fn new(attr: Attribute) -> Self {
        Self {
            attr,
            kind: None,
            name: None,
            foreign_key: None,
            owner_key: None,
            table: None,
            pivot: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            related_key: None,
            morph: None,
            morph_type: None,
            morph_id: None,
            targets: Vec::new(),
        }
    }

    fn error(&self, message: &str) -> syn::Error {
        syn::Error::new_spanned(&self.attr, message)
    }

    fn expand(&self, field: &Ident) -> syn::Result<TokenStream2> {
        let kind = self
            .kind
            .ok_or_else(|| self.error("missing relation kind, e.g. #[relation(has_many)]"))?;
        let name = field.to_string();
        let slot = quote! { |e: &mut Self| &mut e.#field };

        let call = match kind {
            Kind::HasOne => quote! { def.has_one(#name, #slot) },
            Kind::HasMany => quote! { def.has_many(#name, #slot) },
            Kind::BelongsTo => quote! { def.belongs_to(#name, #slot) },
            Kind::ManyToMany => quote! { def.many_to_many(#name, #slot) },
            Kind::MorphOne | Kind::MorphMany => {
                let morph = self
                    .morph
                    .as_ref()
                    .ok_or_else(|| self.error("morph_one and morph_many need `morph = \"...\"`"))?;
                if kind == Kind::MorphOne {
                    quote! { def.morph_one(#name, #morph, #slot) }
                } else {
                    quote! { def.morph_many(#name, #morph, #slot) }
                }
            }
            Kind::MorphTo => {
                let morph = self.morph.clone().unwrap_or_else(|| name.clone());
                quote! { def.morph_to(#name, #morph, #slot) }
            }
        };

        if !kind.is_morph() && (self.morph.is_some() || self.morph_type.is_some()) {
            return Err(self.error("morph options only apply to morph relations"));
        }
        if kind != Kind::MorphTo && !self.targets.is_empty() {
            return Err(self.error("`targets` only applies to morph_to"));
        }

        let mut options = Vec::new();
        if let Some(relation) = &self.name {
            options.push(quote! { .named(#relation) });
        }
        if let Some(fk) = &self.foreign_key {
            options.push(quote! { .foreign_key(#fk) });
        }
        if let Some(owner) = &self.owner_key {
            options.push(quote! { .owner_key(#owner) });
        }
        if let Some(table) = &self.table {
            options.push(quote! { .table(#table) });
        }
        if let Some(pivot) = &self.pivot {
            options.push(quote! { .pivot(#pivot) });
        }
        match (&self.foreign_pivot_key, &self.related_pivot_key) {
            (Some(foreign), Some(related)) => options.push(quote! { .pivot_keys(#foreign, #related) }),
            (None, None) => {}
            _ => {
                return Err(self.error(
                    "`foreign_pivot_key` and `related_pivot_key` must be given together",
                ));
            }
        }
        if let Some(related) = &self.related_key {
            options.push(quote! { .related_key(#related) });
        }
        match (&self.morph_type, &self.morph_id) {
            (Some(type_column), Some(id_column)) => {
                options.push(quote! { .morph_columns(#type_column, #id_column) });
            }
            (None, None) => {}
            _ => return Err(self.error("`morph_type` and `morph_id` must be given together")),
        }
        for (target, discriminator) in &self.targets {
            options.push(match discriminator {
                Some(d) => quote! { .target_as::<#target>(#d) },
                None => quote! { .target::<#target>() },
            });
        }

        Ok(quote! { #call #(#options)*; })
    }
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let lit: LitStr = meta.value()?.parse()?;
    Ok(lit.value())
}

fn parse_entity_attrs(attrs: &[Attribute]) -> syn::Result<EntityAttrs> {
    let mut result = EntityAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                result.table = Some(string_value(&meta)?);
            } else if meta.path.is_ident("primary_key") {
                result.primary_key = Some(string_value(&meta)?);
            } else if meta.path.is_ident("morph_alias") {
                result.morph_alias = Some(string_value(&meta)?);
            } else {
                return Err(meta.error("unknown entity attribute"));
            }
            Ok(())
        })?;
    }
    Ok(result)
}

fn parse_column_attrs(attrs: &[Attribute]) -> syn::Result<ColumnAttrs> {
    let mut result = ColumnAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("column") {
            continue;
        }
        // Handle empty attribute like #[column]
        if matches!(attr.meta, Meta::Path(_)) {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("primary_key") {
                result.primary_key = true;
            } else if meta.path.is_ident("auto") {
                result.auto = true;
            } else if meta.path.is_ident("skip") {
                result.skip = true;
            } else if meta.path.is_ident("name") {
                result.name = Some(string_value(&meta)?);
            } else {
                return Err(meta.error("unknown column attribute"));
            }
            Ok(())
        })?;
    }
    Ok(result)
}

fn parse_relation_attrs(attrs: &[Attribute], field: &Ident) -> syn::Result<Option<RelationAttrs>> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("relation")) else {
        return Ok(None);
    };
    if matches!(attr.meta, Meta::Path(_)) {
        return Err(syn::Error::new_spanned(
            field,
            "missing relation kind, e.g. #[relation(belongs_to)]",
        ));
    }

    let mut result = RelationAttrs::new(attr.clone());
    attr.parse_nested_meta(|meta| {
        if let Some(kind) = Kind::parse(&meta.path) {
            if result.kind.replace(kind).is_some() {
                return Err(meta.error("only one relation kind is allowed"));
            }
            return Ok(());
        }
        let Some(ident) = meta.path.get_ident().map(ToString::to_string) else {
            return Err(meta.error("unknown relation attribute"));
        };
        match ident.as_str() {
            "name" => result.name = Some(string_value(&meta)?),
            "foreign_key" => result.foreign_key = Some(string_value(&meta)?),
            "owner_key" => result.owner_key = Some(string_value(&meta)?),
            "table" => result.table = Some(string_value(&meta)?),
            "pivot" => result.pivot = Some(string_value(&meta)?),
            "foreign_pivot_key" => result.foreign_pivot_key = Some(string_value(&meta)?),
            "related_pivot_key" => result.related_pivot_key = Some(string_value(&meta)?),
            "related_key" => result.related_key = Some(string_value(&meta)?),
            "morph" => result.morph = Some(string_value(&meta)?),
            "morph_type" => result.morph_type = Some(string_value(&meta)?),
            "morph_id" => result.morph_id = Some(string_value(&meta)?),
            "targets" => {
                meta.parse_nested_meta(|target| {
                    let discriminator = if target.input.peek(Token![=]) {
                        Some(string_value(&target)?)
                    } else {
                        None
                    };
                    result.targets.push((target.path.clone(), discriminator));
                    Ok(())
                })?;
            }
            _ => return Err(meta.error("unknown relation attribute")),
        }
        Ok(())
    })?;
    Ok(Some(result))
}
