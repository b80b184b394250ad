//! Failures that must surface before or instead of touching the database.

mod common;

use std::time::Duration;

use common::{fixture, Author, Book};
use tether::{Context, Eager, Entity, EntityDef, OrmError, Q, QueryOp, RelationError, Scope};

/// A book whose author relation carries an injected foreign key.
#[derive(Debug, Clone, Default)]
struct TamperedBook {
    id: i64,
    author_id: i64,
    author: Option<Author>,
}

impl Entity for TamperedBook {
    fn define(def: &mut EntityDef<Self>) {
        def.table("books");
        def.column("id", |b| &b.id, |b| &mut b.id).primary_key();
        def.column("author_id", |b| &b.author_id, |b| &mut b.author_id);
        def.belongs_to("author", |b| &mut b.author)
            .foreign_key("author_id; DROP TABLE authors; --");
    }
}

/// A book whose author relation points at a table that does not exist.
#[derive(Debug, Clone, Default)]
struct MisplacedBook {
    id: i64,
    author_id: i64,
    author: Option<Author>,
}

impl Entity for MisplacedBook {
    fn define(def: &mut EntityDef<Self>) {
        def.table("books");
        def.column("id", |b| &b.id, |b| &mut b.id);
        def.column("author_id", |b| &b.author_id, |b| &mut b.author_id);
        def.belongs_to("author", |b| &mut b.author).table("writers");
    }
}

/// An author whose books live in a table that does not exist.
#[derive(Debug, Clone, Default)]
struct Writer {
    id: i64,
    name: String,
    books: Vec<Book>,
}

impl Entity for Writer {
    fn define(def: &mut EntityDef<Self>) {
        def.table("authors");
        def.column("id", |w| &w.id, |w| &mut w.id).primary_key();
        def.column("name", |w| &w.name, |w| &mut w.name);
        def.has_many("books", |w| &mut w.books)
            .table("lost_books")
            .foreign_key("author_id");
    }
}

#[derive(Debug, Clone, Default)]
struct Manuscript {
    id: i64,
    author_id: i64,
    writer: Option<Writer>,
}

impl Entity for Manuscript {
    fn define(def: &mut EntityDef<Self>) {
        def.table("books");
        def.column("id", |m| &m.id, |m| &mut m.id).primary_key();
        def.column("author_id", |m| &m.author_id, |m| &mut m.author_id);
        def.belongs_to("writer", |m| &mut m.writer)
            .foreign_key("author_id");
    }
}

fn book_counts(authors: &[Author]) -> Vec<usize> {
    authors.iter().map(|a| a.books.len()).collect()
}

#[tokio::test]
async fn injected_foreign_key_is_rejected_before_any_query() {
    let fx = fixture().await;
    let before = fx.row_count("authors").await;

    let err = TamperedBook::objects()
        .with(["Author"])
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidIdentifier(_)), "{err:?}");

    let mut books = vec![TamperedBook {
        id: 1,
        author_id: 1,
        author: None,
    }];
    let err = fx
        .db
        .load_slice(&fx.ctx, &mut books, &["Author"])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidIdentifier(_)), "{err:?}");

    assert_eq!(fx.queries(), 0);
    assert_eq!(fx.row_count("authors").await, before);
    assert!(books[0].author.is_none());
}

#[tokio::test]
async fn unknown_relation_names_the_parent() {
    let fx = fixture().await;
    let mut books = vec![Book {
        id: 1,
        author_id: Some(1),
        ..Book::default()
    }];

    let err = fx
        .db
        .load_slice(&fx.ctx, &mut books, &["Publisher"])
        .await
        .unwrap_err();
    match err {
        OrmError::Relation(RelationError { relation, parent }) => {
            assert_eq!(relation, "Publisher");
            assert_eq!(parent, "Book");
        }
        other => panic!("expected a relation error, got {other:?}"),
    }

    // A bad segment deep in the path fails before the valid head runs.
    let err = fx
        .db
        .load_slice(&fx.ctx, &mut books, &["Author.Publisher"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Relation(RelationError { ref parent, .. }) if parent == "Author"
    ));
    assert_eq!(fx.queries(), 0);
}

#[tokio::test]
async fn malformed_paths_and_projections_fail_fast() {
    let fx = fixture().await;
    let mut books = vec![Book {
        id: 1,
        author_id: Some(1),
        ..Book::default()
    }];

    let err = fx
        .db
        .load_slice(&fx.ctx, &mut books, &["Author..Books"])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidPath(_)));

    let err = fx
        .db
        .load_slice(&fx.ctx, &mut books, &["Author:id,name;DROP TABLE authors"])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidIdentifier(_)));

    assert_eq!(fx.queries(), 0);
}

#[tokio::test]
async fn callback_identifiers_are_validated_before_any_query() {
    let fx = fixture().await;
    let mut books = vec![Book {
        id: 1,
        author_id: Some(1),
        ..Book::default()
    }];

    let eager = Eager::new().with_callback("Author", |scope: Scope| {
        scope.order_by("name; DROP TABLE authors")
    });
    let err = fx
        .db
        .preload(&fx.ctx, &mut books, &eager)
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::InvalidIdentifier(_)));
    assert_eq!(fx.queries(), 0);
}

#[tokio::test]
async fn query_failures_carry_the_statement() {
    let fx = fixture().await;
    let mut books = vec![MisplacedBook {
        id: 1,
        author_id: 1,
        author: None,
    }];

    let err = fx
        .db
        .load_slice(&fx.ctx, &mut books, &["Author"])
        .await
        .unwrap_err();

    let query = err.as_query().expect("query error");
    assert_eq!(query.op, QueryOp::Relation);
    assert!(query.sql.contains("FROM writers"));
    assert_eq!(query.args.len(), 1);
    assert!(!err.is_not_found());
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn cancelled_context_aborts_the_load() {
    let fx = fixture().await;
    let mut books = Book::objects()
        .all()
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();

    let ctx = fx.ctx.with_timeout(Duration::from_secs(30));
    fx.ctx.cancel();
    let err = fx
        .db
        .load_slice(&ctx, &mut books, &["Author"])
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "{err:?}");
    assert!(books.iter().all(|b| b.author.is_none()));
}

#[tokio::test]
async fn expired_deadline_is_a_timeout() {
    let fx = fixture().await;
    let ctx = fx.ctx.with_timeout(Duration::ZERO);

    let err = Book::objects()
        .all()
        .execute(&ctx, &fx.db)
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "{err:?}");
}

#[tokio::test]
async fn cancelled_reload_keeps_loaded_relations() {
    let fx = fixture().await;
    let mut authors = Author::objects()
        .all()
        .order_by("id")
        .with(["Books"])
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();
    assert_eq!(book_counts(&authors), [2, 1, 0]);

    let ctx = Context::background();
    ctx.cancel();
    let err = fx
        .db
        .load_slice(&ctx, &mut authors, &["Books"])
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "{err:?}");
    assert_eq!(book_counts(&authors), [2, 1, 0]);
    assert_eq!(authors[0].books[0].title, "1984");
}

#[tokio::test]
async fn undecodable_row_leaves_the_level_untouched() {
    let fx = fixture().await;
    let mut authors = Author::objects()
        .all()
        .order_by("id")
        .with(["Books"])
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();
    sqlx::query("INSERT INTO books (id, title, author_id) VALUES (5, X'FF00', 2)")
        .execute(&fx.pool)
        .await
        .unwrap();

    let err = fx
        .db
        .load_slice(&fx.ctx, &mut authors, &["Books"])
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Decode { ref column, .. } if column == "title"), "{err:?}");
    assert_eq!(book_counts(&authors), [2, 1, 0]);
}

#[tokio::test]
async fn failure_in_a_nested_level_keeps_the_levels_above() {
    let fx = fixture().await;
    let mut manuscripts = Manuscript::objects()
        .filter(Q::is_not_null("author_id"))
        .order_by("id")
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();
    fx.reset();

    let err = fx
        .db
        .load_slice(&fx.ctx, &mut manuscripts, &["Writer.Books"])
        .await
        .unwrap_err();

    let query = err.as_query().expect("query error");
    assert_eq!(query.op, QueryOp::Relation);
    assert!(query.sql.contains("FROM lost_books"), "{}", query.sql);
    assert_eq!(fx.queries(), 2);

    let names: Vec<&str> = manuscripts
        .iter()
        .map(|m| m.writer.as_ref().map_or("", |w| w.name.as_str()))
        .collect();
    assert_eq!(names, ["George Orwell", "George Orwell", "Aldous Huxley"]);
    assert!(manuscripts
        .iter()
        .all(|m| m.writer.as_ref().is_some_and(|w| w.books.is_empty())));
}
