//! Query sets and managers against SQLite.

mod common;

use common::{fixture, Author, Book};
use tether::{Entity, OrmError, Q};

#[tokio::test]
async fn execute_loads_requested_relations_after_the_select() {
    let fx = fixture().await;

    let books = Book::objects()
        .filter(Q::is_not_null("author_id"))
        .order_by("-id")
        .with(["Author", "Tags:id,name"])
        .with_callback("Tags", |scope| scope.order_by("name"))
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();

    // books, authors, pivot, tags
    assert_eq!(fx.queries(), 4);
    let ids: Vec<i64> = books.iter().map(|b| b.id).collect();
    assert_eq!(ids, [3, 2, 1]);
    assert_eq!(books[0].author.as_ref().unwrap().name, "Aldous Huxley");
    let tags: Vec<&str> = books[2].tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tags, ["classic", "dystopia"]);
}

#[tokio::test]
async fn get_distinguishes_missing_and_ambiguous_rows() {
    let fx = fixture().await;

    let book = Book::objects()
        .filter(Q::eq("title", "1984"))
        .get(&fx.ctx, &fx.db)
        .await
        .unwrap();
    assert_eq!(book.id, 1);

    let err = Book::objects()
        .filter(Q::eq("title", "Ulysses"))
        .get(&fx.ctx, &fx.db)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::NotFound));
    assert!(err.is_not_found());

    let err = Book::objects()
        .filter(Q::eq("author_id", 1))
        .get(&fx.ctx, &fx.db)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MultipleObjectsReturned));
}

#[tokio::test]
async fn count_and_exists_respect_filters() {
    let fx = fixture().await;

    assert_eq!(Book::objects().count(&fx.ctx, &fx.db).await.unwrap(), 4);
    let orwell = Book::objects().filter(Q::eq("author_id", 1));
    assert_eq!(orwell.count(&fx.ctx, &fx.db).await.unwrap(), 2);
    assert!(orwell.exists(&fx.ctx, &fx.db).await.unwrap());
    assert!(!Book::objects().none().exists(&fx.ctx, &fx.db).await.unwrap());
    assert!(Author::objects().exists(&fx.ctx, &fx.db).await.unwrap());
}

#[tokio::test]
async fn only_selects_named_columns() {
    let fx = fixture().await;

    let books = Book::objects()
        .all()
        .only(&["id", "title"])
        .order_by("id")
        .limit(2)
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();

    assert_eq!(fx.statements()[0], "SELECT id, title FROM books ORDER BY id ASC LIMIT 2");
    assert_eq!(books.len(), 2);
    assert!(books.iter().all(|b| b.author_id.is_none()));
}

#[tokio::test]
async fn manager_shortcuts() {
    let fx = fixture().await;
    let objects = Author::objects();

    let author = objects.get(&fx.ctx, &fx.db, 2).await.unwrap();
    assert_eq!(author.name, "Aldous Huxley");
    assert!(objects.get_or_none(&fx.ctx, &fx.db, 42).await.unwrap().is_none());

    let last = objects.last(&fx.ctx, &fx.db).await.unwrap().unwrap();
    assert_eq!(last.name, "Unpublished");

    let first = objects
        .exclude(Q::eq("id", 1))
        .order_by("id")
        .first(&fx.ctx, &fx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, 2);

    let page = objects
        .all()
        .order_by("id")
        .offset(1)
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn invalid_filter_fields_never_reach_the_database() {
    let fx = fixture().await;

    let err = Book::objects()
        .filter(Q::eq("title = '' OR 1", 1))
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::InvalidIdentifier(_)));
    assert_eq!(fx.queries(), 0);
}
