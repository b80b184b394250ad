#![allow(dead_code)]

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tether::{Context, Db, Entity, EntityDef, Executor, Morphed, QueryFailure, Record, SqlValue};

// =============================================================================
// Models
// =============================================================================

#[derive(Debug, Clone, Default, Entity)]
#[entity(table = "authors")]
pub struct Author {
    #[column(primary_key)]
    pub id: i64,
    pub name: String,
    #[relation(has_many)]
    pub books: Vec<Book>,
    #[relation(has_one)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Book {
    #[column(primary_key)]
    pub id: i64,
    pub title: String,
    pub author_id: Option<i64>,
    #[relation(belongs_to)]
    pub author: Option<Author>,
    #[relation(many_to_many)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Profile {
    pub id: i64,
    pub author_id: i64,
    pub bio: String,
}

/// Registered by hand to exercise the builder directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Entity for Tag {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |t| &t.id, |t| &mut t.id).primary_key();
        def.column("name", |t| &t.name, |t| &mut t.name);
    }
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Post {
    pub id: i64,
    pub title: String,
    #[relation(morph_many, morph = "commentable")]
    pub comments: Vec<Comment>,
    #[relation(morph_one, morph = "imageable")]
    pub image: Option<Image>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Video {
    pub id: i64,
    pub title: String,
    #[relation(morph_many, morph = "commentable")]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Comment {
    pub id: i64,
    pub body: String,
    pub commentable_type: String,
    pub commentable_id: i64,
    #[relation(morph_to, targets(Post, Video))]
    pub commentable: Option<Morphed>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Image {
    pub id: i64,
    pub url: String,
    pub imageable_type: String,
    pub imageable_id: i64,
}

// =============================================================================
// Database
// =============================================================================

const SCHEMA: &str = r"
CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT NOT NULL, author_id INTEGER);
CREATE TABLE profiles (id INTEGER PRIMARY KEY, author_id INTEGER NOT NULL, bio TEXT NOT NULL);
CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE book_tag (book_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
CREATE TABLE videos (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
CREATE TABLE comments (
    id INTEGER PRIMARY KEY,
    body TEXT NOT NULL,
    commentable_type TEXT NOT NULL,
    commentable_id INTEGER NOT NULL
);
CREATE TABLE images (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    imageable_type TEXT NOT NULL,
    imageable_id INTEGER NOT NULL
);

INSERT INTO authors VALUES (1, 'George Orwell'), (2, 'Aldous Huxley'), (3, 'Unpublished');
INSERT INTO books VALUES
    (1, '1984', 1),
    (2, 'Animal Farm', 1),
    (3, 'Brave New World', 2),
    (4, 'Anonymous', NULL);
INSERT INTO profiles VALUES (1, 1, 'Essayist'), (2, 2, 'Novelist');
INSERT INTO tags VALUES (1, 'dystopia'), (2, 'satire'), (3, 'classic');
INSERT INTO book_tag VALUES (1, 1), (1, 3), (2, 2), (2, 3), (3, 1);
INSERT INTO posts VALUES (1, 'Hello'), (2, 'World');
INSERT INTO videos VALUES (1, 'Intro');
INSERT INTO comments VALUES
    (1, 'nice post', 'posts', 1),
    (2, 'great video', 'videos', 1),
    (3, 'second', 'posts', 1),
    (4, 'orphan', 'UnknownType', 9),
    (5, 'other post', 'posts', 2);
INSERT INTO images VALUES (1, 'a.png', 'posts', 1), (2, 'v.png', 'videos', 1);
";

/// Wraps a pool and records every statement it runs.
#[derive(Clone)]
pub struct CountingExecutor {
    pool: SqlitePool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Executor for CountingExecutor {
    fn query_rows<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        args: &'a [SqlValue],
    ) -> BoxFuture<'a, Result<Vec<Record>, QueryFailure>> {
        self.log.lock().push(sql.to_string());
        self.pool.query_rows(ctx, sql, args)
    }
}

pub struct Fixture {
    pub db: Db,
    pub pool: SqlitePool,
    pub ctx: Context,
    log: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    /// Number of statements run since the last reset.
    pub fn queries(&self) -> usize {
        self.log.lock().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn reset(&self) {
        self.log.lock().clear();
    }

    pub async fn row_count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await.unwrap()
    }
}

/// A seeded single-connection in-memory database.
pub async fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let db = Db::new(CountingExecutor {
        pool: pool.clone(),
        log: Arc::clone(&log),
    });
    Fixture {
        db,
        pool,
        ctx: Context::background(),
        log,
    }
}
