//! Polymorphic relations: morph-to, morph-one and morph-many.

mod common;

use common::{fixture, Comment, Post, Video};
use tether::{Entity, EntityDef, MorphMap};

/// A video owner stored in a table that does not exist.
#[derive(Debug, Clone, Default)]
struct ArchivedVideo {
    id: i64,
    title: String,
}

impl Entity for ArchivedVideo {
    fn define(def: &mut EntityDef<Self>) {
        def.table("archived_videos");
        def.column("id", |v| &v.id, |v| &mut v.id).primary_key();
        def.column("title", |v| &v.title, |v| &mut v.title);
    }
}

async fn comments(fx: &common::Fixture) -> Vec<Comment> {
    let comments = Comment::objects()
        .all()
        .order_by("id")
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();
    fx.reset();
    comments
}

fn owner_title(comment: &Comment) -> Option<String> {
    let owner = comment.commentable.as_ref()?;
    owner
        .downcast_ref::<Post>()
        .map(|p| p.title.clone())
        .or_else(|| owner.downcast_ref::<Video>().map(|v| v.title.clone()))
}

#[tokio::test]
async fn morph_to_skips_unknown_discriminators() {
    let fx = fixture().await;
    let mut comments = comments(&fx).await;

    fx.db
        .load_slice(&fx.ctx, &mut comments, &["Commentable"])
        .await
        .unwrap();

    // One query per owner type present in the batch.
    assert_eq!(fx.queries(), 2);
    assert_eq!(owner_title(&comments[0]).as_deref(), Some("Hello"));
    assert_eq!(owner_title(&comments[1]).as_deref(), Some("Intro"));
    assert_eq!(owner_title(&comments[2]).as_deref(), Some("Hello"));
    assert!(comments[3].commentable.is_none());
    assert_eq!(owner_title(&comments[4]).as_deref(), Some("World"));

    let owner = comments[1].commentable.as_ref().unwrap();
    assert_eq!(owner.discriminator(), "videos");
    assert!(owner.is::<Video>());
}

#[tokio::test]
async fn explicit_morph_map_replaces_registered_targets() {
    let fx = fixture().await;
    let mut comments = comments(&fx).await;

    let types = MorphMap::new().register::<Post>("posts");
    fx.db
        .load_morph(&fx.ctx, &mut comments, "Commentable", types)
        .await
        .unwrap();

    assert_eq!(fx.queries(), 1);
    assert!(comments[0].commentable.is_some());
    // Videos are not in the supplied map.
    assert!(comments[1].commentable.is_none());
    assert!(comments[3].commentable.is_none());
}

#[tokio::test]
async fn morph_to_recurses_into_every_owner_type() {
    let fx = fixture().await;
    let mut comments = comments(&fx).await;

    fx.db
        .load_slice(&fx.ctx, &mut comments, &["Commentable.Comments"])
        .await
        .unwrap();

    // posts, their comments, videos, their comments.
    assert_eq!(fx.queries(), 4);
    let post = comments[0]
        .commentable
        .as_ref()
        .and_then(|m| m.downcast_ref::<Post>())
        .unwrap();
    let bodies: Vec<&str> = post.comments.iter().map(|c| c.body.as_str()).collect();
    assert_eq!(bodies, ["nice post", "second"]);

    let video = comments[1]
        .commentable
        .as_ref()
        .and_then(|m| m.downcast_ref::<Video>())
        .unwrap();
    assert_eq!(video.comments.len(), 1);
}

#[tokio::test]
async fn morph_many_filters_on_the_owner_type() {
    let fx = fixture().await;
    let mut posts = Post::objects()
        .all()
        .order_by("id")
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();
    fx.reset();

    fx.db.load_slice(&fx.ctx, &mut posts, &["Comments"]).await.unwrap();

    assert_eq!(fx.queries(), 1);
    let sql = &fx.statements()[0];
    assert!(sql.contains("commentable_id IN (?, ?) AND commentable_type = ?"), "{sql}");
    assert_eq!(posts[0].comments.len(), 2);
    assert_eq!(posts[1].comments.len(), 1);
    // Video 1 shares id 1 with post 1 but is a different owner.
    assert!(posts[0].comments.iter().all(|c| c.commentable_type == "posts"));
}

#[tokio::test]
async fn morph_one_assigns_the_owner_image() {
    let fx = fixture().await;
    let mut posts = Post::objects()
        .all()
        .order_by("id")
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();

    fx.db.load_slice(&fx.ctx, &mut posts, &["Image"]).await.unwrap();

    assert_eq!(posts[0].image.as_ref().map(|i| i.url.as_str()), Some("a.png"));
    assert!(posts[1].image.is_none());
}

#[tokio::test]
async fn videos_see_only_their_comments() {
    let fx = fixture().await;
    let mut videos = Video::objects()
        .with(["Comments"])
        .execute(&fx.ctx, &fx.db)
        .await
        .unwrap();

    assert_eq!(videos.len(), 1);
    let video = videos.remove(0);
    assert_eq!(video.comments.len(), 1);
    assert_eq!(video.comments[0].body, "great video");
}

#[tokio::test]
async fn failed_owner_type_leaves_morph_fields_unchanged() {
    let fx = fixture().await;
    let mut comments = comments(&fx).await;
    fx.db
        .load_slice(&fx.ctx, &mut comments, &["Commentable"])
        .await
        .unwrap();
    fx.reset();

    // "posts" loads first and succeeds, "videos" then fails.
    let types = MorphMap::new()
        .register::<Post>("posts")
        .register::<ArchivedVideo>("videos");
    let err = fx
        .db
        .load_morph(&fx.ctx, &mut comments, "Commentable", types)
        .await
        .unwrap_err();

    assert!(err.as_query().is_some(), "{err:?}");
    assert_eq!(fx.queries(), 2);
    let titles: Vec<Option<String>> = comments.iter().map(owner_title).collect();
    assert_eq!(
        titles,
        [
            Some(String::from("Hello")),
            Some(String::from("Intro")),
            Some(String::from("Hello")),
            None,
            Some(String::from("World")),
        ]
    );
}
