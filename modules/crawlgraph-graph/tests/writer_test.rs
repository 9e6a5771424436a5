//! Integration tests for the Neo4j-backed store.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p crawlgraph-graph --features test-utils --test writer_test

#![cfg(feature = "test-utils")]

use chrono::{TimeZone, Utc};

use crawlgraph_common::{
    CandidateTier, CommentLike, CommentRecord, DataType, EntityRecord, EntityStub, FlagUpdate,
    PostBundle, PostRecord, ResumeCursor, Stage,
};
use crawlgraph_graph::{EdgeSet, GraphClient, GraphStore, GraphWriter, WriteOp};

async fn setup() -> (impl std::any::Any, GraphClient, GraphWriter) {
    let (container, client) = crawlgraph_graph::testutil::migrated_neo4j().await;
    let writer = GraphWriter::new(client.clone());
    (container, client, writer)
}

fn stub(id: i64, name: &str) -> EntityStub {
    EntityStub {
        id,
        username: name.into(),
        ..Default::default()
    }
}

fn profile(id: i64, name: &str) -> EntityRecord {
    EntityRecord {
        id,
        username: name.into(),
        fullname: format!("{name} full"),
        bio: "bio".into(),
        followers: 3,
        followees: 2,
        mediacount: 1,
        ..Default::default()
    }
}

async fn count(client: &GraphClient, cypher: &str) -> i64 {
    let mut stream = client
        .inner()
        .execute(neo4rs::query(cypher))
        .await
        .unwrap();
    let row = stream.next().await.unwrap().unwrap();
    row.get::<i64>("n").unwrap()
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let (_c, client, writer) = setup().await;
    crawlgraph_graph::migrate::migrate(&client).await.unwrap();
    writer.ensure_schema().await.unwrap();
}

#[tokio::test]
async fn profile_upsert_sets_flags_and_survives_stub_upsert() {
    let (_c, _client, writer) = setup().await;

    writer.apply(&WriteOp::UpsertProfile(profile(1, "ada"))).await.unwrap();
    writer
        .apply(&WriteOp::UpsertEntities(vec![EntityStub {
            id: 1,
            username: "ada".into(),
            fullname: String::new(),
            ..Default::default()
        }]))
        .await
        .unwrap();

    let flags = writer.completion_flags("ada").await.unwrap().unwrap();
    assert!(flags.profile);
    assert!(!flags.followers);

    let e = writer.entity_by_handle("ada").await.unwrap().unwrap();
    assert_eq!(e.fullname, "ada full");
    assert_eq!(e.bio, "bio");
}

#[tokio::test]
async fn partial_flag_update_only_touches_given_fields() {
    let (_c, _client, writer) = setup().await;
    writer.apply(&WriteOp::UpsertProfile(profile(1, "ada"))).await.unwrap();

    writer
        .apply(&WriteOp::SetCompletionFlags {
            handle: "ada".into(),
            update: FlagUpdate::stage(Stage::Followers, true).with(Stage::Posts, true),
        })
        .await
        .unwrap();
    writer
        .apply(&WriteOp::SetCompletionFlags {
            handle: "ada".into(),
            update: FlagUpdate::stage(Stage::Posts, false),
        })
        .await
        .unwrap();

    let flags = writer.completion_flags("ada").await.unwrap().unwrap();
    assert!(flags.profile);
    assert!(flags.followers);
    assert!(!flags.posts);
}

#[tokio::test]
async fn cursor_save_read_clear() {
    let (_c, _client, writer) = setup().await;
    writer.apply(&WriteOp::UpsertProfile(profile(1, "ada"))).await.unwrap();

    assert!(writer.resume_cursor(1, DataType::Followers).await.unwrap().is_none());

    writer
        .apply(&WriteOp::SaveCursor {
            entity_id: 1,
            data_type: DataType::Followers,
            cursor: ResumeCursor::new("QVFD", 150),
        })
        .await
        .unwrap();
    let raw = writer.resume_cursor(1, DataType::Followers).await.unwrap().unwrap();
    assert_eq!(ResumeCursor::from_json(&raw).unwrap().count, 150);
    assert!(writer.resume_cursor(1, DataType::Followees).await.unwrap().is_none());

    writer
        .apply(&WriteOp::ClearCursor {
            entity_id: 1,
            data_type: DataType::Followers,
        })
        .await
        .unwrap();
    assert!(writer.resume_cursor(1, DataType::Followers).await.unwrap().is_none());
}

#[tokio::test]
async fn reconcile_add_unfollow_refollow() {
    let (_c, client, writer) = setup().await;
    writer.apply(&WriteOp::UpsertProfile(profile(1, "ada"))).await.unwrap();
    writer
        .apply(&WriteOp::UpsertEntities(vec![stub(2, "bob"), stub(3, "cy"), stub(4, "di")]))
        .await
        .unwrap();

    let reconcile = |ids: Vec<i64>, batch: bool| WriteOp::ReconcileEdges {
        entity_id: 1,
        followers: Some(if batch { EdgeSet::batch(ids) } else { EdgeSet::complete(ids) }),
        followees: None,
    };

    writer.apply(&reconcile(vec![2, 3], false)).await.unwrap();
    assert_eq!(count(&client, "MATCH (:Person)-[r:FOLLOWS]->(:Person {id: 1}) RETURN count(r) AS n").await, 2);

    // Partial fetch: never removes
    writer.apply(&reconcile(vec![4], true)).await.unwrap();
    assert_eq!(count(&client, "MATCH (:Person)-[r:FOLLOWS]->(:Person {id: 1}) RETURN count(r) AS n").await, 3);

    // Complete fetch without 3: becomes UNFOLLOWED
    writer.apply(&reconcile(vec![2, 4], false)).await.unwrap();
    assert_eq!(
        count(&client, "MATCH (:Person {id: 3})-[r:UNFOLLOWED]->(:Person {id: 1}) WHERE r.unfollowed_at IS NOT NULL RETURN count(r) AS n").await,
        1
    );
    assert_eq!(count(&client, "MATCH (:Person {id: 3})-[r:FOLLOWS]->(:Person {id: 1}) RETURN count(r) AS n").await, 0);

    // 3 comes back: FOLLOWS again, history kept
    writer.apply(&reconcile(vec![2, 3, 4], false)).await.unwrap();
    assert_eq!(
        count(&client, "MATCH (:Person {id: 3})-[r:FOLLOWS]->(:Person {id: 1}) WHERE r.unfollowed_at IS NOT NULL AND r.followed_at IS NOT NULL RETURN count(r) AS n").await,
        1
    );
    assert_eq!(count(&client, "MATCH (:Person {id: 3})-[r:UNFOLLOWED]->(:Person {id: 1}) RETURN count(r) AS n").await, 0);

    // Idempotent
    writer.apply(&reconcile(vec![2, 3, 4], false)).await.unwrap();
    assert_eq!(count(&client, "MATCH ()-[r]->() WHERE type(r) IN ['FOLLOWS', 'UNFOLLOWED'] RETURN count(r) AS n").await, 3);
}

#[tokio::test]
async fn post_bundle_and_threaded_comments() {
    let (_c, client, writer) = setup().await;
    writer.apply(&WriteOp::UpsertProfile(profile(1, "ada"))).await.unwrap();

    let t = |s| Some(Utc.timestamp_opt(s, 0).unwrap());
    let bundle = PostBundle {
        post: PostRecord {
            id: 100,
            shortcode: "abc".into(),
            owner_id: 1,
            caption: "hello".into(),
            date_utc: t(1_700_000_000),
            media_urls: vec!["https://cdn/1.jpg".into()],
            ..Default::default()
        },
        likers: vec![stub(2, "bob")],
        comments: vec![
            CommentRecord { id: 10, owner_id: 3, text: "nice".into(), likes_count: 1, created_at: t(1_700_000_100), reply_to: None },
            CommentRecord { id: 11, owner_id: 2, text: "agreed".into(), likes_count: 0, created_at: t(1_700_000_200), reply_to: Some(10) },
        ],
        commenters: vec![stub(3, "cy"), stub(2, "bob")],
        comment_likes: vec![CommentLike { comment_id: 10, liker: stub(4, "di") }],
    };
    writer.apply(&WriteOp::UpsertPost(Box::new(bundle.clone()))).await.unwrap();
    writer.apply(&WriteOp::UpsertPost(Box::new(bundle))).await.unwrap();

    assert_eq!(count(&client, "MATCH (:Person {id: 1})-[:POSTED]->(p:Post) RETURN count(p) AS n").await, 1);
    assert_eq!(count(&client, "MATCH (:Person {id: 2})-[l:LIKED]->(:Post {id: 100}) RETURN count(l) AS n").await, 1);
    assert_eq!(count(&client, "MATCH (:Comment {id: 11})-[r:REPLY_TO]->(:Comment {id: 10}) RETURN count(r) AS n").await, 1);
    assert_eq!(count(&client, "MATCH (:Person {id: 4})-[l:LIKED]->(:Comment {id: 10}) RETURN count(l) AS n").await, 1);

    let comments = writer.comments_for_post(100).await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[1].reply_to, Some(10));

    let unanalyzed = writer.unanalyzed_posts(1).await.unwrap();
    assert_eq!(unanalyzed.len(), 1);
    assert_eq!(unanalyzed[0].media_urls, vec!["https://cdn/1.jpg".to_string()]);

    writer
        .apply(&WriteOp::SetPostAnalysis { post_id: 100, analysis: "{\"summary\":\"x\"}".into() })
        .await
        .unwrap();
    assert!(writer.unanalyzed_posts(1).await.unwrap().is_empty());
    assert_eq!(writer.posts_for(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exploration_candidates_by_tier() {
    let (_c, _client, writer) = setup().await;
    writer.apply(&WriteOp::UpsertProfile(profile(1, "ada"))).await.unwrap();
    writer
        .apply(&WriteOp::UpsertEntities(vec![stub(2, "bob"), stub(3, "cy"), stub(5, "eve")]))
        .await
        .unwrap();
    // cy has a full profile
    writer.apply(&WriteOp::UpsertProfile(profile(3, "cy"))).await.unwrap();

    writer
        .apply(&WriteOp::ReconcileEdges {
            entity_id: 1,
            followers: None,
            followees: Some(EdgeSet::complete(vec![2, 3])),
        })
        .await
        .unwrap();
    // eve also follows bob, making bob more popular
    writer
        .apply(&WriteOp::ReconcileEdges {
            entity_id: 5,
            followers: None,
            followees: Some(EdgeSet::complete(vec![2])),
        })
        .await
        .unwrap();

    let tier1 = writer
        .exploration_candidates("ada", CandidateTier::IncompleteProfile, 100)
        .await
        .unwrap();
    assert_eq!(tier1.len(), 1);
    assert_eq!(tier1[0].username, "bob");
    assert_eq!(tier1[0].followers_count, 2);

    let tier2 = writer
        .exploration_candidates("ada", CandidateTier::IncompleteGraph, 100)
        .await
        .unwrap();
    assert_eq!(tier2.len(), 1);
    assert_eq!(tier2[0].username, "cy");
}
