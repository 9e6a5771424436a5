use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, BoltMap, BoltString, BoltType, Query};
use tracing::{debug, info};

use crawlgraph_common::{
    Candidate, CandidateTier, CommentRecord, CompletionFlags, DataType, EntityId, EntityRecord,
    EntityStub, FlagUpdate, PostBundle, PostRecord, ResumeCursor,
};

use crate::error::Result;
use crate::ops::WriteOp;
use crate::reconcile::{self, EdgeDirection, EdgeSet};
use crate::store::GraphStore;
use crate::GraphClient;

/// Neo4j-backed [`GraphStore`]. Every write is a MERGE keyed by id, so
/// replaying any [`WriteOp`] is harmless.
pub struct GraphWriter {
    client: GraphClient,
}

const NEW_PERSON_FLAGS: &str = "p._profile_complete = false,
    p._followers_complete = false,
    p._followees_complete = false,
    p._posts_complete = false,
    p._posts_analysis_complete = false,
    p._account_analysis_complete = false";

const POST_FIELDS: &str = "p.id AS id, p.shortcode AS shortcode, o.id AS owner_id,
    coalesce(p.typename, '') AS typename, coalesce(p.is_video, false) AS is_video,
    coalesce(p.video_duration, 0.0) AS video_duration,
    coalesce(p.video_view_count, 0) AS video_view_count,
    coalesce(p.caption, '') AS caption, coalesce(p.caption_hashtags, []) AS caption_hashtags,
    coalesce(p.caption_mentions, []) AS caption_mentions,
    coalesce(p.accessibility_caption, '') AS accessibility_caption,
    coalesce(p.likes, 0) AS likes, coalesce(p.comments, 0) AS comments,
    p.date_utc AS date_utc, coalesce(p.mediacount, 0) AS mediacount,
    coalesce(p.title, '') AS title, coalesce(p.tagged_users, []) AS tagged_users,
    coalesce(p.is_sponsored, false) AS is_sponsored, coalesce(p.is_pinned, false) AS is_pinned,
    coalesce(p.media_urls, []) AS media_urls,
    coalesce(p.image_analysis, '') AS image_analysis,
    coalesce(p.post_analysis, '') AS post_analysis";

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn run(&self, q: Query) -> Result<()> {
        self.client.graph.run(q).await?;
        Ok(())
    }

    // --- Entities ---

    async fn upsert_profile(&self, e: &EntityRecord) -> Result<()> {
        let q = query(&format!(
            "MERGE (p:Person {{id: $id}})
             ON CREATE SET {NEW_PERSON_FLAGS}
             SET p.username = $username,
                 p.fullname = CASE WHEN $fullname = '' THEN coalesce(p.fullname, '') ELSE $fullname END,
                 p.bio = CASE WHEN $bio = '' THEN coalesce(p.bio, '') ELSE $bio END,
                 p.biography_mentions = CASE WHEN size($mentions) = 0 THEN coalesce(p.biography_mentions, []) ELSE $mentions END,
                 p.biography_hashtags = CASE WHEN size($hashtags) = 0 THEN coalesce(p.biography_hashtags, []) ELSE $hashtags END,
                 p.business_category_name = CASE WHEN $category = '' THEN coalesce(p.business_category_name, '') ELSE $category END,
                 p.external_url = CASE WHEN $external_url = '' THEN coalesce(p.external_url, '') ELSE $external_url END,
                 p.followers = $followers,
                 p.followees = $followees,
                 p.mediacount = $mediacount,
                 p.is_private = $is_private,
                 p.is_verified = $is_verified,
                 p.is_business_account = $is_business_account,
                 p.has_highlight_reels = $has_highlight_reels,
                 p.has_public_story = $has_public_story,
                 p.profile_pic_url = CASE WHEN $pic = '' THEN coalesce(p.profile_pic_url, '') ELSE $pic END,
                 p.profile_pic_url_no_iphone = CASE WHEN $pic_no_iphone = '' THEN coalesce(p.profile_pic_url_no_iphone, '') ELSE $pic_no_iphone END,
                 p.account_analysis = CASE WHEN $account_analysis = '' THEN coalesce(p.account_analysis, '') ELSE $account_analysis END,
                 p._profile_complete = true"
        ))
        .param("id", e.id)
        .param("username", e.username.as_str())
        .param("fullname", e.fullname.as_str())
        .param("bio", e.bio.as_str())
        .param("mentions", e.biography_mentions.clone())
        .param("hashtags", e.biography_hashtags.clone())
        .param("category", e.business_category_name.as_str())
        .param("external_url", e.external_url.as_str())
        .param("followers", e.followers)
        .param("followees", e.followees)
        .param("mediacount", e.mediacount)
        .param("is_private", e.is_private)
        .param("is_verified", e.is_verified)
        .param("is_business_account", e.is_business_account)
        .param("has_highlight_reels", e.has_highlight_reels)
        .param("has_public_story", e.has_public_story)
        .param("pic", e.profile_pic_url.as_str())
        .param("pic_no_iphone", e.profile_pic_url_no_iphone.as_str())
        .param("account_analysis", e.account_analysis.as_str());

        self.run(q).await?;
        debug!(username = e.username.as_str(), "Profile upserted");
        Ok(())
    }

    async fn upsert_entities(&self, stubs: &[EntityStub]) -> Result<()> {
        if stubs.is_empty() {
            return Ok(());
        }
        let users: Vec<BoltType> = stubs
            .iter()
            .map(|s| {
                bolt_map(vec![
                    ("id", s.id.into()),
                    ("username", s.username.as_str().into()),
                    ("fullname", s.fullname.as_str().into()),
                    ("profile_pic_url", s.profile_pic_url.as_str().into()),
                    ("is_verified", s.is_verified.into()),
                ])
            })
            .collect();

        let q = query(&format!(
            "UNWIND $users AS u
             MERGE (p:Person {{id: u.id}})
             ON CREATE SET {NEW_PERSON_FLAGS}
             SET p.username = CASE WHEN u.username = '' THEN p.username ELSE u.username END,
                 p.fullname = CASE WHEN u.fullname = '' THEN coalesce(p.fullname, '') ELSE u.fullname END,
                 p.profile_pic_url = CASE WHEN u.profile_pic_url = '' THEN coalesce(p.profile_pic_url, '') ELSE u.profile_pic_url END,
                 p.is_verified = u.is_verified"
        ))
        .param("users", users);

        self.run(q).await
    }

    async fn set_completion_flags(&self, handle: &str, update: &FlagUpdate) -> Result<()> {
        let assignments = update.assignments();
        if assignments.is_empty() {
            return Ok(());
        }
        let set_clause = assignments
            .iter()
            .enumerate()
            .map(|(i, (prop, _))| format!("p.{prop} = $v{i}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut q = query(&format!(
            "MATCH (p:Person {{username: $handle}}) SET {set_clause}"
        ))
        .param("handle", handle);
        for (i, (_, value)) in assignments.iter().enumerate() {
            q = q.param(&format!("v{i}"), *value);
        }
        self.run(q).await
    }

    // --- Cursors ---

    async fn save_cursor(
        &self,
        entity_id: EntityId,
        data_type: DataType,
        cursor: &ResumeCursor,
    ) -> Result<()> {
        let prop = data_type.cursor_property();
        let q = query(&format!(
            "MATCH (p:Person {{id: $id}})
             SET p.{prop} = $cursor, p.{prop}_updated_at = datetime()"
        ))
        .param("id", entity_id)
        .param("cursor", cursor.to_json());
        self.run(q).await
    }

    async fn clear_cursor(&self, entity_id: EntityId, data_type: DataType) -> Result<()> {
        let prop = data_type.cursor_property();
        let q = query(&format!(
            "MATCH (p:Person {{id: $id}})
             SET p.{prop} = '', p.{prop}_updated_at = datetime()"
        ))
        .param("id", entity_id);
        self.run(q).await
    }

    // --- Relationships ---

    async fn existing_edges(
        &self,
        entity_id: EntityId,
        direction: EdgeDirection,
    ) -> Result<(HashSet<EntityId>, HashSet<EntityId>)> {
        let q = query(&format!(
            "MATCH (p:Person {{id: $id}})
             OPTIONAL MATCH {follows}
             WITH p, collect(o.id) AS follows
             OPTIONAL MATCH {unfollowed}
             RETURN follows, collect(o.id) AS unfollowed",
            follows = edge_pattern(direction, "FOLLOWS"),
            unfollowed = edge_pattern(direction, "UNFOLLOWED"),
        ))
        .param("id", entity_id);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let follows: Vec<i64> = row.get("follows").unwrap_or_default();
            let unfollowed: Vec<i64> = row.get("unfollowed").unwrap_or_default();
            return Ok((follows.into_iter().collect(), unfollowed.into_iter().collect()));
        }
        Ok((HashSet::new(), HashSet::new()))
    }

    async fn reconcile_direction(
        &self,
        entity_id: EntityId,
        direction: EdgeDirection,
        fetched: &EdgeSet,
    ) -> Result<()> {
        let (follows, unfollowed) = self.existing_edges(entity_id, direction).await?;
        let delta = reconcile::plan(&follows, &unfollowed, fetched);
        if delta.is_empty() {
            return Ok(());
        }

        if !delta.new.is_empty() {
            let q = query(&format!(
                "UNWIND $ids AS oid
                 MATCH (p:Person {{id: $id}}), (o:Person {{id: oid}})
                 MERGE {}",
                edge_pattern(direction, "FOLLOWS")
            ))
            .param("id", entity_id)
            .param("ids", delta.new.clone());
            self.run(q).await?;
        }

        if !delta.unfollowed.is_empty() {
            let q = query(&format!(
                "UNWIND $ids AS oid
                 MATCH (p:Person {{id: $id}}), (o:Person {{id: oid}})
                 MATCH {}
                 DELETE r
                 MERGE {}
                 SET u.unfollowed_at = datetime()",
                edge_pattern_var(direction, "r", "FOLLOWS"),
                edge_pattern_var(direction, "u", "UNFOLLOWED"),
            ))
            .param("id", entity_id)
            .param("ids", delta.unfollowed.clone());
            self.run(q).await?;
        }

        if !delta.refollowed.is_empty() {
            let q = query(&format!(
                "UNWIND $ids AS oid
                 MATCH (p:Person {{id: $id}}), (o:Person {{id: oid}})
                 MATCH {}
                 WITH p, o, u, u.unfollowed_at AS unfollowed_at
                 DELETE u
                 MERGE {}
                 SET r.followed_at = datetime(), r.unfollowed_at = unfollowed_at",
                edge_pattern_var(direction, "u", "UNFOLLOWED"),
                edge_pattern_var(direction, "r", "FOLLOWS"),
            ))
            .param("id", entity_id)
            .param("ids", delta.refollowed.clone());
            self.run(q).await?;
        }

        info!(
            entity_id,
            direction = ?direction,
            new = delta.new.len(),
            unfollowed = delta.unfollowed.len(),
            refollowed = delta.refollowed.len(),
            batch_mode = fetched.batch_mode,
            "Relationships reconciled"
        );
        Ok(())
    }

    // --- Posts ---

    async fn upsert_post(&self, bundle: &PostBundle) -> Result<()> {
        let p = &bundle.post;
        let q = query(&format!(
            "MERGE (o:Person {{id: $owner_id}})
             ON CREATE SET {flags}
             MERGE (p:Post {{id: $id}})
             SET p.shortcode = $shortcode,
                 p.typename = $typename,
                 p.is_video = $is_video,
                 p.video_duration = $video_duration,
                 p.video_view_count = $video_view_count,
                 p.caption = $caption,
                 p.caption_hashtags = $caption_hashtags,
                 p.caption_mentions = $caption_mentions,
                 p.accessibility_caption = $accessibility_caption,
                 p.likes = $likes,
                 p.comments = $comments,
                 p.date_utc = CASE WHEN $date_utc = '' THEN p.date_utc ELSE datetime($date_utc) END,
                 p.mediacount = $mediacount,
                 p.title = $title,
                 p.tagged_users = $tagged_users,
                 p.is_sponsored = $is_sponsored,
                 p.is_pinned = $is_pinned,
                 p.media_urls = $media_urls,
                 p.image_analysis = CASE WHEN $image_analysis = '' THEN coalesce(p.image_analysis, '') ELSE $image_analysis END,
                 p.post_analysis = CASE WHEN $post_analysis = '' THEN coalesce(p.post_analysis, '') ELSE $post_analysis END
             MERGE (o)-[:POSTED]->(p)",
            flags = NEW_PERSON_FLAGS.replace("p.", "o."),
        ))
        .param("owner_id", p.owner_id)
        .param("id", p.id)
        .param("shortcode", p.shortcode.as_str())
        .param("typename", p.typename.as_str())
        .param("is_video", p.is_video)
        .param("video_duration", p.video_duration)
        .param("video_view_count", p.video_view_count)
        .param("caption", p.caption.as_str())
        .param("caption_hashtags", p.caption_hashtags.clone())
        .param("caption_mentions", p.caption_mentions.clone())
        .param("accessibility_caption", p.accessibility_caption.as_str())
        .param("likes", p.likes)
        .param("comments", p.comments)
        .param("date_utc", p.date_utc.map(|d| d.to_rfc3339()).unwrap_or_default())
        .param("mediacount", p.mediacount)
        .param("title", p.title.as_str())
        .param("tagged_users", p.tagged_users.clone())
        .param("is_sponsored", p.is_sponsored)
        .param("is_pinned", p.is_pinned)
        .param("media_urls", p.media_urls.clone())
        .param("image_analysis", p.image_analysis.as_str())
        .param("post_analysis", p.post_analysis.as_str());
        self.run(q).await?;

        let mut people: HashMap<EntityId, EntityStub> = HashMap::new();
        for stub in bundle
            .likers
            .iter()
            .chain(bundle.commenters.iter())
            .chain(bundle.comment_likes.iter().map(|l| &l.liker))
        {
            people.entry(stub.id).or_insert_with(|| stub.clone());
        }
        let people: Vec<EntityStub> = people.into_values().collect();
        self.upsert_entities(&people).await?;

        if !bundle.likers.is_empty() {
            let ids: Vec<i64> = bundle.likers.iter().map(|l| l.id).collect();
            let q = query(
                "UNWIND $ids AS lid
                 MATCH (p:Post {id: $post_id}), (l:Person {id: lid})
                 MERGE (l)-[:LIKED]->(p)",
            )
            .param("post_id", p.id)
            .param("ids", ids);
            self.run(q).await?;
        }

        if !bundle.comments.is_empty() {
            let comments: Vec<BoltType> = bundle
                .comments
                .iter()
                .map(|c| {
                    bolt_map(vec![
                        ("id", c.id.into()),
                        ("owner_id", c.owner_id.into()),
                        ("text", c.text.as_str().into()),
                        ("likes_count", c.likes_count.into()),
                        (
                            "created_at",
                            c.created_at.map(|d| d.to_rfc3339()).unwrap_or_default().into(),
                        ),
                        ("reply_to", c.reply_to.unwrap_or(0).into()),
                    ])
                })
                .collect();

            let q = query(
                "UNWIND $comments AS c
                 MATCH (post:Post {id: $post_id}), (u:Person {id: c.owner_id})
                 MERGE (cm:Comment {id: c.id})
                 SET cm.text = c.text,
                     cm.likes_count = c.likes_count,
                     cm.created_at_utc = CASE WHEN c.created_at = '' THEN cm.created_at_utc ELSE datetime(c.created_at) END
                 MERGE (u)-[:COMMENTED]->(cm)
                 MERGE (cm)-[:ON]->(post)",
            )
            .param("post_id", p.id)
            .param("comments", comments.clone());
            self.run(q).await?;

            let q = query(
                "UNWIND $comments AS c
                 WITH c WHERE c.reply_to <> 0
                 MATCH (a:Comment {id: c.id}), (b:Comment {id: c.reply_to})
                 MERGE (a)-[:REPLY_TO]->(b)",
            )
            .param("comments", comments);
            self.run(q).await?;
        }

        if !bundle.comment_likes.is_empty() {
            let likes: Vec<BoltType> = bundle
                .comment_likes
                .iter()
                .map(|l| {
                    bolt_map(vec![
                        ("comment_id", l.comment_id.into()),
                        ("liker_id", l.liker.id.into()),
                    ])
                })
                .collect();
            let q = query(
                "UNWIND $likes AS l
                 MATCH (c:Comment {id: l.comment_id}), (u:Person {id: l.liker_id})
                 MERGE (u)-[:LIKED]->(c)",
            )
            .param("likes", likes);
            self.run(q).await?;
        }

        debug!(shortcode = p.shortcode.as_str(), "Post upserted");
        Ok(())
    }

    async fn set_post_property(&self, post_id: EntityId, prop: &str, value: &str) -> Result<()> {
        let q = query(&format!("MATCH (p:Post {{id: $id}}) SET p.{prop} = $value"))
            .param("id", post_id)
            .param("value", value);
        self.run(q).await
    }

    async fn set_account_analysis(&self, entity_id: EntityId, analysis: &str) -> Result<()> {
        let q = query("MATCH (p:Person {id: $id}) SET p.account_analysis = $analysis")
            .param("id", entity_id)
            .param("analysis", analysis);
        self.run(q).await
    }

    async fn query_posts(&self, cypher: &str, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        let q = query(cypher).param("id", owner_id);
        let mut stream = self.client.graph.execute(q).await?;
        let mut posts = Vec::new();
        while let Some(row) = stream.next().await? {
            posts.push(row_to_post(&row));
        }
        Ok(posts)
    }
}

#[async_trait]
impl GraphStore for GraphWriter {
    async fn ensure_schema(&self) -> Result<()> {
        crate::migrate::migrate(&self.client).await?;
        Ok(())
    }

    async fn completion_flags(&self, handle: &str) -> Result<Option<CompletionFlags>> {
        let q = query(
            "MATCH (p:Person {username: $handle})
             RETURN coalesce(p._profile_complete, false) AS profile,
                    coalesce(p._followers_complete, false) AS followers,
                    coalesce(p._followees_complete, false) AS followees,
                    coalesce(p._posts_complete, false) AS posts,
                    coalesce(p._posts_analysis_complete, false) AS posts_analysis,
                    coalesce(p._account_analysis_complete, false) AS account_analysis",
        )
        .param("handle", handle);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(Some(CompletionFlags {
                profile: row.get("profile").unwrap_or(false),
                followers: row.get("followers").unwrap_or(false),
                followees: row.get("followees").unwrap_or(false),
                posts: row.get("posts").unwrap_or(false),
                posts_analysis: row.get("posts_analysis").unwrap_or(false),
                account_analysis: row.get("account_analysis").unwrap_or(false),
            }));
        }
        Ok(None)
    }

    async fn resume_cursor(
        &self,
        entity_id: EntityId,
        data_type: DataType,
    ) -> Result<Option<String>> {
        let q = query(&format!(
            "MATCH (p:Person {{id: $id}}) RETURN p.{} AS cursor",
            data_type.cursor_property()
        ))
        .param("id", entity_id);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let raw: String = row.get("cursor").unwrap_or_default();
            return Ok((!raw.is_empty()).then_some(raw));
        }
        Ok(None)
    }

    async fn entity_by_handle(&self, handle: &str) -> Result<Option<EntityRecord>> {
        let q = query(
            "MATCH (p:Person {username: $handle})
             RETURN p.id AS id, p.username AS username,
                    coalesce(p.fullname, '') AS fullname, coalesce(p.bio, '') AS bio,
                    coalesce(p.biography_mentions, []) AS biography_mentions,
                    coalesce(p.biography_hashtags, []) AS biography_hashtags,
                    coalesce(p.business_category_name, '') AS business_category_name,
                    coalesce(p.external_url, '') AS external_url,
                    coalesce(p.followers, 0) AS followers, coalesce(p.followees, 0) AS followees,
                    coalesce(p.mediacount, 0) AS mediacount,
                    coalesce(p.is_private, false) AS is_private,
                    coalesce(p.is_verified, false) AS is_verified,
                    coalesce(p.is_business_account, false) AS is_business_account,
                    coalesce(p.has_highlight_reels, false) AS has_highlight_reels,
                    coalesce(p.has_public_story, false) AS has_public_story,
                    coalesce(p.profile_pic_url, '') AS profile_pic_url,
                    coalesce(p.profile_pic_url_no_iphone, '') AS profile_pic_url_no_iphone,
                    coalesce(p.account_analysis, '') AS account_analysis",
        )
        .param("handle", handle);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(Some(EntityRecord {
                id: row.get("id").unwrap_or(0),
                username: row.get("username").unwrap_or_default(),
                fullname: row.get("fullname").unwrap_or_default(),
                bio: row.get("bio").unwrap_or_default(),
                biography_mentions: row.get("biography_mentions").unwrap_or_default(),
                biography_hashtags: row.get("biography_hashtags").unwrap_or_default(),
                business_category_name: row.get("business_category_name").unwrap_or_default(),
                external_url: row.get("external_url").unwrap_or_default(),
                followers: row.get("followers").unwrap_or(0),
                followees: row.get("followees").unwrap_or(0),
                mediacount: row.get("mediacount").unwrap_or(0),
                is_private: row.get("is_private").unwrap_or(false),
                is_verified: row.get("is_verified").unwrap_or(false),
                is_business_account: row.get("is_business_account").unwrap_or(false),
                has_highlight_reels: row.get("has_highlight_reels").unwrap_or(false),
                has_public_story: row.get("has_public_story").unwrap_or(false),
                profile_pic_url: row.get("profile_pic_url").unwrap_or_default(),
                profile_pic_url_no_iphone: row.get("profile_pic_url_no_iphone").unwrap_or_default(),
                account_analysis: row.get("account_analysis").unwrap_or_default(),
            }));
        }
        Ok(None)
    }

    async fn exploration_candidates(
        &self,
        handle: &str,
        tier: CandidateTier,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let filter = match tier {
            CandidateTier::IncompleteProfile => "coalesce(p._profile_complete, false) = false",
            CandidateTier::IncompleteGraph => {
                "coalesce(p._profile_complete, true) = true
                 AND (coalesce(p._followers_complete, false) = false
                      OR coalesce(p._followees_complete, false) = false
                      OR coalesce(p._posts_complete, false) = false)"
            }
        };
        let q = query(&format!(
            "MATCH (target:Person {{username: $handle}})-[:FOLLOWS]->(p:Person)
             WHERE coalesce(p.is_private, false) = false AND {filter}
             MATCH (p)<-[:FOLLOWS]-(f:Person)
             RETURN p.username AS username, count(f) AS followers_count
             ORDER BY followers_count DESC
             LIMIT $limit"
        ))
        .param("handle", handle)
        .param("limit", limit as i64);

        let mut stream = self.client.graph.execute(q).await?;
        let mut candidates = Vec::new();
        while let Some(row) = stream.next().await? {
            let username: String = row.get("username").unwrap_or_default();
            if username.is_empty() {
                continue;
            }
            candidates.push(Candidate {
                username,
                followers_count: row.get("followers_count").unwrap_or(0),
            });
        }
        Ok(candidates)
    }

    async fn unanalyzed_posts(&self, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        self.query_posts(
            &format!(
                "MATCH (o:Person {{id: $id}})-[:POSTED]->(p:Post)
                 WHERE coalesce(p.post_analysis, '') = ''
                 RETURN {POST_FIELDS}
                 ORDER BY p.date_utc DESC"
            ),
            owner_id,
        )
        .await
    }

    async fn posts_for(&self, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        self.query_posts(
            &format!(
                "MATCH (o:Person {{id: $id}})-[:POSTED]->(p:Post)
                 RETURN {POST_FIELDS}
                 ORDER BY p.date_utc DESC"
            ),
            owner_id,
        )
        .await
    }

    async fn comments_for_post(&self, post_id: EntityId) -> Result<Vec<CommentRecord>> {
        let q = query(
            "MATCH (u:Person)-[:COMMENTED]->(c:Comment)-[:ON]->(p:Post {id: $id})
             OPTIONAL MATCH (c)-[:REPLY_TO]->(parent:Comment)
             RETURN c.id AS id, u.id AS owner_id, coalesce(c.text, '') AS text,
                    coalesce(c.likes_count, 0) AS likes_count,
                    c.created_at_utc AS created_at, parent.id AS parent_id
             ORDER BY c.created_at_utc ASC",
        )
        .param("id", post_id);

        let mut stream = self.client.graph.execute(q).await?;
        let mut comments = Vec::new();
        while let Some(row) = stream.next().await? {
            comments.push(CommentRecord {
                id: row.get("id").unwrap_or(0),
                owner_id: row.get("owner_id").unwrap_or(0),
                text: row.get("text").unwrap_or_default(),
                likes_count: row.get("likes_count").unwrap_or(0),
                created_at: row_datetime_opt(&row, "created_at"),
                reply_to: row.get::<i64>("parent_id").ok(),
            });
        }
        Ok(comments)
    }

    async fn apply(&self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::UpsertProfile(e) => self.upsert_profile(e).await,
            WriteOp::UpsertEntities(stubs) => self.upsert_entities(stubs).await,
            WriteOp::ReconcileEdges {
                entity_id,
                followers,
                followees,
            } => {
                if let Some(set) = followers {
                    self.reconcile_direction(*entity_id, EdgeDirection::Followers, set)
                        .await?;
                }
                if let Some(set) = followees {
                    self.reconcile_direction(*entity_id, EdgeDirection::Followees, set)
                        .await?;
                }
                Ok(())
            }
            WriteOp::UpsertPost(bundle) => self.upsert_post(bundle).await,
            WriteOp::SetImageAnalysis { post_id, analysis } => {
                self.set_post_property(*post_id, "image_analysis", analysis).await
            }
            WriteOp::SetPostAnalysis { post_id, analysis } => {
                self.set_post_property(*post_id, "post_analysis", analysis).await
            }
            WriteOp::SetAccountAnalysis {
                entity_id,
                analysis,
            } => self.set_account_analysis(*entity_id, analysis).await,
            WriteOp::SetCompletionFlags { handle, update } => {
                self.set_completion_flags(handle, update).await
            }
            WriteOp::SaveCursor {
                entity_id,
                data_type,
                cursor,
            } => self.save_cursor(*entity_id, *data_type, cursor).await,
            WriteOp::ClearCursor {
                entity_id,
                data_type,
            } => self.clear_cursor(*entity_id, *data_type).await,
        }
    }
}

fn bolt_map(entries: Vec<(&str, BoltType)>) -> BoltType {
    BoltType::Map(BoltMap::from_iter(
        entries
            .into_iter()
            .map(|(k, v)| (BoltString::from(k), v)),
    ))
}

/// `(p)` is the source entity, `(o)` the other end.
fn edge_pattern(direction: EdgeDirection, rel: &str) -> String {
    match direction {
        EdgeDirection::Followers => format!("(o:Person)-[:{rel}]->(p)"),
        EdgeDirection::Followees => format!("(p)-[:{rel}]->(o:Person)"),
    }
}

fn edge_pattern_var(direction: EdgeDirection, var: &str, rel: &str) -> String {
    match direction {
        EdgeDirection::Followers => format!("(o)-[{var}:{rel}]->(p)"),
        EdgeDirection::Followees => format!("(p)-[{var}:{rel}]->(o)"),
    }
}

fn row_to_post(row: &neo4rs::Row) -> PostRecord {
    PostRecord {
        id: row.get("id").unwrap_or(0),
        shortcode: row.get("shortcode").unwrap_or_default(),
        owner_id: row.get("owner_id").unwrap_or(0),
        typename: row.get("typename").unwrap_or_default(),
        is_video: row.get("is_video").unwrap_or(false),
        video_duration: row.get("video_duration").unwrap_or(0.0),
        video_view_count: row.get("video_view_count").unwrap_or(0),
        caption: row.get("caption").unwrap_or_default(),
        caption_hashtags: row.get("caption_hashtags").unwrap_or_default(),
        caption_mentions: row.get("caption_mentions").unwrap_or_default(),
        accessibility_caption: row.get("accessibility_caption").unwrap_or_default(),
        likes: row.get("likes").unwrap_or(0),
        comments: row.get("comments").unwrap_or(0),
        date_utc: row_datetime_opt(row, "date_utc"),
        mediacount: row.get("mediacount").unwrap_or(0),
        title: row.get("title").unwrap_or_default(),
        tagged_users: row.get("tagged_users").unwrap_or_default(),
        is_sponsored: row.get("is_sponsored").unwrap_or(false),
        is_pinned: row.get("is_pinned").unwrap_or(false),
        media_urls: row.get("media_urls").unwrap_or_default(),
        image_analysis: row.get("image_analysis").unwrap_or_default(),
        post_analysis: row.get("post_analysis").unwrap_or_default(),
    }
}

/// Read an optional datetime stored via Cypher `datetime()`, falling back to
/// an RFC 3339 string.
fn row_datetime_opt(row: &neo4rs::Row, key: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = row.get::<DateTime<chrono::FixedOffset>>(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = row.get::<chrono::NaiveDateTime>(key) {
        return Some(ndt.and_utc());
    }
    row.get::<String>(key)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_patterns_point_the_right_way() {
        assert_eq!(
            edge_pattern(EdgeDirection::Followers, "FOLLOWS"),
            "(o:Person)-[:FOLLOWS]->(p)"
        );
        assert_eq!(
            edge_pattern_var(EdgeDirection::Followees, "u", "UNFOLLOWED"),
            "(p)-[u:UNFOLLOWED]->(o)"
        );
    }
}
