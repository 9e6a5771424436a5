//! In-memory [`GraphStore`] with the same merge and reconcile semantics as
//! the Neo4j writer, plus fault injection for exercising retries.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crawlgraph_common::{
    Candidate, CandidateTier, CommentRecord, CompletionFlags, DataType, EntityId, EntityRecord,
    EntityStub, PostRecord,
};

use crate::error::{Result, StoreError};
use crate::ops::WriteOp;
use crate::reconcile::{self, EdgeDirection, EdgeSet};
use crate::store::GraphStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredEntity {
    pub record: EntityRecord,
    pub flags: CompletionFlags,
    pub cursors: HashMap<DataType, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowEdge {
    pub followed_at: Option<DateTime<Utc>>,
    /// Carried over from a previous UNFOLLOWED edge on refollow.
    pub unfollowed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    entities: HashMap<EntityId, StoredEntity>,
    follows: HashMap<(EntityId, EntityId), FollowEdge>,
    unfollowed: HashMap<(EntityId, EntityId), DateTime<Utc>>,
    posts: HashMap<EntityId, PostRecord>,
    post_likes: HashSet<(EntityId, EntityId)>,
    comments: HashMap<EntityId, (EntityId, CommentRecord)>,
    comment_likes: HashSet<(EntityId, EntityId)>,
    fail_writes: usize,
    fail_reads: usize,
    applied: Vec<WriteOp>,
}

#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` writes fail with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.with(|s| s.fail_writes = n);
    }

    /// The next `n` reads fail with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        self.with(|s| s.fail_reads = n);
    }

    /// Every write applied so far, in order.
    pub fn applied(&self) -> Vec<WriteOp> {
        self.with(|s| s.applied.clone())
    }

    pub fn entity(&self, id: EntityId) -> Option<StoredEntity> {
        self.with(|s| s.entities.get(&id).cloned())
    }

    pub fn entity_named(&self, handle: &str) -> Option<StoredEntity> {
        self.with(|s| {
            s.entities
                .values()
                .find(|e| e.record.username == handle)
                .cloned()
        })
    }

    pub fn entity_count(&self) -> usize {
        self.with(|s| s.entities.len())
    }

    pub fn follow_edge(&self, from: EntityId, to: EntityId) -> Option<FollowEdge> {
        self.with(|s| s.follows.get(&(from, to)).cloned())
    }

    pub fn unfollowed_at(&self, from: EntityId, to: EntityId) -> Option<DateTime<Utc>> {
        self.with(|s| s.unfollowed.get(&(from, to)).copied())
    }

    /// Ids of entities following `id`.
    pub fn followers_of(&self, id: EntityId) -> HashSet<EntityId> {
        self.with(|s| edges_of(&s.follows.keys().copied().collect(), id, EdgeDirection::Followers))
    }

    /// Ids of entities `id` follows.
    pub fn followees_of(&self, id: EntityId) -> HashSet<EntityId> {
        self.with(|s| edges_of(&s.follows.keys().copied().collect(), id, EdgeDirection::Followees))
    }

    pub fn edge_count(&self) -> usize {
        self.with(|s| s.follows.len() + s.unfollowed.len())
    }

    pub fn post(&self, id: EntityId) -> Option<PostRecord> {
        self.with(|s| s.posts.get(&id).cloned())
    }

    pub fn post_count(&self) -> usize {
        self.with(|s| s.posts.len())
    }

    pub fn post_likers(&self, post_id: EntityId) -> HashSet<EntityId> {
        self.with(|s| {
            s.post_likes
                .iter()
                .filter(|(_, p)| *p == post_id)
                .map(|(person, _)| *person)
                .collect()
        })
    }

    pub fn comment_likers(&self, comment_id: EntityId) -> HashSet<EntityId> {
        self.with(|s| {
            s.comment_likes
                .iter()
                .filter(|(_, c)| *c == comment_id)
                .map(|(person, _)| *person)
                .collect()
        })
    }

    pub fn cursor(&self, id: EntityId, data_type: DataType) -> Option<String> {
        self.with(|s| {
            s.entities
                .get(&id)
                .and_then(|e| e.cursors.get(&data_type).cloned())
                .filter(|c| !c.is_empty())
        })
    }

    // --- Seeding helpers ---

    /// Insert or replace an entity with explicit flags.
    pub fn seed_entity(&self, record: EntityRecord, flags: CompletionFlags) {
        self.with(|s| {
            s.entities.insert(
                record.id,
                StoredEntity {
                    record,
                    flags,
                    cursors: HashMap::new(),
                },
            );
        });
    }

    pub fn seed_follow(&self, from: EntityId, to: EntityId) {
        self.with(|s| {
            s.follows.insert((from, to), FollowEdge::default());
        });
    }

    pub fn seed_unfollowed(&self, from: EntityId, to: EntityId, at: DateTime<Utc>) {
        self.with(|s| {
            s.unfollowed.insert((from, to), at);
        });
    }

    pub fn seed_cursor(&self, id: EntityId, data_type: DataType, raw: &str) {
        self.with(|s| {
            if let Some(e) = s.entities.get_mut(&id) {
                e.cursors.insert(data_type, raw.to_string());
            }
        });
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        self.with(|s| {
            if s.fail_reads > 0 {
                s.fail_reads -= 1;
                return Err(StoreError::Unavailable("injected read failure".into()));
            }
            Ok(f(s))
        })
    }
}

fn edges_of(
    pairs: &HashSet<(EntityId, EntityId)>,
    id: EntityId,
    direction: EdgeDirection,
) -> HashSet<EntityId> {
    pairs
        .iter()
        .filter_map(|(from, to)| match direction {
            EdgeDirection::Followers if *to == id => Some(*from),
            EdgeDirection::Followees if *from == id => Some(*to),
            _ => None,
        })
        .collect()
}

fn pair(source: EntityId, other: EntityId, direction: EdgeDirection) -> (EntityId, EntityId) {
    match direction {
        EdgeDirection::Followers => (other, source),
        EdgeDirection::Followees => (source, other),
    }
}

fn merge_stub(state: &mut State, stub: &EntityStub) {
    let entry = state.entities.entry(stub.id).or_insert_with(|| StoredEntity {
        record: EntityRecord {
            id: stub.id,
            ..Default::default()
        },
        ..Default::default()
    });
    let r = &mut entry.record;
    if !stub.username.is_empty() {
        r.username = stub.username.clone();
    }
    if !stub.fullname.is_empty() {
        r.fullname = stub.fullname.clone();
    }
    if !stub.profile_pic_url.is_empty() {
        r.profile_pic_url = stub.profile_pic_url.clone();
    }
    r.is_verified = stub.is_verified;
}

fn ensure_entity(state: &mut State, id: EntityId) {
    state.entities.entry(id).or_insert_with(|| StoredEntity {
        record: EntityRecord {
            id,
            ..Default::default()
        },
        ..Default::default()
    });
}

fn reconcile_direction(state: &mut State, source: EntityId, direction: EdgeDirection, set: &EdgeSet) {
    let follows = edges_of(&state.follows.keys().copied().collect(), source, direction);
    let unfollowed = edges_of(&state.unfollowed.keys().copied().collect(), source, direction);
    let delta = reconcile::plan(&follows, &unfollowed, set);
    let now = Utc::now();

    for other in delta.new {
        // Edges only connect existing entities, as with MATCH in Cypher.
        if state.entities.contains_key(&other) && state.entities.contains_key(&source) {
            state
                .follows
                .entry(pair(source, other, direction))
                .or_default();
        }
    }
    for other in delta.unfollowed {
        let key = pair(source, other, direction);
        state.follows.remove(&key);
        state.unfollowed.insert(key, now);
    }
    for other in delta.refollowed {
        let key = pair(source, other, direction);
        let previous = state.unfollowed.remove(&key);
        state.follows.insert(
            key,
            FollowEdge {
                followed_at: Some(now),
                unfollowed_at: previous,
            },
        );
    }
}

fn apply_op(state: &mut State, op: &WriteOp) {
    match op {
        WriteOp::UpsertProfile(record) => {
            let entry = state.entities.entry(record.id).or_default();
            entry.record.merge(record);
            entry.flags.profile = true;
        }
        WriteOp::UpsertEntities(stubs) => {
            for stub in stubs {
                merge_stub(state, stub);
            }
        }
        WriteOp::ReconcileEdges {
            entity_id,
            followers,
            followees,
        } => {
            if let Some(set) = followers {
                reconcile_direction(state, *entity_id, EdgeDirection::Followers, set);
            }
            if let Some(set) = followees {
                reconcile_direction(state, *entity_id, EdgeDirection::Followees, set);
            }
        }
        WriteOp::UpsertPost(bundle) => {
            let incoming = &bundle.post;
            ensure_entity(state, incoming.owner_id);
            let post = state.posts.entry(incoming.id).or_default();
            let image_analysis = std::mem::take(&mut post.image_analysis);
            let post_analysis = std::mem::take(&mut post.post_analysis);
            *post = incoming.clone();
            if post.image_analysis.is_empty() {
                post.image_analysis = image_analysis;
            }
            if post.post_analysis.is_empty() {
                post.post_analysis = post_analysis;
            }

            for stub in bundle
                .likers
                .iter()
                .chain(bundle.commenters.iter())
                .chain(bundle.comment_likes.iter().map(|l| &l.liker))
            {
                merge_stub(state, stub);
            }
            for liker in &bundle.likers {
                state.post_likes.insert((liker.id, incoming.id));
            }
            for comment in &bundle.comments {
                state
                    .comments
                    .insert(comment.id, (incoming.id, comment.clone()));
            }
            for like in &bundle.comment_likes {
                state.comment_likes.insert((like.liker.id, like.comment_id));
            }
        }
        WriteOp::SetImageAnalysis { post_id, analysis } => {
            if let Some(p) = state.posts.get_mut(post_id) {
                p.image_analysis = analysis.clone();
            }
        }
        WriteOp::SetPostAnalysis { post_id, analysis } => {
            if let Some(p) = state.posts.get_mut(post_id) {
                p.post_analysis = analysis.clone();
            }
        }
        WriteOp::SetAccountAnalysis {
            entity_id,
            analysis,
        } => {
            if let Some(e) = state.entities.get_mut(entity_id) {
                e.record.account_analysis = analysis.clone();
            }
        }
        WriteOp::SetCompletionFlags { handle, update } => {
            if let Some(e) = state
                .entities
                .values_mut()
                .find(|e| e.record.username == *handle)
            {
                e.flags.apply(update);
            }
        }
        WriteOp::SaveCursor {
            entity_id,
            data_type,
            cursor,
        } => {
            if let Some(e) = state.entities.get_mut(entity_id) {
                e.cursors.insert(*data_type, cursor.to_json());
            }
        }
        WriteOp::ClearCursor {
            entity_id,
            data_type,
        } => {
            if let Some(e) = state.entities.get_mut(entity_id) {
                e.cursors.insert(*data_type, String::new());
            }
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn completion_flags(&self, handle: &str) -> Result<Option<CompletionFlags>> {
        self.read(|s| {
            s.entities
                .values()
                .find(|e| e.record.username == handle)
                .map(|e| e.flags)
        })
    }

    async fn resume_cursor(
        &self,
        entity_id: EntityId,
        data_type: DataType,
    ) -> Result<Option<String>> {
        self.read(|s| {
            s.entities
                .get(&entity_id)
                .and_then(|e| e.cursors.get(&data_type).cloned())
                .filter(|c| !c.is_empty())
        })
    }

    async fn entity_by_handle(&self, handle: &str) -> Result<Option<EntityRecord>> {
        self.read(|s| {
            s.entities
                .values()
                .find(|e| e.record.username == handle)
                .map(|e| e.record.clone())
        })
    }

    async fn exploration_candidates(
        &self,
        handle: &str,
        tier: CandidateTier,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        self.read(|s| {
            let Some(target) = s.entities.values().find(|e| e.record.username == handle) else {
                return Vec::new();
            };
            let pairs: HashSet<(EntityId, EntityId)> = s.follows.keys().copied().collect();
            let mut candidates: Vec<Candidate> = edges_of(&pairs, target.record.id, EdgeDirection::Followees)
                .into_iter()
                .filter_map(|id| s.entities.get(&id))
                .filter(|e| !e.record.is_private && !e.record.username.is_empty())
                .filter(|e| match tier {
                    CandidateTier::IncompleteProfile => !e.flags.profile,
                    CandidateTier::IncompleteGraph => {
                        e.flags.profile
                            && (!e.flags.followers || !e.flags.followees || !e.flags.posts)
                    }
                })
                .map(|e| Candidate {
                    username: e.record.username.clone(),
                    followers_count: edges_of(&pairs, e.record.id, EdgeDirection::Followers).len()
                        as i64,
                })
                .collect();
            candidates.sort_by(|a, b| {
                b.followers_count
                    .cmp(&a.followers_count)
                    .then_with(|| a.username.cmp(&b.username))
            });
            candidates.truncate(limit);
            candidates
        })
    }

    async fn unanalyzed_posts(&self, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        Ok(self
            .posts_for(owner_id)
            .await?
            .into_iter()
            .filter(|p| p.post_analysis.is_empty())
            .collect())
    }

    async fn posts_for(&self, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        self.read(|s| {
            let mut posts: Vec<PostRecord> = s
                .posts
                .values()
                .filter(|p| p.owner_id == owner_id)
                .cloned()
                .collect();
            posts.sort_by(|a, b| b.date_utc.cmp(&a.date_utc).then_with(|| a.id.cmp(&b.id)));
            posts
        })
    }

    async fn comments_for_post(&self, post_id: EntityId) -> Result<Vec<CommentRecord>> {
        self.read(|s| {
            let mut comments: Vec<CommentRecord> = s
                .comments
                .values()
                .filter(|(p, _)| *p == post_id)
                .map(|(_, c)| c.clone())
                .collect();
            comments.sort_by_key(|c| (c.created_at, c.id));
            comments
        })
    }

    async fn apply(&self, op: &WriteOp) -> Result<()> {
        self.with(|s| {
            if s.fail_writes > 0 {
                s.fail_writes -= 1;
                return Err(StoreError::Unavailable("injected write failure".into()));
            }
            apply_op(s, op);
            s.applied.push(op.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgraph_common::{FlagUpdate, Stage};

    fn stub(id: EntityId, name: &str) -> EntityStub {
        EntityStub {
            id,
            username: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stub_upsert_never_clobbers_profile() {
        let g = MemoryGraph::new();
        g.apply(&WriteOp::UpsertProfile(EntityRecord {
            id: 1,
            username: "ada".into(),
            bio: "math".into(),
            fullname: "Ada L".into(),
            ..Default::default()
        }))
        .await
        .unwrap();
        g.apply(&WriteOp::UpsertEntities(vec![stub(1, "ada")])).await.unwrap();

        let e = g.entity(1).unwrap();
        assert_eq!(e.record.bio, "math");
        assert_eq!(e.record.fullname, "Ada L");
        assert!(e.flags.profile);
    }

    #[tokio::test]
    async fn new_stub_starts_with_all_flags_false() {
        let g = MemoryGraph::new();
        g.apply(&WriteOp::UpsertEntities(vec![stub(2, "bob")])).await.unwrap();
        assert_eq!(g.entity(2).unwrap().flags, CompletionFlags::default());
    }

    #[tokio::test]
    async fn refollow_keeps_unfollow_history() {
        let g = MemoryGraph::new();
        g.apply(&WriteOp::UpsertEntities(vec![stub(1, "ada"), stub(2, "bob")]))
            .await
            .unwrap();
        let at = Utc::now() - chrono::Duration::days(3);
        g.seed_unfollowed(2, 1, at);

        g.apply(&WriteOp::ReconcileEdges {
            entity_id: 1,
            followers: Some(EdgeSet::complete(vec![2])),
            followees: None,
        })
        .await
        .unwrap();

        let edge = g.follow_edge(2, 1).unwrap();
        assert_eq!(edge.unfollowed_at, Some(at));
        assert!(edge.followed_at.is_some());
        assert!(g.unfollowed_at(2, 1).is_none());
    }

    #[tokio::test]
    async fn flag_update_by_handle_is_partial() {
        let g = MemoryGraph::new();
        g.apply(&WriteOp::UpsertEntities(vec![stub(1, "ada")])).await.unwrap();
        g.apply(&WriteOp::SetCompletionFlags {
            handle: "ada".into(),
            update: FlagUpdate::stage(Stage::Followers, true),
        })
        .await
        .unwrap();
        let flags = g.completion_flags("ada").await.unwrap().unwrap();
        assert!(flags.followers);
        assert!(!flags.followees);
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted() {
        let g = MemoryGraph::new();
        g.fail_next_writes(1);
        let err = g.apply(&WriteOp::UpsertEntities(vec![stub(1, "a")])).await.unwrap_err();
        assert!(err.is_transient());
        g.apply(&WriteOp::UpsertEntities(vec![stub(1, "a")])).await.unwrap();
        assert_eq!(g.applied().len(), 1);
    }
}
