use async_trait::async_trait;

use crawlgraph_common::{
    Candidate, CandidateTier, CommentRecord, CompletionFlags, DataType, EntityId, EntityRecord,
    PostRecord,
};

use crate::error::Result;
use crate::ops::WriteOp;

/// Storage contract for the crawl pipeline. Implemented by [`crate::GraphWriter`]
/// against Neo4j and by an in-memory graph for tests.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create uniqueness constraints. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Flags for an entity; `None` when the handle is not in the graph.
    async fn completion_flags(&self, handle: &str) -> Result<Option<CompletionFlags>>;

    /// Raw stored cursor JSON. Empty or absent both yield `None`.
    async fn resume_cursor(&self, entity_id: EntityId, data_type: DataType)
        -> Result<Option<String>>;

    async fn entity_by_handle(&self, handle: &str) -> Result<Option<EntityRecord>>;

    /// Public followees of `handle` matching `tier`, ordered by how many
    /// entities in the graph follow them.
    async fn exploration_candidates(
        &self,
        handle: &str,
        tier: CandidateTier,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    /// Posts owned by the entity with an empty `post_analysis`.
    async fn unanalyzed_posts(&self, owner_id: EntityId) -> Result<Vec<PostRecord>>;

    async fn posts_for(&self, owner_id: EntityId) -> Result<Vec<PostRecord>>;

    async fn comments_for_post(&self, post_id: EntityId) -> Result<Vec<CommentRecord>>;

    async fn apply(&self, op: &WriteOp) -> Result<()>;
}
