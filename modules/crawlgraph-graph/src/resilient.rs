use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crawlgraph_common::{
    Candidate, CandidateTier, CommentRecord, CompletionFlags, DataType, EntityId, EntityRecord,
    EntityStub, FlagUpdate, PostBundle, PostRecord, ResumeCursor,
};

use crate::error::Result;
use crate::ops::WriteOp;
use crate::reconcile::EdgeSet;
use crate::store::GraphStore;
use crate::sync_queue::SyncQueue;

/// Linear backoff: attempt `n` (0-based) waits `base_delay * (n + 1)` before
/// the next try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::ZERO,
        }
    }
}

/// Whether a write reached the graph or was parked in the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Queued,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
}

/// Retry and deferral layer in front of a [`GraphStore`].
///
/// Transient failures are retried per [`RetryPolicy`]. A write that still
/// fails transiently is appended to the sync queue and reported as
/// [`WriteOutcome::Queued`]; a read that still fails surfaces the error.
#[derive(Clone)]
pub struct ResilientStore {
    inner: Arc<dyn GraphStore>,
    queue: Option<Arc<SyncQueue>>,
    policy: RetryPolicy,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn GraphStore>, queue: Option<SyncQueue>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            queue: queue.map(Arc::new),
            policy,
        }
    }

    pub fn inner(&self) -> &Arc<dyn GraphStore> {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, label: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.policy.base_delay * (attempt + 1);
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Graph operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply a write with retries, deferring it when the graph stays
    /// unreachable.
    pub async fn write(&self, op: WriteOp) -> Result<WriteOutcome> {
        let inner = self.inner.clone();
        let result = self
            .with_retry(op.name(), || {
                let inner = inner.clone();
                let op = &op;
                async move { inner.apply(op).await }
            })
            .await;

        match result {
            Ok(()) => {
                if let (Some(queue), Some(key)) = (&self.queue, op.cursor_key()) {
                    queue.discard_cursor_writes(key)?;
                }
                Ok(WriteOutcome::Applied)
            }
            Err(e) if e.is_transient() => match &self.queue {
                Some(queue) => {
                    queue.push(&op)?;
                    Ok(WriteOutcome::Queued)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Replay deferred writes in order. Successes are dropped from the queue;
    /// failures stay for the next run.
    pub async fn replay_queue(&self) -> Result<ReplayReport> {
        let Some(queue) = &self.queue else {
            return Ok(ReplayReport::default());
        };
        let entries = queue.load()?;
        if entries.is_empty() {
            return Ok(ReplayReport::default());
        }
        info!(pending = entries.len(), "Replaying sync queue");

        let mut remaining = Vec::new();
        let mut replayed = 0;
        for entry in entries {
            let op = match entry.to_op() {
                Ok(op) => op,
                Err(e) => {
                    warn!(operation = entry.operation.as_str(), error = %e, "Unreadable queue entry kept");
                    remaining.push(entry);
                    continue;
                }
            };
            let inner = self.inner.clone();
            let result = self
                .with_retry(op.name(), || {
                    let inner = inner.clone();
                    let op = &op;
                    async move { inner.apply(op).await }
                })
                .await;
            match result {
                Ok(()) => replayed += 1,
                Err(e) => {
                    warn!(operation = op.name(), error = %e, "Queued write still failing");
                    remaining.push(entry);
                }
            }
        }
        queue.replace(&remaining)?;
        info!(replayed, remaining = remaining.len(), "Sync queue replay finished");
        Ok(ReplayReport {
            replayed,
            remaining: remaining.len(),
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.with_retry("ensure_schema", || self.inner.ensure_schema())
            .await
    }

    // --- Reads ---

    pub async fn completion_flags(&self, handle: &str) -> Result<Option<CompletionFlags>> {
        self.with_retry("completion_flags", || self.inner.completion_flags(handle))
            .await
    }

    pub async fn resume_cursor(
        &self,
        entity_id: EntityId,
        data_type: DataType,
    ) -> Result<Option<String>> {
        self.with_retry("resume_cursor", || {
            self.inner.resume_cursor(entity_id, data_type)
        })
        .await
    }

    pub async fn entity_by_handle(&self, handle: &str) -> Result<Option<EntityRecord>> {
        self.with_retry("entity_by_handle", || self.inner.entity_by_handle(handle))
            .await
    }

    pub async fn exploration_candidates(
        &self,
        handle: &str,
        tier: CandidateTier,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        self.with_retry("exploration_candidates", || {
            self.inner.exploration_candidates(handle, tier, limit)
        })
        .await
    }

    pub async fn unanalyzed_posts(&self, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        self.with_retry("unanalyzed_posts", || self.inner.unanalyzed_posts(owner_id))
            .await
    }

    pub async fn posts_for(&self, owner_id: EntityId) -> Result<Vec<PostRecord>> {
        self.with_retry("posts_for", || self.inner.posts_for(owner_id))
            .await
    }

    pub async fn comments_for_post(&self, post_id: EntityId) -> Result<Vec<CommentRecord>> {
        self.with_retry("comments_for_post", || self.inner.comments_for_post(post_id))
            .await
    }

    // --- Writes ---

    pub async fn upsert_profile(&self, record: EntityRecord) -> Result<WriteOutcome> {
        self.write(WriteOp::UpsertProfile(record)).await
    }

    pub async fn upsert_entities(&self, stubs: Vec<EntityStub>) -> Result<WriteOutcome> {
        if stubs.is_empty() {
            return Ok(WriteOutcome::Applied);
        }
        self.write(WriteOp::UpsertEntities(stubs)).await
    }

    pub async fn reconcile(
        &self,
        entity_id: EntityId,
        followers: Option<EdgeSet>,
        followees: Option<EdgeSet>,
    ) -> Result<WriteOutcome> {
        self.write(WriteOp::ReconcileEdges {
            entity_id,
            followers,
            followees,
        })
        .await
    }

    pub async fn upsert_post(&self, bundle: PostBundle) -> Result<WriteOutcome> {
        self.write(WriteOp::UpsertPost(Box::new(bundle))).await
    }

    pub async fn set_image_analysis(&self, post_id: EntityId, analysis: String) -> Result<WriteOutcome> {
        self.write(WriteOp::SetImageAnalysis { post_id, analysis }).await
    }

    pub async fn set_post_analysis(&self, post_id: EntityId, analysis: String) -> Result<WriteOutcome> {
        self.write(WriteOp::SetPostAnalysis { post_id, analysis }).await
    }

    pub async fn set_account_analysis(
        &self,
        entity_id: EntityId,
        analysis: String,
    ) -> Result<WriteOutcome> {
        self.write(WriteOp::SetAccountAnalysis {
            entity_id,
            analysis,
        })
        .await
    }

    pub async fn set_flags(&self, handle: &str, update: FlagUpdate) -> Result<WriteOutcome> {
        if update.is_empty() {
            return Ok(WriteOutcome::Applied);
        }
        self.write(WriteOp::SetCompletionFlags {
            handle: handle.to_string(),
            update,
        })
        .await
    }

    pub async fn save_cursor(
        &self,
        entity_id: EntityId,
        data_type: DataType,
        cursor: ResumeCursor,
    ) -> Result<WriteOutcome> {
        self.write(WriteOp::SaveCursor {
            entity_id,
            data_type,
            cursor,
        })
        .await
    }

    pub async fn clear_cursor(&self, entity_id: EntityId, data_type: DataType) -> Result<WriteOutcome> {
        self.write(WriteOp::ClearCursor {
            entity_id,
            data_type,
        })
        .await
    }
}
