// Fetch stages: followers, followees and posts.

use tracing::{error, info, warn};

use crawlgraph_common::{DataType, EntityId, EntityStub, FlagUpdate, PostBundle, RawProfile, Stage};
use crawlgraph_graph::EdgeSet;

use crate::orchestrator::{CrawlError, Crawler, StageOutcome};
use crate::paginator::{PaginatorError, ResumablePaginator};

impl Crawler {
    /// Run a fetch stage, rotating accounts and retrying it (from the saved
    /// cursor) whenever the source rate-limits mid-stage.
    pub(crate) async fn fetch_stage(
        &mut self,
        profile: &RawProfile,
        stage: Stage,
    ) -> Result<StageOutcome, CrawlError> {
        let budget = self.rotation_budget();
        let mut rotations = 0;
        loop {
            let outcome = match stage {
                Stage::Posts => self.posts_stage(profile).await?,
                _ => self.edge_stage(profile, stage).await?,
            };
            if outcome != StageOutcome::RateLimited {
                return Ok(outcome);
            }

            warn!(
                handle = profile.username.as_str(),
                stage = stage.as_str(),
                account = self.rotator.current().unwrap_or_default(),
                "Rate limited during stage"
            );
            if rotations >= budget || !self.rotator.rotate().await? {
                error!(
                    handle = profile.username.as_str(),
                    stage = stage.as_str(),
                    "All accounts are rate limited, abandoning stage"
                );
                return Ok(StageOutcome::RateLimited);
            }
            rotations += 1;
            info!(stage = stage.as_str(), "Retrying stage with new account");
        }
    }

    async fn edge_stage(
        &mut self,
        profile: &RawProfile,
        stage: Stage,
    ) -> Result<StageOutcome, CrawlError> {
        let handle = profile.username.as_str();
        let (data_type, available) = match stage {
            Stage::Followers => (DataType::Followers, profile.followers),
            _ => (DataType::Followees, profile.followees),
        };

        let limit = self.config.limits.for_stage(stage).unwrap_or(0);
        if limit == 0 {
            info!(handle, stage = stage.as_str(), "Limit is 0, skipping");
            return Ok(StageOutcome::Skipped);
        }
        if available == 0 {
            self.store
                .set_flags(handle, FlagUpdate::stage(stage, true))
                .await?;
            return Ok(StageOutcome::Completed);
        }

        let pages = match data_type {
            DataType::Followers => self.source.followers(profile),
            _ => self.source.followees(profile),
        };
        let mut paginator =
            ResumablePaginator::open(pages, self.store.clone(), profile.user_id, data_type).await?;
        info!(
            handle,
            stage = stage.as_str(),
            target = limit.min(available),
            resumed = paginator.is_resumed(),
            start = paginator.initial_count(),
            "Fetching"
        );

        let batch_size = self.config.limits.batch_size;
        let mut batch: Vec<EntityStub> = Vec::with_capacity(batch_size);
        let mut fetched_ids: Vec<EntityId> = Vec::new();
        let mut fetched = 0u64;

        let result = loop {
            if fetched >= limit {
                break Ok(StageOutcome::Truncated);
            }
            match paginator.next().await {
                Ok(Some(user)) => {
                    let stub = EntityStub::from_user(&user);
                    fetched_ids.push(stub.id);
                    batch.push(stub);
                    if batch.len() >= batch_size {
                        if let Err(e) = self.flush_edges(profile.user_id, data_type, &mut batch).await {
                            break Err(e);
                        }
                        if let Err(e) = paginator.commit().await {
                            break Err(CrawlError::from(e));
                        }
                    }
                    fetched += 1;
                    if let Err(e) = self.rotator.after_request().await {
                        break Err(e.into());
                    }
                }
                Ok(None) => break Ok(StageOutcome::Completed),
                Err(PaginatorError::Source(e)) => break Ok(StageOutcome::from_source(e)),
                Err(PaginatorError::Store(e)) => break Err(CrawlError::from(e)),
            }
        };

        // Whatever happened, keep what was fetched, then move the cursor past it.
        self.flush_edges(profile.user_id, data_type, &mut batch).await?;
        let outcome = result?;
        paginator.commit().await?;

        match &outcome {
            StageOutcome::Completed => {
                if !paginator.is_resumed() {
                    let edges = EdgeSet::complete(fetched_ids);
                    let (followers, followees) = split_edges(data_type, edges);
                    self.store
                        .reconcile(profile.user_id, followers, followees)
                        .await?;
                }
                self.store
                    .set_flags(handle, FlagUpdate::stage(stage, true))
                    .await?;
                info!(handle, stage = stage.as_str(), fetched, "Fetched");
            }
            StageOutcome::Truncated => {
                info!(
                    handle,
                    stage = stage.as_str(),
                    fetched,
                    "Fetched partially, resume point saved"
                );
            }
            other => {
                warn!(handle, stage = stage.as_str(), fetched, outcome = %other, "Stage interrupted");
            }
        }
        Ok(outcome)
    }

    async fn flush_edges(
        &self,
        entity_id: EntityId,
        data_type: DataType,
        batch: &mut Vec<EntityStub>,
    ) -> Result<(), CrawlError> {
        if batch.is_empty() {
            return Ok(());
        }
        let stubs = std::mem::take(batch);
        let ids = stubs.iter().map(|s| s.id).collect();
        self.store.upsert_entities(stubs).await?;
        let (followers, followees) = split_edges(data_type, EdgeSet::batch(ids));
        self.store.reconcile(entity_id, followers, followees).await?;
        Ok(())
    }

    async fn posts_stage(&mut self, profile: &RawProfile) -> Result<StageOutcome, CrawlError> {
        let handle = profile.username.as_str();
        let limit = self.config.limits.posts;
        if limit == 0 {
            info!(handle, stage = "posts", "Limit is 0, skipping");
            return Ok(StageOutcome::Skipped);
        }
        if profile.mediacount == 0 {
            self.store
                .set_flags(
                    handle,
                    FlagUpdate::stage(Stage::Posts, true).with(Stage::PostsAnalysis, true),
                )
                .await?;
            return Ok(StageOutcome::Completed);
        }

        let pages = self.source.posts(profile);
        let mut paginator =
            ResumablePaginator::open(pages, self.store.clone(), profile.user_id, DataType::Posts)
                .await?;
        info!(
            handle,
            stage = "posts",
            target = limit.min(profile.mediacount),
            resumed = paginator.is_resumed(),
            "Fetching"
        );

        let mut fetched = 0u64;
        let mut invalidated = false;
        let outcome = loop {
            if fetched >= limit {
                break StageOutcome::Truncated;
            }
            let post = match paginator.next().await {
                Ok(Some(post)) => post,
                Ok(None) => break StageOutcome::Completed,
                Err(PaginatorError::Source(e)) => break StageOutcome::from_source(e),
                Err(PaginatorError::Store(e)) => return Err(e.into()),
            };

            // A failure here leaves the cursor on this post for the next attempt.
            let comments = match self.source.post_comments(&post).await {
                Ok(comments) => comments,
                Err(e) => break StageOutcome::from_source(e),
            };
            self.rotator.after_request().await?;
            let likers = match self.source.post_likers(&post).await {
                Ok(likers) => likers,
                Err(e) => break StageOutcome::from_source(e),
            };

            self.store
                .upsert_post(PostBundle::assemble(&post, &likers, &comments))
                .await?;
            if !invalidated {
                self.store
                    .set_flags(
                        handle,
                        FlagUpdate::stage(Stage::PostsAnalysis, false)
                            .with(Stage::AccountAnalysis, false),
                    )
                    .await?;
                invalidated = true;
            }
            paginator.commit().await?;
            fetched += 1;
            self.rotator.after_request().await?;
        };

        match &outcome {
            StageOutcome::Completed => {
                self.store
                    .set_flags(handle, FlagUpdate::stage(Stage::Posts, true))
                    .await?;
                info!(handle, stage = "posts", fetched, "Fetched");
            }
            StageOutcome::Truncated => {
                info!(handle, stage = "posts", fetched, "Fetched partially, resume point saved");
            }
            other => {
                warn!(handle, stage = "posts", fetched, outcome = %other, "Stage interrupted");
            }
        }
        Ok(outcome)
    }
}

fn split_edges(data_type: DataType, edges: EdgeSet) -> (Option<EdgeSet>, Option<EdgeSet>) {
    match data_type {
        DataType::Followers => (Some(edges), None),
        _ => (None, Some(edges)),
    }
}
