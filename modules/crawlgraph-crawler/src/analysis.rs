// LLM enrichment stages: per-post analysis, then the account summary.

use serde_json::Value;
use tracing::{error, info, warn};

use crawlgraph_common::{thread_comments, EntityRecord, FlagUpdate, PostRecord, RawProfile, Stage};

use crate::orchestrator::{CrawlError, Crawler, StageOutcome};
use crate::prompts;
use crate::traits::{AnalyzerError, ContentAnalyzer};

impl Crawler {
    pub(crate) async fn posts_analysis(
        &mut self,
        profile: &RawProfile,
    ) -> Result<StageOutcome, CrawlError> {
        let handle = profile.username.as_str();
        let Some(analyzer) = self.analyzer.clone() else {
            warn!(handle, "Skipped posts_analysis (no analyzer configured)");
            return Ok(StageOutcome::Skipped);
        };

        let posts = self.store.unanalyzed_posts(profile.user_id).await?;
        info!(handle, posts = posts.len(), "Analyzing posts");
        for post in posts {
            if let Err(e) = self.analyze_post(analyzer.as_ref(), post).await {
                return analysis_failure(handle, Stage::PostsAnalysis, e);
            }
        }

        self.store
            .set_flags(handle, FlagUpdate::stage(Stage::PostsAnalysis, true))
            .await?;
        info!(handle, "Posts analysis completed");
        Ok(StageOutcome::Completed)
    }

    async fn analyze_post(
        &self,
        analyzer: &dyn ContentAnalyzer,
        post: PostRecord,
    ) -> Result<(), AnalysisFailure> {
        let mut image_analysis = post.image_analysis.clone();
        if image_analysis.trim().is_empty() {
            let mut results = Vec::with_capacity(post.media_urls.len());
            for url in &post.media_urls {
                results.push(analyzer.analyze_image(url, prompts::IMAGE_ANALYSIS).await?);
            }
            image_analysis = Value::Array(results).to_string();
            self.store
                .set_image_analysis(post.id, image_analysis.clone())
                .await
                .map_err(CrawlError::from)?;
        }

        let comments = self
            .store
            .comments_for_post(post.id)
            .await
            .map_err(CrawlError::from)?;
        let prompt = prompts::post_prompt(&post, &image_analysis, &thread_comments(comments));
        let analysis = analyzer
            .analyze_text(&prompt, prompts::POST_ANALYSIS)
            .await?;
        self.store
            .set_post_analysis(post.id, analysis.to_string())
            .await
            .map_err(CrawlError::from)?;
        Ok(())
    }

    pub(crate) async fn account_analysis(
        &mut self,
        profile: &RawProfile,
    ) -> Result<StageOutcome, CrawlError> {
        let handle = profile.username.as_str();
        let Some(analyzer) = self.analyzer.clone() else {
            warn!(handle, "Skipped account_analysis (no analyzer configured)");
            return Ok(StageOutcome::Skipped);
        };

        let flags = self.store.completion_flags(handle).await?.unwrap_or_default();
        if !flags.posts_analysis {
            warn!(handle, "Account analysis needs complete post analysis, running it now");
            let outcome = self.posts_analysis(profile).await?;
            if outcome != StageOutcome::Completed {
                error!(handle, outcome = %outcome, "Post analysis incomplete, skipping account analysis");
                return Ok(outcome);
            }
        }

        let record = self
            .store
            .entity_by_handle(handle)
            .await?
            .unwrap_or_else(|| EntityRecord::from_profile(profile));
        let posts = self.store.posts_for(profile.user_id).await?;
        let prompt = prompts::account_prompt(&record, &posts);

        let analysis = match analyzer
            .analyze_text(&prompt, prompts::ACCOUNT_ANALYSIS)
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                return analysis_failure(handle, Stage::AccountAnalysis, AnalysisFailure::Analyzer(e))
            }
        };
        self.store
            .set_account_analysis(profile.user_id, analysis.to_string())
            .await?;
        self.store
            .set_flags(handle, FlagUpdate::stage(Stage::AccountAnalysis, true))
            .await?;
        info!(handle, "Account analysis completed");
        Ok(StageOutcome::Completed)
    }
}

enum AnalysisFailure {
    Analyzer(AnalyzerError),
    Crawl(CrawlError),
}

impl From<AnalyzerError> for AnalysisFailure {
    fn from(e: AnalyzerError) -> Self {
        AnalysisFailure::Analyzer(e)
    }
}

impl From<CrawlError> for AnalysisFailure {
    fn from(e: CrawlError) -> Self {
        AnalysisFailure::Crawl(e)
    }
}

/// Analyzer failures end the stage with its flag unset; storage failures
/// propagate.
fn analysis_failure(
    handle: &str,
    stage: Stage,
    failure: AnalysisFailure,
) -> Result<StageOutcome, CrawlError> {
    match failure {
        AnalysisFailure::Analyzer(AnalyzerError::QuotaExceeded(msg)) => {
            warn!(handle, stage = stage.as_str(), reason = msg.as_str(), "Analyzer quota hit, stage incomplete");
            Ok(StageOutcome::QuotaExceeded)
        }
        AnalysisFailure::Analyzer(AnalyzerError::InvalidKey) => {
            error!(
                handle,
                stage = stage.as_str(),
                "Analyzer API key is invalid; run `crawlgraph reset analyzer` to update it"
            );
            Ok(StageOutcome::Transient("invalid analyzer key".into()))
        }
        AnalysisFailure::Analyzer(AnalyzerError::Failed(msg)) => {
            error!(handle, stage = stage.as_str(), reason = msg.as_str(), "Analysis failed");
            Ok(StageOutcome::Transient(msg))
        }
        AnalysisFailure::Crawl(e) => Err(e),
    }
}
