use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crawlgraph_common::{
    CandidateTier, CrawlGraphError, EntityRecord, FlagUpdate, RawProfile, Stage,
};
use crawlgraph_graph::{ResilientStore, StoreError};

use crate::config::CrawlConfig;
use crate::rotator::{random_secs, AccountRotator, RotationError};
use crate::traits::{ContentAnalyzer, Sleeper, SourceApi, SourceError, TokioSleeper};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Config(#[from] CrawlGraphError),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("graph store error: {0}")]
    Store(#[from] StoreError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("{0} is not in the graph yet; run `crawlgraph discover {0}` first")]
    UnknownTarget(String),
}

/// Result of running one stage for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Ran to natural completion; the stage's flag is now set.
    Completed,
    /// Stopped at the configured limit; cursor kept, flag left unset.
    Truncated,
    /// Skipped by configuration, an existing flag, or a missing analyzer.
    Skipped,
    RateLimited,
    QuotaExceeded,
    NotFound,
    Transient(String),
}

impl StageOutcome {
    pub(crate) fn from_source(err: SourceError) -> Self {
        match err {
            SourceError::RateLimited => StageOutcome::RateLimited,
            SourceError::NotFound(_) => StageOutcome::NotFound,
            SourceError::SessionExpired => StageOutcome::Transient("session expired".into()),
            SourceError::InvalidCursor(msg) => {
                StageOutcome::Transient(format!("invalid cursor: {msg}"))
            }
            SourceError::Transient(msg) => StageOutcome::Transient(msg),
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed => write!(f, "completed"),
            StageOutcome::Truncated => write!(f, "truncated"),
            StageOutcome::Skipped => write!(f, "skipped"),
            StageOutcome::RateLimited => write!(f, "rate limited"),
            StageOutcome::QuotaExceeded => write!(f, "quota exceeded"),
            StageOutcome::NotFound => write!(f, "not found"),
            StageOutcome::Transient(msg) => write!(f, "transient failure: {msg}"),
        }
    }
}

/// How far `discover` got with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Profile stored and every stage attempted.
    Crawled,
    NotFound,
    /// Profile stored; the rest is hidden from this viewer.
    Private,
    SessionExpired,
    /// Every account was rate-limited on the profile fetch.
    RateLimited,
}

enum ProfileFetch {
    Found(RawProfile),
    Unavailable(TargetStatus),
}

#[derive(Debug, Clone)]
pub struct DiscoverReport {
    pub handle: String,
    pub status: TargetStatus,
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl DiscoverReport {
    fn new(handle: &str, status: TargetStatus) -> Self {
        Self {
            handle: handle.to_string(),
            status,
            stages: Vec::new(),
        }
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExploreReport {
    /// Candidates counted towards `max`: discovered plus denylisted.
    pub steps: usize,
    pub discovered: Vec<DiscoverReport>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// External collaborators the crawler needs.
#[derive(Clone, TypedBuilder)]
pub struct CrawlDeps {
    pub source: Arc<dyn SourceApi>,
    pub store: ResilientStore,
    #[builder(default)]
    pub analyzer: Option<Arc<dyn ContentAnalyzer>>,
    #[builder(default = Arc::new(TokioSleeper))]
    pub sleeper: Arc<dyn Sleeper>,
    pub accounts: Vec<String>,
    #[builder(default)]
    pub default_account: Option<String>,
}

/// Drives targets through the ingestion pipeline. One crawler owns the
/// account rotator, so all source calls go through a single session.
pub struct Crawler {
    pub(crate) source: Arc<dyn SourceApi>,
    pub(crate) store: ResilientStore,
    pub(crate) analyzer: Option<Arc<dyn ContentAnalyzer>>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) rotator: AccountRotator,
    pub(crate) config: CrawlConfig,
    session_ready: bool,
}

impl Crawler {
    /// Validates the configuration and requested account. Nothing touches
    /// the source or the graph until the first `discover`.
    pub fn new(deps: CrawlDeps, config: CrawlConfig) -> Result<Self, CrawlError> {
        config.validate()?;
        let rotator = AccountRotator::new(
            deps.source.clone(),
            deps.sleeper.clone(),
            deps.accounts,
            deps.default_account,
            config.pacing.clone(),
        );
        rotator.check(config.account.as_deref())?;
        Ok(Self {
            source: deps.source,
            store: deps.store,
            analyzer: deps.analyzer,
            sleeper: deps.sleeper,
            rotator,
            config,
            session_ready: false,
        })
    }

    pub fn rotator(&self) -> &AccountRotator {
        &self.rotator
    }

    async fn ensure_session(&mut self) -> Result<(), CrawlError> {
        if !self.session_ready {
            let account = self.config.account.clone();
            self.rotator.activate(account.as_deref()).await?;
            self.session_ready = true;
        }
        Ok(())
    }

    /// Crawl one target: profile first, then every stage in order.
    pub async fn discover(&mut self, handle: &str) -> Result<DiscoverReport, CrawlError> {
        self.ensure_session().await?;
        self.rotator.pace_session().await;

        info!(handle, "Fetching profile");
        let profile = match self.fetch_profile(handle).await? {
            ProfileFetch::Found(profile) => profile,
            ProfileFetch::Unavailable(status) => return Ok(DiscoverReport::new(handle, status)),
        };
        self.rotator.after_request().await?;

        self.store
            .upsert_profile(EntityRecord::from_profile(&profile))
            .await?;
        info!(handle, id = profile.user_id, "Profile stored");

        let mut trivial = FlagUpdate::default();
        if profile.followers == 0 {
            trivial = trivial.with(Stage::Followers, true);
        }
        if profile.followees == 0 {
            trivial = trivial.with(Stage::Followees, true);
        }
        if profile.mediacount == 0 {
            trivial = trivial
                .with(Stage::Posts, true)
                .with(Stage::PostsAnalysis, true);
        }
        self.store.set_flags(handle, trivial).await?;

        if !profile.is_readable() {
            error!(
                handle,
                "Profile is private; follow the account with a configured login to crawl it"
            );
            return Ok(DiscoverReport::new(handle, TargetStatus::Private));
        }

        let mut report = DiscoverReport::new(handle, TargetStatus::Crawled);
        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            let outcome = self.run_stage(&profile, stage).await?;
            info!(handle, stage = stage.as_str(), outcome = %outcome, "Stage finished");
            report.stages.push((stage, outcome));

            if i + 1 < Stage::ALL.len() {
                let pause = random_secs(
                    self.config.pacing.stage_delay_min,
                    self.config.pacing.stage_delay_max,
                );
                self.sleeper.sleep(pause).await;
            }
        }
        Ok(report)
    }

    /// Profile fetch with rotation on rate limits.
    async fn fetch_profile(&mut self, handle: &str) -> Result<ProfileFetch, CrawlError> {
        let budget = self.rotation_budget();
        let mut rotations = 0;
        loop {
            match self.source.profile(handle).await {
                Ok(profile) => return Ok(ProfileFetch::Found(profile)),
                Err(SourceError::RateLimited) => {
                    warn!(
                        handle,
                        account = self.rotator.current().unwrap_or_default(),
                        "Rate limited fetching profile"
                    );
                    if rotations >= budget || !self.rotator.rotate().await? {
                        error!(handle, "All accounts are rate limited, try again later");
                        return Ok(ProfileFetch::Unavailable(TargetStatus::RateLimited));
                    }
                    rotations += 1;
                }
                Err(SourceError::NotFound(_)) => {
                    warn!(handle, "Target does not exist, check the handle");
                    return Ok(ProfileFetch::Unavailable(TargetStatus::NotFound));
                }
                Err(SourceError::SessionExpired) => {
                    error!(
                        handle,
                        account = self.rotator.current().unwrap_or_default(),
                        "Session expired; run `crawlgraph reset accounts` to log in again"
                    );
                    return Ok(ProfileFetch::Unavailable(TargetStatus::SessionExpired));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Rotations allowed for one operation before giving up: two passes over
    /// the pool, so a cooldown is tried once.
    pub(crate) fn rotation_budget(&self) -> usize {
        self.rotator.accounts().len() * 2
    }

    async fn run_stage(
        &mut self,
        profile: &RawProfile,
        stage: Stage,
    ) -> Result<StageOutcome, CrawlError> {
        let handle = profile.username.as_str();
        if self.config.skip.contains(&stage) {
            info!(handle, stage = stage.as_str(), "Skipped by configuration");
            return Ok(StageOutcome::Skipped);
        }

        if self.config.force.contains(&stage) {
            info!(handle, stage = stage.as_str(), "Forced, clearing completion flag");
            self.store
                .set_flags(handle, FlagUpdate::stage(stage, false))
                .await?;
        } else {
            let flags = self.store.completion_flags(handle).await?.unwrap_or_default();
            if flags.get(stage) {
                info!(handle, stage = stage.as_str(), "Already completed, skipping");
                return Ok(StageOutcome::Skipped);
            }
        }

        match stage {
            Stage::Followers | Stage::Followees | Stage::Posts => {
                self.fetch_stage(profile, stage).await
            }
            Stage::PostsAnalysis => self.posts_analysis(profile).await,
            Stage::AccountAnalysis => self.account_analysis(profile).await,
        }
    }

    /// Walk the target's followees that still need crawling, most followed
    /// first, discovering up to `max` of them.
    pub async fn explore(&mut self, handle: &str, max: usize) -> Result<ExploreReport, CrawlError> {
        if self.store.entity_by_handle(handle).await?.is_none() {
            return Err(CrawlError::UnknownTarget(handle.to_string()));
        }

        info!(handle, "Finding top followees for discovery");
        let limit = self.config.candidate_limit;
        let mut candidates = self
            .store
            .exploration_candidates(handle, CandidateTier::IncompleteProfile, limit)
            .await?;
        if candidates.is_empty() {
            debug!(handle, "No incomplete profiles, falling back to incomplete graphs");
            candidates = self
                .store
                .exploration_candidates(handle, CandidateTier::IncompleteGraph, limit)
                .await?;
        }

        let mut report = ExploreReport::default();
        if candidates.is_empty() {
            warn!(handle, "No candidates left to explore");
            return Ok(report);
        }

        let mut seen = HashSet::new();
        for candidate in candidates {
            if report.steps >= max {
                break;
            }
            let name = candidate.username;
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }

            info!(
                candidate = name.as_str(),
                followers = candidate.followers_count,
                "Discovering"
            );
            if self.config.skip_accounts.contains(&name) {
                info!(candidate = name.as_str(), "Skipped as per configuration");
                report.skipped.push(name);
                report.steps += 1;
                info!(step = report.steps, max, "Step complete");
                continue;
            }

            match self.discover(&name).await {
                Ok(found) => report.discovered.push(found),
                Err(e) => {
                    error!(candidate = name.as_str(), error = %e, "Discover failed");
                    report.failed.push(name);
                    continue;
                }
            }
            report.steps += 1;
            info!(step = report.steps, max, "Step complete");

            if report.steps < max {
                let pause = random_secs(
                    self.config.pacing.explore_delay_min,
                    self.config.pacing.explore_delay_max,
                );
                self.sleeper.sleep(pause).await;
            }
        }
        Ok(report)
    }
}
