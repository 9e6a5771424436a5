pub mod adapters;
mod analysis;
pub mod config;
pub mod orchestrator;
pub mod pages;
pub mod paginator;
pub mod prompts;
pub mod rotator;
pub mod setup;
mod stages;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use adapters::SocialSource;
pub use config::CrawlConfig;
pub use orchestrator::{
    CrawlDeps, CrawlError, Crawler, DiscoverReport, ExploreReport, StageOutcome, TargetStatus,
};
pub use pages::{CursorPages, Page, PageFetcher};
pub use paginator::{PaginatorError, ResumablePaginator};
pub use rotator::{AccountRotator, RotationError};
pub use traits::{
    AnalyzerError, ContentAnalyzer, PageIterator, PostPages, Sleeper, SourceApi, SourceError,
    TokioSleeper, UserPages,
};
