//! Shared wiring for crawler integration tests: in-memory graph behind a
//! resilient store with a temp-dir queue, mock source, recording sleeper.

#![allow(dead_code)]

use std::sync::Arc;

use crawlgraph_common::config::PacingConfig;
use crawlgraph_common::{CompletionFlags, EntityRecord};
use crawlgraph_crawler::testing::{MockAnalyzer, MockSource, RecordingSleeper};
use crawlgraph_crawler::{ContentAnalyzer, CrawlConfig, CrawlDeps, Crawler};
use crawlgraph_graph::{MemoryGraph, ResilientStore, RetryPolicy, SyncQueue};

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub graph: Arc<MemoryGraph>,
    pub store: ResilientStore,
    pub source: Arc<MockSource>,
    pub sleeper: Arc<RecordingSleeper>,
    pub analyzer: Option<Arc<MockAnalyzer>>,
    pub accounts: Vec<String>,
    pub default_account: Option<String>,
}

impl Harness {
    pub fn new(source: MockSource) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(MemoryGraph::new());
        let store = ResilientStore::new(
            graph.clone(),
            Some(SyncQueue::new(dir.path().join("neo4j_sync_queue.json"))),
            RetryPolicy::immediate(),
        );
        Self {
            dir,
            graph,
            store,
            source: Arc::new(source),
            sleeper: Arc::new(RecordingSleeper::new()),
            analyzer: None,
            accounts: vec!["main".to_string()],
            default_account: None,
        }
    }

    pub fn with_accounts(mut self, accounts: &[&str]) -> Self {
        self.accounts = accounts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_analyzer(mut self, analyzer: MockAnalyzer) -> Self {
        self.analyzer = Some(Arc::new(analyzer));
        self
    }

    pub fn queue_path(&self) -> std::path::PathBuf {
        self.dir.path().join("neo4j_sync_queue.json")
    }

    pub fn crawler(&self, config: CrawlConfig) -> Crawler {
        let deps = CrawlDeps::builder()
            .source(self.source.clone())
            .store(self.store.clone())
            .analyzer(
                self.analyzer
                    .clone()
                    .map(|a| a as Arc<dyn ContentAnalyzer>),
            )
            .sleeper(self.sleeper.clone())
            .accounts(self.accounts.clone())
            .default_account(self.default_account.clone())
            .build();
        Crawler::new(deps, config).unwrap()
    }

    pub fn flags(&self, id: i64) -> CompletionFlags {
        self.graph.entity(id).map(|e| e.flags).unwrap_or_default()
    }

    /// Entity already in the graph with the given flags.
    pub fn seed(&self, id: i64, handle: &str, flags: CompletionFlags) {
        self.graph.seed_entity(
            EntityRecord {
                id,
                username: handle.to_string(),
                ..Default::default()
            },
            flags,
        );
    }
}

/// Default crawl settings with every delay at zero.
pub fn config() -> CrawlConfig {
    CrawlConfig {
        pacing: PacingConfig::immediate(),
        ..CrawlConfig::default()
    }
}

pub fn stages(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
