use std::collections::HashSet;

use crawlgraph_common::config::{LimitsConfig, PacingConfig};
use crawlgraph_common::{CrawlGraphError, FileConfig, Stage};

/// Per-run crawl settings: `crawlgraph.toml` overlaid with CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub skip: HashSet<Stage>,
    pub force: HashSet<Stage>,
    pub limits: LimitsConfig,
    pub pacing: PacingConfig,
    /// Handles explore never crawls.
    pub skip_accounts: HashSet<String>,
    /// Account to start with instead of the default.
    pub account: Option<String>,
    /// Cap on candidates considered per explore run.
    pub candidate_limit: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

impl CrawlConfig {
    pub fn from_file(file: &FileConfig) -> Self {
        Self {
            skip: HashSet::new(),
            force: HashSet::new(),
            limits: file.limits,
            pacing: file.pacing.clone(),
            skip_accounts: file.explore.skip_accounts.clone(),
            account: None,
            candidate_limit: 100,
        }
    }

    /// Parse CLI stage names (`all`, `follower`, `post-analysis`, ...).
    pub fn parse_stages(names: &[String]) -> Result<HashSet<Stage>, CrawlGraphError> {
        let mut stages = HashSet::new();
        for name in names {
            if name == "all" {
                stages.extend(Stage::ALL);
            } else {
                stages.insert(name.parse::<Stage>()?);
            }
        }
        Ok(stages)
    }

    pub fn skip_stages(&mut self, names: &[String]) -> Result<(), CrawlGraphError> {
        self.skip.extend(Self::parse_stages(names)?);
        Ok(())
    }

    pub fn force_stages(&mut self, names: &[String]) -> Result<(), CrawlGraphError> {
        self.force.extend(Self::parse_stages(names)?);
        Ok(())
    }

    /// Apply `TYPE=N` overrides.
    pub fn apply_limits(&mut self, args: &[String]) -> Result<(), CrawlGraphError> {
        for arg in args {
            self.limits.set_from_arg(arg)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CrawlGraphError> {
        let mut conflicting: Vec<&str> = self
            .skip
            .intersection(&self.force)
            .map(|s| s.as_str())
            .collect();
        if !conflicting.is_empty() {
            conflicting.sort_unstable();
            return Err(CrawlGraphError::Config(format!(
                "stages both skipped and forced: {}",
                conflicting.join(", ")
            )));
        }
        if self.limits.batch_size == 0 {
            return Err(CrawlGraphError::Config("batch_size must be positive".into()));
        }
        Ok(())
    }
}
