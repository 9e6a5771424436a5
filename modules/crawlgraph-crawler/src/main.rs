use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crawlgraph_common::config::load_config_or_default;
use crawlgraph_common::{Config, ServiceTarget};
use crawlgraph_crawler::{
    setup, ContentAnalyzer, CrawlConfig, CrawlDeps, Crawler, SocialSource,
};
use crawlgraph_graph::{migrate::migrate, GraphClient, GraphWriter, ResilientStore, RetryPolicy, SyncQueue};
use social_client::{ChatClient, SocialClient};

const STAGE_CHOICES: [&str; 6] = [
    "all",
    "follower",
    "followee",
    "post",
    "post-analysis",
    "account-analysis",
];

const TARGET_CHOICES: [&str; 5] = ["all", "accounts", "neo4j", "analyzer", "user-agent"];

#[derive(Parser)]
#[command(name = "crawlgraph", about = "Resumable social graph crawler backed by Neo4j")]
struct Cli {
    /// Source account to start with instead of the default.
    #[arg(long, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl one profile and its followers, followees and posts.
    Discover {
        handle: String,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Discover the most followed unexplored followees of a crawled profile.
    Explore {
        handle: String,
        #[arg(long, default_value_t = 5)]
        max: usize,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Configure credentials.
    Setup {
        #[arg(value_parser = TARGET_CHOICES)]
        target: String,
    },
    /// Clear credentials and configure them again.
    Reset {
        #[arg(value_parser = TARGET_CHOICES)]
        target: String,
    },
}

#[derive(Args)]
struct CrawlArgs {
    /// Stages to skip.
    #[arg(long, num_args = 1.., value_parser = STAGE_CHOICES)]
    skip: Vec<String>,

    /// Stages to re-run even when already complete.
    #[arg(long, num_args = 1.., value_parser = STAGE_CHOICES)]
    force: Vec<String>,

    /// Per-stage item limits, e.g. `--limit follower=500 post=20`.
    #[arg(long, num_args = 1.., value_name = "TYPE=VALUE")]
    limit: Vec<String>,

    /// Requests between account rotations.
    #[arg(long)]
    rate_limit: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("crawlgraph=info".parse()?)
                .add_directive("social_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let (config, credentials) = Config::from_env()?;

    match cli.command {
        Command::Setup { target } => {
            let target: ServiceTarget = target.parse()?;
            let stdin = io::stdin();
            setup::setup(target, &credentials, &config.sessions_dir(), &mut stdin.lock(), &mut io::stdout())?;
            verify_neo4j(target).await
        }
        Command::Reset { target } => {
            let target: ServiceTarget = target.parse()?;
            let stdin = io::stdin();
            setup::reset(target, &credentials, &config.sessions_dir(), &mut stdin.lock(), &mut io::stdout())?;
            verify_neo4j(target).await
        }
        Command::Discover { handle, crawl } => {
            let mut crawler = build_crawler(&config, cli.account, &crawl).await?;
            tokio::select! {
                report = crawler.discover(&handle) => {
                    let report = report?;
                    info!(handle = report.handle.as_str(), status = ?report.status, "Discover finished");
                    Ok(())
                }
                _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
            }
        }
        Command::Explore { handle, max, crawl } => {
            let mut crawler = build_crawler(&config, cli.account, &crawl).await?;
            tokio::select! {
                report = crawler.explore(&handle, max) => {
                    let report = report?;
                    info!(
                        handle = handle.as_str(),
                        steps = report.steps,
                        discovered = report.discovered.len(),
                        skipped = report.skipped.len(),
                        failed = report.failed.len(),
                        "Explore finished"
                    );
                    Ok(())
                }
                _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
            }
        }
    }
}

/// Validate everything, then connect. Invalid flags or missing credentials
/// fail before the graph or the source is touched.
async fn build_crawler(config: &Config, account: Option<String>, args: &CrawlArgs) -> Result<Crawler> {
    config.require_crawl_credentials()?;
    config.log_redacted();

    let file_config = load_config_or_default(&config.file_config_path())?;
    let mut crawl = CrawlConfig::from_file(&file_config);
    crawl.skip_stages(&args.skip)?;
    crawl.force_stages(&args.force)?;
    crawl.apply_limits(&args.limit)?;
    if let Some(every) = args.rate_limit {
        crawl.pacing.rotate_every = every;
    }
    crawl.account = account;
    crawl.validate()?;

    let client = GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
        .await
        .context("Failed to connect to Neo4j")?;
    migrate(&client).await?;

    let store = ResilientStore::new(
        Arc::new(GraphWriter::new(client)),
        Some(SyncQueue::new(config.sync_queue_path())),
        RetryPolicy::default(),
    );
    let replay = store.replay_queue().await?;
    if replay.replayed > 0 || replay.remaining > 0 {
        info!(replayed = replay.replayed, remaining = replay.remaining, "Replayed queued graph writes");
    }

    let social = SocialClient::new(
        &config.source_api_url,
        &config.source_user_agent,
        config.sessions_dir(),
    );
    let analyzer: Option<Arc<dyn ContentAnalyzer>> = if config.analyzer_enabled() {
        Some(Arc::new(ChatClient::new(
            &config.analyzer_api_key,
            &config.analyzer_api_url,
            &config.analyzer_model,
        )))
    } else {
        warn!("No analyzer API key configured; analysis stages will be skipped");
        None
    };

    let deps = CrawlDeps::builder()
        .source(Arc::new(SocialSource::new(social)))
        .store(store)
        .analyzer(analyzer)
        .accounts(config.source_accounts.clone())
        .default_account(config.default_source_account.clone())
        .build();
    Ok(Crawler::new(deps, crawl)?)
}

async fn verify_neo4j(target: ServiceTarget) -> Result<()> {
    if !target.includes(ServiceTarget::Neo4j) {
        return Ok(());
    }
    let (config, _) = Config::from_env()?;
    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await
            .context("Neo4j credentials saved but the connection failed")?;
    client
        .ping()
        .await
        .context("Neo4j credentials saved but the server rejected them")?;
    info!("Neo4j connection verified");
    Ok(())
}
