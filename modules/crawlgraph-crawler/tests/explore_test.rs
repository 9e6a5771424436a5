//! `explore`: candidate tiers, ordering, denylist and failure isolation.

mod harness;

use std::time::Duration;

use crawlgraph_common::CompletionFlags;
use crawlgraph_crawler::testing::{profile, MockSource};
use crawlgraph_crawler::{CrawlError, SourceError};

use harness::{config, Harness};

fn complete() -> CompletionFlags {
    CompletionFlags {
        profile: true,
        followers: true,
        followees: true,
        posts: true,
        posts_analysis: true,
        account_analysis: true,
    }
}

fn profile_only() -> CompletionFlags {
    CompletionFlags {
        profile: true,
        ..Default::default()
    }
}

/// `hub` follows alpha, beta and gamma. Inside the graph beta has three
/// followers, gamma two and alpha one.
fn world(candidate_flags: CompletionFlags) -> Harness {
    let source = MockSource::new()
        .with_profile(profile(10, "alpha", 0, 0, 0))
        .with_profile(profile(11, "beta", 0, 0, 0))
        .with_profile(profile(12, "gamma", 0, 0, 0));
    let h = Harness::new(source);
    h.seed(1, "hub", complete());
    h.seed(10, "alpha", candidate_flags);
    h.seed(11, "beta", candidate_flags);
    h.seed(12, "gamma", candidate_flags);
    for id in [10, 11, 12] {
        h.graph.seed_follow(1, id);
    }
    h.graph.seed_follow(20, 11);
    h.graph.seed_follow(21, 11);
    h.graph.seed_follow(20, 12);
    h
}

fn handles(report: &crawlgraph_crawler::ExploreReport) -> Vec<&str> {
    report.discovered.iter().map(|r| r.handle.as_str()).collect()
}

#[tokio::test]
async fn most_followed_candidates_go_first() {
    let h = world(CompletionFlags::default());
    let report = h.crawler(config()).explore("hub", 2).await.unwrap();

    assert_eq!(handles(&report), vec!["beta", "gamma"]);
    assert_eq!(report.steps, 2);
    assert_eq!(h.source.profile_calls(), 2);
    assert!(h.flags(11).profile);
    assert!(!h.flags(10).profile);
}

#[tokio::test]
async fn denylisted_candidate_counts_as_a_step() {
    let h = world(CompletionFlags::default());
    let mut cfg = config();
    cfg.skip_accounts.insert("beta".to_string());

    let report = h.crawler(cfg).explore("hub", 2).await.unwrap();

    assert_eq!(report.skipped, vec!["beta"]);
    assert_eq!(handles(&report), vec!["gamma"]);
    assert_eq!(report.steps, 2);
    assert_eq!(h.source.profile_calls(), 1);
}

#[tokio::test]
async fn failing_candidate_does_not_stop_the_walk() {
    let h = world(CompletionFlags::default());
    h.source
        .fail_profile("beta", SourceError::Transient("connection reset".into()));

    let report = h.crawler(config()).explore("hub", 2).await.unwrap();

    assert_eq!(report.failed, vec!["beta"]);
    assert_eq!(handles(&report), vec!["gamma", "alpha"]);
    assert_eq!(report.steps, 2);
}

#[tokio::test]
async fn falls_back_to_profiles_with_incomplete_graphs() {
    let h = world(profile_only());
    h.seed(10, "alpha", complete());

    let report = h.crawler(config()).explore("hub", 5).await.unwrap();

    assert_eq!(handles(&report), vec!["beta", "gamma"]);
    assert!(h.flags(11).followers);
}

#[tokio::test]
async fn private_candidates_are_ignored() {
    let h = world(CompletionFlags::default());
    let mut locked = h.graph.entity(11).unwrap().record;
    locked.is_private = true;
    h.graph.seed_entity(locked, CompletionFlags::default());

    let report = h.crawler(config()).explore("hub", 5).await.unwrap();
    assert_eq!(handles(&report), vec!["gamma", "alpha"]);
}

#[tokio::test]
async fn duplicate_handles_are_discovered_once() {
    let h = world(CompletionFlags::default());
    h.seed(13, "beta", CompletionFlags::default());
    h.graph.seed_follow(1, 13);

    let report = h.crawler(config()).explore("hub", 5).await.unwrap();

    assert_eq!(handles(&report), vec!["beta", "gamma", "alpha"]);
    assert_eq!(h.source.profile_calls(), 3);
}

#[tokio::test]
async fn pauses_between_targets_only() {
    let h = world(CompletionFlags::default());
    let mut cfg = config();
    cfg.pacing.explore_delay_min = 7;
    cfg.pacing.explore_delay_max = 7;

    h.crawler(cfg).explore("hub", 3).await.unwrap();
    assert_eq!(h.sleeper.count(Duration::from_secs(7)), 2);
}

#[tokio::test]
async fn nothing_left_to_explore() {
    let h = world(complete());
    let report = h.crawler(config()).explore("hub", 5).await.unwrap();
    assert_eq!(report.steps, 0);
    assert!(report.discovered.is_empty());
    assert_eq!(h.source.profile_calls(), 0);
}

#[tokio::test]
async fn unknown_target_is_an_error() {
    let h = world(CompletionFlags::default());
    let err = h.crawler(config()).explore("nobody", 5).await.unwrap_err();
    assert!(matches!(err, CrawlError::UnknownTarget(ref name) if name == "nobody"));
}
