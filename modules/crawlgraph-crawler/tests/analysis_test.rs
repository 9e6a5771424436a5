//! Posts ingestion followed by post and account analysis.

mod harness;

use std::collections::HashSet;

use crawlgraph_common::{DataType, Stage};
use crawlgraph_crawler::testing::{comment, post, profile, users, MockAnalyzer, MockSource};
use crawlgraph_crawler::StageOutcome;

use harness::{config, stages, Harness};

fn source() -> MockSource {
    let mut first = comment(500, 7, "nice shot");
    first.answers.push(comment(501, 8, "agreed"));
    first.likers = users([9]);
    MockSource::new()
        .with_profile(profile(1, "ada", 0, 0, 2))
        .with_posts(1, vec![post(100, 1), post(101, 1)])
        .with_comments(100, vec![first])
        .with_likers(100, users([7, 8]))
}

#[tokio::test]
async fn posts_are_ingested_and_analyzed() {
    let h = Harness::new(source()).with_analyzer(MockAnalyzer::new());

    let report = h.crawler(config()).discover("ada").await.unwrap();

    assert_eq!(report.outcome(Stage::Posts), Some(&StageOutcome::Completed));
    assert_eq!(report.outcome(Stage::PostsAnalysis), Some(&StageOutcome::Completed));
    assert_eq!(report.outcome(Stage::AccountAnalysis), Some(&StageOutcome::Completed));

    assert_eq!(h.graph.post_count(), 2);
    assert_eq!(h.graph.post_likers(100), HashSet::from([7, 8]));
    assert_eq!(h.graph.comment_likers(500), HashSet::from([9]));
    assert!(h.graph.entity(8).is_some(), "reply author stored");

    let analyzed = h.graph.post(100).unwrap();
    assert!(analyzed.image_analysis.contains("image at https://cdn.example/100.jpg"));
    assert!(analyzed.post_analysis.contains("mock analysis"));
    assert!(h.graph.entity(1).unwrap().record.account_analysis.contains("mock analysis"));

    let analyzer = h.analyzer.as_ref().unwrap();
    assert_eq!(analyzer.image_calls(), 2);
    let prompts = analyzer.text_prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("nice shot"));
    assert!(prompts[0].contains("agreed"));
    assert!(prompts[2].starts_with("Profile metadata"));

    let flags = h.flags(1);
    assert!(flags.posts && flags.posts_analysis && flags.account_analysis);
    assert_eq!(h.graph.cursor(1, DataType::Posts), None);
}

#[tokio::test]
async fn quota_leaves_analysis_incomplete_until_next_run() {
    let h = Harness::new(source()).with_analyzer(MockAnalyzer::new().quota_after(2));

    let report = h.crawler(config()).discover("ada").await.unwrap();

    assert_eq!(report.outcome(Stage::PostsAnalysis), Some(&StageOutcome::QuotaExceeded));
    assert_eq!(report.outcome(Stage::AccountAnalysis), Some(&StageOutcome::QuotaExceeded));
    assert!(!h.flags(1).posts_analysis);
    assert!(!h.flags(1).account_analysis);
    assert!(!h.graph.post(100).unwrap().post_analysis.is_empty());
    assert!(h.graph.post(101).unwrap().post_analysis.is_empty());

    let analyzer = h.analyzer.clone().unwrap();
    analyzer.lift_quota();
    let rerun = h.crawler(config()).discover("ada").await.unwrap();

    assert_eq!(rerun.outcome(Stage::Posts), Some(&StageOutcome::Skipped));
    assert_eq!(rerun.outcome(Stage::PostsAnalysis), Some(&StageOutcome::Completed));
    assert_eq!(rerun.outcome(Stage::AccountAnalysis), Some(&StageOutcome::Completed));
    assert_eq!(analyzer.image_calls(), 2, "analyzed posts are not sent again");
    assert!(h.flags(1).account_analysis);
}

#[tokio::test]
async fn analysis_is_skipped_without_an_analyzer() {
    let h = Harness::new(source());

    let report = h.crawler(config()).discover("ada").await.unwrap();

    assert_eq!(report.outcome(Stage::Posts), Some(&StageOutcome::Completed));
    assert_eq!(report.outcome(Stage::PostsAnalysis), Some(&StageOutcome::Skipped));
    assert_eq!(report.outcome(Stage::AccountAnalysis), Some(&StageOutcome::Skipped));
    assert!(!h.flags(1).posts_analysis);
    assert!(h.graph.post(100).unwrap().post_analysis.is_empty());
}

#[tokio::test]
async fn post_limit_truncates_the_stage_and_the_next_run_continues() {
    let h = Harness::new(source());
    let mut cfg = config();
    cfg.apply_limits(&stages(&["post=1"])).unwrap();

    let report = h.crawler(cfg.clone()).discover("ada").await.unwrap();
    assert_eq!(report.outcome(Stage::Posts), Some(&StageOutcome::Truncated));
    assert_eq!(h.graph.post_count(), 1);
    assert!(!h.flags(1).posts);

    let report = h.crawler(cfg.clone()).discover("ada").await.unwrap();
    assert_eq!(report.outcome(Stage::Posts), Some(&StageOutcome::Truncated));
    assert!(h.graph.post(101).is_some(), "second run picks up the next post");
    assert_eq!(h.graph.post_count(), 2);

    let report = h.crawler(cfg).discover("ada").await.unwrap();
    assert_eq!(report.outcome(Stage::Posts), Some(&StageOutcome::Completed));
    assert!(h.flags(1).posts);
    assert_eq!(h.graph.cursor(1, DataType::Posts), None);
}

#[tokio::test]
async fn new_posts_invalidate_earlier_analysis() {
    let mut h = Harness::new(source()).with_analyzer(MockAnalyzer::new());
    h.crawler(config()).discover("ada").await.unwrap();
    assert!(h.flags(1).account_analysis);

    h.analyzer = None;
    let mut forced = config();
    forced.force_stages(&stages(&["post"])).unwrap();
    h.crawler(forced).discover("ada").await.unwrap();

    let flags = h.flags(1);
    assert!(flags.posts);
    assert!(!flags.posts_analysis);
    assert!(!flags.account_analysis);
    assert!(
        !h.graph.post(100).unwrap().post_analysis.is_empty(),
        "stored analysis survives re-ingestion"
    );
}
