//! Cursor persistence of `ResumablePaginator` across simulated restarts.

mod harness;

use std::collections::BTreeSet;

use crawlgraph_common::{CompletionFlags, DataType, RawProfile, RawUser, ResumeCursor};
use crawlgraph_crawler::testing::{profile, users, MockSource};
use crawlgraph_crawler::{PaginatorError, ResumablePaginator, SourceApi, SourceError};

use harness::Harness;

fn hub() -> RawProfile {
    profile(1, "hub", 100, 0, 0)
}

fn harness() -> Harness {
    let h = Harness::new(
        MockSource::new()
            .page_size(10)
            .with_followers(1, users(1000..1100)),
    );
    h.seed(1, "hub", CompletionFlags::default());
    h
}

async fn open(h: &Harness) -> ResumablePaginator<RawUser> {
    let p = hub();
    ResumablePaginator::open(h.source.followers(&p), h.store.clone(), p.user_id, DataType::Followers)
        .await
        .unwrap()
}

async fn take(pager: &mut ResumablePaginator<RawUser>, n: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    for _ in 0..n {
        ids.push(pager.next().await.unwrap().unwrap().id);
    }
    ids
}

async fn drain(pager: &mut ResumablePaginator<RawUser>) -> Vec<i64> {
    let mut ids = Vec::new();
    while let Some(user) = pager.next().await.unwrap() {
        ids.push(user.id);
    }
    ids
}

fn stored(h: &Harness) -> Option<ResumeCursor> {
    h.graph
        .cursor(1, DataType::Followers)
        .map(|raw| ResumeCursor::from_json(&raw).unwrap())
}

#[tokio::test]
async fn resume_mid_page_yields_every_remaining_item() {
    let h = harness();
    let mut first = open(&h).await;
    let seen = take(&mut first, 35).await;
    first.commit().await.unwrap();
    drop(first);

    let mut second = open(&h).await;
    assert!(second.is_resumed());
    assert_eq!(second.initial_count(), 35);
    let rest = drain(&mut second).await;

    assert_eq!(rest, (1035..1100).collect::<Vec<_>>());
    let all: BTreeSet<i64> = seen.into_iter().chain(rest).collect();
    assert_eq!(all, (1000..1100).collect::<BTreeSet<_>>());
    assert_eq!(second.total_index(), 100);
    assert_eq!(h.graph.cursor(1, DataType::Followers), None);
}

#[tokio::test]
async fn resume_at_page_boundary_has_no_overlap() {
    let h = harness();
    let mut first = open(&h).await;
    let seen = take(&mut first, 30).await;
    first.commit().await.unwrap();
    assert_eq!(stored(&h), Some(ResumeCursor::new("off:30", 30)));
    drop(first);

    let mut second = open(&h).await;
    let rest = drain(&mut second).await;
    assert_eq!(seen.len() + rest.len(), 100);
    assert_eq!(rest.first(), Some(&1030));
}

#[tokio::test]
async fn uncommitted_progress_is_never_stored() {
    let h = harness();
    let mut pager = open(&h).await;
    take(&mut pager, 35).await;
    assert_eq!(h.graph.cursor(1, DataType::Followers), None);
    drop(pager);

    let mut again = open(&h).await;
    assert!(!again.is_resumed());
    assert_eq!(drain(&mut again).await.len(), 100);
}

#[tokio::test]
async fn progress_inside_the_first_page_is_resumable() {
    let h = harness();
    let mut pager = open(&h).await;
    take(&mut pager, 4).await;
    pager.commit().await.unwrap();
    assert_eq!(
        stored(&h),
        Some(ResumeCursor::within_page(ResumeCursor::FIRST_PAGE, 4, 4))
    );
    drop(pager);

    let mut second = open(&h).await;
    assert!(second.is_resumed());
    assert_eq!(take(&mut second, 3).await, vec![1004, 1005, 1006]);
    second.commit().await.unwrap();
    drop(second);

    let mut third = open(&h).await;
    assert_eq!(drain(&mut third).await, (1007..1100).collect::<Vec<_>>());
}

#[tokio::test]
async fn malformed_cursor_is_discarded() {
    for raw in ["{not json", r#"{"followers": "QVFE"}"#, r#"{"end_cursor": "", "count": 3}"#] {
        let h = harness();
        h.graph.seed_cursor(1, DataType::Followers, raw);

        let mut pager = open(&h).await;
        assert!(!pager.is_resumed(), "{raw}");
        assert_eq!(h.graph.cursor(1, DataType::Followers), None);
        assert_eq!(drain(&mut pager).await.len(), 100);
    }
}

#[tokio::test]
async fn cursor_rejected_by_source_is_cleared() {
    let h = harness();
    h.graph
        .seed_cursor(1, DataType::Followers, &ResumeCursor::new("bogus", 5).to_json());

    let mut pager = open(&h).await;
    assert!(pager.is_resumed());
    let err = pager.next().await.unwrap_err();
    assert!(matches!(
        err,
        PaginatorError::Source(SourceError::InvalidCursor(_))
    ));
    assert_eq!(h.graph.cursor(1, DataType::Followers), None);
    pager.commit().await.unwrap();
    assert_eq!(h.graph.cursor(1, DataType::Followers), None, "rejected cursor stays gone");

    let mut fresh = open(&h).await;
    assert!(!fresh.is_resumed());
    assert_eq!(drain(&mut fresh).await.len(), 100);
}

#[tokio::test]
async fn fetch_error_keeps_last_commit() {
    let h = harness();
    h.source
        .fail_page(DataType::Followers, 2, SourceError::Transient("timeout".into()), 1);
    let mut pager = open(&h).await;
    take(&mut pager, 15).await;
    pager.commit().await.unwrap();
    take(&mut pager, 5).await;

    assert!(matches!(
        pager.next().await,
        Err(PaginatorError::Source(SourceError::Transient(_)))
    ));
    assert_eq!(stored(&h), Some(ResumeCursor::within_page("off:10", 15, 5)));

    let mut retry = open(&h).await;
    assert_eq!(drain(&mut retry).await, (1015..1100).collect::<Vec<_>>());
}

#[tokio::test]
async fn exhaustion_clears_the_cursor_for_good() {
    let h = harness();
    let mut pager = open(&h).await;
    take(&mut pager, 50).await;
    pager.commit().await.unwrap();
    assert!(stored(&h).is_some());

    drain(&mut pager).await;
    assert_eq!(stored(&h), None);
    pager.commit().await.unwrap();
    assert_eq!(stored(&h), None);
}
