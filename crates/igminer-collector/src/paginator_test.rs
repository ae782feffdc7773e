use std::sync::atomic::Ordering;

use igminer_core::CollectionTarget;
use igminer_scraper::ApiError;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::sink::StorageSink;
use crate::test_support::{
    comments_page, media_page, policy, rate, session, MemoryStorage, ScriptedSource,
};

fn throttled() -> ApiError {
    ApiError::Throttled {
        status: 429,
        retry_after_secs: None,
        reason: "HTTP 429".to_owned(),
    }
}

fn cursor(c: &str) -> Option<String> {
    Some(c.to_owned())
}

#[tokio::test(start_paused = true)]
async fn follows_cursors_until_the_api_runs_dry() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Ok(media_page(&["A", "B"], Some("c1"))));
    source.push(&target, Ok(media_page(&["C"], Some("c2"))));
    source.push(&target, Ok(media_page(&["D"], None)));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.new_records, 4);
    assert_eq!(source.calls_for(&target), vec![None, cursor("c1"), cursor("c2")]);
    assert!(target.done);
    assert_eq!(target.pages_fetched, 3);
    assert_eq!(target.cursor, cursor("c2"));
    assert_eq!(storage.post_codes(), vec!["A", "B", "C", "D"]);
}

#[tokio::test(start_paused = true)]
async fn page_with_nothing_new_ends_the_target() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_recent("dali");
    source.push(&target, Ok(media_page(&["A"], Some("c1"))));
    source.push(&target, Ok(media_page(&["A"], Some("c2"))));
    source.push(&target, Ok(media_page(&["B"], Some("c3"))));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(outcome.stop, StopReason::NoNewRecords);
    assert_eq!(outcome.new_records, 1);
    assert_eq!(source.calls_for(&target).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn already_stored_pages_inside_replay_window_keep_going() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Ok(media_page(&["A"], Some("c1"))));
    source.push(&target, Ok(media_page(&["B"], Some("c2"))));
    source.push(&target, Ok(media_page(&["C"], Some("c3"))));
    source.push(&target, Ok(media_page(&["C"], Some("c4"))));
    sink.accept(normalize_records(&media_page(&["A", "B"], None).records, "dali"))
        .await
        .unwrap();

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy())
            .with_replay_window(2);
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(outcome.new_records, 1);
    assert_eq!(outcome.stop, StopReason::NoNewRecords);
    assert_eq!(
        source.calls_for(&target),
        vec![None, cursor("c1"), cursor("c2"), cursor("c3")]
    );
    assert_eq!(storage.post_codes(), vec!["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn page_cap_is_enforced_per_kind() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::post_comments("CxR2a4Nv3");
    for (i, id) in ["1", "2", "3", "4"].iter().enumerate() {
        let next = format!("m{i}");
        source.push(&target, Ok(comments_page(&[id], Some(&next))));
    }

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(outcome.stop, StopReason::PageCap);
    assert_eq!(outcome.pages, policy().max_pages_comments);
    assert_eq!(outcome.new_records, 3);
}

#[tokio::test(start_paused = true)]
async fn pages_are_paced_but_the_first_request_is_immediate() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Ok(media_page(&["A"], Some("c1"))));
    source.push(&target, Ok(media_page(&["B"], None)));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());

    let start = tokio::time::Instant::now();
    paginator.step(&mut target, &mut session).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(1));

    let second = tokio::time::Instant::now();
    paginator.step(&mut target, &mut session).await.unwrap();
    let gap = second.elapsed();
    assert!(gap >= Duration::from_millis(1_500) && gap <= Duration::from_millis(3_000), "{gap:?}");
}

#[tokio::test(start_paused = true)]
async fn throttle_retries_the_same_cursor_after_backing_off() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    target.advance(Some("c1".to_owned()));
    source.push(&target, Err(throttled()));
    source.push(&target, Ok(media_page(&["A"], None)));

    let mut rate = rate();
    let mut session = session();
    let start = tokio::time::Instant::now();
    {
        let mut paginator =
            Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
        let report = paginator.step(&mut target, &mut session).await.unwrap();
        assert!(report.page_fetched);
        assert_eq!(report.new_records, 1);
    }

    assert_eq!(source.calls_for(&target), vec![cursor("c1"), cursor("c1")]);
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert_eq!(rate.state().consecutive_throttles, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_after_header_extends_the_backoff() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(
        &target,
        Err(ApiError::Throttled {
            status: 429,
            retry_after_secs: Some(600),
            reason: "HTTP 429".to_owned(),
        }),
    );
    source.push(&target, Ok(media_page(&["A"], None)));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let start = tokio::time::Instant::now();
    paginator.run(&mut target, &mut session).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn throttle_budget_exhaustion_fails_the_target() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    for _ in 0..10 {
        source.push(&target, Err(throttled()));
    }

    let mut rate = rate();
    let budget = rate.limits().max_throttle_retries;
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert!(matches!(outcome.stop, StopReason::Failed(_)));
    assert!(target.done);
    assert_eq!(source.calls_for(&target).len(), budget as usize + 1);
}

#[tokio::test(start_paused = true)]
async fn escalation_decays_after_enough_successes() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Err(throttled()));
    source.push(&target, Err(throttled()));
    for i in 0..5 {
        let code = format!("P{i}");
        let next = format!("c{i}");
        source.push(&target, Ok(media_page(&[code.as_str()], Some(&next))));
    }

    let mut rate = rate();
    let mut session = session();
    {
        let mut paginator =
            Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
        paginator.step(&mut target, &mut session).await.unwrap();
    }
    assert_eq!(rate.state().consecutive_throttles, 2);
    assert_eq!(rate.state().current_delay_range, limits_page().scaled(4));

    {
        let mut paginator =
            Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
        for _ in 0..4 {
            paginator.step(&mut target, &mut session).await.unwrap();
        }
    }
    assert_eq!(rate.state().consecutive_throttles, 0);
    assert_eq!(rate.state().current_delay_range, limits_page());
}

fn limits_page() -> igminer_core::DelayRange {
    crate::test_support::limits().page_delay
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_invalidates_session_and_keeps_cursor() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Ok(media_page(&["A"], Some("c1"))));
    source.push(
        &target,
        Err(ApiError::AuthExpired {
            reason: "login_required".to_owned(),
        }),
    );

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(outcome.stop, StopReason::AuthExpired("login_required".to_owned()));
    assert!(!session.is_valid());
    assert!(!target.done);
    assert_eq!(target.cursor, cursor("c1"));
    assert_eq!(target.pages_fetched, 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_session_stops_before_any_request() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");

    let mut rate = rate();
    let mut session = session();
    session.invalidate("checkpoint_required");
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let report = paginator.step(&mut target, &mut session).await.unwrap();

    assert!(matches!(report.stop, Some(StopReason::AuthExpired(_))));
    assert!(source.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_with_backoff() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    let unavailable = || ApiError::UnexpectedStatus {
        status: 503,
        url: "https://example.test".to_owned(),
    };
    source.push(&target, Err(unavailable()));
    source.push(&target, Err(unavailable()));
    source.push(&target, Ok(media_page(&["A"], None)));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(outcome.stop, StopReason::Exhausted);
    assert_eq!(outcome.new_records, 1);
    assert_eq!(source.calls_for(&target).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_page_fails_the_target_without_aborting() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(
        &target,
        Err(ApiError::NotJson {
            url: "https://example.test".to_owned(),
            content_type: "text/html".to_owned(),
        }),
    );

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let outcome = paginator.run(&mut target, &mut session).await.unwrap();

    assert!(matches!(outcome.stop, StopReason::Failed(_)));
    assert!(target.done);
    assert_eq!(source.calls_for(&target).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_honoured_at_the_page_boundary() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Ok(media_page(&["A"], Some("c1"))));

    let cancel = CancellationToken::new();
    let mut rate = rate();
    let mut session = session();
    let mut paginator = Paginator::new(&source, &sink, &mut rate, cancel.clone(), policy());

    let first = paginator.step(&mut target, &mut session).await.unwrap();
    assert!(first.page_fetched);
    cancel.cancel();
    let second = paginator.step(&mut target, &mut session).await.unwrap();

    assert_eq!(second.stop, Some(StopReason::Cancelled));
    assert_eq!(source.calls_for(&target).len(), 1);
    assert!(!target.done);
    assert_eq!(target.cursor, cursor("c1"));
}

#[tokio::test(start_paused = true)]
async fn storage_failure_propagates_and_leaves_cursor_in_place() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    storage.fail_writes.store(true, Ordering::SeqCst);
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    source.push(&target, Ok(media_page(&["A"], Some("c1"))));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    let result = paginator.step(&mut target, &mut session).await;

    assert!(result.is_err());
    assert_eq!(target.pages_fetched, 0);
    assert!(target.cursor.is_none());
}

#[tokio::test(start_paused = true)]
async fn resumed_target_starts_from_its_saved_cursor() {
    let source = ScriptedSource::default();
    let storage = MemoryStorage::default();
    let sink = StorageSink::new(&storage);
    let mut target = CollectionTarget::hashtag_top("dali");
    target.advance(Some("c7".to_owned()));
    source.push(&target, Ok(media_page(&["Z"], None)));

    let mut rate = rate();
    let mut session = session();
    let mut paginator =
        Paginator::new(&source, &sink, &mut rate, CancellationToken::new(), policy());
    paginator.run(&mut target, &mut session).await.unwrap();

    assert_eq!(source.calls_for(&target), vec![cursor("c7")]);
    assert_eq!(target.pages_fetched, 2);
}

#[test]
fn scrape_cap_overrides_only_hashtag_kinds() {
    let capped = policy().with_hashtag_cap(2);
    assert_eq!(capped.page_cap(TargetKind::HashtagTop), 2);
    assert_eq!(capped.page_cap(TargetKind::HashtagRecent), 2);
    assert_eq!(capped.page_cap(TargetKind::PostComments), 3);
    assert_eq!(capped.page_cap(TargetKind::UserProfile), 1);
}
