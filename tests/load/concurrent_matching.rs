//! Many users at once: admissions, pairing and simultaneous reports

use crate::fixtures::TestSystem;
use futures::future::join_all;
use ladder_room::session::SubmitReceipt;
use ladder_room::types::{HistoryFilter, RequestContext};
use std::collections::HashSet;
use std::time::Instant;

#[tokio::test]
async fn test_100_concurrent_admissions() {
    let system = TestSystem::new().await;
    for i in 0..100 {
        let rating = 1400.0 + (i as f64 * 7.0) % 400.0;
        system
            .register_player(&format!("load_user_{}", i), Some(rating))
            .await;
    }

    let start_time = Instant::now();
    let results = join_all((0..100).map(|i| {
        system
            .service()
            .request_admission(RequestContext::new(format!("load_user_{}", i)))
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(system.service().pool().len(), 100);

    let report = system.matcher().tick().await.unwrap();
    assert_eq!(report.pairs_found, 50);
    assert_eq!(report.sessions_opened, 50);
    assert!(system.service().pool().is_empty());
    println!("100 admissions and one tick took {:?}", start_time.elapsed());

    let mut sessions = HashSet::new();
    for i in 0..100 {
        let session_id = system
            .service()
            .coordinator()
            .session_of(&format!("load_user_{}", i))
            .unwrap();
        sessions.insert(session_id);
    }
    assert_eq!(sessions.len(), 50);
}

#[tokio::test]
async fn test_duplicate_admissions_admit_once() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;

    let results = join_all(
        (0..10).map(|_| system.service().request_admission(RequestContext::new("alice"))),
    )
    .await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(system.service().pool().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_reports_resolve_once() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    let service = system.service().clone();
    let other = system.service().clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { service.report_result(None, "alice", 2).await }),
        tokio::spawn(async move { other.report_result(None, "bob", 0).await }),
    );
    let receipts = [a.unwrap().unwrap(), b.unwrap().unwrap()];
    let resolved = receipts
        .iter()
        .filter(|r| matches!(r, SubmitReceipt::Resolved { .. }))
        .count();
    assert_eq!(resolved, 1);

    let history = system
        .service()
        .query_match_history(&HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(system.user("alice").await.rating, 1520.0);
}

#[tokio::test]
async fn test_repeated_ticks_never_double_book() {
    let system = TestSystem::new().await;
    for i in 0..20 {
        system.register_player(&format!("user_{}", i), None).await;
        system.queue(&format!("user_{}", i)).await;
    }

    let reports = join_all((0..5).map(|_| system.matcher().tick())).await;
    let opened: usize = reports.into_iter().map(|r| r.unwrap().sessions_opened).sum();
    assert_eq!(opened, 10);
    assert_eq!(system.service().coordinator().registry().len(), 10);
}
