//! Season close, stays and staff adjustments across a season

use crate::fixtures::TestSystem;
use ladder_room::error::{classify, ErrorKind};

async fn play(system: &TestSystem, winner: &str, loser: &str) {
    system.start_match(winner, loser).await;
    system.service().report_result(None, winner, 2).await.unwrap();
    system.service().report_result(None, loser, 1).await.unwrap();
}

#[tokio::test]
async fn test_season_close_ranks_and_resets() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.register_player("idle", None).await;
    play(&system, "alice", "bob").await;

    let season = system.app.storage().find_open_season().await.unwrap().unwrap();
    let report = system.service().admin_close_season().await.unwrap();
    assert_eq!(report.season.name, "Season 1");
    assert!(report.season.end_date.is_some());
    assert_eq!(report.ranked_users, 2);

    let storage = system.app.storage();
    let alice_record = storage
        .find_user_season_record("alice", season.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((alice_record.rating, alice_record.rank), (1520.0, Some(1)));
    let bob_record = storage
        .find_user_season_record("bob", season.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((bob_record.rating, bob_record.rank), (1480.0, Some(2)));
    assert!(storage
        .find_user_season_record("idle", season.id)
        .await
        .unwrap()
        .is_none());

    for user_id in ["alice", "bob"] {
        let user = system.user(user_id).await;
        assert_eq!(user.rating, 1500.0);
        assert_eq!(user.total_matches, 0);
        assert!(!user.latest_season_matched);
    }

    // Queueing needs a new season
    let err = system
        .service()
        .request_admission(ladder_room::types::RequestContext::new("alice"))
        .await
        .unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Conflict);
    system.service().admin_open_season("Season 2").await.unwrap();
    system.queue("alice").await;
}

#[tokio::test]
async fn test_stay_freezes_rating_for_the_close() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    play(&system, "alice", "bob").await;

    let stayed = system.service().stay("alice").await.unwrap();
    assert_eq!(stayed.stayed_rating, Some(1520.0));
    assert_eq!(stayed.rating, 1500.0);
    assert!(stayed.stay_flag);

    let err = system.service().stay("alice").await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Conflict);

    // Losing after the stay does not touch the frozen rating
    system.register_player("carol", None).await;
    play(&system, "carol", "alice").await;

    let season = system.app.storage().find_open_season().await.unwrap().unwrap();
    system.service().admin_close_season().await.unwrap();
    let record = system
        .app
        .storage()
        .find_user_season_record("alice", season.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.rating, 1520.0);
    assert_eq!(record.rank, Some(1));

    let alice = system.user("alice").await;
    assert!(!alice.stay_flag);
    assert_eq!(alice.stayed_rating, None);
}

#[tokio::test]
async fn test_stay_rejected_during_match() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    let err = system.service().stay("alice").await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_trust_restored_at_close() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    play(&system, "alice", "bob").await;

    system.service().admin_adjust_trust("bob", -45).await.unwrap();
    assert!(!system.transport.staff_alerts().is_empty());

    system.service().admin_close_season().await.unwrap();
    assert_eq!(system.user("bob").await.trust_points, 56);
    assert_eq!(system.user("alice").await.trust_points, 100);
}

#[tokio::test]
async fn test_history_filters() {
    let system = TestSystem::new().await;
    for user_id in ["alice", "bob", "carol"] {
        system.register_player(user_id, None).await;
    }
    play(&system, "alice", "bob").await;
    play(&system, "carol", "alice").await;

    let filter = ladder_room::types::HistoryFilter {
        user_id: Some("bob".to_string()),
        ..Default::default()
    };
    let bob_history = system.service().query_match_history(&filter).await.unwrap();
    assert_eq!(bob_history.len(), 1);

    let filter = ladder_room::types::HistoryFilter {
        user_id: Some("alice".to_string()),
        limit: Some(1),
        ..Default::default()
    };
    let latest = system.service().query_match_history(&filter).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].winner, "carol");
}
