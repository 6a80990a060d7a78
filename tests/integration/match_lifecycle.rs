//! Admission to resolution, through every way a session can end

use crate::fixtures::TestSystem;
use ladder_room::error::{classify, ErrorKind};
use ladder_room::service::{Command, CommandReply};
use ladder_room::session::{CancellationDecision, SubmitReceipt};
use ladder_room::transport::Notice;
use ladder_room::types::HistoryFilter;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_complete_match_workflow() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;

    let session_id = system.start_match("alice", "bob").await;
    assert!(system.transport.has_role("alice", "in-match"));
    assert!(system.transport.has_role("bob", "in-match"));
    assert_eq!(system.count_session_notices("match_ready"), 1);

    let first = assert_ok!(
        system
            .service()
            .report_result(Some(session_id), "alice", 2)
            .await
    );
    assert_eq!(first, SubmitReceipt::AwaitingOpponent);

    let second = assert_ok!(system.service().report_result(None, "bob", 1).await);
    let SubmitReceipt::Resolved { winner, loser, .. } = second else {
        panic!("expected a resolution, got {:?}", second);
    };
    assert_eq!((winner.as_str(), loser.as_str()), ("alice", "bob"));

    let alice = system.user("alice").await;
    let bob = system.user("bob").await;
    assert_eq!(alice.rating, 1520.0);
    assert_eq!(bob.rating, 1480.0);
    assert_eq!((alice.win_streak, alice.max_win_streak), (1, 1));
    assert_eq!((bob.win_streak, bob.loss_count), (0, 1));
    assert!(alice.latest_season_matched && bob.latest_season_matched);

    let history = system
        .service()
        .query_match_history(&HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].season_name.as_deref(), Some("Season 1"));

    assert!(!system.transport.has_role("alice", "in-match"));
    assert!(system.service().coordinator().session_of("alice").is_err());
    assert_eq!(system.count_session_notices("match_resolved"), 1);
}

#[tokio::test]
async fn test_rating_gap_changes_deltas() {
    let system = TestSystem::new().await;
    system.register_player("favorite", Some(1600.0)).await;
    system.register_player("underdog", Some(1500.0)).await;

    system.start_match("favorite", "underdog").await;
    system.service().report_result(None, "favorite", 2).await.unwrap();
    system.service().report_result(None, "underdog", 0).await.unwrap();

    assert_eq!(system.user("favorite").await.rating, 1617.5);
    assert_eq!(system.user("underdog").await.rating, 1482.5);
}

#[tokio::test]
async fn test_disagreement_clears_both_reports() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    system.service().report_result(None, "alice", 1).await.unwrap();
    let receipt = system.service().report_result(None, "bob", 1).await.unwrap();
    assert_eq!(receipt, SubmitReceipt::ResultsCleared);
    assert_eq!(system.count_session_notices("results_mismatch"), 1);

    system.service().report_result(None, "alice", 2).await.unwrap();
    let receipt = system.service().report_result(None, "bob", 1).await.unwrap();
    assert!(matches!(receipt, SubmitReceipt::Resolved { .. }));
}

#[tokio::test]
async fn test_invalid_and_duplicate_reports_rejected() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.register_player("mallory", None).await;
    let session_id = system.start_match("alice", "bob").await;

    let err = assert_err!(system.service().report_result(None, "alice", 3).await);
    assert_eq!(classify(&err), ErrorKind::Validation);

    system.service().report_result(None, "alice", 2).await.unwrap();
    let err = system.service().report_result(None, "alice", 2).await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Conflict);

    let err = system
        .service()
        .report_result(Some(session_id), "mallory", 2)
        .await
        .unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Validation);

    system.service().withdraw_result(None, "alice").await.unwrap();
    system.service().report_result(None, "alice", 1).await.unwrap();
    let receipt = system.service().report_result(None, "bob", 2).await.unwrap();
    let SubmitReceipt::Resolved { winner, .. } = receipt else {
        panic!("expected a resolution");
    };
    assert_eq!(winner, "bob");
}

#[tokio::test(start_paused = true)]
async fn test_result_timeout_awards_reporter() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    system.service().report_result(None, "bob", 2).await.unwrap();
    tokio::time::sleep(system.app.config().result_timeout() + Duration::from_secs(1)).await;
    for _ in 0..10 {
        if system.count_session_notices("match_resolved") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let timeouts: Vec<Notice> = system
        .session_notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::TimeoutDefaulted { .. }))
        .collect();
    assert_eq!(
        timeouts,
        vec![Notice::TimeoutDefaulted {
            winner: "bob".to_string(),
            loser: "alice".to_string(),
        }]
    );
    assert_eq!(system.user("bob").await.rating, 1520.0);
    assert_eq!(system.user("alice").await.rating, 1480.0);
}

#[tokio::test(start_paused = true)]
async fn test_withdrawal_disarms_timeout() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    system.service().report_result(None, "bob", 2).await.unwrap();
    system.service().withdraw_result(None, "bob").await.unwrap();
    tokio::time::sleep(system.app.config().result_timeout() * 2).await;

    assert_eq!(system.count_session_notices("match_resolved"), 0);
    assert!(system.service().coordinator().session_of("bob").is_ok());
    assert_eq!(system.user("bob").await.rating, 1500.0);
}

#[tokio::test]
async fn test_cancellation_accepted() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    system.service().request_cancellation(None, "alice").await.unwrap();
    let err = system.service().report_result(None, "bob", 2).await.unwrap_err();
    assert_eq!(classify(&err), ErrorKind::Conflict);

    let decision = system
        .service()
        .respond_cancellation(None, "bob", true)
        .await
        .unwrap();
    assert_eq!(decision, CancellationDecision::Accepted);

    let alice = system.user("alice").await;
    assert_eq!(alice.rating, 1500.0);
    assert_eq!(alice.cancelled_matches_count, 1);
    assert!(system.service().coordinator().session_of("alice").is_err());
    let history = system
        .service()
        .query_match_history(&HistoryFilter::default())
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_cancellation_refused_escalates() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    system.service().request_cancellation(None, "alice").await.unwrap();
    let decision = system
        .service()
        .respond_cancellation(None, "bob", false)
        .await
        .unwrap();
    assert_eq!(decision, CancellationDecision::Escalated);
    assert!(system
        .transport
        .staff_alerts()
        .iter()
        .any(|n| matches!(n, Notice::CancellationEscalated { .. })));
    assert!(system.service().coordinator().session_of("alice").is_err());
}

#[tokio::test]
async fn test_dispute_and_staff_result() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    system.service().report_dispute(None, "bob").await.unwrap();
    assert!(system
        .transport
        .staff_alerts()
        .iter()
        .any(|n| matches!(n, Notice::DisputeReported { .. })));

    let resolution = system
        .service()
        .admin_set_result("bob", 2, "alice", 0)
        .await
        .unwrap();
    assert_eq!(resolution.record.winner, "bob");
    assert_eq!(system.user("bob").await.rating, 1520.0);
}

#[tokio::test]
async fn test_staff_cancel_releases_players() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    let session_id = system.start_match("alice", "bob").await;

    system.service().admin_cancel_session(session_id).await.unwrap();
    assert_eq!(system.count_session_notices("cancelled_by_staff"), 1);

    // Both can queue again immediately
    system.queue("alice").await;
    system.queue("bob").await;
    assert_eq!(system.service().pool().len(), 2);
}

#[tokio::test]
async fn test_rematch_needs_a_third_player() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;
    system.service().report_result(None, "alice", 2).await.unwrap();
    system.service().report_result(None, "bob", 0).await.unwrap();

    system.queue("alice").await;
    system.queue("bob").await;
    let report = system.matcher().tick().await.unwrap();
    assert_eq!(report.pairs_found, 0);

    system.register_player("carol", None).await;
    system.queue("carol").await;
    let report = system.matcher().tick().await.unwrap();
    assert_eq!(report.sessions_opened, 1);
    assert_eq!(system.service().pool().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_user_expires_from_pool() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.queue("alice").await;

    tokio::time::sleep(system.app.config().pool_timeout() + Duration::from_secs(1)).await;
    for _ in 0..10 {
        if system.service().pool().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(system.service().pool().is_empty());
    assert!(system
        .transport
        .replies_to("alice")
        .contains(&Notice::NoOpponentFound));
}

#[tokio::test]
async fn test_commands_through_dispatch() {
    let system = TestSystem::new().await;
    let service = system.service();

    let reply = service
        .dispatch(Command::RegisterUser {
            user_id: "dave".to_string(),
            display_name: "Dave".to_string(),
            game_id: "g-dave".to_string(),
        })
        .await;
    assert!(reply.is_ok());

    // No classes selected yet
    let reply = service
        .dispatch(Command::RequestAdmission {
            user_id: "dave".to_string(),
            correlation_id: Some("corr-1".to_string()),
        })
        .await;
    assert!(matches!(
        reply,
        CommandReply::Rejected {
            kind: ErrorKind::Validation,
            ..
        }
    ));

    let reply = service
        .dispatch(Command::RegisterUser {
            user_id: "erin".to_string(),
            display_name: String::new(),
            game_id: "g-dave".to_string(),
        })
        .await;
    assert!(matches!(
        reply,
        CommandReply::Rejected {
            kind: ErrorKind::Conflict,
            ..
        }
    ));
    assert!(system.app.storage().find_user("erin").await.unwrap().is_none());
}

#[tokio::test]
async fn test_classes_locked_during_match() {
    let system = TestSystem::new().await;
    system.register_player("alice", None).await;
    system.register_player("bob", None).await;
    system.start_match("alice", "bob").await;

    let err = assert_err!(
        system
            .service()
            .select_classes(
                "alice",
                ladder_room::types::GameClass::Portalcraft,
                ladder_room::types::GameClass::Forestcraft,
            )
            .await
    );
    assert_eq!(classify(&err), ErrorKind::Conflict);
}
