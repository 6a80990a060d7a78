//! Shared setup for the integration and load tests

#![allow(dead_code)]

use ladder_room::config::AppConfig;
use ladder_room::service::{AppState, MatchService};
use ladder_room::transport::{MockTransport, Notice};
use ladder_room::types::{GameClass, RequestContext, SessionId, User};
use ladder_room::Matcher;
use std::sync::Arc;

/// A fully wired engine over an in-process transport
pub struct TestSystem {
    pub app: AppState,
    pub transport: Arc<MockTransport>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.amqp.enabled = false;
    config.service.health_port = 0;
    config
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Build the system and open season "Season 1"
    pub async fn with_config(config: AppConfig) -> Self {
        let transport = Arc::new(MockTransport::new());
        let app = AppState::with_transport(config, transport.clone())
            .expect("Failed to assemble test system");
        app.service()
            .admin_open_season("Season 1")
            .await
            .expect("Failed to open test season");
        Self { app, transport }
    }

    pub fn service(&self) -> &MatchService {
        self.app.service()
    }

    pub fn matcher(&self) -> &Matcher {
        self.app.matcher()
    }

    pub async fn user(&self, user_id: &str) -> User {
        self.app
            .storage()
            .find_user(user_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("user '{}' not found", user_id))
    }

    /// Register a user with classes selected, optionally at a given rating
    pub async fn register_player(&self, user_id: &str, rating: Option<f64>) -> User {
        let service = self.service();
        service
            .register_user(user_id, "", &format!("game-{}", user_id))
            .await
            .unwrap();
        let mut user = service
            .select_classes(user_id, GameClass::Swordcraft, GameClass::Havencraft)
            .await
            .unwrap();
        if let Some(rating) = rating {
            user.rating = rating;
            self.app.storage().update_user(user.clone()).await.unwrap();
        }
        user
    }

    pub async fn queue(&self, user_id: &str) {
        self.service()
            .request_admission(RequestContext::new(user_id))
            .await
            .unwrap();
    }

    /// Queue both users and run one tick; returns the session they share
    pub async fn start_match(&self, a: &str, b: &str) -> SessionId {
        self.queue(a).await;
        self.queue(b).await;
        let report = self.matcher().tick().await.unwrap();
        assert_eq!(report.sessions_opened, 1, "expected one session for {} vs {}", a, b);
        self.service().coordinator().session_of(a).unwrap()
    }

    pub fn session_notices(&self) -> Vec<Notice> {
        self.transport.session_notices()
    }

    pub fn count_session_notices(&self, label: &str) -> usize {
        self.session_notices()
            .iter()
            .filter(|notice| notice.label() == label)
            .count()
    }
}
