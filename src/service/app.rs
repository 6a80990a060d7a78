//! Application wiring, background loops and graceful shutdown

use crate::amqp::{AmqpConfig, AmqpConnection, AmqpTransport, CommandConsumer};
use crate::config::AppConfig;
use crate::history::HistoryRecorder;
use crate::matcher::Matcher;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::pool::WaitingPool;
use crate::rating::{RatingModel, StandardRatingModel};
use crate::season::{RosterLock, SeasonLifecycle};
use crate::service::engine::MatchService;
use crate::service::health::{HealthCheck, HealthContext};
use crate::session::{SessionCoordinator, SessionRegistry, SessionTimings};
use crate::storage::{InMemoryStorage, Storage};
use crate::transport::{MockTransport, Transport, TransportGate};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Everything the running service owns
pub struct AppState {
    config: AppConfig,
    storage: Arc<dyn Storage>,
    metrics: Arc<MetricsCollector>,
    pool: WaitingPool,
    coordinator: SessionCoordinator,
    matcher: Matcher,
    service: MatchService,
    amqp_connection: Option<Arc<AmqpConnection>>,
    health_server: Arc<HealthServer>,
    health_context: Arc<HealthContext>,
    command_consumer: Option<CommandConsumer>,
    background_tasks: Vec<JoinHandle<()>>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Connect to the broker when enabled, otherwise log notices in-process
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!(
            "Initializing ladder-room - service: {}, amqp_enabled: {}",
            config.service.name, config.amqp.enabled
        );

        if !config.amqp.enabled {
            info!("Broker disabled, notices are logged in-process");
            let transport = Arc::new(MockTransport::new().with_logging());
            return Self::assemble(config, transport, None);
        }

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Invalid AMQP settings: {}", e),
            })?;
        info!(
            "Connecting to AMQP broker - host: '{}', port: {}",
            amqp_config.host, amqp_config.port
        );
        let connection = AmqpConnection::new(amqp_config)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;
        let transport = AmqpTransport::new(channel, &config.amqp.transport_exchange)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize transport: {}", e),
            })?;

        Self::assemble(config, Arc::new(transport), Some(Arc::new(connection)))
    }

    /// Wire the engine around an existing transport
    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ServiceError> {
        Self::assemble(config, transport, None)
    }

    fn assemble(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let model: Arc<dyn RatingModel> =
            Arc::new(StandardRatingModel::new(config.rating.clone()));
        let initial_rating = model.initial_rating();

        let gate = Arc::new(TransportGate::new(
            transport,
            config.transport.clone(),
            metrics.clone(),
        ));
        let pool = WaitingPool::new(gate.clone(), metrics.clone(), config.pool_timeout());
        let registry = Arc::new(SessionRegistry::new());
        let roster = Arc::new(RosterLock::new());
        let recorder = Arc::new(HistoryRecorder::new(storage.clone(), model, roster.clone()));
        let coordinator = SessionCoordinator::new(
            registry.clone(),
            pool.clone(),
            gate.clone(),
            recorder.clone(),
            metrics.clone(),
            SessionTimings {
                result_timeout: config.result_timeout(),
                cancellation_timeout: config.cancellation_timeout(),
                teardown_delay: config.teardown_delay(),
                in_match_role: config.matchmaking.in_match_role.clone(),
            },
        );
        let seasons = Arc::new(SeasonLifecycle::new(
            storage.clone(),
            roster,
            initial_rating,
            config.matchmaking.trust_points_cap,
        ));
        let matcher = Matcher::new(
            pool.clone(),
            coordinator.clone(),
            storage.clone(),
            gate.clone(),
            metrics.clone(),
            config.matchmaking.max_rating_difference,
            config.matchmaking.in_match_role.clone(),
        );
        let service = MatchService::new(
            storage.clone(),
            pool.clone(),
            coordinator.clone(),
            recorder,
            seasons,
            gate.clone(),
            metrics.clone(),
            config.matchmaking.clone(),
            initial_rating,
        );

        let is_running = Arc::new(RwLock::new(false));
        let health_context = Arc::new(HealthContext {
            service_name: config.service.name.clone(),
            is_running: is_running.clone(),
            pool: pool.clone(),
            registry,
            gate,
            transport_limit: config.transport.max_in_flight,
            amqp: amqp_connection.clone(),
            started_at: Instant::now(),
        });
        let health_server = Arc::new(
            HealthServer::new(
                HealthServerConfig {
                    port: config.service.health_port,
                    host: "0.0.0.0".to_string(),
                },
                metrics.clone(),
            )
            .with_context(health_context.clone()),
        );

        Ok(Self {
            config,
            storage,
            metrics,
            pool,
            coordinator,
            matcher,
            service,
            amqp_connection,
            health_server,
            health_context,
            command_consumer: None,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the health server, command consumer and background loops
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting ladder-room service");
        *self.is_running.write().await = true;

        self.start_health_server();
        self.start_command_consumption().await?;
        self.start_background_tasks();

        info!("✅ ladder-room service started");
        Ok(())
    }

    /// Stop intake, abort timers and loops, stop the HTTP server
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of ladder-room");
        *self.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.take() {
            match consumer.stop_consuming().await {
                Ok(()) => info!("✅ Command consumption stopped"),
                Err(e) => warn!("Failed to stop command consumer: {}", e),
            }
        }

        self.stop_background_tasks();

        let pool_result = self.pool.shutdown();
        let session_result = self.coordinator.shutdown();
        self.health_server.stop();

        if let Some(connection) = &self.amqp_connection {
            match connection.close().await {
                Ok(()) => info!("✅ AMQP connection closed"),
                Err(e) => warn!("Failed to close AMQP connection: {}", e),
            }
        }

        pool_result.map_err(|e| ServiceError::BackgroundTask {
            message: format!("Failed to stop waiting pool: {}", e),
        })?;
        session_result.map_err(|e| ServiceError::BackgroundTask {
            message: format!("Failed to stop session timers: {}", e),
        })?;

        info!("✅ ladder-room shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn service(&self) -> &MatchService {
        &self.service
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub async fn health(&self) -> anyhow::Result<HealthCheck> {
        HealthCheck::check(&self.health_context).await
    }

    fn start_health_server(&mut self) {
        let server = self.health_server.clone();
        let port = self.config.service.health_port;
        self.background_tasks.push(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {:#}", e);
            }
        }));
        info!("Health and metrics endpoints starting on port {}", port);
    }

    async fn start_command_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("Broker disabled, command consumption skipped");
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;
        let consumer = CommandConsumer::new(self.service.clone(), channel);
        consumer
            .start_consuming(&self.config.amqp.command_queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let tick_interval = self.config.tick_interval();
        info!(
            "Starting matcher loop - interval: {}s",
            tick_interval.as_secs()
        );
        let matcher_task = {
            let matcher = self.matcher.clone();
            let is_running = self.is_running.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                while *is_running.read().await {
                    interval.tick().await;
                    match matcher.tick().await {
                        Ok(report) if report.pairs_found > 0 => info!(
                            "Matcher tick - pairs: {}, opened: {}, failed: {}",
                            report.pairs_found, report.sessions_opened, report.failures
                        ),
                        Ok(_) => debug!("Matcher tick - no pairs"),
                        Err(e) => warn!("Matcher tick failed: {}", e),
                    }
                }
                info!("Matcher loop stopped");
            })
        };

        let metrics_task = {
            let metrics = self.metrics.clone();
            let context = self.health_context.clone();
            let is_running = self.is_running.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(METRICS_REFRESH_INTERVAL);

                while *is_running.read().await {
                    interval.tick().await;
                    match HealthCheck::check(&context).await {
                        Ok(health) => {
                            metrics
                                .service()
                                .uptime_seconds
                                .set(health.stats.uptime_seconds as i64);
                            metrics.set_players_waiting(health.stats.players_waiting);
                            metrics.set_active_sessions(health.stats.active_sessions);
                            metrics.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics.update_component_health(
                                    &check.name,
                                    check.status.as_gauge() > 0,
                                );
                            }
                        }
                        Err(e) => warn!("Health refresh failed: {}", e),
                    }
                }
                info!("Metrics refresh loop stopped");
            })
        };

        self.background_tasks.push(matcher_task);
        self.background_tasks.push(metrics_task);
    }

    fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
        info!("✅ {} background tasks stopped", task_count);
    }
}
