//! Main application state and service coordination
//!
//! `AppState` wires the engine to its collaborators, reconciles persisted
//! pending matches on start and owns the background tasks: the timer driver,
//! the health server and the uptime updater.

use crate::config::AppConfig;
use crate::engine::{ActivityTracker, PickupEngine};
use crate::events::{EventPublisher, LoggingEventPublisher};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::persistence::InMemoryGateway;
use crate::rating::{InMemoryRatingStorage, WengLinRatingProvider};
use crate::stage::StageContext;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    gateway: Arc<InMemoryGateway>,
    engine: Arc<PickupEngine>,
    metrics: Arc<MetricsCollector>,
    health_server: Mutex<Option<Arc<HealthServer>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Build every component; `seed` makes random choices reproducible
    pub async fn new(config: AppConfig, seed: Option<u64>) -> Result<Self, ServiceError> {
        info!("Initializing pickup engine service '{}'", config.service.name);

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let gateway = Arc::new(Self::seed_gateway(&config)?);

        let rating_storage = Arc::new(InMemoryRatingStorage::new());
        let ratings = Arc::new(
            WengLinRatingProvider::new(&config.rating, rating_storage).map_err(|e| {
                ServiceError::Initialization {
                    message: format!("Failed to create rating provider: {}", e),
                }
            })?,
        );

        let publisher: Arc<dyn EventPublisher> = Arc::new(LoggingEventPublisher::new());
        let mut ctx = StageContext::new(
            gateway.clone(),
            ratings,
            publisher,
            Arc::new(ActivityTracker::new()),
            config.stages.clone(),
        );
        if let Some(seed) = seed {
            info!("Using fixed random seed {}", seed);
            ctx = ctx.with_seed(seed);
        }

        let engine = Arc::new(PickupEngine::new(ctx, metrics.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            gateway,
            engine,
            metrics,
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    fn seed_gateway(config: &AppConfig) -> Result<InMemoryGateway, ServiceError> {
        let gateway = InMemoryGateway::new();
        for pool in &config.map_pools {
            gateway
                .add_map_pool(pool.id, pool.maps.clone())
                .map_err(|e| ServiceError::Configuration {
                    message: format!("Failed to register map pool {}: {}", pool.id, e),
                })?;
        }
        for declaration in &config.queues {
            let key = gateway
                .add_match_config(declaration.guild_id, declaration.config.clone())
                .map_err(|e| ServiceError::Configuration {
                    message: format!("Failed to register queue '{}': {}", declaration.config.name, e),
                })?;
            debug!("Registered queue '{}' as {}", declaration.config.name, key);
        }
        info!(
            "Registered {} queues and {} map pools",
            config.queues.len(),
            config.map_pools.len()
        );
        Ok(gateway)
    }

    /// Reconcile persisted state, then start the driver and health server
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting pickup engine service");

        let report = self
            .engine
            .reconcile()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to reconcile pending matches: {}", e),
            })?;
        debug!("Reconcile report: {:?}", report);

        *self.is_running.write().await = true;

        self.start_health_server().await;
        self.start_background_tasks().await;

        info!("Pickup engine service started");
        Ok(())
    }

    /// Stop background tasks, waiting up to the configured timeout
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of pickup engine service");
        *self.is_running.write().await = false;

        if self.shutdown_tx.send(true).is_err() {
            debug!("No background task was listening for shutdown");
        }
        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        let wait_all = async move {
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout(), wait_all)
            .await
            .is_err()
        {
            return Err(ServiceError::BackgroundTask {
                message: format!(
                    "{} background tasks did not stop within {:?}",
                    task_count,
                    self.config.shutdown_timeout()
                ),
            });
        }

        let stats = self.engine.stats().await;
        info!(
            "Final engine statistics: {} pending matches {:?}",
            stats.pending_matches, stats.by_stage
        );
        info!("Pickup engine service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn engine(&self) -> Arc<PickupEngine> {
        self.engine.clone()
    }

    pub fn gateway(&self) -> Arc<InMemoryGateway> {
        self.gateway.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    async fn start_health_server(self: &Arc<Self>) {
        let health_config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics.clone()).with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(server.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.lock().await.push(handle);
    }

    async fn start_background_tasks(&self) {
        let driver = {
            let engine = self.engine.clone();
            let shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                engine.run(shutdown).await;
            })
        };

        let uptime = {
            let metrics = self.metrics.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            let started_at = self.started_at;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(15));
                loop {
                    tokio::select! {
                        _ = interval.tick() => metrics.update_uptime(started_at.elapsed()),
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("Uptime task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(driver);
        tasks.push(uptime);
        info!("{} background tasks running", tasks.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MapPoolDeclaration, MatchConfig, QueueDeclaration};
    use crate::persistence::PersistenceGateway;
    use crate::types::{MatchKey, PickMode};

    #[tokio::test]
    async fn test_gateway_seeded_from_config() {
        let mut config = AppConfig::default();
        config.queues.push(QueueDeclaration {
            guild_id: 7,
            config: MatchConfig::new(1, "2v2", 4, 2, PickMode::Random).with_map_pool(3),
        });
        config.map_pools.push(MapPoolDeclaration {
            id: 3,
            maps: vec!["nuke".to_string(), "train".to_string()],
        });

        let app = AppState::new(config, Some(1)).await.unwrap();
        let gateway = app.gateway();
        let queue = gateway.match_config(MatchKey::new(7, 1)).await.unwrap();
        assert_eq!(queue.map(|c| c.name), Some("2v2".to_string()));
        assert_eq!(gateway.map_pool(3).await.unwrap().len(), 2);
        assert!(!app.is_running().await);
    }
}
