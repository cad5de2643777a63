use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheBackend, Config, StorageBackend};

pub mod ai_client;
pub mod cache;
pub mod countdown;
pub mod fallback_generator;
pub mod feedback_service;
pub mod history_service;
pub mod problem_service;
pub mod scoring;
pub mod session_service;
pub mod session_store;
pub mod tally_service;
pub mod user_service;

use ai_client::{DisabledTextGenerator, TextGenerator, YandexGptClient};
use cache::{CacheStore, MemoryCache, RedisCache};
use feedback_service::FeedbackService;
use history_service::HistoryService;
use problem_service::ProblemGenerator;
use session_service::{SessionService, SessionSettings};
use session_store::{InMemorySessionStore, MongoSessionStore, SessionStore};
use tally_service::TallyService;
use user_service::UserService;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SessionStore>,
    pub cache: Arc<dyn CacheStore>,
    pub sessions: SessionService,
    pub history: HistoryService,
    pub users: UserService,
}

impl AppState {
    /// Connects the configured backends.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn SessionStore> = match config.storage_backend {
            StorageBackend::Mongo => {
                tracing::info!("Connecting to MongoDB database {}", config.mongo_database);
                Arc::new(MongoSessionStore::connect(&config.mongo_uri, &config.mongo_database).await?)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory session store; data is lost on restart");
                Arc::new(InMemorySessionStore::new())
            }
        };

        let cache: Arc<dyn CacheStore> = match config.cache_backend {
            CacheBackend::Redis => {
                tracing::info!("Attempting to connect to Redis...");
                let redis = tokio::time::timeout(
                    Duration::from_secs(30),
                    RedisCache::connect(&config.redis_uri),
                )
                .await
                .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;
                redis.ping().await.context("Redis PING failed")?;
                tracing::info!("Redis connection established successfully");
                Arc::new(redis)
            }
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
        };

        let ai: Arc<dyn TextGenerator> = if config.ai.enabled {
            tracing::info!(
                "AI generation enabled: model={}, timeout={}s",
                config.ai.model,
                config.ai.timeout_seconds
            );
            Arc::new(YandexGptClient::new(config.ai.clone())?)
        } else {
            tracing::info!("AI generation disabled; fallback content only");
            Arc::new(DisabledTextGenerator)
        };

        Ok(Self::from_parts(config, store, cache, ai))
    }

    /// Wires the services over already-built backends.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn CacheStore>,
        ai: Arc<dyn TextGenerator>,
    ) -> Self {
        let settings = SessionSettings {
            difficulty: config.difficulty,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            late_grace: chrono::Duration::seconds(config.late_grace_seconds as i64),
        };

        let sessions = SessionService::new(
            store.clone(),
            ProblemGenerator::new(ai.clone()),
            FeedbackService::new(ai, cache.clone()),
            TallyService::new(cache.clone(), store.clone()),
            settings,
        );

        Self {
            history: HistoryService::new(store.clone()),
            users: UserService::new(store.clone()),
            config,
            store,
            cache,
            sessions,
        }
    }
}
