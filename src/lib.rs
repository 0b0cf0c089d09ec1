pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecError, Result};
pub use models::*;

use std::sync::Arc;

use services::batch::{BatchOrchestrator, BatchSettings};
use services::cache::{CacheClient, RedisCacheClient};
use services::profile::UserProfileCache;
use services::ranking::GroupRankingService;
use services::scheduler::BatchExecutor;
use services::store::{CatalogStore, PgCatalogStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CatalogStore>,
    pub cache: Arc<dyn CacheClient>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub executor: Arc<BatchExecutor>,
    pub ranking: Arc<GroupRankingService>,
    pub profiles: Arc<UserProfileCache>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn CatalogStore> =
            Arc::new(PgCatalogStore::connect(&config.postgres).await?);
        let cache: Arc<dyn CacheClient> =
            Arc::new(RedisCacheClient::connect(&config.redis.url).await?);
        Self::from_parts(config, store, cache)
    }

    /// Wires the services over already-built backends.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn CatalogStore>,
        cache: Arc<dyn CacheClient>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let orchestrator = Arc::new(BatchOrchestrator::new(
            store.clone(),
            cache.clone(),
            BatchSettings::from(config.as_ref()),
        ));

        let executor = Arc::new(BatchExecutor::new(
            orchestrator.clone(),
            config.batch.worker_threads,
            config.scheduler.offset()?,
        )?);

        let profiles = Arc::new(UserProfileCache::new(
            store.clone(),
            cache.clone(),
            config.profile.ttl(),
        ));

        let ranking = Arc::new(
            GroupRankingService::new(store.clone(), cache.clone())
                .with_personal_boost(profiles.clone(), config.read.personal_boost_alpha),
        );

        Ok(Self {
            config,
            store,
            cache,
            orchestrator,
            executor,
            ranking,
            profiles,
        })
    }
}

pub async fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
