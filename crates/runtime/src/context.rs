//! Process-wide wiring: pool, cache, validator and settings, built once and shared.

use std::sync::Arc;

use sluice_common::config::AppConfig;
use sluice_error::{ErrorCode, ErrorContext, Result, SluiceError};
use tracing::info;

use crate::pool::ConnectionPool;
use crate::query::cache::ResultCache;
use crate::query::validator::SqlValidator;
use crate::store::postgres::{PostgresConnectionFactory, PostgresConnectionManager};
use crate::store::ConnectionManager;

pub struct EngineContext {
    settings: AppConfig,
    pool: Arc<ConnectionPool>,
    cache: Arc<ResultCache>,
    validator: SqlValidator,
    connections: Option<Arc<dyn ConnectionManager>>,
}

impl EngineContext {
    /// Connect everything described by `config`: postgres pool, redis cache, named targets.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let factory = PostgresConnectionFactory::new(
            &config.database.url,
            config.database.connect_timeout(),
        )
        .map_err(|e| invalid_config("database.url", e))?;

        let pool = Arc::new(ConnectionPool::new(
            Arc::new(factory),
            config.pool.block_when_exhausted,
        ));
        pool.initialize(config.pool.min_connections, config.pool.max_connections)
            .await?;

        let cache = Arc::new(ResultCache::connect(&config.cache).await);

        let connections: Option<Arc<dyn ConnectionManager>> = if config.targets.is_empty() {
            None
        } else {
            let manager = PostgresConnectionManager::from_targets(
                &config.targets,
                config.database.connect_timeout(),
            )
            .map_err(|e| invalid_config("targets", e))?;
            Some(Arc::new(manager))
        };

        info!(
            target: "executor",
            targets = config.targets.len(),
            cache_enabled = cache.is_enabled(),
            "Engine context ready"
        );

        Ok(Self::from_parts(
            config.clone(),
            pool,
            cache,
            connections,
        ))
    }

    /// Assemble from already-built parts. The pool is used as given.
    pub fn from_parts(
        settings: AppConfig,
        pool: Arc<ConnectionPool>,
        cache: Arc<ResultCache>,
        connections: Option<Arc<dyn ConnectionManager>>,
    ) -> Self {
        Self {
            validator: SqlValidator::new(settings.validator),
            settings,
            pool,
            cache,
            connections,
        }
    }

    pub fn settings(&self) -> &AppConfig {
        &self.settings
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.pool.clone()
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        self.cache.clone()
    }

    pub fn validator(&self) -> SqlValidator {
        self.validator
    }

    pub fn connection_manager(&self) -> Option<Arc<dyn ConnectionManager>> {
        self.connections.clone()
    }

    /// Close pooled connections. Executors built from this context fail afterwards.
    pub fn shutdown(&self) {
        self.pool.close_all();
        info!(target: "executor", "Engine context shut down");
    }
}

fn invalid_config(field: &str, err: anyhow::Error) -> SluiceError {
    SluiceError::new(ErrorCode::InvalidConfig, format!("{:#}", err)).with_context(
        ErrorContext::Config {
            file_path: None,
            field: Some(field.to_string()),
        },
    )
}
