/// Application context and dependency injection
use crate::{
    account::AccountManager,
    clock::{SharedClock, SystemClock},
    config::ServerConfig,
    db,
    error::{AuthError, AuthResult},
    rate_limit::AttemptLimiter,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub account_db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub rate_limiter: Arc<AttemptLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AuthResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Initialize account database
        let options = db::DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..Default::default()
        };
        let account_db = db::create_pool(&config.storage.account_db, options).await?;

        db::run_migrations(&account_db).await?;
        db::test_connection(&account_db).await?;

        Self::from_pool(config, account_db, Arc::new(SystemClock)).await
    }

    /// Build a context around an existing, migrated pool
    pub async fn from_pool(
        config: ServerConfig,
        account_db: SqlitePool,
        clock: SharedClock,
    ) -> AuthResult<Self> {
        let config = Arc::new(config);

        let account_manager = Arc::new(AccountManager::new(
            account_db.clone(),
            config.clone(),
            clock,
        ));

        let accounts = account_manager.accounts().count().await?;
        crate::metrics::ACCOUNTS_TOTAL.set(accounts);
        if accounts == 0 {
            tracing::warn!("No accounts yet; POST /api/setup to create the first administrator");
        }

        let rate_limiter = Arc::new(AttemptLimiter::new(&config.rate_limit));

        Ok(Self {
            config,
            account_db,
            account_manager,
            rate_limiter,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> AuthResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                AuthError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
