use deadpool_postgres::{Config as PgPoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod};
use mysql_async::{OptsBuilder, PoolConstraints, PoolOpts};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::NoTls;

use crate::api::middleware::AppError;
use crate::models::ConnectionProfile;

/// Connection pool manager that maintains bounded pools per connection profile.
/// Pools are dropped when the registry changes or deletes the profile.
pub struct ConnectionPoolManager {
    pg_pools: Arc<RwLock<HashMap<i64, Pool>>>,
    mysql_pools: Arc<RwLock<HashMap<i64, mysql_async::Pool>>>,
    max_pool_size: usize,
    min_idle: Option<usize>,
}

impl ConnectionPoolManager {
    /// Create a new connection pool manager with default settings
    pub fn new() -> Self {
        Self::with_config(16, Some(2))
    }

    /// Create a connection pool manager with custom pool settings
    pub fn with_config(max_pool_size: usize, min_idle: Option<usize>) -> Self {
        Self {
            pg_pools: Arc::new(RwLock::new(HashMap::new())),
            mysql_pools: Arc::new(RwLock::new(HashMap::new())),
            max_pool_size: max_pool_size.max(1),
            min_idle,
        }
    }

    /// Get or create the PostgreSQL pool for a profile.
    /// This method is safe to call concurrently from multiple tasks
    pub async fn get_or_create_pg_pool(&self, profile: &ConnectionProfile) -> Result<Pool, AppError> {
        // Fast path: check if pool already exists (read lock)
        {
            let pools = self.pg_pools.read().await;
            if let Some(pool) = pools.get(&profile.id) {
                tracing::debug!("Using existing PostgreSQL pool for connection {}", profile.id);
                return Ok(pool.clone());
            }
        }

        // Slow path: create new pool (write lock)
        let mut pools = self.pg_pools.write().await;

        // Double-check in case another task created the pool while we were waiting
        if let Some(pool) = pools.get(&profile.id) {
            return Ok(pool.clone());
        }

        tracing::info!(
            "Creating PostgreSQL pool for connection {} ({}:{}, max_size: {})",
            profile.id,
            profile.host,
            profile.port,
            self.max_pool_size
        );

        let mut cfg = PgPoolConfig::new();
        cfg.host = Some(profile.host.clone());
        cfg.port = Some(profile.port);
        cfg.dbname = Some(profile.database.clone());
        cfg.user = Some(profile.username.clone());
        cfg.password = Some(profile.secret_credential.expose().clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(self.max_pool_size));

        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| {
                tracing::error!("Failed to create PostgreSQL pool for connection {}: {}", profile.id, e);
                AppError::Configuration(format!("Failed to create connection pool: {}", e))
            })?;

        pools.insert(profile.id, pool.clone());
        Ok(pool)
    }

    /// Get or create the MySQL pool for a profile.
    pub async fn get_or_create_mysql_pool(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<mysql_async::Pool, AppError> {
        {
            let pools = self.mysql_pools.read().await;
            if let Some(pool) = pools.get(&profile.id) {
                tracing::debug!("Using existing MySQL pool for connection {}", profile.id);
                return Ok(pool.clone());
            }
        }

        let mut pools = self.mysql_pools.write().await;
        if let Some(pool) = pools.get(&profile.id) {
            return Ok(pool.clone());
        }

        tracing::info!(
            "Creating MySQL pool for connection {} ({}:{}, max_size: {})",
            profile.id,
            profile.host,
            profile.port,
            self.max_pool_size
        );

        let min = self.min_idle.unwrap_or(0).min(self.max_pool_size);
        let constraints = PoolConstraints::new(min, self.max_pool_size).ok_or_else(|| {
            AppError::Configuration(format!(
                "Invalid pool bounds: min {} max {}",
                min, self.max_pool_size
            ))
        })?;

        let opts = OptsBuilder::default()
            .ip_or_hostname(profile.host.clone())
            .tcp_port(profile.port)
            .user(Some(profile.username.clone()))
            .pass(Some(profile.secret_credential.expose().clone()))
            .db_name(Some(profile.database.clone()))
            .pool_opts(PoolOpts::default().with_constraints(constraints));

        let pool = mysql_async::Pool::new(opts);
        pools.insert(profile.id, pool.clone());
        Ok(pool)
    }

    /// Remove every pool held for a profile (used when it is updated or deleted)
    pub async fn remove_pools(&self, profile_id: i64) -> bool {
        let pg = self.pg_pools.write().await.remove(&profile_id);
        let mysql = self.mysql_pools.write().await.remove(&profile_id);
        let removed = pg.is_some() || mysql.is_some();

        if let Some(pool) = pg {
            pool.close();
        }
        if let Some(pool) = mysql {
            tokio::spawn(async move {
                if let Err(e) = pool.disconnect().await {
                    tracing::warn!("Failed to disconnect MySQL pool: {}", e);
                }
            });
        }

        if removed {
            tracing::info!(
                "Removed connection pools for connection {} ({} still open)",
                profile_id,
                self.pool_count().await
            );
        }

        removed
    }

    /// Get the number of active pools
    pub async fn pool_count(&self) -> usize {
        self.pg_pools.read().await.len() + self.mysql_pools.read().await.len()
    }
}

impl Default for ConnectionPoolManager {
    fn default() -> Self {
        Self::new()
    }
}
