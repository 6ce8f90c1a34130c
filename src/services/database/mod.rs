// Backend abstraction: native relational drivers and the federated subprocess bridge
pub mod adapter;
pub mod bridge;
pub mod descriptor;
pub mod mysql;
pub mod postgresql;

pub use adapter::DatabaseAdapter;
pub use bridge::{BridgeSettings, SubprocessBridge};
pub use descriptor::DescriptorStore;
pub use mysql::MySQLAdapter;
pub use postgresql::PostgreSQLAdapter;

use crate::api::middleware::AppError;
use crate::models::{ConnectionProfile, EngineKind};
use crate::services::ConnectionPoolManager;
use std::sync::Arc;

/// Shared resources an adapter is built from.
#[derive(Clone)]
pub struct AdapterContext {
    pub pools: Arc<ConnectionPoolManager>,
    pub descriptors: Arc<DescriptorStore>,
    pub bridge: BridgeSettings,
}

/// Factory function to create the adapter for a profile's engine kind.
/// Relational kinds reuse the pooled connections held for the profile id.
pub async fn create_adapter(
    profile: &ConnectionProfile,
    ctx: &AdapterContext,
) -> Result<Box<dyn DatabaseAdapter>, AppError> {
    match profile.engine_kind {
        EngineKind::RelationalPostgres => {
            let pool = ctx.pools.get_or_create_pg_pool(profile).await?;
            Ok(Box::new(PostgreSQLAdapter::new(pool)))
        }
        EngineKind::RelationalMysql => {
            let pool = ctx.pools.get_or_create_mysql_pool(profile).await?;
            Ok(Box::new(MySQLAdapter::new(pool)))
        }
        EngineKind::Federated => Ok(Box::new(SubprocessBridge::new(
            profile.clone(),
            ctx.bridge.clone(),
            ctx.descriptors.clone(),
        ))),
    }
}
