use chrono::Utc;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{ConnectionProfile, ConnectionProfileRequest};
use crate::services::database::DescriptorStore;
use crate::services::{ConnectionPoolManager, MetadataCache};
use crate::storage::SqliteStorage;

/// Owns connection profiles and keeps every derived resource consistent with them.
///
/// Update and delete evict cached metadata, pooled connections and the
/// descriptor file of the profile *before* the stored row changes.
pub struct ConnectionRegistry {
    storage: Arc<SqliteStorage>,
    cache: Arc<MetadataCache>,
    pools: Arc<ConnectionPoolManager>,
    descriptors: Arc<DescriptorStore>,
}

impl ConnectionRegistry {
    pub fn new(
        storage: Arc<SqliteStorage>,
        cache: Arc<MetadataCache>,
        pools: Arc<ConnectionPoolManager>,
        descriptors: Arc<DescriptorStore>,
    ) -> Self {
        Self {
            storage,
            cache,
            pools,
            descriptors,
        }
    }

    pub async fn create(&self, request: ConnectionProfileRequest) -> Result<ConnectionProfile, AppError> {
        request.validate()?;
        let request = normalize(request);

        let secret = request
            .secret_credential
            .as_ref()
            .map(|s| s.expose().clone())
            .ok_or_else(|| AppError::Validation("secretCredential is required".to_string()))?;

        let profile = self.storage.insert_profile(&request, &secret).await?;
        tracing::info!(
            "Registered {} connection {} ({})",
            profile.engine_kind,
            profile.id,
            profile.signature()
        );
        Ok(profile)
    }

    /// Replace a profile. A request without a secret keeps the stored one.
    pub async fn update(&self, id: i64, request: ConnectionProfileRequest) -> Result<ConnectionProfile, AppError> {
        request.validate()?;
        let request = normalize(request);
        let existing = self.get(id).await?;

        self.evict(&existing).await;

        let updated = ConnectionProfile {
            id,
            name: request.name,
            engine_kind: request.engine_kind,
            host: request.host,
            port: request.port,
            database: request.database,
            catalog: request.catalog,
            schema: request.schema,
            username: request.username,
            secret_credential: request
                .secret_credential
                .unwrap_or_else(|| existing.secret_credential.clone()),
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        // Listings cached under the new identity may predate this change too.
        self.cache.invalidate(&updated.signature());

        if !self.storage.update_profile(&updated).await? {
            return Err(AppError::NotFound(format!("Connection {} not found", id)));
        }
        // Listings that read the old row while it was being replaced are dropped too.
        self.cache.invalidate(&existing.signature());
        self.cache.invalidate(&updated.signature());

        tracing::info!("Updated connection {} ({})", id, updated.signature());
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        let existing = self.get(id).await?;
        self.evict(&existing).await;

        if !self.storage.delete_profile(id).await? {
            return Err(AppError::NotFound(format!("Connection {} not found", id)));
        }
        self.cache.invalidate(&existing.signature());

        tracing::info!("Deleted connection {}", id);
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<ConnectionProfile, AppError> {
        self.storage
            .get_profile(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Connection {} not found", id)))
    }

    /// All profiles, newest first.
    pub async fn list(&self) -> Result<Vec<ConnectionProfile>, AppError> {
        Ok(self.storage.list_profiles().await?)
    }

    async fn evict(&self, profile: &ConnectionProfile) {
        self.cache.invalidate(&profile.signature());
        self.pools.remove_pools(profile.id).await;
        if let Err(e) = self.descriptors.remove(profile.id).await {
            tracing::warn!("Connection {}: {}", profile.id, e);
        }
    }
}

fn normalize(mut request: ConnectionProfileRequest) -> ConnectionProfileRequest {
    let trim = |value: String| value.trim().to_string();
    request.host = trim(request.host);
    request.database = trim(request.database);
    request.username = trim(request.username);
    request.catalog = request.catalog.map(trim);
    request.schema = request.schema.map(trim);
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineKind, Sensitive};
    use tempfile::TempDir;
    use tokio_test::assert_err;

    struct Fixture {
        registry: ConnectionRegistry,
        cache: Arc<MetadataCache>,
        descriptors: Arc<DescriptorStore>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MetadataCache::new());
        let descriptors = Arc::new(DescriptorStore::new(dir.path()));
        let registry = ConnectionRegistry::new(
            Arc::new(SqliteStorage::in_memory().await.unwrap()),
            cache.clone(),
            Arc::new(ConnectionPoolManager::with_config(2, None)),
            descriptors.clone(),
        );
        Fixture {
            registry,
            cache,
            descriptors,
            _dir: dir,
        }
    }

    fn federated(secret: Option<&str>) -> ConnectionProfileRequest {
        ConnectionProfileRequest {
            name: Some("lake".to_string()),
            engine_kind: EngineKind::Federated,
            host: " trino.internal ".to_string(),
            port: 8080,
            database: "lake".to_string(),
            catalog: Some("hive".to_string()),
            schema: Some("sales".to_string()),
            username: "analyst".to_string(),
            secret_credential: secret.map(Sensitive::from),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let f = fixture().await;
        let created = f.registry.create(federated(Some("pw"))).await.unwrap();
        assert_eq!(created.host, "trino.internal");

        let loaded = f.registry.get(created.id).await.unwrap();
        assert_eq!(loaded.signature(), created.signature());
        assert_eq!(f.registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_secret() {
        let f = fixture().await;
        assert!(matches!(
            f.registry.create(federated(None)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_federated_without_catalog() {
        let f = fixture().await;
        let mut request = federated(Some("pw"));
        request.catalog = None;
        assert_err!(f.registry.create(request).await);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let f = fixture().await;
        assert!(matches!(f.registry.get(42).await, Err(AppError::NotFound(_))));
        assert!(matches!(f.registry.delete(42).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_keeps_secret_and_evicts_both_signatures() {
        let f = fixture().await;
        let created = f.registry.create(federated(Some("pw"))).await.unwrap();
        let old_sig = created.signature();
        f.cache.store_tables_page(&old_sig, Some("sales"), 1, vec!["orders".into()], 0);

        let mut request = federated(None);
        request.host = "trino-2.internal".to_string();
        let mut new_sig = old_sig.clone();
        new_sig.host = "trino-2.internal".to_string();
        f.cache.store_tables_page(&new_sig, Some("sales"), 1, vec!["stale".into()], 0);

        let updated = f.registry.update(created.id, request).await.unwrap();
        assert_eq!(updated.secret_credential.expose(), "pw");
        assert_eq!(updated.created_at, created.created_at);
        assert!(f.cache.tables_page(&old_sig, Some("sales"), 1).is_none());
        assert!(f.cache.tables_page(&new_sig, Some("sales"), 1).is_none());
    }

    #[tokio::test]
    async fn test_delete_evicts_cache_and_descriptor() {
        let f = fixture().await;
        let created = f.registry.create(federated(Some("pw"))).await.unwrap();
        f.cache
            .store_tables_page(&created.signature(), Some("sales"), 1, vec!["orders".into()], 0);
        let descriptor = f.descriptors.ensure(&created).await.unwrap();

        f.registry.delete(created.id).await.unwrap();

        assert!(f.cache.tables_page(&created.signature(), Some("sales"), 1).is_none());
        assert!(!descriptor.exists());
        assert!(matches!(f.registry.get(created.id).await, Err(AppError::NotFound(_))));
    }
}
