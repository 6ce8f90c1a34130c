use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{ColumnInfo, ConnectionProfile, IntrospectionResponse, TableListing};
use crate::services::database::{create_adapter, AdapterContext, DatabaseAdapter};
use crate::services::{ConnectionRegistry, ErrorClassifier, MetadataCache};

/// Lists tables and columns of registered connections.
///
/// Relational engines are always queried fresh. Federated listings go through
/// the metadata cache and are only refetched after the registry evicts them.
pub struct SchemaIntrospector {
    registry: Arc<ConnectionRegistry>,
    cache: Arc<MetadataCache>,
    adapters: AdapterContext,
    seed_tables: Vec<String>,
    concurrency: usize,
}

impl SchemaIntrospector {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        cache: Arc<MetadataCache>,
        adapters: AdapterContext,
        seed_tables: Vec<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            cache,
            adapters,
            seed_tables,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn list_tables(&self, connection_id: i64, page: u32) -> Result<TableListing, AppError> {
        check_page(page)?;
        let profile = self.registry.get(connection_id).await?;
        let adapter = create_adapter(&profile, &self.adapters).await?;
        self.tables_for(&profile, &*adapter, page).await
    }

    pub async fn list_columns(&self, connection_id: i64, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let table = table.trim();
        if table.is_empty() {
            return Err(AppError::Validation("Table name cannot be empty".to_string()));
        }

        let profile = self.registry.get(connection_id).await?;
        let adapter = create_adapter(&profile, &self.adapters).await?;
        self.columns_for(&profile, &*adapter, table).await
    }

    /// One page of tables with the columns of each, fetched with bounded concurrency.
    pub async fn describe(&self, connection_id: i64, page: u32) -> Result<IntrospectionResponse, AppError> {
        check_page(page)?;
        let profile = self.registry.get(connection_id).await?;
        let adapter = create_adapter(&profile, &self.adapters).await?;
        let adapter: &dyn DatabaseAdapter = &*adapter;
        let listing = self.tables_for(&profile, adapter, page).await?;

        let profile = &profile;
        let fetched: Vec<(String, Result<Vec<ColumnInfo>, AppError>)> = stream::iter(listing.tables.clone())
            .map(|table: String| async move {
                let columns = self.columns_for(profile, adapter, &table).await;
                (table, columns)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut columns = BTreeMap::new();
        for (table, result) in fetched {
            columns.insert(table, result?);
        }

        Ok(IntrospectionResponse {
            tables: listing.tables,
            columns,
        })
    }

    async fn tables_for(
        &self,
        profile: &ConnectionProfile,
        adapter: &dyn DatabaseAdapter,
        page: u32,
    ) -> Result<TableListing, AppError> {
        if !profile.engine_kind.is_federated() {
            let tables = adapter
                .list_tables(page)
                .await
                .map_err(|e| classify(e, profile))?;
            return Ok(TableListing {
                tables,
                page: None,
                cached: false,
            });
        }

        let signature = profile.signature();
        let schema = profile.schema.as_deref();
        let generation = self.cache.generation(&signature);

        if let Some(tables) = self.cache.tables_page(&signature, schema, page) {
            tracing::debug!("Metadata cache hit for {} page {}", signature, page);
            return Ok(TableListing {
                tables,
                page: Some(page),
                cached: true,
            });
        }

        let tables = if page == 1 && !self.seed_tables.is_empty() {
            self.seed_tables.clone()
        } else {
            adapter
                .list_tables(page)
                .await
                .map_err(|e| classify(e, profile))?
        };

        self.cache
            .store_tables_page(&signature, schema, page, tables.clone(), generation);

        Ok(TableListing {
            tables,
            page: Some(page),
            cached: false,
        })
    }

    async fn columns_for(
        &self,
        profile: &ConnectionProfile,
        adapter: &dyn DatabaseAdapter,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, AppError> {
        if !profile.engine_kind.is_federated() {
            return adapter
                .list_columns(table)
                .await
                .map_err(|e| classify(e, profile));
        }

        let signature = profile.signature();
        let schema = profile.schema.as_deref();
        let generation = self.cache.generation(&signature);
        if let Some(columns) = self.cache.columns(&signature, schema, table) {
            return Ok(columns);
        }

        let columns = adapter
            .list_columns(table)
            .await
            .map_err(|e| classify(e, profile))?;
        self.cache
            .store_columns(&signature, schema, table, columns.clone(), generation);
        Ok(columns)
    }
}

fn check_page(page: u32) -> Result<(), AppError> {
    if page == 0 {
        return Err(AppError::Validation("Page numbers start at 1".to_string()));
    }
    Ok(())
}

/// Raw backend text never leaves this module unclassified.
fn classify(error: AppError, profile: &ConnectionProfile) -> AppError {
    match error {
        AppError::Database(raw) | AppError::Connection(raw) => {
            let classified =
                ErrorClassifier::classify_with_secret(&raw, profile.secret_credential.expose());
            tracing::warn!("Introspection failed for connection {}: {}", profile.id, classified);
            AppError::Classified(classified)
        }
        other => other,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{ConnectionProfileRequest, EngineKind, ErrorKind, Sensitive};
    use crate::services::database::{BridgeSettings, DescriptorStore};
    use crate::services::ConnectionPoolManager;
    use crate::storage::SqliteStorage;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        introspector: SchemaIntrospector,
        calls: PathBuf,
        _dir: TempDir,
    }

    /// The fake client appends one line per invocation to `calls`.
    async fn fixture(seed_tables: Vec<String>, script: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let calls = dir.path().join("calls");
        let client = dir.path().join("client.sh");
        std::fs::write(
            &client,
            format!("#!/bin/sh\necho \"$1\" >> {}\n{}\n", calls.display(), script),
        )
        .unwrap();
        std::fs::set_permissions(&client, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cache = Arc::new(MetadataCache::new());
        let pools = Arc::new(ConnectionPoolManager::with_config(2, None));
        let descriptors = Arc::new(DescriptorStore::new(dir.path().join("descriptors")));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(SqliteStorage::in_memory().await.unwrap()),
            cache.clone(),
            pools.clone(),
            descriptors.clone(),
        ));
        let adapters = AdapterContext {
            pools,
            descriptors,
            bridge: BridgeSettings {
                client_binary: client,
                page_size: 50,
                catalog_timeout_secs: 10,
            },
        };

        Fixture {
            introspector: SchemaIntrospector::new(registry.clone(), cache, adapters, seed_tables, 2),
            registry,
            calls,
            _dir: dir,
        }
    }

    fn call_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    fn federated() -> ConnectionProfileRequest {
        ConnectionProfileRequest {
            name: None,
            engine_kind: EngineKind::Federated,
            host: "trino.internal".to_string(),
            port: 8080,
            database: "lake".to_string(),
            catalog: Some("hive".to_string()),
            schema: Some("sales".to_string()),
            username: "analyst".to_string(),
            secret_credential: Some(Sensitive::from("pw")),
        }
    }

    const CATALOG_SCRIPT: &str = r#"case "$1" in
  *information_schema.tables*) printf '{"filteredResults":[["table_name"],["orders"],["customers"]]}' ;;
  *) printf '{"filteredResults":[["column_name","data_type"],["id","bigint"]]}' ;;
esac"#;

    #[tokio::test]
    async fn test_federated_listing_is_cached() {
        let f = fixture(Vec::new(), CATALOG_SCRIPT).await;
        let profile = f.registry.create(federated()).await.unwrap();

        let first = f.introspector.list_tables(profile.id, 1).await.unwrap();
        assert_eq!(first.tables, vec!["orders", "customers"]);
        assert!(!first.cached);

        let second = f.introspector.list_tables(profile.id, 1).await.unwrap();
        assert!(second.cached);
        assert_eq!(call_count(&f.calls), 1);
    }

    #[tokio::test]
    async fn test_delete_then_relist_refetches() {
        let f = fixture(Vec::new(), CATALOG_SCRIPT).await;
        let profile = f.registry.create(federated()).await.unwrap();
        f.introspector.list_tables(profile.id, 2).await.unwrap();
        assert_eq!(call_count(&f.calls), 1);

        f.registry.delete(profile.id).await.unwrap();
        let recreated = f.registry.create(federated()).await.unwrap();
        assert_eq!(recreated.signature(), profile.signature());

        let listing = f.introspector.list_tables(recreated.id, 2).await.unwrap();
        assert!(!listing.cached);
        assert_eq!(call_count(&f.calls), 2);
    }

    #[tokio::test]
    async fn test_listing_in_flight_during_update_is_not_cached() {
        // Slow client that names its only table after the secret it was given.
        let f = fixture(
            Vec::new(),
            r#"read -r secret
sleep 1
printf '{"filteredResults":[["table_name"],["seen_with_%s"]]}' "$secret""#,
        )
        .await;
        let mut request = federated();
        request.secret_credential = Some(Sensitive::from("old"));
        let profile = f.registry.create(request.clone()).await.unwrap();

        let mut rotated = request;
        rotated.secret_credential = Some(Sensitive::from("new"));
        let (in_flight, updated) = tokio::join!(f.introspector.list_tables(profile.id, 2), async {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            f.registry.update(profile.id, rotated).await
        });
        assert_eq!(in_flight.unwrap().tables, vec!["seen_with_old"]);
        updated.unwrap();

        let relisted = f.introspector.list_tables(profile.id, 2).await.unwrap();
        assert!(!relisted.cached);
        assert_eq!(relisted.tables, vec!["seen_with_new"]);
        assert_eq!(call_count(&f.calls), 2);
    }

    #[tokio::test]
    async fn test_seed_tables_serve_first_page() {
        let f = fixture(vec!["seeded".to_string()], CATALOG_SCRIPT).await;
        let profile = f.registry.create(federated()).await.unwrap();

        let listing = f.introspector.list_tables(profile.id, 1).await.unwrap();
        assert_eq!(listing.tables, vec!["seeded"]);
        assert_eq!(call_count(&f.calls), 0);

        let page_two = f.introspector.list_tables(profile.id, 2).await.unwrap();
        assert_eq!(page_two.tables, vec!["orders", "customers"]);
    }

    #[tokio::test]
    async fn test_page_zero_rejected() {
        let f = fixture(Vec::new(), CATALOG_SCRIPT).await;
        let profile = f.registry.create(federated()).await.unwrap();
        assert!(matches!(
            f.introspector.list_tables(profile.id, 0).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(call_count(&f.calls), 0);
    }

    #[tokio::test]
    async fn test_describe_collects_columns_once_per_table() {
        let f = fixture(Vec::new(), CATALOG_SCRIPT).await;
        let profile = f.registry.create(federated()).await.unwrap();

        let described = f.introspector.describe(profile.id, 1).await.unwrap();
        assert_eq!(described.tables, vec!["orders", "customers"]);
        assert_eq!(described.columns["orders"], vec![ColumnInfo::new("id", "bigint")]);
        assert_eq!(described.columns.len(), 2);
        // One table listing plus one column listing per table.
        assert_eq!(call_count(&f.calls), 3);

        f.introspector.describe(profile.id, 1).await.unwrap();
        assert_eq!(call_count(&f.calls), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_is_classified_and_redacted() {
        let f = fixture(
            Vec::new(),
            "echo 'Exception: Table hive.sales.orders not found, password=pw' >&2",
        )
        .await;
        let profile = f.registry.create(federated()).await.unwrap();

        match f.introspector.list_columns(profile.id, "orders").await {
            Err(AppError::Classified(err)) => {
                assert_eq!(err.kind, ErrorKind::UnknownError);
                assert!(!err.message.contains("password=pw"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let f = fixture(Vec::new(), CATALOG_SCRIPT).await;
        assert!(matches!(
            f.introspector.list_tables(999, 1).await,
            Err(AppError::NotFound(_))
        ));
    }
}
