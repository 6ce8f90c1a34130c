use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{connection, metadata, query, AppState};
use crate::config::Config;
use crate::services::database::{AdapterContext, BridgeSettings, DescriptorStore};
use crate::services::{
    BackendDispatcher, ConnectionPoolManager, ConnectionRegistry, MetadataCache, SchemaIntrospector,
};
use crate::storage::SqliteStorage;

/// Wire the services together from configuration.
pub fn build_state(storage: Arc<SqliteStorage>, config: Config) -> AppState {
    let cache = Arc::new(MetadataCache::new());
    let pools = Arc::new(ConnectionPoolManager::with_config(
        config.gateway.max_pool_size,
        Some(2),
    ));
    let descriptors = Arc::new(DescriptorStore::new(config.federated.descriptor_dir.clone()));

    let registry = Arc::new(ConnectionRegistry::new(
        storage,
        cache.clone(),
        pools.clone(),
        descriptors.clone(),
    ));

    let adapters = AdapterContext {
        pools,
        descriptors,
        bridge: BridgeSettings {
            client_binary: config.federated.client_binary.clone(),
            page_size: config.federated.page_size.max(1),
            catalog_timeout_secs: config.gateway.query_timeout_secs,
        },
    };

    let dispatcher = Arc::new(BackendDispatcher::new(
        registry.clone(),
        adapters.clone(),
        config.gateway.safety_limit,
        config.gateway.query_timeout_secs,
    ));
    let introspector = Arc::new(SchemaIntrospector::new(
        registry.clone(),
        cache,
        adapters,
        config.federated.seed_tables.clone(),
        config.federated.introspection_concurrency,
    ));

    AppState {
        registry,
        dispatcher,
        introspector,
        config,
    }
}

/// Create router with application state
pub fn create_router_with_state(storage: Arc<SqliteStorage>, config: Config) -> Router {
    create_router(build_state(storage, config))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/connections",
            get(connection::list_connections).post(connection::create_connection),
        )
        .route(
            "/api/connections/{id}",
            get(connection::get_connection)
                .put(connection::update_connection)
                .delete(connection::delete_connection),
        )
        .route("/api/connections/{id}/tables", get(metadata::list_tables))
        .route(
            "/api/connections/{id}/tables/{table}/columns",
            get(metadata::list_columns),
        )
        .route("/api/connections/{id}/schema", get(metadata::describe_schema))
        .route("/api/query", post(query::execute_query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
