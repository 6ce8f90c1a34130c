use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::models::{ConnectionProfile, ConnectionProfileRequest};
use crate::services::{BackendDispatcher, ConnectionRegistry, SchemaIntrospector};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<BackendDispatcher>,
    pub introspector: Arc<SchemaIntrospector>,
    pub config: Config,
}

/// List all connections
pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let connections = state.registry.list().await?;

    Ok(Json(serde_json::json!({
        "connections": connections
    })))
}

/// Register a new connection profile
pub async fn create_connection(
    State(state): State<AppState>,
    Json(payload): Json<ConnectionProfileRequest>,
) -> Result<(StatusCode, Json<ConnectionProfile>), AppError> {
    tracing::info!(
        "Creating {} connection to {}:{}",
        payload.engine_kind,
        payload.host,
        payload.port
    );

    let profile = state.registry.create(payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// Get a connection by ID
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ConnectionProfile>, AppError> {
    Ok(Json(state.registry.get(id).await?))
}

/// Replace a connection profile. Cached metadata for it is dropped first.
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ConnectionProfileRequest>,
) -> Result<Json<ConnectionProfile>, AppError> {
    tracing::info!("Updating connection: {}", id);
    Ok(Json(state.registry.update(id, payload).await?))
}

/// Delete a connection
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    tracing::info!("Deleting connection: {}", id);
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
