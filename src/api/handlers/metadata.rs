use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::api::handlers::connection::AppState;
use crate::api::middleware::AppError;
use crate::models::{IntrospectionResponse, TableListing};

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

/// List tables for a connection, one page at a time for federated engines
pub async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<TableListing>, AppError> {
    tracing::info!("Listing tables for connection {} (page {})", id, params.page);
    Ok(Json(state.introspector.list_tables(id, params.page).await?))
}

/// Columns of one table, in the introspection response shape
pub async fn list_columns(
    State(state): State<AppState>,
    Path((id, table)): Path<(i64, String)>,
) -> Result<Json<IntrospectionResponse>, AppError> {
    tracing::info!("Listing columns of {} for connection {}", table, id);
    let columns = state.introspector.list_columns(id, &table).await?;

    Ok(Json(IntrospectionResponse {
        tables: vec![table.clone()],
        columns: BTreeMap::from([(table, columns)]),
    }))
}

/// Tables of one page together with their columns
pub async fn describe_schema(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<IntrospectionResponse>, AppError> {
    tracing::info!("Describing schema for connection {} (page {})", id, params.page);
    Ok(Json(state.introspector.describe(id, params.page).await?))
}
