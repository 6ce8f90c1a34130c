use axum::{extract::State, http::StatusCode, Json};

use crate::api::handlers::connection::AppState;
use crate::api::middleware::status_for_kind;
use crate::models::{QueryExecutionResult, QueryRequest};

/// Execute an ad-hoc SQL query.
///
/// The body is always a `QueryExecutionResult`; failures carry their
/// classified kind and pick the status code from it.
pub async fn execute_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> (StatusCode, Json<QueryExecutionResult>) {
    tracing::info!("Executing SQL query for connection: {}", payload.connection_id);

    let result = state.dispatcher.execute(payload).await;
    let status = result.error_kind().map(status_for_kind).unwrap_or(StatusCode::OK);

    (status, Json(result))
}
