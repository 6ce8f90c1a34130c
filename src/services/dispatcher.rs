use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::models::{ConnectionProfile, QueryError, QueryExecutionResult, QueryRequest, ResultTable};
use crate::services::database::{create_adapter, AdapterContext};
use crate::services::{ConnectionRegistry, ErrorClassifier, ResultNormalizer};
use crate::validation::QueryValidator;

/// Runs one ad-hoc query end to end: profile lookup, validation, backend
/// dispatch, normalization and error classification.
///
/// Requests are independent; nothing is shared between calls apart from the
/// pooled native connections.
pub struct BackendDispatcher {
    registry: Arc<ConnectionRegistry>,
    adapters: AdapterContext,
    safety_limit: u64,
    timeout_secs: u64,
}

impl BackendDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        adapters: AdapterContext,
        safety_limit: u64,
        timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            adapters,
            safety_limit,
            timeout_secs,
        }
    }

    /// Never fails: every problem is reported inside the result.
    pub async fn execute(&self, request: QueryRequest) -> QueryExecutionResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "query",
            %request_id,
            connection_id = request.connection_id
        );
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: QueryRequest) -> QueryExecutionResult {
        let started = Instant::now();

        let profile = match self.registry.get(request.connection_id).await {
            Ok(profile) => profile,
            Err(e) => return self.fail(e, None, started),
        };

        match self.run(&profile, &request).await {
            Ok(result) => {
                let elapsed = elapsed_ms(started);
                tracing::info!(
                    engine = %profile.engine_kind,
                    rows = result.rows.len(),
                    elapsed_ms = elapsed,
                    "Query succeeded"
                );
                QueryExecutionResult::success(result, elapsed)
            }
            Err(e) => self.fail(e, Some(&profile), started),
        }
    }

    async fn run(
        &self,
        profile: &ConnectionProfile,
        request: &QueryRequest,
    ) -> Result<ResultTable, AppError> {
        let target_table = QueryValidator::check_target_table(request.target_table.as_deref())?;
        let validated = QueryValidator::validate_and_prepare(
            &request.sql_query,
            request.cursor_id.as_deref(),
            false,
            self.safety_limit,
        )?;

        let sql = match (target_table, &profile.catalog, &profile.schema) {
            (Some(table), Some(catalog), Some(schema)) if profile.engine_kind.is_federated() => {
                QueryValidator::qualify_table(&validated.sql, table, catalog, schema)
            }
            _ => validated.sql,
        };

        tracing::debug!(
            engine = %profile.engine_kind,
            limit_applied = validated.limit_applied,
            cursor_applied = validated.cursor_applied,
            "Dispatching query"
        );

        let adapter = create_adapter(profile, &self.adapters).await?;
        let raw = adapter.execute_query(&sql, self.timeout_secs).await?;
        ResultNormalizer::normalize(raw)
    }

    fn fail(
        &self,
        error: AppError,
        profile: Option<&ConnectionProfile>,
        started: Instant,
    ) -> QueryExecutionResult {
        let classified = classify(&error, profile);
        let elapsed = elapsed_ms(started);
        if classified.kind.is_validation() {
            tracing::info!(kind = %classified.kind, "Query rejected: {}", classified.message);
        } else {
            tracing::warn!(
                kind = %classified.kind,
                elapsed_ms = elapsed,
                "Query failed: {}",
                classified.message
            );
        }
        QueryExecutionResult::failure(classified, elapsed)
    }
}

/// Backend text is scrubbed of the profile's own secret on top of pattern redaction.
fn classify(error: &AppError, profile: Option<&ConnectionProfile>) -> QueryError {
    match (error, profile) {
        (AppError::Database(raw) | AppError::Connection(raw) | AppError::Internal(raw), Some(p)) => {
            ErrorClassifier::classify_with_secret(raw, p.secret_credential.expose())
        }
        _ => ErrorClassifier::from_app_error(error),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
