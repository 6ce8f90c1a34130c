// Backend adapter trait shared by the relational drivers and the federated bridge
use crate::api::middleware::AppError;
use crate::models::ColumnInfo;
use crate::services::result_normalizer::RawQueryOutput;

/// Database adapter trait - one implementation per execution strategy.
///
/// Adapters return raw output and raw error text; normalization and
/// classification happen in the caller so every backend reports the same way.
#[async_trait::async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Run one already-validated statement within `timeout_secs`.
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<RawQueryOutput, AppError>;

    /// Table names visible to the profile. `page` starts at 1; adapters
    /// that cannot page return the full listing for any page.
    async fn list_tables(&self, page: u32) -> Result<Vec<String>, AppError>;

    /// Columns of one table in ordinal order.
    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, AppError>;
}
