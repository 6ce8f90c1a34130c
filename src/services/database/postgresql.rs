// PostgreSQL adapter using connection pooling for optimal resource management
use crate::api::middleware::AppError;
use crate::models::ColumnInfo;
use crate::services::database::adapter::DatabaseAdapter;
use crate::services::result_normalizer::{decimal_to_json, RawQueryOutput};
use deadpool_postgres::{Object, Pool};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_postgres::types::Type;
use tokio_postgres::{Row, SimpleQueryMessage};

const LIST_TABLES_SQL: &str = r#"
    SELECT CASE WHEN table_schema = current_schema() THEN table_name
                ELSE table_schema || '.' || table_name END AS name
    FROM information_schema.tables
    WHERE table_schema NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
    ORDER BY table_schema <> current_schema(), table_schema, table_name
"#;

const LIST_COLUMNS_SQL: &str = r#"
    SELECT column_name, data_type
    FROM information_schema.columns
    WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2
    ORDER BY ordinal_position
"#;

pub struct PostgreSQLAdapter {
    pool: Pool,
}

impl PostgreSQLAdapter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<Object, AppError> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get connection from pool: {}", e)))
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for PostgreSQLAdapter {
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<RawQueryOutput, AppError> {
        let client = self.client().await?;

        let run = async {
            // Preparing first gives column names and types even when no rows come back.
            let statement = client.prepare(sql).await?;
            let columns: Vec<String> = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let types: Vec<Type> = statement.columns().iter().map(|c| c.type_().clone()).collect();

            let rows: Vec<Vec<Value>> = if types.iter().all(has_binary_mapping) {
                client
                    .query(&statement, &[])
                    .await?
                    .iter()
                    .map(row_to_values)
                    .collect()
            } else {
                // NUMERIC, intervals, arrays and the like are read in their text form.
                client
                    .simple_query(sql)
                    .await?
                    .into_iter()
                    .filter_map(|message| match message {
                        SimpleQueryMessage::Row(row) => Some(
                            types
                                .iter()
                                .enumerate()
                                .map(|(idx, ty)| text_cell_to_json(row.get(idx), ty))
                                .collect(),
                        ),
                        _ => None,
                    })
                    .collect()
            };
            Ok::<_, tokio_postgres::Error>((columns, rows))
        };

        let (columns, rows) = tokio::time::timeout(Duration::from_secs(timeout_secs), run)
            .await
            .map_err(|_| AppError::Timeout(timeout_secs))?
            .map_err(pg_error)?;

        Ok(RawQueryOutput::Tabular { columns, rows })
    }

    async fn list_tables(&self, _page: u32) -> Result<Vec<String>, AppError> {
        let client = self.client().await?;
        let rows = client
            .query(LIST_TABLES_SQL, &[])
            .await
            .map_err(pg_error)?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, table),
        };

        let client = self.client().await?;
        let rows = client
            .query(LIST_COLUMNS_SQL, &[&schema, &name])
            .await
            .map_err(pg_error)?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }
}

/// Keep the server's message text so it can be classified downstream.
fn pg_error(e: tokio_postgres::Error) -> AppError {
    match e.as_db_error() {
        Some(db_error) => AppError::Database(format!(
            "{} (SQLSTATE {})",
            db_error.message(),
            db_error.code().code()
        )),
        None => AppError::Database(e.to_string()),
    }
}

fn row_to_values(row: &Row) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| cell_to_json(row, idx, column.type_()))
        .collect()
}

fn cell_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    fn opt<T: serde::Serialize>(value: Result<Option<T>, tokio_postgres::Error>) -> Value {
        match value {
            Ok(Some(v)) => json!(v),
            _ => Value::Null,
        }
    }

    match *ty {
        Type::BOOL => opt(row.try_get::<_, Option<bool>>(idx)),
        Type::INT2 => opt(row.try_get::<_, Option<i16>>(idx)),
        Type::INT4 => opt(row.try_get::<_, Option<i32>>(idx)),
        Type::INT8 => opt(row.try_get::<_, Option<i64>>(idx)),
        Type::OID => opt(row.try_get::<_, Option<u32>>(idx)),
        Type::FLOAT4 => opt(row.try_get::<_, Option<f32>>(idx)),
        Type::FLOAT8 => opt(row.try_get::<_, Option<f64>>(idx)),
        Type::JSON | Type::JSONB => match row.try_get::<_, Option<Value>>(idx) {
            Ok(Some(v)) => v,
            _ => Value::Null,
        },
        Type::UUID => opt(row.try_get::<_, Option<uuid::Uuid>>(idx).map(|v| v.map(|u| u.to_string()))),
        Type::DATE => opt(row.try_get::<_, Option<chrono::NaiveDate>>(idx).map(|v| v.map(|d| d.to_string()))),
        Type::TIMESTAMP => opt(
            row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map(|v| v.map(|t| t.to_string())),
        ),
        Type::TIMESTAMPTZ => opt(
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map(|v| v.map(|t| t.to_rfc3339())),
        ),
        _ => opt(row.try_get::<_, Option<String>>(idx)),
    }
}

/// Types `cell_to_json` decodes from the binary protocol.
fn has_binary_mapping(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::JSON
            | Type::JSONB
            | Type::UUID
            | Type::DATE
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
    )
}

/// Convert one text-protocol cell using the column type reported by `prepare`.
fn text_cell_to_json(text: Option<&str>, ty: &Type) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };

    match *ty {
        Type::BOOL => match text {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            other => json!(other),
        },
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => match text.parse::<i64>() {
            Ok(int) => json!(int),
            Err(_) => json!(text),
        },
        Type::FLOAT4 | Type::FLOAT8 => match text.parse::<f64>() {
            Ok(float) if float.is_finite() => json!(float),
            _ => json!(text),
        },
        Type::NUMERIC => decimal_to_json(text),
        Type::JSON | Type::JSONB => serde_json::from_str(text).unwrap_or_else(|_| json!(text)),
        _ => json!(text),
    }
}
