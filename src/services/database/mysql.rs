// MySQL adapter using connection pooling for optimal resource management
use crate::api::middleware::AppError;
use crate::models::ColumnInfo;
use crate::services::database::adapter::DatabaseAdapter;
use crate::services::result_normalizer::{decimal_to_json, RawQueryOutput};
use mysql_async::consts::ColumnType;
use mysql_async::{prelude::*, Conn, Pool, Row, Value as MySqlValue};
use serde_json::{json, Value};
use std::time::Duration;

pub struct MySQLAdapter {
    pool: Pool,
}

impl MySQLAdapter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<Conn, AppError> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e)))
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for MySQLAdapter {
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<RawQueryOutput, AppError> {
        let mut conn = self.get_conn().await?;

        let run = async {
            let mut result = conn.query_iter(sql).await?;
            // Column metadata is available before any row is read.
            let (columns, types): (Vec<String>, Vec<ColumnType>) = result
                .columns()
                .map(|cols| {
                    cols.iter()
                        .map(|c| (c.name_str().into_owned(), c.column_type()))
                        .unzip()
                })
                .unwrap_or_default();
            let rows: Vec<Row> = result.collect().await?;
            Ok::<_, mysql_async::Error>((columns, types, rows))
        };

        let (columns, types, rows) = tokio::time::timeout(Duration::from_secs(timeout_secs), run)
            .await
            .map_err(|_| AppError::Timeout(timeout_secs))?
            .map_err(|e| AppError::Database(e.to_string()))?;

        let rows = rows
            .into_iter()
            .map(|row| {
                row.unwrap_raw()
                    .into_iter()
                    .zip(types.iter())
                    .map(|(cell, column_type)| match cell {
                        Some(MySqlValue::Bytes(bytes)) => text_cell_to_json(bytes, *column_type),
                        Some(value) => mysql_value_to_json(value),
                        None => Value::Null,
                    })
                    .collect()
            })
            .collect();

        Ok(RawQueryOutput::Tabular { columns, rows })
    }

    async fn list_tables(&self, _page: u32) -> Result<Vec<String>, AppError> {
        let mut conn = self.get_conn().await?;
        conn.query::<String, _>(
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME",
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let mut conn = self.get_conn().await?;
        let rows: Vec<(String, String)> = conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| ColumnInfo::new(name, data_type))
            .collect())
    }
}

/// The text protocol sends every value as bytes; the column type says how to read them.
fn text_cell_to_json(bytes: Vec<u8>, column_type: ColumnType) -> Value {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return json!(format!("<binary {} bytes>", e.as_bytes().len())),
    };

    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if let Ok(int) = text.parse::<i64>() {
                json!(int)
            } else if let Ok(uint) = text.parse::<u64>() {
                json!(uint)
            } else {
                Value::String(text)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => match text.parse::<f64>() {
            Ok(float) if float.is_finite() => json!(float),
            _ => Value::String(text),
        },
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => decimal_to_json(&text),
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
    match mysql_val {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => json!(s),
            Err(e) => json!(format!("<binary {} bytes>", e.as_bytes().len())),
        },
        MySqlValue::Int(i) => json!(i),
        MySqlValue::UInt(u) => json!(u),
        MySqlValue::Float(f) => json!(f),
        MySqlValue::Double(d) => json!(d),
        MySqlValue::Date(y, m, d, h, min, s, _) => {
            json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
        }
        MySqlValue::Time(is_neg, d, h, m, s, _) => {
            let sign = if is_neg { "-" } else { "" };
            let total_hours = d * 24 + h as u32;
            json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}
