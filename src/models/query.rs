use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Ad-hoc query as submitted by the UI layer. Never persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub connection_id: i64,
    pub sql_query: String,
    #[serde(default)]
    pub target_table: Option<String>,
    /// Last-seen primary key for keyset pagination. Accepted as a JSON number or string.
    #[serde(default, deserialize_with = "cursor_text")]
    pub cursor_id: Option<String>,
}

fn cursor_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cursor {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Cursor>::deserialize(deserializer)?.map(|cursor| match cursor {
        Cursor::Text(text) => text,
        Cursor::Number(number) => number.to_string(),
    }))
}

/// Failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    EmptyQuery,
    ForbiddenOperation,
    ConfigurationError,
    ValidationError,
    Timeout,
    MissingTable,
    MissingColumn,
    SyntaxError,
    PermissionDenied,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyQuery => "EmptyQuery",
            ErrorKind::ForbiddenOperation => "ForbiddenOperation",
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::MissingTable => "MissingTable",
            ErrorKind::MissingColumn => "MissingColumn",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::UnknownError => "UnknownError",
        }
    }

    /// Input problems detected before any backend is contacted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::EmptyQuery | ErrorKind::ForbiddenOperation | ErrorKind::ValidationError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified, redacted failure. `message` is safe to show and log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Backend-independent table: ordered column names and ordered value tuples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutionResult {
    pub success: bool,
    pub execution_time_ms: u64,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl QueryExecutionResult {
    pub fn success(table: ResultTable, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            execution_time_ms,
            row_count: table.rows.len(),
            data: Some(table),
            error: None,
        }
    }

    pub fn failure(error: QueryError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            execution_time_ms,
            row_count: 0,
            data: None,
            error: Some(error),
        }
    }

    pub fn columns(&self) -> &[String] {
        self.data.as_ref().map(|d| d.columns.as_slice()).unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        self.data.as_ref().map(|d| d.rows.as_slice()).unwrap_or(&[])
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_accepts_ui_shape() {
        let req: QueryRequest = serde_json::from_value(json!({
            "connectionId": 3,
            "sqlQuery": "SELECT 1",
            "cursorId": "42"
        }))
        .unwrap();
        assert_eq!(req.connection_id, 3);
        assert_eq!(req.cursor_id.as_deref(), Some("42"));
        assert!(req.target_table.is_none());
    }

    #[test]
    fn test_numeric_cursor_accepted() {
        let req: QueryRequest = serde_json::from_value(json!({
            "connectionId": 3,
            "sqlQuery": "SELECT 1",
            "cursorId": 42
        }))
        .unwrap();
        assert_eq!(req.cursor_id.as_deref(), Some("42"));

        let req: QueryRequest = serde_json::from_value(json!({
            "connectionId": 3,
            "sqlQuery": "SELECT 1",
            "cursorId": null
        }))
        .unwrap();
        assert!(req.cursor_id.is_none());

        // Left to the validator, which only takes non-negative integers.
        let req: QueryRequest = serde_json::from_value(json!({
            "connectionId": 3,
            "sqlQuery": "SELECT 1",
            "cursorId": -7
        }))
        .unwrap();
        assert_eq!(req.cursor_id.as_deref(), Some("-7"));
    }

    #[test]
    fn test_success_shape() {
        let table = ResultTable {
            columns: vec!["id".to_string()],
            rows: vec![vec![json!(1)], vec![json!(2)]],
        };
        let result = QueryExecutionResult::success(table, 12);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["success"], json!(true));
        assert_eq!(value["rowCount"], json!(2));
        assert_eq!(value["executionTimeMs"], json!(12));
        assert_eq!(value["data"]["columns"], json!(["id"]));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let result = QueryExecutionResult::failure(
            QueryError::new(ErrorKind::MissingTable, "Table t does not exist"),
            3,
        );
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"]["kind"], json!("MissingTable"));
        assert!(value.get("data").is_none());
        assert!(result.columns().is_empty());
        assert_eq!(result.error_kind(), Some(ErrorKind::MissingTable));
    }
}
