use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Sensitive;
use crate::api::middleware::AppError;

/// Which execution strategy a profile is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    RelationalMysql,
    RelationalPostgres,
    Federated,
}

impl EngineKind {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "relational-mysql" | "mysql" => Ok(EngineKind::RelationalMysql),
            "relational-postgres" | "postgresql" | "postgres" => Ok(EngineKind::RelationalPostgres),
            "federated" => Ok(EngineKind::Federated),
            _ => Err(AppError::Validation(format!("Unsupported engine kind: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::RelationalMysql => "relational-mysql",
            EngineKind::RelationalPostgres => "relational-postgres",
            EngineKind::Federated => "federated",
        }
    }

    pub fn is_federated(&self) -> bool {
        matches!(self, EngineKind::Federated)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored descriptor of how to reach one data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub id: i64,
    pub name: Option<String>,
    pub engine_kind: EngineKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub username: String,
    pub secret_credential: Sensitive<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionProfile {
    /// Key under which derived schema listings for this profile are cached.
    pub fn signature(&self) -> ConnectionSignature {
        ConnectionSignature {
            host: self.host.clone(),
            port: self.port,
            catalog: self.catalog.clone(),
            username: self.username.clone(),
        }
    }
}

/// `(host, port, catalog, username)` identity shared by profiles that see the same metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSignature {
    pub host: String,
    pub port: u16,
    pub catalog: Option<String>,
    pub username: String,
}

impl fmt::Display for ConnectionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.username,
            self.host,
            self.port,
            self.catalog.as_deref().unwrap_or("-")
        )
    }
}

/// Body of create and update calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfileRequest {
    pub name: Option<String>,
    pub engine_kind: EngineKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub username: String,
    /// Required on create; on update `None` keeps the stored secret.
    #[serde(default)]
    pub secret_credential: Option<Sensitive<String>>,
}

impl ConnectionProfileRequest {
    /// Enforce field presence and the catalog/schema rule for the engine kind.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.host.trim().is_empty() {
            return Err(AppError::Validation("Host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(AppError::Validation("Port must be greater than zero".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(AppError::Validation("Database cannot be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::Validation("Username cannot be empty".to_string()));
        }

        let has_catalog = self.catalog.as_deref().is_some_and(|c| !c.trim().is_empty());
        let has_schema = self.schema.as_deref().is_some_and(|s| !s.trim().is_empty());

        if self.engine_kind.is_federated() {
            if !has_catalog || !has_schema {
                return Err(AppError::Validation(
                    "Federated connections require both catalog and schema".to_string(),
                ));
            }
        } else if self.catalog.is_some() || self.schema.is_some() {
            return Err(AppError::Validation(format!(
                "catalog and schema are only valid for federated connections, not {}",
                self.engine_kind
            )));
        }

        Ok(())
    }
}
