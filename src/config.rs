use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub federated: FederatedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

/// Limits applied to every ad-hoc query.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub safety_limit: u64,
    pub query_timeout_secs: u64,
    pub max_pool_size: usize,
}

/// How the federated engine client is launched and introspected.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedConfig {
    pub client_binary: PathBuf,
    pub descriptor_dir: PathBuf,
    pub page_size: u32,
    #[serde(default)]
    pub seed_tables: Vec<String>,
    pub introspection_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./gateway.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?
            .set_default("gateway.safety_limit", 5000)?
            .set_default("gateway.query_timeout_secs", 30)?
            .set_default("gateway.max_pool_size", 16)?
            .set_default("federated.client_binary", "federated-client")?
            .set_default("federated.descriptor_dir", "./.gateway/descriptors")?
            .set_default("federated.page_size", 100)?
            .set_default("federated.introspection_concurrency", 4)?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        if let Ok(limit) = env::var("GATEWAY_SAFETY_LIMIT") {
            builder = builder.set_override("gateway.safety_limit", limit.parse::<u64>().unwrap_or(5000))?;
        }

        if let Ok(timeout) = env::var("GATEWAY_QUERY_TIMEOUT_SECS") {
            builder = builder.set_override(
                "gateway.query_timeout_secs",
                timeout.parse::<u64>().unwrap_or(30),
            )?;
        }

        if let Ok(pool_size) = env::var("GATEWAY_MAX_POOL_SIZE") {
            builder = builder.set_override(
                "gateway.max_pool_size",
                pool_size.parse::<u64>().unwrap_or(16),
            )?;
        }

        if let Ok(binary) = env::var("FEDERATED_CLIENT_BIN") {
            builder = builder.set_override("federated.client_binary", binary)?;
        }

        if let Ok(dir) = env::var("FEDERATED_DESCRIPTOR_DIR") {
            builder = builder.set_override("federated.descriptor_dir", dir)?;
        }

        if let Ok(page_size) = env::var("FEDERATED_PAGE_SIZE") {
            builder = builder.set_override(
                "federated.page_size",
                page_size.parse::<u32>().unwrap_or(100),
            )?;
        }

        if let Ok(seeds) = env::var("FEDERATED_SEED_TABLES") {
            let seeds: Vec<String> = seeds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            builder = builder.set_override("federated.seed_tables", seeds)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Configuration for tests and embedding: everything at its default, profiles in `database_url`.
    pub fn with_defaults(database_url: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig {
                url: database_url.into(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                style: "auto".to_string(),
            },
            gateway: GatewayConfig {
                safety_limit: 5000,
                query_timeout_secs: 30,
                max_pool_size: 16,
            },
            federated: FederatedConfig {
                client_binary: PathBuf::from("federated-client"),
                descriptor_dir: PathBuf::from("./.gateway/descriptors"),
                page_size: 100,
                seed_tables: Vec::new(),
                introspection_concurrency: 4,
            },
        }
    }
}
