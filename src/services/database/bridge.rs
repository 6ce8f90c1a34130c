//! Federated query execution through an external client process.
//!
//! The gateway does not link a client library for the federated engine. Each
//! call launches the configured client with the SQL text as its only argument,
//! feeds the secret over stdin and reads a `{"filteredResults": [...]}` JSON
//! document back from stdout.

use serde_json::Value;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::adapter::DatabaseAdapter;
use super::descriptor::DescriptorStore;
use crate::api::middleware::AppError;
use crate::models::{ColumnInfo, ConnectionProfile};
use crate::services::result_normalizer::{RawQueryOutput, ResultNormalizer};
use crate::validation::quote_ident;

/// Environment variable naming the descriptor file for the child.
pub const DESCRIPTOR_ENV: &str = "GATEWAY_CONNECTION_DESCRIPTOR";

/// How long stream readers may keep running after the child has exited.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Settings shared by every bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub client_binary: PathBuf,
    pub page_size: u32,
    /// Budget for catalog listings issued by the introspector.
    pub catalog_timeout_secs: u64,
}

/// Captured result of one client run.
#[derive(Debug)]
pub struct ClientOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

pub struct SubprocessBridge {
    profile: ConnectionProfile,
    settings: BridgeSettings,
    descriptors: Arc<DescriptorStore>,
}

impl SubprocessBridge {
    pub fn new(
        profile: ConnectionProfile,
        settings: BridgeSettings,
        descriptors: Arc<DescriptorStore>,
    ) -> Self {
        Self {
            profile,
            settings,
            descriptors,
        }
    }

    /// Launch the client once and collect both streams.
    ///
    /// On timeout the child is killed and reaped before `Timeout` is returned.
    pub async fn run(&self, sql: &str, timeout_secs: u64) -> Result<ClientOutput, AppError> {
        let descriptor = self.descriptors.ensure(&self.profile).await?;

        let mut command = Command::new(&self.settings.client_binary);
        command
            .arg(sql)
            .env(DESCRIPTOR_ENV, &descriptor)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so launcher scripts take their children down with them.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| {
                AppError::Configuration(format!(
                    "Cannot launch federated client {}: {}",
                    self.settings.client_binary.display(),
                    e
                ))
            })?;

        tracing::debug!(
            connection_id = self.profile.id,
            pid = child.id(),
            "Spawned federated client"
        );
        let mut group = ProcessGroup(child.id());

        // Both streams are drained on their own tasks so a chatty child can
        // never block on a full pipe while we wait for it.
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());
        let stdin = child.stdin.take();
        let secret = format!("{}\n", self.profile.secret_credential.expose());

        let budget = Duration::from_secs(timeout_secs);
        let finished = tokio::time::timeout(budget, async {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(secret.as_bytes()).await {
                    // A client that never reads stdin closes the pipe early.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                drop(stdin);
            }
            child.wait().await
        })
        .await;

        let status = match finished {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout.abort();
                stderr.abort();
                group.kill();
                let _ = child.kill().await;
                return Err(AppError::Internal(format!("Federated client I/O failed: {}", e)));
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = self.profile.id,
                    timeout_secs,
                    "Federated client timed out, killing it"
                );
                group.kill();
                // kill() also waits, so the child is reaped here.
                if let Err(e) = child.kill().await {
                    tracing::error!("Failed to kill federated client: {}", e);
                }
                stdout.abort();
                stderr.abort();
                return Err(AppError::Timeout(timeout_secs));
            }
        };

        Ok(ClientOutput {
            stdout: collect_reader(stdout).await,
            stderr: collect_reader(stderr).await,
            status,
        })
    }

    async fn run_json(&self, sql: &str, timeout_secs: u64) -> Result<Value, AppError> {
        let output = self.run(sql, timeout_secs).await?;
        parse_client_output(&output)
    }

    fn catalog(&self) -> &str {
        self.profile.catalog.as_deref().unwrap_or_default()
    }

    fn schema(&self) -> &str {
        self.profile.schema.as_deref().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for SubprocessBridge {
    async fn execute_query(&self, sql: &str, timeout_secs: u64) -> Result<RawQueryOutput, AppError> {
        Ok(RawQueryOutput::Json(self.run_json(sql, timeout_secs).await?))
    }

    async fn list_tables(&self, page: u32) -> Result<Vec<String>, AppError> {
        let sql = list_tables_sql(self.catalog(), self.schema(), page, self.settings.page_size);
        let table = ResultNormalizer::from_json_rows(self.run_json(&sql, self.settings.catalog_timeout_secs).await?)?;

        Ok(table
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|value| match value {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let sql = format!(
            "SELECT column_name, data_type FROM {}.information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' ORDER BY ordinal_position",
            quote_ident(self.catalog()),
            escape_literal(self.schema()),
            escape_literal(table)
        );
        let table = ResultNormalizer::from_json_rows(self.run_json(&sql, self.settings.catalog_timeout_secs).await?)?;

        Ok(table
            .rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                match (cells.next(), cells.next()) {
                    (Some(Value::String(name)), Some(data_type)) => Some(ColumnInfo::new(
                        name,
                        match data_type {
                            Value::String(s) => s,
                            Value::Null => String::new(),
                            other => other.to_string(),
                        },
                    )),
                    _ => None,
                }
            })
            .collect())
    }
}

/// Process group of one client run. Whatever is left of it is killed on drop.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = self.0.take() {
            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid, "Failed to kill federated client group: {}", e),
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.0.take();
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_reader<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.read_to_end(&mut buf).await {
                tracing::warn!("error reading federated client output: {}", e);
            }
        }
        buf
    })
}

/// Wait briefly for a reader; a grandchild holding the pipe open must not
/// stall the request.
async fn collect_reader(mut handle: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

/// Decide success or failure of one client run and extract `filteredResults`.
///
/// Any occurrence of "error" or "exception" in either stream is treated as a
/// failure, even inside otherwise valid JSON.
pub fn parse_client_output(output: &ClientOutput) -> Result<Value, AppError> {
    let failure_text = || {
        let mut text = output.stderr.trim().to_string();
        if !output.stdout.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(output.stdout.trim());
        }
        text
    };

    let stdout_lower = output.stdout.to_lowercase();
    let stderr_lower = output.stderr.to_lowercase();
    if ["error", "exception"]
        .iter()
        .any(|needle| stdout_lower.contains(needle) || stderr_lower.contains(needle))
    {
        return Err(AppError::Database(failure_text()));
    }

    let document: Value = serde_json::from_str(output.stdout.trim()).map_err(|e| {
        let text = failure_text();
        if text.is_empty() {
            AppError::Database(format!("Federated client returned no output ({})", e))
        } else {
            AppError::Database(text)
        }
    })?;

    if !output.status.success() {
        return Err(AppError::Database(format!(
            "Federated client exited with {}: {}",
            output.status,
            failure_text()
        )));
    }

    match document {
        Value::Object(mut map) => map.remove("filteredResults").ok_or_else(|| {
            AppError::Database("Federated client output has no filteredResults field".to_string())
        }),
        _ => Err(AppError::Database(
            "Federated client output is not a JSON object".to_string(),
        )),
    }
}

/// Row-numbered listing of one page of tables in `catalog.schema`.
pub fn list_tables_sql(catalog: &str, schema: &str, page: u32, page_size: u32) -> String {
    let offset = u64::from(page.saturating_sub(1)) * u64::from(page_size);
    let end = offset + u64::from(page_size);
    format!(
        "SELECT table_name FROM (\
         SELECT table_name, row_number() OVER (ORDER BY table_name) AS rn \
         FROM {}.information_schema.tables WHERE table_schema = '{}'\
         ) numbered WHERE rn > {} AND rn <= {} ORDER BY rn",
        quote_ident(catalog),
        escape_literal(schema),
        offset,
        end
    )
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
