// On-disk connection descriptors read by the federated client process
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::api::middleware::AppError;
use crate::models::ConnectionProfile;

#[derive(Serialize)]
struct ConnectionDescriptor<'a> {
    host: &'a str,
    port: u16,
    database: &'a str,
    catalog: Option<&'a str>,
    schema: Option<&'a str>,
    username: &'a str,
    password: &'a str,
}

/// Writes one `connection-<id>.json` per federated profile.
///
/// Files hold the plaintext secret, so the directory is created `0700` and
/// each file `0600`. A file is rewritten only when its content changes.
pub struct DescriptorStore {
    dir: PathBuf,
    fingerprints: Mutex<HashMap<i64, u64>>,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, profile_id: i64) -> PathBuf {
        self.dir.join(format!("connection-{}.json", profile_id))
    }

    /// Make sure the descriptor for `profile` is current and return its path.
    pub async fn ensure(&self, profile: &ConnectionProfile) -> Result<PathBuf, AppError> {
        let body = serde_json::to_vec_pretty(&ConnectionDescriptor {
            host: &profile.host,
            port: profile.port,
            database: &profile.database,
            catalog: profile.catalog.as_deref(),
            schema: profile.schema.as_deref(),
            username: &profile.username,
            password: profile.secret_credential.expose(),
        })
        .map_err(|e| AppError::Internal(format!("Failed to encode connection descriptor: {}", e)))?;

        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        let fingerprint = hasher.finish();

        let path = self.path_for(profile.id);

        // Held across the write so two requests never race on one file.
        let mut fingerprints = self.fingerprints.lock().await;
        let unchanged = fingerprints.get(&profile.id) == Some(&fingerprint);
        if unchanged && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        self.create_dir().await?;
        self.write_atomically(&path, &body).await?;
        fingerprints.insert(profile.id, fingerprint);

        tracing::debug!("Wrote connection descriptor for connection {}", profile.id);
        Ok(path)
    }

    /// Delete the descriptor of a profile. Missing files are not an error.
    pub async fn remove(&self, profile_id: i64) -> Result<(), AppError> {
        self.fingerprints.lock().await.remove(&profile_id);
        match tokio::fs::remove_file(self.path_for(profile_id)).await {
            Ok(()) => {
                tracing::debug!("Removed connection descriptor for connection {}", profile_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "Failed to remove connection descriptor: {}",
                e
            ))),
        }
    }

    async fn create_dir(&self) -> Result<(), AppError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);

        builder.create(&self.dir).await.map_err(|e| {
            AppError::Configuration(format!(
                "Cannot create descriptor directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    async fn write_atomically(&self, path: &Path, body: &[u8]) -> Result<(), AppError> {
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let io_err = |e: std::io::Error| {
            AppError::Internal(format!("Failed to write connection descriptor: {}", e))
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(io_err)?;
        let written = async {
            file.write_all(body).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineKind, Sensitive};
    use chrono::Utc;
    use tempfile::tempdir;

    fn profile(secret: &str) -> ConnectionProfile {
        ConnectionProfile {
            id: 7,
            name: None,
            engine_kind: EngineKind::Federated,
            host: "trino.internal".to_string(),
            port: 8080,
            database: "lake".to_string(),
            catalog: Some("hive".to_string()),
            schema: Some("sales".to_string()),
            username: "analyst".to_string(),
            secret_credential: Sensitive::new(secret.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_descriptor_contents() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(dir.path().join("descriptors"));

        let path = store.ensure(&profile("s3cret")).await.unwrap();
        assert!(path.ends_with("connection-7.json"));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["host"], "trino.internal");
        assert_eq!(json["port"], 8080);
        assert_eq!(json["catalog"], "hive");
        assert_eq!(json["password"], "s3cret");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_descriptor_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let descriptors = dir.path().join("descriptors");
        let store = DescriptorStore::new(&descriptors);
        let path = store.ensure(&profile("s3cret")).await.unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(&descriptors).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[tokio::test]
    async fn test_rewritten_only_on_change() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());

        let path = store.ensure(&profile("one")).await.unwrap();
        // Tamper with the file; an unchanged profile must not rewrite it.
        std::fs::write(&path, b"marker").unwrap();
        store.ensure(&profile("one")).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"marker");

        store.ensure(&profile("two")).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["password"], "two");

        // No temp files are left behind.
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_remove_descriptor() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        let path = store.ensure(&profile("x")).await.unwrap();

        store.remove(7).await.unwrap();
        assert!(!path.exists());
        // Second removal is a no-op.
        store.remove(7).await.unwrap();
    }
}
