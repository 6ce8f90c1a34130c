use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{ColumnInfo, ConnectionSignature, MetadataCacheEntry};

/// Process-wide cache of federated table/column listings.
///
/// Entries are held until `invalidate` is called for their signature. Within a
/// signature, listings are kept per schema so two profiles that share an
/// endpoint and user but browse different schemas never see each other's names.
///
/// Writers pass the generation they read before fetching. `invalidate` bumps
/// it, so a listing fetched under a profile that has since changed is dropped
/// instead of stored.
pub struct MetadataCache {
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ConnectionSignature, HashMap<Option<String>, MetadataCacheEntry>>,
    generations: HashMap<ConnectionSignature, u64>,
}

impl CacheState {
    fn generation(&self, signature: &ConnectionSignature) -> u64 {
        self.generations.get(signature).copied().unwrap_or(0)
    }

    fn entry_mut(&mut self, signature: &ConnectionSignature, schema: Option<&str>) -> &mut MetadataCacheEntry {
        self.entries
            .entry(signature.clone())
            .or_default()
            .entry(schema.map(str::to_string))
            .or_default()
    }

    fn entry(&self, signature: &ConnectionSignature, schema: Option<&str>) -> Option<&MetadataCacheEntry> {
        self.entries
            .get(signature)
            .and_then(|schemas| schemas.get(&schema.map(str::to_string)))
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Current generation of `signature`. Read it before fetching a listing.
    pub fn generation(&self, signature: &ConnectionSignature) -> u64 {
        self.state.lock().unwrap().generation(signature)
    }

    /// Cached page of table names, if that page was listed before.
    pub fn tables_page(
        &self,
        signature: &ConnectionSignature,
        schema: Option<&str>,
        page: u32,
    ) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .entry(signature, schema)
            .and_then(|entry| entry.pages.get(&page).cloned())
    }

    /// Store a page fetched at `generation`. Returns false if the signature was
    /// invalidated in the meantime and nothing was stored.
    pub fn store_tables_page(
        &self,
        signature: &ConnectionSignature,
        schema: Option<&str>,
        page: u32,
        tables: Vec<String>,
        generation: u64,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.generation(signature) != generation {
            tracing::debug!("Dropping stale table listing for {} page {}", signature, page);
            return false;
        }
        state.entry_mut(signature, schema).pages.insert(page, tables);
        true
    }

    pub fn columns(
        &self,
        signature: &ConnectionSignature,
        schema: Option<&str>,
        table: &str,
    ) -> Option<Vec<ColumnInfo>> {
        let state = self.state.lock().unwrap();
        state
            .entry(signature, schema)
            .and_then(|entry| entry.columns_by_table.get(table).cloned())
    }

    pub fn store_columns(
        &self,
        signature: &ConnectionSignature,
        schema: Option<&str>,
        table: &str,
        columns: Vec<ColumnInfo>,
        generation: u64,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.generation(signature) != generation {
            tracing::debug!("Dropping stale column listing for {}.{}", signature, table);
            return false;
        }
        state
            .entry_mut(signature, schema)
            .columns_by_table
            .insert(table.to_string(), columns);
        true
    }

    /// Drop every listing under `signature` and reject in-flight writes for it.
    /// Returns whether anything was cached.
    pub fn invalidate(&self, signature: &ConnectionSignature) -> bool {
        let mut state = self.state.lock().unwrap();
        *state.generations.entry(signature.clone()).or_default() += 1;
        let removed = state.entries.remove(signature).is_some();
        if removed {
            tracing::info!("Invalidated metadata cache for {}", signature);
        }
        removed
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn signature(host: &str) -> ConnectionSignature {
        ConnectionSignature {
            host: host.to_string(),
            port: 8080,
            catalog: Some("hive".to_string()),
            username: "analyst".to_string(),
        }
    }

    #[test]
    fn test_pages_are_kept_separately() {
        let cache = MetadataCache::new();
        let sig = signature("h");

        assert!(cache.tables_page(&sig, Some("sales"), 1).is_none());

        assert!(cache.store_tables_page(&sig, Some("sales"), 1, vec!["a".into(), "b".into()], 0));
        assert!(cache.store_tables_page(&sig, Some("sales"), 2, vec!["c".into()], 0));

        assert_eq!(cache.tables_page(&sig, Some("sales"), 1), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(cache.tables_page(&sig, Some("sales"), 2), Some(vec!["c".to_string()]));
        assert!(cache.tables_page(&sig, Some("sales"), 3).is_none());
    }

    #[test]
    fn test_schemas_are_partitioned() {
        let cache = MetadataCache::new();
        let sig = signature("h");
        cache.store_tables_page(&sig, Some("sales"), 1, vec!["orders".into()], 0);

        assert!(cache.tables_page(&sig, Some("hr"), 1).is_none());
        assert!(cache.tables_page(&sig, None, 1).is_none());
    }

    #[test]
    fn test_columns_roundtrip() {
        let cache = MetadataCache::new();
        let sig = signature("h");
        cache.store_columns(&sig, Some("sales"), "orders", vec![ColumnInfo::new("id", "bigint")], 0);

        let cols = cache.columns(&sig, Some("sales"), "orders").unwrap();
        assert_eq!(cols[0].name, "id");
        assert!(cache.columns(&sig, Some("hr"), "orders").is_none());
    }

    #[test]
    fn test_invalidate_only_touches_matching_signature() {
        let cache = MetadataCache::new();
        cache.store_tables_page(&signature("h1"), Some("s"), 1, vec!["t".into()], 0);
        cache.store_tables_page(&signature("h2"), Some("s"), 1, vec!["t".into()], 0);

        assert!(cache.invalidate(&signature("h1")));
        assert!(!cache.invalidate(&signature("h1")));
        assert!(cache.tables_page(&signature("h1"), Some("s"), 1).is_none());
        assert!(cache.tables_page(&signature("h2"), Some("s"), 1).is_some());
        assert_eq!(cache.generation(&signature("h2")), 0);
    }

    #[test]
    fn test_write_started_before_invalidate_is_dropped() {
        let cache = MetadataCache::new();
        let sig = signature("h");
        let before = cache.generation(&sig);

        // Nothing cached yet, but the bump still has to reject the old fetch.
        assert!(!cache.invalidate(&sig));
        assert!(!cache.store_tables_page(&sig, Some("s"), 1, vec!["old".into()], before));
        assert!(!cache.store_columns(&sig, Some("s"), "old", Vec::new(), before));
        assert!(cache.tables_page(&sig, Some("s"), 1).is_none());

        let after = cache.generation(&sig);
        assert!(cache.store_tables_page(&sig, Some("s"), 1, vec!["new".into()], after));
        assert_eq!(cache.tables_page(&sig, Some("s"), 1), Some(vec!["new".to_string()]));
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = Arc::new(MetadataCache::new());
        let mut handles = Vec::new();
        for page in 1..=16u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.store_tables_page(&signature("h"), Some("s"), page, vec![format!("t{}", page)], 0)
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        for page in 1..=16u32 {
            assert_eq!(
                cache.tables_page(&signature("h"), Some("s"), page),
                Some(vec![format!("t{}", page)])
            );
        }
    }
}
