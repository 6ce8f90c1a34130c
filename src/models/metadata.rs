use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Cached table and column listings for one signature and schema.
#[derive(Debug, Clone, Default)]
pub struct MetadataCacheEntry {
    pub pages: BTreeMap<u32, Vec<String>>,
    pub columns_by_table: HashMap<String, Vec<ColumnInfo>>,
}

/// `{ tables: [...] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableListing {
    pub tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub cached: bool,
}

/// `{ tables: [...], columns: { table: [{name, type}] } }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub tables: Vec<String>,
    pub columns: BTreeMap<String, Vec<ColumnInfo>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_info_serializes_type_key() {
        let json = serde_json::to_value(ColumnInfo::new("id", "bigint")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "id", "type": "bigint"}));
    }
}
