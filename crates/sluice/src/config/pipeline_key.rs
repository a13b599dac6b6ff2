//! Pipeline identifier for sluice pipelines.
//!
//! `PipelineKey` wraps `ComponentKey` and names a pipeline in multi-pipeline
//! configurations, e.g. `01_olist_raw_ingestion`.

use serde::{Deserialize, Serialize};
use sluice_core::ComponentKey;
use std::fmt;

/// Identifier for a pipeline in sluice configuration.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineKey(ComponentKey);

impl PipelineKey {
    /// Create a new pipeline key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(ComponentKey::new(id))
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        self.0.id()
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PipelineKey {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl std::borrow::Borrow<str> for PipelineKey {
    fn borrow(&self) -> &str {
        self.0.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let key = PipelineKey::new("01_olist_raw_ingestion");
        assert_eq!(key.id(), "01_olist_raw_ingestion");
        assert_eq!(format!("{key}"), "01_olist_raw_ingestion");
    }

    #[test]
    fn test_serde_roundtrip() {
        let key = PipelineKey::new("02_olist_raw_ingestion_serial");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"02_olist_raw_ingestion_serial\"");

        let parsed: PipelineKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_index_map_lookup_by_str() {
        let mut map = indexmap::IndexMap::new();
        map.insert(PipelineKey::new("olist"), 1);
        assert_eq!(map.get("olist"), Some(&1));
    }
}
