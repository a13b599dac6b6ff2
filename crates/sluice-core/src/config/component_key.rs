//! Generic component identifier.
//!
//! Specialized as `PipelineKey` in the sluice crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a configured component.
///
/// Transparent wrapper around a String so keys serialize as plain YAML map keys.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentKey(String);

impl ComponentKey {
    /// Create a new component key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ComponentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ComponentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let key = ComponentKey::new("01_olist_raw_ingestion");
        assert_eq!(key.to_string(), "01_olist_raw_ingestion");
    }

    #[test]
    fn test_serde_transparent() {
        let key = ComponentKey::new("olist");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"olist\"");

        let parsed: ComponentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
