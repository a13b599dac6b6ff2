//! URL parsing for storage backends.
//!
//! Extracts backend configuration from GCS URLs and local filesystem paths.

use object_store::path::Path;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{GcsConfig, LocalConfig};

const GCS_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+?))?/?$";
const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+?))?/?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+?))?/?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

static GCS_MATCHERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [GCS_PATH, GCS_VIRTUAL, GCS_URL]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid GCS pattern"))
        .collect()
});

static LOCAL_MATCHERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [FILE_URI, FILE_URL, FILE_PATH]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid local pattern"))
        .collect()
});

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Gcs(GcsConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        if let Some(caps) = GCS_MATCHERS.iter().find_map(|r| r.captures(url)) {
            let bucket = caps["bucket"].to_string();
            let key = caps.name("key").map(|m| Path::from(m.as_str()));
            return Ok(BackendConfig::Gcs(GcsConfig { bucket, key }));
        }

        if let Some(caps) = LOCAL_MATCHERS.iter().find_map(|r| r.captures(url)) {
            let path = caps["path"].trim_end_matches('/');
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            };
            return Ok(BackendConfig::Local(LocalConfig { path }));
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}
