//! Object storage abstraction.
//!
//! Provides a unified interface over Google Cloud Storage and the local
//! filesystem. Paths handed to and returned from a provider are relative to the
//! provider's configured prefix.

mod gcs;
mod local;
mod url_parser;

pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL (`gs://bucket[/prefix]`,
    /// `file:///path` or an absolute path).
    pub fn for_url(url: &str) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::Gcs(config) => Self::construct_gcs(config),
            BackendConfig::Local(config) => Self::construct_local(config),
        }
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object under `prefix` (relative to the configured prefix).
    ///
    /// Returns sorted paths relative to the configured prefix. A prefix with no
    /// objects yields an empty list rather than an error.
    pub async fn list_with_prefix(&self, prefix: &Path) -> Result<Vec<Path>, StorageError> {
        let full_prefix = self.qualify_path(prefix);
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let start = Instant::now();
        let result: Result<Vec<_>, _> = self
            .object_store
            .list(Some(&*full_prefix))
            .try_collect()
            .await;

        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::of(&result),
        });
        emit!(StorageRequestDuration {
            operation: StorageOperation::List,
            duration: start.elapsed(),
        });

        let objects = match result {
            Ok(objects) => objects,
            Err(object_store::Error::NotFound { .. }) => {
                debug!(prefix = %full_prefix, "Prefix not found, treating as empty");
                Vec::new()
            }
            Err(source) => return Err(StorageError::ObjectStore { source }),
        };

        let mut paths: Vec<Path> = objects
            .into_iter()
            .map(|meta| meta.location.parts().skip(key_part_count).collect())
            .collect();
        paths.sort();

        debug!(prefix = %full_prefix, count = paths.len(), "Listed objects");
        Ok(paths)
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::of(&result),
        });
        emit!(StorageRequestDuration {
            operation: StorageOperation::Get,
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)
    }
}
