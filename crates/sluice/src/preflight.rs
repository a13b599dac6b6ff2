//! Source file guard.
//!
//! Lists the batch folder and fails when it is empty or when any expected
//! file is absent. It never writes anything.

use object_store::path::Path;
use snafu::ResultExt;
use std::collections::HashSet;
use tracing::{error, info, warn};

use sluice_core::StorageProviderRef;
use sluice_core::emit;
use sluice_core::metrics::events::PreflightChecked;

use crate::batch::{BatchDate, SourceLayout};
use crate::config::TableMapping;
use crate::error::{ListingSnafu, PreflightError};

/// What the guard found for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    /// URI of the listed batch folder.
    pub prefix: String,
    /// URIs of the expected files, in mapping order.
    pub present: Vec<String>,
    /// URIs of objects in the folder that no mapping expects.
    pub unexpected: Vec<String>,
}

pub struct PreflightGuard {
    storage: StorageProviderRef,
    layout: SourceLayout,
    files: Vec<String>,
}

impl PreflightGuard {
    pub fn new(storage: StorageProviderRef, layout: SourceLayout, tables: &[TableMapping]) -> Self {
        Self {
            storage,
            layout,
            files: tables.iter().map(|m| m.file.clone()).collect(),
        }
    }

    pub async fn check(&self, batch: &BatchDate) -> Result<PreflightReport, PreflightError> {
        let prefix = self.layout.prefix_uri(batch);
        let listed = self
            .storage
            .list_with_prefix(&self.layout.batch_prefix(batch))
            .await
            .context(ListingSnafu {
                prefix: prefix.clone(),
            })?;

        if listed.is_empty() {
            emit!(PreflightChecked {
                passed: false,
                missing: self.files.len(),
            });
            error!(prefix = %prefix, "Batch folder is empty or missing");
            return Err(PreflightError::EmptyBatch { prefix });
        }

        let listed_set: HashSet<&Path> = listed.iter().collect();
        let expected: Vec<Path> = self
            .files
            .iter()
            .map(|file| self.layout.object_path(batch, file))
            .collect();
        let expected_set: HashSet<&Path> = expected.iter().collect();

        let (present, missing): (Vec<&Path>, Vec<&Path>) =
            expected.iter().partition(|path| listed_set.contains(path));
        let unexpected: Vec<String> = listed
            .iter()
            .filter(|path| !expected_set.contains(path))
            .map(|path| self.layout.uri_for(path))
            .collect();

        emit!(PreflightChecked {
            passed: missing.is_empty(),
            missing: missing.len(),
        });

        if !unexpected.is_empty() {
            warn!(
                prefix = %prefix,
                count = unexpected.len(),
                objects = ?unexpected,
                "Unexpected objects in batch folder"
            );
        }

        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(|p| self.layout.uri_for(p)).collect();
            error!(prefix = %prefix, missing = ?missing, "Expected source files are missing");
            return Err(PreflightError::MissingFiles { missing });
        }

        info!(prefix = %prefix, files = present.len(), "All expected source files present");
        Ok(PreflightReport {
            prefix,
            present: present.iter().map(|p| self.layout.uri_for(p)).collect(),
            unexpected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tables;
    use sluice_core::StorageProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    const BATCH: &str = "2018-10-01";

    fn setup(files: &[&str]) -> (TempDir, PreflightGuard, SourceLayout) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let batch_dir = dir.path().join("olist/raw").join(format!("dt={BATCH}"));
        std::fs::create_dir_all(&batch_dir).unwrap();
        for file in files {
            std::fs::write(batch_dir.join(file), "id\n1\n").unwrap();
        }

        let storage = Arc::new(StorageProvider::for_url(&root).unwrap());
        let layout = SourceLayout::new(&root, "olist/raw");
        let guard = PreflightGuard::new(storage, layout.clone(), &default_tables());
        (dir, guard, layout)
    }

    fn all_files() -> Vec<String> {
        default_tables().into_iter().map(|m| m.file).collect()
    }

    #[tokio::test]
    async fn test_all_files_present() {
        let files = all_files();
        let names: Vec<&str> = files.iter().map(String::as_str).collect();
        let (_dir, guard, _) = setup(&names);

        let report = guard.check(&BATCH.parse().unwrap()).await.unwrap();
        assert_eq!(report.present.len(), 9);
        assert!(report.unexpected.is_empty());
    }

    #[tokio::test]
    async fn test_missing_orders_reported_exactly() {
        let files = all_files();
        let names: Vec<&str> = files
            .iter()
            .map(String::as_str)
            .filter(|f| *f != "olist_orders_dataset.csv")
            .collect();
        let (_dir, guard, layout) = setup(&names);
        let batch: BatchDate = BATCH.parse().unwrap();

        let err = guard.check(&batch).await.unwrap_err();
        match err {
            PreflightError::MissingFiles { missing } => {
                assert_eq!(
                    missing,
                    vec![layout.object_uri(&batch, "olist_orders_dataset.csv")]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_folder() {
        let (_dir, guard, _) = setup(&[]);
        let err = guard.check(&"2018-10-02".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, PreflightError::EmptyBatch { .. }));
        assert!(err.to_string().contains("dt=2018-10-02"));
    }

    #[tokio::test]
    async fn test_unexpected_files_tolerated() {
        let mut files = all_files();
        files.push("README.txt".to_string());
        let names: Vec<&str> = files.iter().map(String::as_str).collect();
        let (_dir, guard, _) = setup(&names);

        let report = guard.check(&BATCH.parse().unwrap()).await.unwrap();
        assert_eq!(report.unexpected.len(), 1);
        assert!(report.unexpected[0].ends_with("dt=2018-10-01/README.txt"));
    }
}
