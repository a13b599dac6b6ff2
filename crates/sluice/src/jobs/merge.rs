//! Replace one batch partition of a destination table from its staging table.
//!
//! The script creates the partitioned destination table when absent (zero
//! rows, staging columns plus metadata), deletes the batch partition, then
//! inserts the staging rows stamped with the batch metadata.
//!
//! `CREATE TABLE` is not allowed inside a BigQuery transaction, so with
//! `atomic` set only the delete and insert share a transaction. Without it a
//! failed insert leaves the partition empty until the step is re-run.

use serde::Serialize;

use crate::batch::{BatchDate, SourceLayout};
use crate::config::{TableMapping, WarehouseConfig};

use super::{TableRef, escape_literal};

/// Columns appended to every destination row, in order.
pub const METADATA_COLUMNS: [&str; 4] = ["load_date", "ingestion_ts", "source_file", "source_uri"];

/// `JobConfigurationQuery` as sent to the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfiguration {
    pub query: String,
    pub use_legacy_sql: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeJob {
    /// Logical table name.
    pub table: String,
    pub staging: TableRef,
    pub destination: TableRef,
    pub batch: BatchDate,
    pub source_file: String,
    pub source_uri: String,
    pub atomic: bool,
}

impl MergeJob {
    pub fn new(
        layout: &SourceLayout,
        warehouse: &WarehouseConfig,
        mapping: &TableMapping,
        batch: &BatchDate,
    ) -> Self {
        Self {
            table: mapping.table.clone(),
            staging: TableRef::staging(warehouse, &mapping.table),
            destination: TableRef::destination(warehouse, &mapping.table),
            batch: *batch,
            source_file: mapping.file.clone(),
            source_uri: layout.object_uri(batch, &mapping.file),
            atomic: warehouse.atomic_merge,
        }
    }

    /// Name of the partitioning column.
    pub fn partition_column(&self) -> &'static str {
        METADATA_COLUMNS[0]
    }

    fn select_with_metadata(&self) -> String {
        let ds = self.batch.to_string();
        format!(
            "SELECT\n  t.*,\n  DATE('{ds}') AS load_date,\n  CURRENT_TIMESTAMP() AS ingestion_ts,\n  '{file}' AS source_file,\n  '{uri}' AS source_uri\nFROM {staging} AS t",
            file = escape_literal(&self.source_file),
            uri = escape_literal(&self.source_uri),
            staging = self.staging.quoted(),
        )
    }

    pub fn create_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {raw}\nPARTITION BY load_date AS\n{select}\nWHERE 1=0;",
            raw = self.destination.quoted(),
            select = self.select_with_metadata(),
        )
    }

    pub fn delete_statement(&self) -> String {
        format!(
            "DELETE FROM {raw}\nWHERE load_date = DATE('{ds}');",
            raw = self.destination.quoted(),
            ds = self.batch,
        )
    }

    pub fn insert_statement(&self) -> String {
        format!(
            "INSERT INTO {raw}\n{select};",
            raw = self.destination.quoted(),
            select = self.select_with_metadata(),
        )
    }

    /// The full multi-statement script.
    pub fn script(&self) -> String {
        let mut statements = vec![self.create_statement()];
        if self.atomic {
            statements.push("BEGIN TRANSACTION;".to_string());
        }
        statements.push(self.delete_statement());
        statements.push(self.insert_statement());
        if self.atomic {
            statements.push("COMMIT TRANSACTION;".to_string());
        }
        statements.join("\n\n")
    }

    pub fn configuration(&self) -> QueryConfiguration {
        QueryConfiguration {
            query: self.script(),
            use_legacy_sql: false,
        }
    }
}
