//! Load a batch CSV file into its staging table.

use object_store::path::Path;
use serde::Serialize;

use crate::batch::{BatchDate, SourceLayout};
use crate::config::{TableMapping, WarehouseConfig};

use super::{TableRef, TableReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    WriteTruncate,
    WriteAppend,
    WriteEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateDisposition {
    CreateIfNeeded,
    CreateNever,
}

/// `JobConfigurationLoad` as sent to the REST API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfiguration {
    pub source_uris: Vec<String>,
    pub destination_table: TableReference,
    pub source_format: SourceFormat,
    pub skip_leading_rows: u32,
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
    pub create_disposition: CreateDisposition,
    pub allow_quoted_newlines: bool,
    pub allow_jagged_rows: bool,
}

/// Replace a staging table with the rows of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadJob {
    /// Logical table name.
    pub table: String,
    pub file: String,
    /// Source object, relative to the bucket.
    pub object: Path,
    /// Full source URI.
    pub uri: String,
    pub destination: TableRef,
    pub batch: BatchDate,
}

impl LoadJob {
    pub fn new(
        layout: &SourceLayout,
        warehouse: &WarehouseConfig,
        mapping: &TableMapping,
        batch: &BatchDate,
    ) -> Self {
        Self {
            table: mapping.table.clone(),
            file: mapping.file.clone(),
            object: layout.object_path(batch, &mapping.file),
            uri: layout.object_uri(batch, &mapping.file),
            destination: TableRef::staging(warehouse, &mapping.table),
            batch: *batch,
        }
    }

    /// Header rows skipped at the top of the file.
    pub fn skip_leading_rows(&self) -> u32 {
        1
    }

    pub fn configuration(&self) -> LoadConfiguration {
        LoadConfiguration {
            source_uris: vec![self.uri.clone()],
            destination_table: self.destination.reference(),
            source_format: SourceFormat::Csv,
            skip_leading_rows: self.skip_leading_rows(),
            autodetect: true,
            write_disposition: WriteDisposition::WriteTruncate,
            create_disposition: CreateDisposition::CreateIfNeeded,
            allow_quoted_newlines: true,
            allow_jagged_rows: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobConfiguration;
    use serde_json::json;

    fn orders_job() -> LoadJob {
        let layout = SourceLayout::new("gs://olist-data-lake-nagela", "olist/raw");
        let mapping = TableMapping::new("olist_orders_dataset.csv", "orders");
        LoadJob::new(
            &layout,
            &WarehouseConfig::default(),
            &mapping,
            &"2018-10-01".parse().unwrap(),
        )
    }

    #[test]
    fn test_load_job_paths() {
        let job = orders_job();
        assert_eq!(
            job.object.as_ref(),
            "olist/raw/dt=2018-10-01/olist_orders_dataset.csv"
        );
        assert_eq!(
            job.destination.to_string(),
            "olist-batch-data-platform.olist_raw_tmp.orders__tmp"
        );
    }

    #[test]
    fn test_load_configuration_json() {
        let job = orders_job();
        let value = serde_json::to_value(JobConfiguration::Load(job.configuration())).unwrap();
        assert_eq!(
            value,
            json!({
                "load": {
                    "sourceUris": [
                        "gs://olist-data-lake-nagela/olist/raw/dt=2018-10-01/olist_orders_dataset.csv"
                    ],
                    "destinationTable": {
                        "projectId": "olist-batch-data-platform",
                        "datasetId": "olist_raw_tmp",
                        "tableId": "orders__tmp"
                    },
                    "sourceFormat": "CSV",
                    "skipLeadingRows": 1,
                    "autodetect": true,
                    "writeDisposition": "WRITE_TRUNCATE",
                    "createDisposition": "CREATE_IF_NEEDED",
                    "allowQuotedNewlines": true,
                    "allowJaggedRows": false
                }
            })
        );
    }
}
