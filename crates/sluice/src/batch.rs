//! Batch dates and the object storage layout of a batch.
//!
//! A batch is one day of source files. Its files live under
//! `<bucket_url>/<base_path>/dt=<YYYY-MM-DD>/` and its rows land in the
//! destination partition `load_date = <YYYY-MM-DD>`.

use chrono::{NaiveDate, Utc};
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fmt;
use std::str::FromStr;

use crate::error::{BatchDateError, BatchDateSnafu};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// The logical partition key of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchDate(NaiveDate);

impl BatchDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Current date in UTC.
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Folder segment holding the batch's files, e.g. `dt=2018-10-01`.
    pub fn folder(&self) -> String {
        format!("dt={self}")
    }
}

impl fmt::Display for BatchDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for BatchDate {
    type Err = BatchDateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
            .map(Self)
            .context(BatchDateSnafu { value })
    }
}

/// Where the source files of every batch are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    bucket_url: String,
    base_path: String,
}

impl SourceLayout {
    pub fn new(bucket_url: &str, base_path: &str) -> Self {
        Self {
            bucket_url: bucket_url.trim_end_matches('/').to_string(),
            base_path: base_path.trim_matches('/').to_string(),
        }
    }

    pub fn bucket_url(&self) -> &str {
        &self.bucket_url
    }

    /// Prefix of a batch, relative to the bucket.
    pub fn batch_prefix(&self, batch: &BatchDate) -> Path {
        if self.base_path.is_empty() {
            Path::from(batch.folder())
        } else {
            Path::from(format!("{}/{}", self.base_path, batch.folder()))
        }
    }

    /// Path of one source file, relative to the bucket.
    pub fn object_path(&self, batch: &BatchDate, file: &str) -> Path {
        self.batch_prefix(batch).child(file)
    }

    /// Full URI of the batch prefix.
    pub fn prefix_uri(&self, batch: &BatchDate) -> String {
        format!("{}/{}/", self.bucket_url, self.batch_prefix(batch))
    }

    /// Full URI of one source file, as handed to the warehouse.
    pub fn object_uri(&self, batch: &BatchDate, file: &str) -> String {
        format!("{}/{}", self.bucket_url, self.object_path(batch, file))
    }

    /// Full URI of an object given its path relative to the bucket.
    pub fn uri_for(&self, path: &Path) -> String {
        format!("{}/{}", self.bucket_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> BatchDate {
        "2018-10-01".parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let date = batch();
        assert_eq!(date.to_string(), "2018-10-01");
        assert_eq!(date.folder(), "dt=2018-10-01");
        assert_eq!(
            date.date(),
            NaiveDate::from_ymd_opt(2018, 10, 1).unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_other_formats() {
        for value in ["01/10/2018", "2018-13-01", "2018-10", ""] {
            let err = value.parse::<BatchDate>().unwrap_err();
            assert!(err.to_string().contains("expected YYYY-MM-DD"), "{value}");
        }
    }

    #[test]
    fn test_serde_as_plain_date() {
        let date: BatchDate = serde_yaml::from_str("2018-10-01").unwrap();
        assert_eq!(date, batch());
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"2018-10-01\"");
    }

    #[test]
    fn test_layout_paths() {
        let layout = SourceLayout::new("gs://olist-data-lake-nagela/", "/olist/raw/");
        let date = batch();

        assert_eq!(
            layout.batch_prefix(&date).as_ref(),
            "olist/raw/dt=2018-10-01"
        );
        assert_eq!(
            layout.object_uri(&date, "olist_orders_dataset.csv"),
            "gs://olist-data-lake-nagela/olist/raw/dt=2018-10-01/olist_orders_dataset.csv"
        );
        assert_eq!(
            layout.prefix_uri(&date),
            "gs://olist-data-lake-nagela/olist/raw/dt=2018-10-01/"
        );
    }

    #[test]
    fn test_layout_without_base_path() {
        let layout = SourceLayout::new("/data/lake", "");
        assert_eq!(
            layout.object_path(&batch(), "a.csv").as_ref(),
            "dt=2018-10-01/a.csv"
        );
    }
}
