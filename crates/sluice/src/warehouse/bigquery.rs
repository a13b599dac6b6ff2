//! BigQuery REST API backend.
//!
//! Datasets are created with `datasets.insert` (a 409 means it already
//! exists). Jobs are submitted with `jobs.insert` under a caller-chosen job id
//! and polled with `jobs.get` until their state is `DONE`; an `errorResult`
//! on a finished job is a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use sluice_core::emit;
use sluice_core::metrics::events::{
    RequestStatus, WarehouseJob, WarehouseJobDuration, WarehouseOperation,
};

use crate::config::WarehouseConfig;
use crate::error::{HttpSnafu, WarehouseError};
use crate::jobs::{DatasetRef, Job, JobConfiguration};

use super::auth::TokenProvider;
use super::{DatasetStatus, JobSummary, Warehouse};

const BACKEND: &str = "bigquery";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetInsert<'a> {
    dataset_reference: DatasetReference<'a>,
    location: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobInsert<'a> {
    job_reference: &'a JobReference,
    configuration: JobConfiguration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
    #[serde(default)]
    query: Option<QueryStatistics>,
}

// int64 values are encoded as JSON strings by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryStatistics {
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl JobResource {
    fn is_done(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "DONE")
    }

    fn rows(&self) -> Option<u64> {
        let statistics = self.statistics.as_ref()?;
        statistics
            .load
            .as_ref()
            .and_then(|l| l.output_rows.as_deref())
            .or_else(|| {
                statistics
                    .query
                    .as_ref()
                    .and_then(|q| q.num_dml_affected_rows.as_deref())
            })
            .and_then(|rows| rows.parse().ok())
    }

    fn error(&self, job_id: &str) -> Option<WarehouseError> {
        let error = self.status.as_ref()?.error_result.as_ref()?;
        Some(WarehouseError::JobFailed {
            job_id: job_id.to_string(),
            reason: error.reason.clone().unwrap_or_else(|| "unknown".to_string()),
            message: error.message.clone().unwrap_or_default(),
        })
    }
}

/// Client for one project and location.
#[derive(Debug)]
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    api_base: String,
    project: String,
    location: String,
    poll_interval: Duration,
    tokens: TokenProvider,
}

impl BigQueryWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sluice/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(HttpSnafu)?;
        let tokens = TokenProvider::from_env(client.clone());
        Ok(Self::with_tokens(config, client, tokens))
    }

    pub fn with_tokens(
        config: &WarehouseConfig,
        client: reqwest::Client,
        tokens: TokenProvider,
    ) -> Self {
        Self {
            client,
            api_base: config.api_base().to_string(),
            project: config.project.clone(),
            location: config.location.clone(),
            poll_interval: config.poll_interval(),
            tokens,
        }
    }

    fn datasets_url(&self, project: &str) -> String {
        format!("{}/projects/{project}/datasets", self.api_base)
    }

    fn jobs_url(&self) -> String {
        format!("{}/projects/{}/jobs", self.api_base, self.project)
    }

    async fn insert_job(
        &self,
        reference: &JobReference,
        job: &Job,
    ) -> Result<JobResource, WarehouseError> {
        let body = JobInsert {
            job_reference: reference,
            configuration: job.configuration(),
        };
        let response = self
            .client
            .post(self.jobs_url())
            .bearer_auth(self.tokens.token().await?)
            .json(&body)
            .send()
            .await
            .context(HttpSnafu)?;
        parse_response(response, "jobs.insert").await
    }

    async fn get_job(&self, job_id: &str) -> Result<JobResource, WarehouseError> {
        let response = self
            .client
            .get(format!("{}/{job_id}", self.jobs_url()))
            .query(&[("location", self.location.as_str())])
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await
            .context(HttpSnafu)?;
        parse_response(response, "jobs.get").await
    }

    async fn wait_for_job(
        &self,
        job_id: &str,
        mut job: JobResource,
    ) -> Result<JobResource, WarehouseError> {
        while !job.is_done() {
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_job(job_id).await?;
            debug!(
                job_id,
                state = job.status.as_ref().map(|s| s.state.as_str()).unwrap_or("UNKNOWN"),
                "Polled job"
            );
        }
        match job.error(job_id) {
            Some(err) => Err(err),
            None => Ok(job),
        }
    }
}

async fn parse_response(
    response: reqwest::Response,
    operation: &str,
) -> Result<JobResource, WarehouseError> {
    let status = response.status();
    if !status.is_success() {
        return Err(api_error(response, operation).await);
    }
    response.json().await.context(HttpSnafu)
}

async fn api_error(response: reqwest::Response, operation: &str) -> WarehouseError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    WarehouseError::Api {
        operation: operation.to_string(),
        status,
        message,
    }
}

fn operation_of(job: &Job) -> WarehouseOperation {
    match job {
        Job::Load(_) => WarehouseOperation::Load,
        Job::Merge(_) => WarehouseOperation::Query,
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<DatasetStatus, WarehouseError> {
        let start = Instant::now();
        let body = DatasetInsert {
            dataset_reference: DatasetReference {
                project_id: &dataset.project,
                dataset_id: &dataset.dataset,
            },
            location: &dataset.location,
        };

        let result: Result<DatasetStatus, WarehouseError> = async {
            let response = self
                .client
                .post(self.datasets_url(&dataset.project))
                .bearer_auth(self.tokens.token().await?)
                .json(&body)
                .send()
                .await
                .context(HttpSnafu)?;

            match response.status() {
                status if status.is_success() => Ok(DatasetStatus::Created),
                reqwest::StatusCode::CONFLICT => Ok(DatasetStatus::AlreadyExists),
                _ => Err(api_error(response, "datasets.insert").await),
            }
        }
        .await;

        emit!(WarehouseJob {
            operation: WarehouseOperation::EnsureDataset,
            status: RequestStatus::of(&result),
            backend: BACKEND,
        });
        emit!(WarehouseJobDuration {
            operation: WarehouseOperation::EnsureDataset,
            duration: start.elapsed(),
        });
        if let Ok(status) = &result {
            info!(dataset = %dataset, location = %dataset.location, status = %status, "Ensured dataset");
        }
        result
    }

    async fn run_job(&self, job_id: &str, job: &Job) -> Result<JobSummary, WarehouseError> {
        let start = Instant::now();
        let operation = operation_of(job);
        let reference = JobReference {
            project_id: self.project.clone(),
            job_id: job_id.to_string(),
            location: Some(self.location.clone()),
        };

        info!(
            job_id,
            operation = operation.as_str(),
            destination = %job.destination(),
            "Submitting job"
        );
        let result: Result<JobResource, WarehouseError> = async {
            let submitted = self.insert_job(&reference, job).await?;
            self.wait_for_job(job_id, submitted).await
        }
        .await;

        emit!(WarehouseJob {
            operation,
            status: RequestStatus::of(&result),
            backend: BACKEND,
        });
        emit!(WarehouseJobDuration {
            operation,
            duration: start.elapsed(),
        });

        let finished = result?;
        let rows = finished.rows();
        info!(
            job_id,
            rows = ?rows,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job finished"
        );
        Ok(JobSummary {
            job_id: job_id.to_string(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SourceLayout;
    use crate::config::TableMapping;
    use crate::jobs::LoadJob;
    use serde_json::json;

    #[test]
    fn test_job_insert_body() {
        let config = WarehouseConfig::default();
        let layout = SourceLayout::new("gs://olist-data-lake-nagela", "olist/raw");
        let job = Job::Load(LoadJob::new(
            &layout,
            &config,
            &TableMapping::new("olist_sellers_dataset.csv", "sellers"),
            &"2018-10-01".parse().unwrap(),
        ));
        let reference = JobReference {
            project_id: config.project.clone(),
            job_id: "sluice_job".to_string(),
            location: Some("EU".to_string()),
        };
        let body = serde_json::to_value(JobInsert {
            job_reference: &reference,
            configuration: job.configuration(),
        })
        .unwrap();

        assert_eq!(
            body["jobReference"],
            json!({"projectId": "olist-batch-data-platform", "jobId": "sluice_job", "location": "EU"})
        );
        assert_eq!(body["configuration"]["load"]["writeDisposition"], "WRITE_TRUNCATE");
    }

    #[test]
    fn test_dataset_insert_body() {
        let body = serde_json::to_value(DatasetInsert {
            dataset_reference: DatasetReference {
                project_id: "olist-batch-data-platform",
                dataset_id: "olist_raw",
            },
            location: "EU",
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "datasetReference": {"projectId": "olist-batch-data-platform", "datasetId": "olist_raw"},
                "location": "EU"
            })
        );
    }

    #[test]
    fn test_job_resource_done_with_error() {
        let job: JobResource = serde_json::from_value(json!({
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "invalid", "message": "Too many values in row"}
            }
        }))
        .unwrap();
        assert!(job.is_done());
        let err = job.error("job-1").unwrap();
        assert_eq!(
            err.to_string(),
            "Job job-1 failed (invalid): Too many values in row"
        );
    }

    #[test]
    fn test_job_resource_rows() {
        let load: JobResource = serde_json::from_value(json!({
            "status": {"state": "DONE"},
            "statistics": {"load": {"outputRows": "99441"}}
        }))
        .unwrap();
        assert_eq!(load.rows(), Some(99441));
        assert!(load.error("job").is_none());

        let query: JobResource = serde_json::from_value(json!({
            "status": {"state": "RUNNING"},
            "statistics": {"query": {"numDmlAffectedRows": "12"}}
        }))
        .unwrap();
        assert!(!query.is_done());
        assert_eq!(query.rows(), Some(12));
    }

    #[test]
    fn test_urls_follow_api_base() {
        let config = WarehouseConfig {
            api_base: Some("http://localhost:9050/bigquery/v2/".to_string()),
            ..WarehouseConfig::default()
        };
        let warehouse = BigQueryWarehouse::with_tokens(
            &config,
            reqwest::Client::new(),
            TokenProvider::fixed("token"),
        );
        assert_eq!(
            warehouse.jobs_url(),
            "http://localhost:9050/bigquery/v2/projects/olist-batch-data-platform/jobs"
        );
        assert_eq!(
            warehouse.datasets_url("p"),
            "http://localhost:9050/bigquery/v2/projects/p/datasets"
        );
        assert_eq!(warehouse.backend(), "bigquery");
    }
}
