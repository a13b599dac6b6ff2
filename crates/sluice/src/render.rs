//! Text output for the `plan` and `render` subcommands.

use crate::batch::BatchDate;
use crate::config::{PipelineConfig, PipelineKey};
use crate::dag::{Step, build_graph};
use crate::error::PipelineError;
use crate::jobs::Job;

/// Describe the tasks of a pipeline run without touching anything.
pub fn plan(
    key: &PipelineKey,
    config: &PipelineConfig,
    batch: &BatchDate,
    max_parallel: Option<usize>,
) -> Result<String, PipelineError> {
    let graph = build_graph(config, batch)?;
    let order = graph.validate()?;

    let mut out = String::new();
    out.push_str(&format!("pipeline: {key}\n"));
    out.push_str(&format!("batch_date: {batch}\n"));
    out.push_str(&format!("policy: {}\n", config.policy));
    if let Some(description) = config.render_description(batch) {
        out.push_str(&format!("description: {description}\n"));
    }
    out.push_str(&format!("owner: {}\n", config.owner));
    out.push_str(&format!("tags: [{}]\n", config.tags.join(", ")));
    match config.effective_pool() {
        Some(pool) => out.push_str(&format!("pool: {} ({} slots)\n", pool.name, pool.slots)),
        None => out.push_str("pool: none\n"),
    }
    match max_parallel {
        Some(slots) => out.push_str(&format!("max_parallel: {slots}\n")),
        None => out.push_str("max_parallel: unbounded\n"),
    }
    out.push_str(&format!(
        "max_active_runs: {}\n",
        config.effective_max_active_runs()
    ));
    out.push_str(&format!(
        "retries: {} (delay {}s)\n",
        config.retries, config.retry_delay_secs
    ));
    out.push_str("tasks:\n");

    for id in order {
        let Some(step) = graph.payload(id.as_str()) else {
            continue;
        };
        let upstream: Vec<&str> = graph
            .upstream(id.as_str())
            .into_iter()
            .map(|id| id.as_str())
            .collect();
        out.push_str(&format!("  {id}\n"));
        out.push_str(&format!("    step: {step}\n"));
        if upstream.is_empty() {
            out.push_str("    upstream: -\n");
        } else {
            out.push_str(&format!("    upstream: {}\n", upstream.join(", ")));
        }
    }
    Ok(out)
}

/// Render the job configurations of a pipeline run, plus each merge script
/// as plain SQL.
pub fn jobs(config: &PipelineConfig, batch: &BatchDate) -> Result<String, PipelineError> {
    let graph = build_graph(config, batch)?;
    let order = graph.validate()?;

    let mut sections = Vec::new();
    for id in order {
        let Some(Step::Job(job)) = graph.payload(id.as_str()) else {
            continue;
        };
        let mut section = format!("-- {id}\n");
        section.push_str(&serde_json::to_string_pretty(&job.configuration())?);
        section.push('\n');
        if let Job::Merge(merge) = job {
            section.push('\n');
            section.push_str(&merge.script());
            section.push('\n');
        }
        sections.push(section);
    }
    Ok(sections.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Policy;
    use crate::dag::{load_task_id, merge_task_id};

    fn batch() -> BatchDate {
        "2018-10-01".parse().unwrap()
    }

    #[test]
    fn test_plan_serial() {
        let config = PipelineConfig {
            policy: Policy::Serial,
            description: Some("Olist batch (dt={ds})".to_string()),
            ..PipelineConfig::default()
        };
        let text = plan(
            &PipelineKey::new("02_olist_raw_ingestion_serial"),
            &config,
            &batch(),
            Some(1),
        )
        .unwrap();

        assert!(text.contains("policy: serial\n"));
        assert!(text.contains("description: Olist batch (dt=2018-10-01)\n"));
        assert!(text.contains("pool: bigquery_serial (1 slots)\n"));
        assert!(text.contains("max_active_runs: 1\n"));
        assert!(text.contains("  check_source_files\n    step: check source files for dt=2018-10-01\n    upstream: -\n"));
        assert!(text.contains(&format!(
            "  {}\n",
            load_task_id("geolocation")
        )));
        assert!(text.contains(&format!("    upstream: {}\n", merge_task_id("customers"))));

        let check = text.find("check_source_files").unwrap();
        let raw = text.find("  ensure_raw_dataset").unwrap();
        assert!(check < raw);
    }

    #[test]
    fn test_plan_parallel() {
        let text = plan(
            &PipelineKey::new("01_olist_raw_ingestion"),
            &PipelineConfig::default(),
            &batch(),
            None,
        )
        .unwrap();
        assert!(!text.contains("check_source_files"));
        assert!(text.contains("pool: none\n"));
        assert!(text.contains("max_parallel: unbounded\n"));
        assert_eq!(text.matches("    upstream: ensure_tmp_dataset\n").count(), 9);
    }

    #[test]
    fn test_jobs_render_load_and_merge() {
        let text = jobs(&PipelineConfig::default(), &batch()).unwrap();
        assert_eq!(text.matches("\"writeDisposition\": \"WRITE_TRUNCATE\"").count(), 9);
        assert_eq!(text.matches("\"useLegacySql\": false").count(), 9);
        assert_eq!(text.matches("\nBEGIN TRANSACTION;\n").count(), 9);
        assert!(text.contains(&format!("-- {}\n", merge_task_id("orders"))));
        assert!(!text.contains("ensure_raw_dataset"));
    }
}
