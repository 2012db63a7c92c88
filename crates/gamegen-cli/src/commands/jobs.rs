//! Job commands.

use anyhow::Result;
use gamegen_core::{Job, JobConfig, JobId, JobLogEntry, JobStats};
use serde::Deserialize;
use serde_json::json;

use super::ProviderArg;
use crate::client::ApiClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    job_ids: Vec<JobId>,
    count: usize,
    #[serde(default)]
    comparison: Option<Comparison>,
}

#[derive(Debug, Deserialize)]
struct Comparison {
    pairs: Vec<ComparisonPair>,
}

#[derive(Debug, Deserialize)]
struct ComparisonPair {
    default: JobId,
    alternate: JobId,
}

pub async fn generate(
    client: &ApiClient,
    count: u32,
    compare: bool,
    model: Option<String>,
    provider: Option<ProviderArg>,
) -> Result<()> {
    let options = JobConfig {
        provider: provider.map(Into::into).unwrap_or_default(),
        model,
        compare: compare.then_some(true),
        ..Default::default()
    };
    let body = json!({ "count": count, "options": options });

    let response: GenerateResponse = client.post("generate", &body).await?;
    let ids: Vec<String> = response.job_ids.iter().map(ToString::to_string).collect();
    println!("Queued {} job(s): {}", response.count, ids.join(", "));
    for pair in response.comparison.iter().flat_map(|c| &c.pairs) {
        println!("  compare {} (default) with {} (alternate)", pair.default, pair.alternate);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    jobs: Vec<Job>,
}

pub async fn list(client: &ApiClient, status: Option<String>, limit: u32) -> Result<()> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(status) = status {
        query.push(("status", status));
    }

    let response: JobsResponse = client.get("jobs", &query).await?;
    if response.jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<10} {:<20} NAME", "ID", "STATUS", "PROVIDER", "CREATED");
    for job in &response.jobs {
        println!("{}", job_row(job));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job: Job,
}

pub async fn show(client: &ApiClient, id: i64) -> Result<()> {
    let response: JobResponse = client.get(&format!("jobs/{id}"), &[]).await?;
    let job = response.job;

    println!("Job {}", job.id);
    println!("  Status:   {}", job.status);
    println!("  Name:     {}", job.display_name());
    println!("  Provider: {}", job.config.provider);
    if let Some(source) = job.config.source_job_id {
        println!("  Source:   job {source}");
    }
    if let Some(error) = &job.error {
        println!("  Error:    {error}");
    }
    println!("  Created:  {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = job.completed_at {
        println!("  Finished: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if !job.phase_outputs.is_empty() {
        println!(
            "  Outputs:\n{}",
            serde_json::to_string_pretty(job.phase_outputs.as_map())?
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    logs: Vec<JobLogEntry>,
}

pub async fn logs(client: &ApiClient, id: i64) -> Result<()> {
    let response: LogsResponse = client.get(&format!("jobs/{id}/logs"), &[]).await?;
    for entry in &response.logs {
        println!("{}", log_line(entry));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    stats: JobStats,
}

pub async fn stats(client: &ApiClient) -> Result<()> {
    let response: StatsResponse = client.get("stats", &[]).await?;
    let stats = response.stats;
    println!("Queued:    {}", stats.queued);
    println!("Running:   {}", stats.running);
    println!("Completed: {}", stats.completed);
    println!("Failed:    {}", stats.failed);
    println!("Total:     {}", stats.total);
    Ok(())
}

fn job_row(job: &Job) -> String {
    format!(
        "{:<6} {:<10} {:<10} {:<20} {}",
        job.id.to_string(),
        job.status.as_str(),
        job.config.provider.to_string(),
        job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        job.display_name()
    )
}

fn log_line(entry: &JobLogEntry) -> String {
    format!(
        "{} [{:<5}] {}",
        entry.created_at.format("%H:%M:%S"),
        entry.level.as_str(),
        entry.message
    )
}
