use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::{AgentJob, JobBackend, JobCount, JobKind, LaunchSpec};
use crate::{
    config::{JobDescriptors, LauncherConfig},
    error::LauncherError,
    Result,
};

/// Submits agents as asynchronous cloud batch jobs.
///
/// Single-shot and fleet jobs run in the primary region, closest to most validators. Grouped
/// jobs only need one winner, so they are spread over every configured region.
pub struct BatchBackend {
    program: String,
    primary_region: String,
    regions: Vec<String>,
    descriptors: JobDescriptors,
}

impl BatchBackend {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            program: config.program.clone(),
            primary_region: config.primary_region.clone(),
            regions: config.regions.clone(),
            descriptors: config.descriptors.clone(),
        }
    }

    fn region_for(&self, kind: JobKind, slot: usize) -> &str {
        match kind {
            JobKind::Grouped if !self.regions.is_empty() => {
                &self.regions[slot % self.regions.len()]
            }
            _ => &self.primary_region,
        }
    }

    fn regions_for(&self, kind: JobKind) -> BTreeSet<&str> {
        match kind {
            JobKind::Grouped if !self.regions.is_empty() => {
                self.regions.iter().map(String::as_str).collect()
            }
            _ => BTreeSet::from([self.primary_region.as_str()]),
        }
    }

    pub fn submit_args(&self, job: &AgentJob, spec: &LaunchSpec, slot: usize) -> Vec<String> {
        let descriptor = match job.kind {
            JobKind::SingleShot => &self.descriptors.single_shot,
            JobKind::Grouped => &self.descriptors.grouped,
            JobKind::Fleet => &self.descriptors.fleet,
        };
        let substitutions = job
            .substitutions(spec)
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        vec![
            "builds".to_owned(),
            "submit".to_owned(),
            format!("--config={}", descriptor.display()),
            format!("--region={}", self.region_for(job.kind, slot)),
            "--no-source".to_owned(),
            "--async".to_owned(),
            format!("--substitutions={substitutions}"),
        ]
    }

    pub fn list_args(&self, region: &str, status: &str, kind: JobKind) -> Vec<String> {
        vec![
            "builds".to_owned(),
            "list".to_owned(),
            format!("--region={region}"),
            format!("--filter=status=\"{status}\" AND tags=\"{}\"", kind.tag()),
            "--format=value(id)".to_owned(),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| LauncherError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(LauncherError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn count_in(&self, region: &str, status: &str, kind: JobKind) -> Result<usize> {
        let out = self.run(&self.list_args(region, status, kind)).await?;
        Ok(out.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

#[async_trait]
impl JobBackend for BatchBackend {
    async fn start(&mut self, job: &AgentJob, spec: &LaunchSpec, slot: usize) -> Result<()> {
        let args = self.submit_args(job, spec, slot);
        self.run(&args).await?;
        info!(
            kind = %job.kind,
            slot,
            region = self.region_for(job.kind, slot),
            "submitted batch agent"
        );
        Ok(())
    }

    async fn count(&mut self, kind: JobKind) -> Result<JobCount> {
        let mut running = 0;
        let mut queued = 0;
        for region in self.regions_for(kind) {
            running += self.count_in(region, "WORKING", kind).await?;
            queued += self.count_in(region, "QUEUED", kind).await?;
        }
        Ok(JobCount {
            running,
            queued: Some(queued),
        })
    }
}
