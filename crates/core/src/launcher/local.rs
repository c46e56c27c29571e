use std::{
    collections::HashMap,
    fs::File,
    path::PathBuf,
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::{AgentJob, JobBackend, JobCount, JobKind, LaunchSpec};
use crate::{config::LauncherConfig, error::LauncherError, Result};

/// Runs every agent as a child process of this host.
pub struct LocalBackend {
    program: PathBuf,
    log_dir: PathBuf,
    children: HashMap<JobKind, Vec<Child>>,
}

impl LocalBackend {
    pub fn new(program: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            log_dir: log_dir.into(),
            children: HashMap::new(),
        }
    }

    /// Defaults to re-running the current executable, logging into the temp dir.
    pub fn from_config(config: &LauncherConfig) -> Result<Self> {
        let program = match &config.agent_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let log_dir = config.log_dir.clone().unwrap_or_else(std::env::temp_dir);
        Ok(Self::new(program, log_dir))
    }

    pub fn log_path(&self, kind: JobKind, slot: usize) -> PathBuf {
        self.log_dir
            .join(format!("{}-{}-{slot}.log", kind.tag(), std::process::id()))
    }
}

#[async_trait]
impl JobBackend for LocalBackend {
    async fn start(&mut self, job: &AgentJob, spec: &LaunchSpec, slot: usize) -> Result<()> {
        let log_path = self.log_path(job.kind, slot);
        let stdout = File::create(&log_path)?;
        let stderr = stdout.try_clone()?;
        let args = job.cli_args(spec);
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| LauncherError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        info!(
            kind = %job.kind,
            slot,
            pid = child.id(),
            log = %log_path.display(),
            "started local agent"
        );
        self.children.entry(job.kind).or_default().push(child);
        Ok(())
    }

    async fn count(&mut self, kind: JobKind) -> Result<JobCount> {
        let mut running = 0;
        for child in self.children.get_mut(&kind).into_iter().flatten() {
            match child.try_wait() {
                Ok(None) => running += 1,
                Ok(Some(_)) => {}
                Err(e) => warn!(%kind, "failed to poll agent process: {e}"),
            }
        }
        Ok(JobCount {
            running,
            queued: None,
        })
    }
}
