//! Starting and counting the racing agents.
//!
//! [`JobLauncher`] is what the orchestrator talks to. The shared [`AgentLauncher`] implements it
//! on top of a [`JobBackend`], which only knows how to start one job and count running ones:
//! [`local::LocalBackend`] spawns processes on this host, [`batch::BatchBackend`] submits
//! asynchronous jobs to a cloud batch service.

pub mod batch;
pub mod local;

use std::{collections::HashMap, fmt, path::PathBuf, time::Duration};

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::info;

use crate::{
    config::{LauncherStrategy, Network, RaceConfig},
    error::ConfigError,
    gas::GasProfile,
    Result,
};

pub use batch::BatchBackend;
pub use local::LocalBackend;

/// Spawns agents as child processes of this host.
pub type LocalLauncher = AgentLauncher<LocalBackend>;
/// Submits agents as cloud batch jobs.
pub type BatchLauncher = AgentLauncher<BatchBackend>;

/// Accounts sharing one grouped-agent resource.
pub const GROUP_SIZE: usize = 3;
/// Fleet accounts beyond this many run the filler profile.
pub const HEAVY_FLEET_SIZE: usize = 27;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum JobKind {
    SingleShot,
    Grouped,
    Fleet,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::SingleShot, JobKind::Grouped, JobKind::Fleet];

    /// Label attached to every job of this kind so status queries can find it.
    pub fn tag(&self) -> String {
        format!("stampede_{}", self.to_string().replace('-', "_"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentGroup {
    pub resource: Address,
    pub participants: Vec<Address>,
}

/// Splits `participants` into groups of [`GROUP_SIZE`], pairing group `i` with resource
/// `i % resources.len()`.
pub fn partition_groups(
    resources: &[Address],
    participants: &[Address],
) -> std::result::Result<Vec<AgentGroup>, ConfigError> {
    if resources.is_empty() {
        return Err(ConfigError::NoResources);
    }
    if participants.len() % GROUP_SIZE != 0 {
        return Err(ConfigError::GroupSize {
            participants: participants.len(),
            group_size: GROUP_SIZE,
        });
    }
    Ok(participants
        .chunks(GROUP_SIZE)
        .enumerate()
        .map(|(i, chunk)| AgentGroup {
            resource: resources[i % resources.len()],
            participants: chunk.to_vec(),
        })
        .collect())
}

/// `resources` rotated so that `first` leads; agents of a group try their own resource first.
pub fn resources_from(first: Address, resources: &[Address]) -> Vec<Address> {
    let start = resources.iter().position(|r| *r == first).unwrap_or(0);
    resources[start..]
        .iter()
        .chain(&resources[..start])
        .copied()
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FleetTiers {
    pub heavy: Vec<Address>,
    pub filler: Vec<Address>,
}

pub fn split_fleet(participants: &[Address]) -> FleetTiers {
    let cut = participants.len().min(HEAVY_FLEET_SIZE);
    FleetTiers {
        heavy: participants[..cut].to_vec(),
        filler: participants[cut..].to_vec(),
    }
}

/// What every launched agent needs to know about the race.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub target: Address,
    pub network: Network,
    pub gas: GasProfile,
    pub config_path: PathBuf,
}

/// One agent to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentJob {
    pub kind: JobKind,
    pub gas: GasProfile,
    pub accounts: Vec<Address>,
    pub resources: Vec<Address>,
}

fn join_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl AgentJob {
    /// Arguments for `stampede agent ...` that start this job.
    pub fn cli_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            "agent".to_owned(),
            self.kind.to_string(),
            "--config".to_owned(),
            spec.config_path.display().to_string(),
            "--network".to_owned(),
            spec.network.to_string(),
            "--target".to_owned(),
            spec.target.to_string(),
            "--max-fee".to_owned(),
            self.gas.max_fee_gwei.to_string(),
            "--priority-fee".to_owned(),
            self.gas.priority_fee_gwei.to_string(),
            "--gas-limit".to_owned(),
            self.gas.gas_limit.to_string(),
        ];
        if !self.accounts.is_empty() {
            args.push("--accounts".to_owned());
            args.push(join_addresses(&self.accounts));
        }
        if !self.resources.is_empty() {
            args.push("--resources".to_owned());
            args.push(join_addresses(&self.resources));
        }
        args
    }

    /// Substitution variables for a batch job descriptor.
    pub fn substitutions(&self, spec: &LaunchSpec) -> Vec<(String, String)> {
        let mut subs = vec![
            ("_TAG".to_owned(), self.kind.tag()),
            ("_TARGET".to_owned(), spec.target.to_string()),
            ("_NETWORK".to_owned(), spec.network.to_string()),
            ("_MAX_FEE".to_owned(), self.gas.max_fee_gwei.to_string()),
            (
                "_PRIORITY_FEE".to_owned(),
                self.gas.priority_fee_gwei.to_string(),
            ),
            ("_GAS_LIMIT".to_owned(), self.gas.gas_limit.to_string()),
        ];
        for (i, account) in self.accounts.iter().enumerate() {
            subs.push((format!("_ACCOUNT_{i}"), account.to_string()));
        }
        for (i, resource) in self.resources.iter().enumerate() {
            subs.push((format!("_RESOURCE_{i}"), resource.to_string()));
        }
        subs
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobCount {
    pub running: usize,
    /// Jobs accepted but not started yet; `None` when the backend has no queue.
    pub queued: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatusRow {
    pub kind: JobKind,
    pub expected: usize,
    pub count: JobCount,
}

/// Expected versus running jobs per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub rows: Vec<JobStatusRow>,
}

impl JobStatus {
    pub fn is_under_provisioned(&self) -> bool {
        self.rows.iter().any(|row| row.count.running < row.expected)
    }

    pub fn row(&self, kind: JobKind) -> Option<&JobStatusRow> {
        self.rows.iter().find(|row| row.kind == kind)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job Status:")?;
        for row in &self.rows {
            write!(
                f,
                "\n  {} ({}/{}) running",
                row.kind.tag(),
                row.count.running,
                row.expected
            )?;
            if let Some(queued) = row.count.queued {
                write!(f, ", {queued} queued")?;
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait JobLauncher: Send {
    /// Starts exactly one single-shot agent.
    async fn launch_single_shot(&mut self) -> Result<()>;

    /// Starts one agent per group of [`GROUP_SIZE`] participants. Returns how many were started.
    async fn launch_grouped_agents(
        &mut self,
        resources: &[Address],
        participants: &[Address],
    ) -> Result<usize>;

    /// Starts one fleet agent per participant, heavy tier first.
    async fn launch_fleet(&mut self, participants: &[Address]) -> Result<FleetTiers>;

    async fn fetch_status(&mut self) -> Result<JobStatus>;

    /// How long launched jobs need before they are worth counting.
    fn settle_time(&self) -> Duration;
}

/// Starts single jobs and counts running ones.
#[async_trait]
pub trait JobBackend: Send {
    /// Starts `job`. `slot` is the job's position among jobs of its kind.
    async fn start(&mut self, job: &AgentJob, spec: &LaunchSpec, slot: usize) -> Result<()>;

    async fn count(&mut self, kind: JobKind) -> Result<JobCount>;
}

pub struct AgentLauncher<B> {
    spec: LaunchSpec,
    backend: B,
    launched: HashMap<JobKind, usize>,
    settle_time: Duration,
}

impl<B: JobBackend> AgentLauncher<B> {
    pub fn new(spec: LaunchSpec, backend: B, settle_time: Duration) -> Self {
        Self {
            spec,
            backend,
            launched: HashMap::new(),
            settle_time,
        }
    }

    pub fn launched(&self, kind: JobKind) -> usize {
        self.launched.get(&kind).copied().unwrap_or_default()
    }

    async fn start(&mut self, job: AgentJob) -> Result<()> {
        let slot = self.launched(job.kind);
        self.backend.start(&job, &self.spec, slot).await?;
        *self.launched.entry(job.kind).or_default() += 1;
        Ok(())
    }
}

#[async_trait]
impl<B: JobBackend> JobLauncher for AgentLauncher<B> {
    async fn launch_single_shot(&mut self) -> Result<()> {
        self.start(AgentJob {
            kind: JobKind::SingleShot,
            gas: self.spec.gas,
            accounts: vec![],
            resources: vec![],
        })
        .await
    }

    async fn launch_grouped_agents(
        &mut self,
        resources: &[Address],
        participants: &[Address],
    ) -> Result<usize> {
        let groups = partition_groups(resources, participants)?;
        for group in &groups {
            self.start(AgentJob {
                kind: JobKind::Grouped,
                gas: self.spec.gas,
                accounts: group.participants.clone(),
                resources: resources_from(group.resource, resources),
            })
            .await?;
        }
        Ok(groups.len())
    }

    async fn launch_fleet(&mut self, participants: &[Address]) -> Result<FleetTiers> {
        let tiers = split_fleet(participants);
        let heavy = self.spec.gas.spam();
        let filler = self.spec.gas.filler();
        for (accounts, gas) in [(&tiers.heavy, heavy), (&tiers.filler, filler)] {
            for account in accounts {
                self.start(AgentJob {
                    kind: JobKind::Fleet,
                    gas,
                    accounts: vec![*account],
                    resources: vec![],
                })
                .await?;
            }
        }
        info!(
            heavy = tiers.heavy.len(),
            filler = tiers.filler.len(),
            "launched fleet"
        );
        Ok(tiers)
    }

    async fn fetch_status(&mut self) -> Result<JobStatus> {
        let mut rows = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            rows.push(JobStatusRow {
                kind,
                expected: self.launched(kind),
                count: self.backend.count(kind).await?,
            });
        }
        Ok(JobStatus { rows })
    }

    fn settle_time(&self) -> Duration {
        self.settle_time
    }
}

/// Builds a launcher once the race target is known.
pub trait LauncherFactory: Send + Sync {
    fn build(&self, spec: LaunchSpec) -> Result<Box<dyn JobLauncher>>;
}

/// Picks the strategy from configuration.
pub struct ConfiguredLauncherFactory {
    config: RaceConfig,
}

impl ConfiguredLauncherFactory {
    pub fn new(config: RaceConfig) -> Self {
        Self { config }
    }
}

impl LauncherFactory for ConfiguredLauncherFactory {
    fn build(&self, spec: LaunchSpec) -> Result<Box<dyn JobLauncher>> {
        let settle = self.config.settle_time();
        let launcher: Box<dyn JobLauncher> = match self.config.resolved_strategy() {
            LauncherStrategy::Batch => Box::new(BatchLauncher::new(
                spec,
                BatchBackend::from_config(&self.config.launcher),
                settle,
            )),
            LauncherStrategy::Local | LauncherStrategy::Auto => Box::new(LocalLauncher::new(
                spec,
                LocalBackend::from_config(&self.config.launcher)?,
                settle,
            )),
        };
        info!(
            strategy = ?self.config.resolved_strategy(),
            settle_secs = settle.as_secs(),
            "built job launcher"
        );
        Ok(launcher)
    }
}
