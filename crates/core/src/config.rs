//! Race configuration, loaded from one TOML file per deployment.

use std::{path::PathBuf, time::Duration};

use alloy::primitives::{utils::parse_ether, Address, U256};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{accounts::Role, error::ConfigError, gas::GasProfile};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    #[default]
    Local,
    Testnet,
    Mainnet,
}

impl Network {
    /// Mainnet has enough ambient traffic of its own.
    pub fn wants_ambient_traffic(&self) -> bool {
        !matches!(self, Network::Mainnet)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RaceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub network: Network,
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
    pub rpc_urls: Vec<Url>,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub gas: GasProfile,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub thresholds: BalanceThresholds,
}

fn default_name() -> String {
    "stampede".to_owned()
}

fn default_block_time_ms() -> u64 {
    2_000
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ContractsConfig {
    /// Contract the fleet burns gas against.
    pub spam: Address,
    /// Contract the ambient traffic generators call.
    #[serde(default)]
    pub noise: Option<Address>,
    #[serde(default)]
    pub factory: Option<Address>,
    /// Pre-deployed launchpeg, for fixed provisioning.
    #[serde(default)]
    pub target: Option<Address>,
    /// Pre-deployed grouped-agent resources, for fixed provisioning.
    #[serde(default)]
    pub resources: Vec<Address>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    /// Compiler JSON artifact of the allowlist proxy deployed for grouped agents.
    #[serde(default)]
    pub allowlist_proxy: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub orchestrator: Option<Url>,
    #[serde(default)]
    pub monitor: Option<Url>,
    #[serde(default)]
    pub agent: Option<Url>,
}

/// Private keys per role, hex encoded.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct AccountsConfig {
    pub deployer: String,
    /// Receives recovered tokens; defaults to the deployer.
    #[serde(default)]
    pub treasury: Option<Address>,
    #[serde(default)]
    pub single_shot: Vec<String>,
    #[serde(default)]
    pub grouped: Vec<String>,
    #[serde(default)]
    pub fleet: Vec<String>,
    #[serde(default)]
    pub noise: Vec<String>,
    /// Prefunded development account that tops up the deployer on local networks.
    #[serde(default)]
    pub funder: Option<String>,
}

impl std::fmt::Debug for AccountsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountsConfig")
            .field("treasury", &self.treasury)
            .field("single_shot", &self.single_shot.len())
            .field("grouped", &self.grouped.len())
            .field("fleet", &self.fleet.len())
            .field("noise", &self.noise.len())
            .field("funder", &self.funder.is_some())
            .finish_non_exhaustive()
    }
}

impl AccountsConfig {
    pub fn keys(&self, role: Role) -> &[String] {
        match role {
            Role::Deployer => std::slice::from_ref(&self.deployer),
            Role::SingleShot => &self.single_shot,
            Role::Grouped => &self.grouped,
            Role::Fleet => &self.fleet,
            Role::Noise => &self.noise,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Seconds between invoking the trigger and the trigger timestamp.
    pub trigger_delay_secs: u64,
    /// Added on top of the delay to cover the trigger tx's own inclusion time.
    pub trigger_buffer_secs: u64,
    pub public_sale_offset_secs: u64,
    pub cooldown_secs: u64,
    pub stabilize_secs: u64,
    pub allowlist_settle_secs: u64,
    pub send_timeout_ms: u64,
    pub receipt_timeout_secs: u64,
    /// How long agents wait on their own submissions before reporting.
    pub agent_receipt_wait_secs: u64,
    pub teardown_grace_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            trigger_delay_secs: 60,
            trigger_buffer_secs: 2,
            public_sale_offset_secs: 60,
            cooldown_secs: 60,
            stabilize_secs: 5,
            allowlist_settle_secs: 2,
            send_timeout_ms: 500,
            receipt_timeout_secs: 120,
            agent_receipt_wait_secs: 10,
            teardown_grace_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherStrategy {
    /// Local processes on a local network, batch jobs everywhere else.
    #[default]
    Auto,
    Local,
    Batch,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct JobDescriptors {
    pub single_shot: PathBuf,
    pub grouped: PathBuf,
    pub fleet: PathBuf,
}

impl Default for JobDescriptors {
    fn default() -> Self {
        Self {
            single_shot: "batch/single_shot.yaml".into(),
            grouped: "batch/grouped.yaml".into(),
            fleet: "batch/fleet.yaml".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub strategy: LauncherStrategy,
    /// Overrides the strategy's default settle time.
    pub settle_secs: Option<u64>,
    /// Binary started for local agents; defaults to the running executable.
    pub agent_program: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    /// Cloud CLI used to submit and list batch jobs.
    pub program: String,
    pub primary_region: String,
    pub regions: Vec<String>,
    pub descriptors: JobDescriptors,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            strategy: LauncherStrategy::Auto,
            settle_secs: None,
            agent_program: None,
            log_dir: None,
            program: "gcloud".to_owned(),
            primary_region: "us-east4".to_owned(),
            regions: vec![
                "us-east4".to_owned(),
                "us-central1".to_owned(),
                "us-west1".to_owned(),
            ],
            descriptors: JobDescriptors::default(),
        }
    }
}

/// Minimum balances per role, in ether.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BalanceThresholds {
    pub deployer: String,
    pub single_shot: String,
    pub grouped: String,
    pub fleet: String,
    pub noise: String,
}

impl Default for BalanceThresholds {
    fn default() -> Self {
        Self {
            deployer: "2".to_owned(),
            single_shot: "2".to_owned(),
            grouped: "2".to_owned(),
            fleet: "3".to_owned(),
            noise: "1".to_owned(),
        }
    }
}

impl BalanceThresholds {
    pub fn minimum(&self, role: Role) -> Result<U256, ConfigError> {
        let (field, value) = match role {
            Role::Deployer => ("thresholds.deployer", &self.deployer),
            Role::SingleShot => ("thresholds.single_shot", &self.single_shot),
            Role::Grouped => ("thresholds.grouped", &self.grouped),
            Role::Fleet => ("thresholds.fleet", &self.fleet),
            Role::Noise => ("thresholds.noise", &self.noise),
        };
        parse_ether(value).map_err(|e| ConfigError::InvalidValue {
            field,
            reason: e.to_string(),
        })
    }
}

impl RaceConfig {
    /// Reads a configuration without validating it, so overrides can be applied first.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents).map_err(ConfigError::from)?)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg: RaceConfig = toml::from_str(toml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_urls.is_empty() {
            return Err(ConfigError::EndpointsEmpty);
        }
        if self.accounts.deployer.trim().is_empty() {
            return Err(ConfigError::Missing("accounts.deployer"));
        }
        if self.block_time_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "block_time_ms",
                reason: "must be positive".to_owned(),
            });
        }
        for role in Role::ALL {
            self.thresholds.minimum(role)?;
        }
        if self.runs_ambient_traffic() && self.accounts.noise.len() < 2 {
            return Err(ConfigError::NotEnoughNoiseAccounts(
                self.accounts.noise.len(),
            ));
        }
        Ok(())
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }

    /// Ambient traffic runs off mainnet, when a noise contract is configured.
    pub fn runs_ambient_traffic(&self) -> bool {
        self.network.wants_ambient_traffic() && self.contracts.noise.is_some()
    }

    /// Time allowed for launched jobs to come up before checking on them.
    pub fn settle_time(&self) -> Duration {
        let secs = self
            .launcher
            .settle_secs
            .unwrap_or(match self.resolved_strategy() {
                LauncherStrategy::Local => 10,
                _ => 100,
            });
        Duration::from_secs(secs)
    }

    pub fn resolved_strategy(&self) -> LauncherStrategy {
        match (self.launcher.strategy, self.network) {
            (LauncherStrategy::Auto, Network::Local) => LauncherStrategy::Local,
            (LauncherStrategy::Auto, _) => LauncherStrategy::Batch,
            (strategy, _) => strategy,
        }
    }
}
