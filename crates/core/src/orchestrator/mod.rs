//! The phase engine that drives one race from provisioning to reconciliation.
//!
//! Phases run strictly in order:
//!
//! 1. balance check (informational)
//! 2. nonce snapshot
//! 3. provisioning, through a [`Provisioner`]
//! 4. agent launch
//! 5. settle, then job status
//! 6. ambient traffic
//! 7. block monitor and trigger announcement
//! 8. trigger, through the [`Provisioner`]
//! 9. countdown and cooldown
//! 10. teardown of every background task
//! 11. cost and volume accounting
//! 12. token recovery
//!
//! A failure anywhere aborts the remaining phases and is announced exactly once by
//! [`RaceOrchestrator::run`]. Background tasks are always shut down before `run` returns.

pub mod provision;
pub mod recovery;

use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use alloy::{
    primitives::{utils::format_ether, Address, U256},
    signers::local::PrivateKeySigner,
};
use prometheus::Registry;
use tracing::{debug, error, info};

use crate::{
    accounts::{ParticipantStore, Role},
    agents::noise,
    broadcast::BroadcastClient,
    chain::{total_nonce, Endpoints, RaceProvider},
    clock::RaceClock,
    config::{BalanceThresholds, Network, RaceConfig},
    error::{ConfigError, RuntimeErrorKind},
    gas::GasProfile,
    launcher::{JobLauncher, JobStatus, LaunchSpec, LauncherFactory},
    metrics::{BroadcastMetrics, MonitorMetrics},
    monitor::{announce_trigger, BlockMonitor, NamedContract, WindowAlert},
    notify::{announce, LogNotifier, Notifier},
    tasks::TaskRegistry,
    timing::TriggerWatcher,
    Result,
};

pub use provision::{DeployProvisioner, FixedProvisioner, Provisioned, Provisioner, RaceSession};

/// Everything about a race that does not change while it runs.
#[derive(Clone, Debug)]
pub struct RaceSettings {
    pub name: String,
    pub network: Network,
    pub gas: GasProfile,
    pub block_time: Duration,
    pub trigger_delay: Duration,
    pub trigger_buffer: Duration,
    pub public_sale_offset: Duration,
    pub cooldown: Duration,
    pub stabilize: Duration,
    pub allowlist_settle: Duration,
    pub send_timeout: Duration,
    pub receipt_timeout: Duration,
    pub teardown_grace: Duration,
    pub spam_contract: Address,
    /// Set when ambient traffic should run.
    pub noise_contract: Option<Address>,
    pub thresholds: BalanceThresholds,
    /// Handed to launched agents so they load the same configuration.
    pub config_path: PathBuf,
}

impl RaceSettings {
    pub fn from_config(config: &RaceConfig, config_path: impl Into<PathBuf>) -> Self {
        let timing = &config.timing;
        Self {
            name: config.name.clone(),
            network: config.network,
            gas: config.gas,
            block_time: config.block_time(),
            trigger_delay: Duration::from_secs(timing.trigger_delay_secs),
            trigger_buffer: Duration::from_secs(timing.trigger_buffer_secs),
            public_sale_offset: Duration::from_secs(timing.public_sale_offset_secs),
            cooldown: Duration::from_secs(timing.cooldown_secs),
            stabilize: Duration::from_secs(timing.stabilize_secs),
            allowlist_settle: Duration::from_secs(timing.allowlist_settle_secs),
            send_timeout: timing.send_timeout(),
            receipt_timeout: timing.receipt_timeout(),
            teardown_grace: Duration::from_secs(timing.teardown_grace_secs),
            spam_contract: config.contracts.spam,
            noise_contract: config
                .runs_ambient_traffic()
                .then_some(config.contracts.noise)
                .flatten(),
            thresholds: config.thresholds.clone(),
            config_path: config_path.into(),
        }
    }

    pub fn race_name(&self) -> String {
        format!(
            "{} {}_{}s_{}tip",
            self.name,
            self.network,
            self.trigger_delay.as_secs(),
            self.gas.priority_fee_gwei
        )
    }
}

/// What one race cost and produced.
#[derive(Clone, Debug, Default)]
pub struct RaceSummary {
    pub target: Address,
    pub trigger_timestamp: u64,
    pub starting_nonce_total: u64,
    pub final_nonce_total: u64,
    /// Transactions sent by every participant between the nonce snapshot and accounting.
    pub tx_volume: u64,
    pub consumed_wei: U256,
    pub final_job_status: Option<JobStatus>,
    pub recovery: Vec<String>,
}

/// Ether amount rounded to two decimals.
fn ether_2dp(wei: U256) -> String {
    let exact = format_ether(wei);
    match exact.parse::<f64>() {
        Ok(value) => format!("{value:.2}"),
        Err(_) => exact,
    }
}

pub struct RaceOrchestrator {
    settings: RaceSettings,
    endpoints: Endpoints,
    participants: ParticipantStore,
    provisioner: Box<dyn Provisioner>,
    launchers: Box<dyn LauncherFactory>,
    sink: Arc<dyn Notifier>,
    monitor_sink: Arc<dyn Notifier>,
    clock: RaceClock,
    broadcast_metrics: Option<BroadcastMetrics>,
    monitor_metrics: Option<MonitorMetrics>,
}

impl RaceOrchestrator {
    pub fn new(
        settings: RaceSettings,
        endpoints: Endpoints,
        participants: ParticipantStore,
        provisioner: Box<dyn Provisioner>,
        launchers: Box<dyn LauncherFactory>,
    ) -> Self {
        Self {
            settings,
            endpoints,
            participants,
            provisioner,
            launchers,
            sink: Arc::new(LogNotifier),
            monitor_sink: Arc::new(LogNotifier),
            clock: RaceClock::system(),
            broadcast_metrics: None,
            monitor_metrics: None,
        }
    }

    pub fn with_sinks(mut self, sink: Arc<dyn Notifier>, monitor_sink: Arc<dyn Notifier>) -> Self {
        self.sink = sink;
        self.monitor_sink = monitor_sink;
        self
    }

    pub fn with_clock(mut self, clock: RaceClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_registry(mut self, registry: &Registry) -> Result<Self> {
        self.broadcast_metrics = Some(BroadcastMetrics::register(registry)?);
        self.monitor_metrics = Some(MonitorMetrics::register(registry)?);
        Ok(self)
    }

    fn primary(&self) -> Result<Arc<dyn RaceProvider>> {
        Ok(self
            .endpoints
            .first()
            .cloned()
            .ok_or(RuntimeErrorKind::EndpointsMissing)?)
    }

    async fn announce(&self, text: &str) {
        announce(self.sink.as_ref(), text).await;
    }

    async fn client(&self, signer: PrivateKeySigner, gas: GasProfile) -> Result<BroadcastClient> {
        Ok(BroadcastClient::connect(signer, self.endpoints.clone(), gas)
            .await?
            .with_send_timeout(self.settings.send_timeout)
            .with_receipt_timeout(self.settings.receipt_timeout)
            .with_metrics(self.broadcast_metrics.clone()))
    }

    /// Runs every phase. Any failure is announced once; background tasks never outlive this call.
    pub async fn run(self) -> Result<RaceSummary> {
        let mut tasks = TaskRegistry::new();
        let res = self.run_phases(&mut tasks).await;
        let aborted = tasks.shutdown(self.settings.teardown_grace).await;
        if aborted > 0 {
            debug!(aborted, "aborted background tasks after the race");
        }
        if let Err(e) = &res {
            error!("race failed: {e}");
            self.announce(&format!("Race failed: {e}")).await;
        }
        res
    }

    async fn run_phases(&self, tasks: &mut TaskRegistry) -> Result<RaceSummary> {
        let name = self.settings.race_name();
        self.announce(&format!(
            "Starting up {name} ({} provisioning)",
            self.provisioner.mode()
        ))
        .await;
        let primary = self.primary()?;
        let accounts = self.participants.all_addresses();

        // 1-2
        let starting_balance = self.check_balances(primary.as_ref()).await?;
        let starting_nonce_total = total_nonce(primary.as_ref(), &accounts).await?;
        info!(starting_nonce_total, accounts = accounts.len(), "nonce snapshot");

        // 3
        let deployer = self
            .client(self.participants.deployer().clone(), self.settings.gas)
            .await?;
        let mut session = RaceSession {
            deployer,
            single_shot: self.participants.pool(Role::SingleShot).addresses(),
            settings: self.settings.clone(),
            endpoints: self.endpoints.clone(),
            sink: self.sink.clone(),
            clock: self.clock,
        };
        let provisioned = self.provisioner.provision(&mut session).await?;

        // 4-5
        let mut launcher = self.start_jobs(&provisioned).await?;
        tokio::time::sleep(launcher.settle_time()).await;
        self.report_jobs(launcher.as_mut()).await;

        // 6-7
        self.start_noise(tasks).await?;
        let alert = self.start_monitor(tasks, primary.clone(), &provisioned).await;
        tokio::time::sleep(self.settings.stabilize).await;

        // 8
        let trigger = self.provisioner.trigger(&mut session, &provisioned).await?;
        alert.arm(trigger);

        // 9
        self.clock.sleep_until(trigger).await;
        self.announce(&format!(
            "Start time {trigger} reached; mint should occur after this"
        ))
        .await;
        tokio::time::sleep(self.settings.cooldown).await;

        // 10
        let aborted = tasks.shutdown(self.settings.teardown_grace).await;
        debug!(aborted, "background tasks stopped");
        let final_job_status = self.report_jobs(launcher.as_mut()).await;

        // 11
        let ending_balance = self.check_balances(primary.as_ref()).await?;
        let final_nonce_total = total_nonce(primary.as_ref(), &accounts).await?;
        let consumed_wei = starting_balance.saturating_sub(ending_balance);
        let tx_volume = final_nonce_total.saturating_sub(starting_nonce_total);
        self.announce(&format!(
            "Finished running {name}, {} ether consumed in {tx_volume} transactions",
            ether_2dp(consumed_wei)
        ))
        .await;

        // 12
        let mut holders = self.participants.pool(Role::SingleShot).signers;
        holders.extend(self.participants.pool(Role::Grouped).signers);
        let recovery = recovery::recover_tokens(
            &mut session,
            &provisioned,
            holders,
            self.participants.treasury(),
        )
        .await;
        self.announce(&format!("Done recovering tokens:\n{}", recovery.join("\n")))
            .await;

        Ok(RaceSummary {
            target: provisioned.target,
            trigger_timestamp: trigger,
            starting_nonce_total,
            final_nonce_total,
            tx_volume,
            consumed_wei,
            final_job_status,
            recovery,
        })
    }

    /// Sums balances over every participant, announcing accounts below their role's minimum.
    async fn check_balances(&self, provider: &dyn RaceProvider) -> Result<U256> {
        let mut seen = HashSet::new();
        let mut total = U256::ZERO;
        let mut shortfalls = vec![];
        for role in Role::ALL {
            let minimum = self.settings.thresholds.minimum(role)?;
            for address in self.participants.pool(role).addresses() {
                let balance = provider.balance(address).await?;
                if seen.insert(address) {
                    total += balance;
                }
                if balance < minimum {
                    shortfalls.push(format!(
                        "{role} {address} below expected balance of {}",
                        format_ether(minimum)
                    ));
                }
            }
        }
        for line in &shortfalls {
            self.announce(line).await;
        }
        self.announce("Done checking balances").await;
        Ok(total)
    }

    async fn start_jobs(&self, provisioned: &Provisioned) -> Result<Box<dyn JobLauncher>> {
        let mut launcher = self.launchers.build(LaunchSpec {
            target: provisioned.target,
            network: self.settings.network,
            gas: self.settings.gas,
            config_path: self.settings.config_path.clone(),
        })?;
        launcher.launch_single_shot().await?;
        let grouped = self.participants.pool(Role::Grouped).addresses();
        if !grouped.is_empty() {
            launcher
                .launch_grouped_agents(&provisioned.resources, &grouped)
                .await?;
        }
        launcher
            .launch_fleet(&self.participants.pool(Role::Fleet).addresses())
            .await?;
        self.announce("Done starting jobs").await;
        Ok(launcher)
    }

    /// Announces job status; shortfalls and query failures are alerts, never errors.
    async fn report_jobs(&self, launcher: &mut dyn JobLauncher) -> Option<JobStatus> {
        match launcher.fetch_status().await {
            Ok(status) => {
                self.announce(&status.to_string()).await;
                if status.is_under_provisioned() {
                    self.announce("Fewer jobs running than launched").await;
                }
                Some(status)
            }
            Err(e) => {
                self.announce(&format!("Failed to fetch job status: {e}")).await;
                None
            }
        }
    }

    /// One generator below the fleet's tip and one above it.
    async fn start_noise(&self, tasks: &mut TaskRegistry) -> Result<()> {
        let Some(contract) = self.settings.noise_contract else {
            return Ok(());
        };
        let pool = self.participants.pool(Role::Noise);
        if pool.len() < 2 {
            return Err(ConfigError::NotEnoughNoiseAccounts(pool.len()).into());
        }
        let quiet = self
            .client(pool.signers[0].clone(), self.settings.gas.quiet_noise())
            .await?;
        let loud = self
            .client(pool.signers[1].clone(), self.settings.gas.loud_noise())
            .await?;
        let period = self.settings.block_time;
        tasks.spawn("quiet-noise", move |_| noise::generate(quiet, contract, period));
        tasks.spawn("loud-noise", move |_| noise::generate(loud, contract, period));
        self.announce("Done starting noise tasks").await;
        Ok(())
    }

    async fn start_monitor(
        &self,
        tasks: &mut TaskRegistry,
        primary: Arc<dyn RaceProvider>,
        provisioned: &Provisioned,
    ) -> WindowAlert {
        let mut contracts = vec![
            NamedContract::new("Spam  ", self.settings.spam_contract),
            NamedContract::new("Target", provisioned.target),
        ];
        if let Some(noise) = self.settings.noise_contract {
            contracts.push(NamedContract::new("Noise ", noise));
        }
        for (i, resource) in provisioned.resources.iter().enumerate() {
            contracts.push(NamedContract::new(format!("Resource{i}"), *resource));
        }

        let (monitor, alert) =
            BlockMonitor::new(primary.clone(), contracts, self.monitor_sink.clone());
        let monitor = monitor.with_metrics(self.monitor_metrics.clone());
        tasks.spawn("block-monitor", |cancel| monitor.run(cancel));
        let watcher = TriggerWatcher::new(primary);
        let target = provisioned.target;
        let sink = self.monitor_sink.clone();
        tasks.spawn("trigger-announce", move |_| {
            announce_trigger(watcher, target, sink)
        });
        self.announce("Done starting monitor").await;
        alert
    }
}
