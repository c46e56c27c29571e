use alloy::primitives::utils::format_ether;
use nu_ansi_term::Color;
use prometheus::Registry;
use stampede_core::{
    accounts::ParticipantStore,
    launcher::ConfiguredLauncherFactory,
    metrics::encode_text,
    notify::sink_for,
    orchestrator::{
        DeployProvisioner, FixedProvisioner, Provisioner, RaceOrchestrator, RaceSettings,
        RaceSummary,
    },
    provider::connect_endpoints,
};
use tracing::info;

use super::common::RaceCliArgs;
use crate::{
    error::CliError,
    util::{bold, format_timestamp, init_tracing},
};

/// Where the race target comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provisioning {
    /// Deploy and trigger a fresh launchpeg.
    Deploy,
    /// Race the configured launchpeg and wait for its owner to trigger it.
    Fixed,
}

pub async fn race(args: RaceCliArgs, provisioning: Provisioning) -> Result<(), CliError> {
    let config = args.load()?;
    init_tracing(config.log_level.as_deref());

    let endpoints = connect_endpoints(&config.rpc_urls)?;
    let mut participants = ParticipantStore::from_config(&config.accounts)?;
    participants.shuffle_pools(&mut rand::thread_rng());

    let provisioner: Box<dyn Provisioner> = match provisioning {
        Provisioning::Deploy => Box::new(DeployProvisioner::from_config(&config)?),
        Provisioning::Fixed => Box::new(FixedProvisioner::from_config(&config)?),
    };
    let settings = RaceSettings::from_config(&config, args.config.config.clone());
    info!(
        race = %settings.race_name(),
        endpoints = endpoints.len(),
        "starting race"
    );

    let registry = Registry::new();
    let orchestrator = RaceOrchestrator::new(
        settings,
        endpoints,
        participants,
        provisioner,
        Box::new(ConfiguredLauncherFactory::new(config.clone())),
    )
    .with_sinks(
        sink_for(config.hooks.orchestrator.as_ref()),
        sink_for(config.hooks.monitor.as_ref()),
    )
    .with_registry(&registry)?;

    let res = orchestrator.run().await;
    if let Some(path) = &args.metrics_file {
        std::fs::write(path, encode_text(&registry)?)?;
        info!(path = %path.display(), "wrote race metrics");
    }
    print_summary(&res?);
    Ok(())
}

fn print_summary(summary: &RaceSummary) {
    println!("{}", bold("Race summary"));
    println!("  target           {}", summary.target);
    println!(
        "  allowlist start  {} ({})",
        summary.trigger_timestamp,
        format_timestamp(summary.trigger_timestamp)
    );
    println!(
        "  transactions     {} (nonces {} -> {})",
        summary.tx_volume, summary.starting_nonce_total, summary.final_nonce_total
    );
    println!("  ether consumed   {}", format_ether(summary.consumed_wei));
    if let Some(status) = &summary.final_job_status {
        let line = status.to_string();
        if status.is_under_provisioned() {
            println!("{}", Color::Yellow.paint(line));
        } else {
            println!("{line}");
        }
    }
    println!("{}", bold("Recovered tokens"));
    for line in &summary.recovery {
        let painted = if line.contains(": success") {
            Color::Green.paint(line.as_str())
        } else {
            Color::Red.paint(line.as_str())
        };
        println!("  {painted}");
    }
}
