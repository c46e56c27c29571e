//! This file contains type definitions for CLI arguments.

use std::path::PathBuf;

use alloy::primitives::Address;
use stampede_core::{
    config::{Network, RaceConfig},
    gas::GasProfile,
};

use crate::error::CliError;

#[derive(Clone, Debug, clap::Args)]
pub struct ConfigArgs {
    /// Race configuration file.
    #[arg(env = "STAMPEDE_CONFIG", short, long, default_value = "stampede.toml")]
    pub config: PathBuf,

    /// Network to race on.
    #[arg(
        short,
        long,
        long_help = "Overrides the configured network. One of `local`, `testnet` or `mainnet`. Ambient traffic never runs on mainnet."
    )]
    pub network: Option<Network>,
}

impl ConfigArgs {
    /// Loads the configuration and applies the overrides shared by every command.
    pub fn load(&self) -> Result<RaceConfig, CliError> {
        let mut config = RaceConfig::from_file(&self.config)?;
        if let Some(network) = self.network {
            config.network = network;
        }
        Ok(config)
    }
}

#[derive(Clone, Debug, clap::Args)]
pub struct RaceCliArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Seconds between the trigger transaction and the allowlist start.
    #[arg(
        short,
        long,
        long_help = "Seconds between sending initializePhases and the allowlist start time. Defaults to `timing.trigger_delay_secs`."
    )]
    pub duration: Option<u64>,

    /// Priority fee in gwei for racing transactions.
    #[arg(long, visible_aliases = ["tip"])]
    pub gas_tip: Option<u64>,

    /// Write Prometheus metrics collected during the race to this file.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl RaceCliArgs {
    pub fn load(&self) -> Result<RaceConfig, CliError> {
        let mut config = self.config.load()?;
        if let Some(secs) = self.duration {
            config.timing.trigger_delay_secs = secs;
        }
        if let Some(tip) = self.gas_tip {
            config.gas.priority_fee_gwei = tip;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Debug, clap::Args)]
pub struct AgentCliArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Launchpeg being raced.
    #[arg(long)]
    pub target: Address,

    /// Max fee per gas in gwei.
    #[arg(long)]
    pub max_fee: Option<u64>,

    /// Priority fee per gas in gwei.
    #[arg(long)]
    pub priority_fee: Option<u64>,

    #[arg(long)]
    pub gas_limit: Option<u64>,

    /// Accounts this agent signs for. Defaults to the configured pool for the agent kind.
    #[arg(long, value_delimiter = ',')]
    pub accounts: Vec<Address>,

    /// Allowlisted resource contracts, for grouped agents.
    #[arg(long, value_delimiter = ',')]
    pub resources: Vec<Address>,
}

impl AgentCliArgs {
    pub fn load(&self) -> Result<RaceConfig, CliError> {
        let config = self.config.load()?;
        config.validate()?;
        Ok(config)
    }

    /// `base` with every fee flag applied.
    pub fn gas(&self, base: GasProfile) -> GasProfile {
        GasProfile::new(
            self.max_fee.unwrap_or(base.max_fee_gwei),
            self.priority_fee.unwrap_or(base.priority_fee_gwei),
            self.gas_limit.unwrap_or(base.gas_limit),
        )
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use stampede_core::launcher::{AgentJob, JobKind, LaunchSpec};

    use super::*;
    use crate::commands::{AgentCommand, FundsCommand, StampedeCli, StampedeSubcommand};

    fn parse(args: &[String]) -> StampedeCli {
        let argv = std::iter::once("stampede".to_owned()).chain(args.iter().cloned());
        StampedeCli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn launched_agent_args_round_trip() {
        let spec = LaunchSpec {
            target: Address::with_last_byte(0xaa),
            network: Network::Testnet,
            gas: GasProfile::new(300, 70, 300_000),
            config_path: "race.toml".into(),
        };
        let job = AgentJob {
            kind: JobKind::Grouped,
            gas: spec.gas,
            accounts: vec![Address::with_last_byte(1), Address::with_last_byte(2)],
            resources: vec![Address::with_last_byte(0xd1)],
        };

        let StampedeSubcommand::Agent { command } = parse(&job.cli_args(&spec)).command else {
            panic!("expected agent subcommand");
        };
        let (kind, args) = command.into_parts();
        assert_eq!(kind, JobKind::Grouped);
        assert_eq!(args.config.config, PathBuf::from("race.toml"));
        assert_eq!(args.config.network, Some(Network::Testnet));
        assert_eq!(args.target, spec.target);
        assert_eq!(args.gas(GasProfile::default()), spec.gas);
        assert_eq!(args.accounts, job.accounts);
        assert_eq!(args.resources, job.resources);
    }

    #[test]
    fn single_shot_agent_needs_no_accounts() {
        let job = AgentJob {
            kind: JobKind::SingleShot,
            gas: GasProfile::default(),
            accounts: vec![],
            resources: vec![],
        };
        let spec = LaunchSpec {
            target: Address::with_last_byte(0xaa),
            network: Network::Local,
            gas: GasProfile::default(),
            config_path: "race.toml".into(),
        };
        let StampedeSubcommand::Agent {
            command: AgentCommand::SingleShot(args),
        } = parse(&job.cli_args(&spec)).command
        else {
            panic!("expected single-shot agent");
        };
        assert!(args.accounts.is_empty());
    }

    #[test]
    fn funds_commands_take_config_args() {
        let cli = parse(&[
            "funds".into(),
            "distribute".into(),
            "--config".into(),
            "race.toml".into(),
            "--network".into(),
            "local".into(),
        ]);
        let StampedeSubcommand::Funds {
            command: FundsCommand::Distribute(args),
        } = cli.command
        else {
            panic!("expected funds distribute");
        };
        assert_eq!(args.config, PathBuf::from("race.toml"));
        assert_eq!(args.network, Some(Network::Local));

        let cli = parse(&["funds".into(), "sweep".into()]);
        assert!(matches!(
            cli.command,
            StampedeSubcommand::Funds {
                command: FundsCommand::Sweep(_)
            }
        ));
    }

    #[test]
    fn race_overrides_reach_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.toml");
        std::fs::write(
            &path,
            r#"
                network = "testnet"
                rpc_urls = ["http://localhost:8545"]

                [contracts]
                spam = "0x00000000000000000000000000000000000000c1"
                noise = "0x00000000000000000000000000000000000000c2"

                [accounts]
                deployer = "0x0000000000000000000000000000000000000000000000000000000000000001"
            "#,
        )
        .unwrap();
        let path = path.display().to_string();

        // testnet wants noise accounts, mainnet does not
        let cli = parse(&["run".into(), "--config".into(), path.clone()]);
        let StampedeSubcommand::Run { args } = cli.command else {
            panic!("expected run");
        };
        assert!(matches!(args.load(), Err(CliError::Config(_))));

        let cli = parse(&[
            "run".into(),
            "--config".into(),
            path,
            "--network".into(),
            "mainnet".into(),
            "--duration".into(),
            "30".into(),
            "--tip".into(),
            "90".into(),
        ]);
        let StampedeSubcommand::Run { args } = cli.command else {
            panic!("expected run");
        };
        let config = args.load().unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.timing.trigger_delay_secs, 30);
        assert_eq!(config.gas.priority_fee_gwei, 90);
    }
}
