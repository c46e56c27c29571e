use clap::Subcommand;
use stampede_core::launcher::JobKind;

use super::common::{AgentCliArgs, ConfigArgs, RaceCliArgs};

#[derive(Debug, Subcommand)]
pub enum StampedeSubcommand {
    #[command(
        name = "run",
        long_about = "Deploy a fresh launchpeg and its resources, launch every agent, trigger the allowlist phase and reconcile."
    )]
    Run {
        #[command(flatten)]
        args: Box<RaceCliArgs>,
    },

    #[command(
        name = "contest",
        long_about = "Race an existing launchpeg configured under `contracts.target`. The allowlist phase is triggered by someone else."
    )]
    Contest {
        #[command(flatten)]
        args: Box<RaceCliArgs>,
    },

    #[command(
        name = "agent",
        long_about = "Run a single racing agent. Normally started by `run` or `contest` through the job launcher."
    )]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    #[command(
        name = "funds",
        long_about = "Check, top up or sweep the balances of every configured participant account."
    )]
    Funds {
        #[command(subcommand)]
        command: FundsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum FundsCommand {
    /// Prints the balance of every participant account.
    Check(ConfigArgs),
    /// Tops up participants below 4 ether from the deployer. On local networks the deployer is
    /// prefunded from `accounts.funder` first.
    Distribute(ConfigArgs),
    /// Sends participant balances back to the deployer, keeping enough for the transfer gas.
    Sweep(ConfigArgs),
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Sends one allowlist mint per account as soon as the window opens.
    SingleShot(AgentCliArgs),
    /// Mints through allowlisted resource contracts in repeated rounds.
    Grouped(AgentCliArgs),
    /// Fills blocks before the window opens.
    Fleet(AgentCliArgs),
}

impl AgentCommand {
    pub fn into_parts(self) -> (JobKind, AgentCliArgs) {
        match self {
            AgentCommand::SingleShot(args) => (JobKind::SingleShot, args),
            AgentCommand::Grouped(args) => (JobKind::Grouped, args),
            AgentCommand::Fleet(args) => (JobKind::Fleet, args),
        }
    }
}
