mod agent;
pub mod common;
mod funds;
mod race;
mod stampede_subcommand;

use clap::Parser;

pub use agent::agent;
pub use funds::funds;
pub use race::{race, Provisioning};
pub use stampede_subcommand::{AgentCommand, FundsCommand, StampedeSubcommand};

#[derive(Parser, Debug)]
#[command(name = "stampede", version, about = "Races first-come-first-served allowlist mints")]
pub struct StampedeCli {
    #[command(subcommand)]
    pub command: StampedeSubcommand,
}

impl StampedeCli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
