mod commands;
mod error;
mod util;

use commands::{Provisioning, StampedeCli, StampedeSubcommand};
use error::CliError;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = StampedeCli::parse_args();
    run(args).await?;
    Ok(())
}

async fn run(args: StampedeCli) -> Result<(), CliError> {
    match args.command {
        StampedeSubcommand::Run { args } => commands::race(*args, Provisioning::Deploy).await,
        StampedeSubcommand::Contest { args } => commands::race(*args, Provisioning::Fixed).await,
        StampedeSubcommand::Agent { command } => commands::agent(command).await,
        StampedeSubcommand::Funds { command } => commands::funds(command).await,
    }
}
