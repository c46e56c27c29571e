use alloy::primitives::{utils::format_ether, U256};
use nu_ansi_term::Color;
use stampede_core::{
    accounts::ParticipantStore,
    config::Network,
    funds::{FundsManager, Transfer},
    provider::connect_endpoints,
};
use tracing::info;

use super::FundsCommand;
use crate::{
    error::CliError,
    util::{bold, init_tracing},
};

fn print_transfers(title: &str, transfers: &[Transfer]) {
    println!("{}", bold(title));
    for transfer in transfers {
        let line = transfer.to_string();
        let painted = match transfer {
            Transfer::Sent { success: true, .. } => Color::Green.paint(line),
            Transfer::Skipped { .. } => Color::Default.paint(line),
            _ => Color::Red.paint(line),
        };
        println!("  {painted}");
    }
}

pub async fn funds(command: FundsCommand) -> Result<(), CliError> {
    let args = match &command {
        FundsCommand::Check(args) | FundsCommand::Distribute(args) | FundsCommand::Sweep(args) => {
            args
        }
    };
    let config = args.load()?;
    config.validate()?;
    init_tracing(config.log_level.as_deref());

    let participants = ParticipantStore::from_config(&config.accounts)?;
    let manager = FundsManager::new(connect_endpoints(&config.rpc_urls)?)
        .with_timeouts(config.timing.send_timeout(), config.timing.receipt_timeout());

    match command {
        FundsCommand::Check(_) => {
            let balances = manager.check(&participants).await?;
            println!("{}", bold("Balances"));
            for balance in &balances {
                println!("  {balance}");
            }
            let total = balances
                .iter()
                .fold(U256::ZERO, |total, b| total + b.balance);
            println!("  total {} ether", format_ether(total));
        }
        FundsCommand::Distribute(_) => {
            if config.network == Network::Local {
                match participants.funder() {
                    Some(funder) => {
                        let deployer = participants.deployer().address();
                        if let Some(sent) = manager
                            .prefund(funder.clone(), deployer, config.gas)
                            .await?
                        {
                            print_transfers("Prefunded deployer", &[sent]);
                        }
                    }
                    None => info!("no accounts.funder configured; not prefunding the deployer"),
                }
            }
            let transfers = manager.distribute(&participants, config.gas).await?;
            print_transfers("Top ups", &transfers);
        }
        FundsCommand::Sweep(_) => {
            let transfers = manager.sweep(&participants).await?;
            print_transfers("Collected", &transfers);
        }
    }
    Ok(())
}
