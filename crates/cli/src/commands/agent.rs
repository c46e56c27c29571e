use alloy::signers::local::PrivateKeySigner;
use futures::future::try_join_all;
use stampede_core::{
    accounts::{ParticipantStore, Role},
    agents::{fleet, grouped, single_shot, AgentContext},
    clock::RaceClock,
    launcher::JobKind,
    notify::sink_for,
    provider::connect_endpoints,
};
use tracing::info;

use super::{common::AgentCliArgs, AgentCommand};
use crate::{error::CliError, util::init_tracing};

fn role_for(kind: JobKind) -> Role {
    match kind {
        JobKind::SingleShot => Role::SingleShot,
        JobKind::Grouped => Role::Grouped,
        JobKind::Fleet => Role::Fleet,
    }
}

/// The signers named by `--accounts`, or the whole configured pool when none are named.
fn resolve_signers(
    participants: &ParticipantStore,
    kind: JobKind,
    args: &AgentCliArgs,
) -> Result<Vec<PrivateKeySigner>, CliError> {
    let signers = if args.accounts.is_empty() {
        participants.pool(role_for(kind)).signers
    } else {
        args.accounts
            .iter()
            .map(|address| {
                participants
                    .signer_by_address(*address)
                    .cloned()
                    .ok_or(CliError::UnknownAccount(*address))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    if signers.is_empty() {
        return Err(CliError::NoAccounts(kind.to_string()));
    }
    Ok(signers)
}

pub async fn agent(command: AgentCommand) -> Result<(), CliError> {
    let (kind, args) = command.into_parts();
    let config = args.load()?;
    init_tracing(config.log_level.as_deref());

    let participants = ParticipantStore::from_config(&config.accounts)?;
    let signers = resolve_signers(&participants, kind, &args)?;
    let gas = args.gas(config.gas);
    let ctx = AgentContext::new(
        connect_endpoints(&config.rpc_urls)?,
        args.target,
        gas,
        RaceClock::system(),
        sink_for(config.hooks.agent.as_ref()),
    )
    .with_config(&config);
    info!(%kind, target = %args.target, accounts = signers.len(), "starting agent");

    match kind {
        JobKind::SingleShot => {
            let report = single_shot::run(&ctx, signers).await?;
            info!(
                trigger = report.trigger_timestamp,
                successes = report.successes,
                "single-shot agent finished"
            );
        }
        JobKind::Grouped => {
            let report = grouped::run(&ctx, signers, &args.resources).await?;
            info!(
                trigger = report.trigger_timestamp,
                submitted = report.submitted,
                successes = report.successes.len(),
                "grouped agent finished"
            );
        }
        JobKind::Fleet => {
            let spam = config.contracts.spam;
            let reports = try_join_all(
                signers
                    .into_iter()
                    .map(|signer| fleet::run(&ctx, signer, gas, spam)),
            )
            .await?;
            for report in reports {
                info!(
                    submitted = report.submitted,
                    mined = report.mined,
                    "fleet agent finished"
                );
            }
        }
    }
    Ok(())
}
