//! Grouped agents mint through shared allowlisted resources, as fast as the rate limit allows
//! while the trigger is still ahead.

use std::time::Duration;

use alloy::{
    primitives::{Address, TxHash, U256},
    signers::local::PrivateKeySigner,
};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{status_line, AgentContext};
use crate::{
    broadcast::BroadcastClient,
    contracts::IAllowlistProxy,
    error::ConfigError,
    notify::announce,
    Result,
};

/// Minimum spacing between two rounds of submissions.
pub const ROUND_INTERVAL: Duration = Duration::from_millis(600);
/// Stop starting new rounds once this many submissions were made.
pub const MAX_SUBMISSIONS: usize = 10;

#[derive(Clone, Debug, Default)]
pub struct GroupedReport {
    pub trigger_timestamp: u64,
    pub submitted: usize,
    pub successes: Vec<String>,
}

/// Account `j` of the group sends through `resources[j % resources.len()]`.
pub async fn run(
    ctx: &AgentContext,
    signers: Vec<PrivateKeySigner>,
    resources: &[Address],
) -> Result<GroupedReport> {
    if resources.is_empty() {
        return Err(ConfigError::NoResources.into());
    }
    ctx.ensure_allowlisted(resources).await?;
    ctx.ensure_not_started().await?;

    let mut lanes: Vec<(BroadcastClient, Address)> = Vec::with_capacity(signers.len());
    for (j, signer) in signers.into_iter().enumerate() {
        lanes.push((ctx.client(signer).await?, resources[j % resources.len()]));
    }
    let listing = lanes
        .iter()
        .map(|(client, resource)| format!("{} @ {resource}", client.address()))
        .collect::<Vec<_>>()
        .join("\n");
    announce(ctx.sink.as_ref(), &format!("Grouped agents ready:\n{listing}")).await;

    let trigger = ctx.wait_for_window().await?;

    let call = IAllowlistProxy::remoteAllowlistMintCall {};
    let mut submitted: Vec<(Address, TxHash)> = vec![];
    let mut attempts = 0;
    let mut ticker = tokio::time::interval(ROUND_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while attempts < MAX_SUBMISSIONS && ctx.gate.should_keep_racing(trigger) {
        ticker.tick().await;
        let round = join_all(lanes.iter_mut().map(|(client, resource)| {
            let call = &call;
            let resource = *resource;
            async move {
                let from = client.address();
                match client.send(resource, call, U256::ZERO).await {
                    Ok(tx_hash) => Some((from, tx_hash)),
                    Err(e) => {
                        warn!(%from, %resource, "grouped submission failed: {e}");
                        None
                    }
                }
            }
        }))
        .await;
        attempts += round.len();
        submitted.extend(round.into_iter().flatten());
        debug!(attempts, "grouped round sent");
    }

    let primary = ctx.primary()?;
    let wait = ctx.submit_wait;
    let receipts = join_all(submitted.iter().map(|(from, tx_hash)| {
        let primary = primary.clone();
        async move {
            let receipt =
                crate::broadcast::await_receipt(primary.as_ref(), *tx_hash, wait).await;
            receipt
                .as_ref()
                .is_ok_and(|r| r.success)
                .then(|| status_line(*from, *tx_hash, &receipt))
        }
    }))
    .await;
    let successes: Vec<String> = receipts.into_iter().flatten().collect();

    announce(
        ctx.sink.as_ref(),
        &format!("Grouped minting complete; status:\n{}", successes.join("\n")),
    )
    .await;
    Ok(GroupedReport {
        trigger_timestamp: trigger,
        submitted: submitted.len(),
        successes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agents::test_support::{context, trigger_after, START},
        clock::RaceClock,
        error::{Error, VerificationError},
        test_utils::{test_signers, MockChain, RecordingNotifier},
    };
    use alloy::sol_types::SolCall;

    fn resources() -> Vec<Address> {
        (0xe0..0xe3).map(Address::with_last_byte).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn sends_rounds_until_the_cap() {
        let chain = MockChain::new(RaceClock::starting_at(START));
        for r in resources() {
            chain.set_allowlist(r, 2);
        }
        let sink = RecordingNotifier::new();
        let ctx = context(&chain, sink.clone());
        trigger_after(chain.clone(), Duration::from_secs(1), START + 30);

        let report = run(&ctx, test_signers(0..3), &resources()).await.unwrap();
        // rounds of three: 3, 6, 9, 12
        assert_eq!(report.submitted, 12);
        assert_eq!(
            chain.calls_to(IAllowlistProxy::remoteAllowlistMintCall::SELECTOR),
            12
        );
        assert_eq!(report.successes.len(), 12);
        // every account sends through its own resource
        let sent = chain.sent();
        for (j, signer) in test_signers(0..3).iter().enumerate() {
            assert!(sent
                .iter()
                .filter(|(from, _, _)| *from == signer.address())
                .all(|(_, to, _)| *to == Some(resources()[j])));
        }
        assert_eq!(sink.count_containing("Grouped minting complete"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_trigger_passes() {
        let chain = MockChain::new(RaceClock::starting_at(START));
        for r in resources() {
            chain.set_allowlist(r, 2);
        }
        let ctx = context(&chain, RecordingNotifier::new());
        // trigger already in the past: window is open but racing is over
        trigger_after(chain.clone(), Duration::from_secs(1), START);

        let report = run(&ctx, test_signers(0..3), &resources()).await.unwrap();
        assert_eq!(report.submitted, 0);
        assert!(chain.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_resource_off_the_allowlist() {
        let chain = MockChain::new(RaceClock::starting_at(START));
        chain.set_allowlist(resources()[0], 2);
        let ctx = context(&chain, RecordingNotifier::new());
        let err = run(&ctx, test_signers(0..3), &resources())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Verification(VerificationError::NotAllowlisted(_))
        ));
    }
}
