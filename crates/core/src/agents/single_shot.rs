//! One non-repeating mint per single-shot account, fired just after the fleet starts flooding.

use alloy::{
    primitives::{Address, TxHash, U256},
    signers::local::PrivateKeySigner,
};
use futures::future::join_all;
use tracing::{info, warn};

use super::{status_line, AgentContext};
use crate::{
    broadcast::BroadcastClient, contracts::IFlatLaunchpeg, notify::announce, Result,
};

#[derive(Clone, Debug, Default)]
pub struct SingleShotReport {
    pub trigger_timestamp: u64,
    pub lines: Vec<String>,
    pub successes: usize,
}

fn mint_call() -> IFlatLaunchpeg::allowlistMintCall {
    IFlatLaunchpeg::allowlistMintCall {
        quantity: U256::from(1),
    }
}

pub async fn run(ctx: &AgentContext, signers: Vec<PrivateKeySigner>) -> Result<SingleShotReport> {
    let accounts: Vec<_> = signers.iter().map(|s| s.address()).collect();
    ctx.ensure_allowlisted(&accounts).await?;
    ctx.ensure_not_started().await?;

    let mut clients = Vec::with_capacity(signers.len());
    for signer in signers {
        clients.push(ctx.client(signer).await?);
    }

    let listing = accounts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    announce(ctx.sink.as_ref(), &format!("Single-shot agents ready:\n{listing}")).await;

    let trigger = ctx.wait_for_window().await?;
    ctx.gate.apply_launch_bias(trigger).await;

    let call = mint_call();
    let wait = ctx.submit_wait;
    let sent = join_all(clients.iter_mut().map(|client| {
        let call = &call;
        async move {
            let res = tokio::time::timeout(wait, client.send(ctx.target, call, U256::ZERO)).await;
            match res {
                Ok(Ok(tx_hash)) => Some(tx_hash),
                Ok(Err(e)) => {
                    warn!(account = %client.address(), "mint submission failed: {e}");
                    None
                }
                Err(_) => {
                    warn!(account = %client.address(), "mint submission did not finish in {wait:?}");
                    None
                }
            }
        }
    }))
    .await;
    info!(
        submitted = sent.iter().flatten().count(),
        accounts = clients.len(),
        "single-shot mints submitted"
    );

    let lines = join_all(
        clients
            .iter_mut()
            .zip(sent)
            .filter_map(|(client, tx_hash)| tx_hash.map(|h| (client, h)))
            .map(|(client, tx_hash)| settle(client, ctx.target, tx_hash)),
    )
    .await
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    let successes = lines.iter().filter(|l| l.ends_with("-> success")).count();
    announce(
        ctx.sink.as_ref(),
        &format!("Minting complete; status:\n{}", lines.join("\n")),
    )
    .await;
    Ok(SingleShotReport {
        trigger_timestamp: trigger,
        lines,
        successes,
    })
}

/// Waits for the mint's receipt and resends once from the same account if it failed.
///
/// A failure comes back within a block or so, so one retry is enough to catch the window.
async fn settle(client: &mut BroadcastClient, target: Address, tx_hash: TxHash) -> Vec<String> {
    let from = client.address();
    let receipt = client.await_receipt(tx_hash).await;
    let failed = matches!(&receipt, Ok(r) if !r.success);
    let mut lines = vec![status_line(from, tx_hash, &receipt)];
    if !failed {
        return lines;
    }

    warn!(%from, %tx_hash, "mint failed, resending");
    match client.send(target, &mint_call(), U256::ZERO).await {
        Ok(retry) => {
            let receipt = client.await_receipt(retry).await;
            lines.push(status_line(from, retry, &receipt));
        }
        Err(e) => lines.push(format!("{from} resend failed: {e}")),
    }
    lines
}
