//! Fleet agents fill blocks ahead of the trigger so mints from other bots cannot land early.

use alloy::{
    primitives::{Address, TxHash, U256},
    signers::local::PrivateKeySigner,
};
use tracing::{info, warn};

use super::AgentContext;
use crate::{contracts::ISpammer, gas::GasProfile, Result};

/// Blocks of margin past the trigger.
pub const EXTRA_BLOCKS: u64 = 4;

#[derive(Clone, Debug, Default)]
pub struct FleetReport {
    pub trigger_timestamp: u64,
    pub submitted: usize,
    pub mined: usize,
}

/// Submissions needed to cover every block until the trigger, plus margin.
pub fn iterations(time_until_trigger: std::time::Duration, block_time: std::time::Duration) -> u64 {
    let blocks = (time_until_trigger.as_secs_f64() / block_time.as_secs_f64()).ceil() as u64;
    blocks + EXTRA_BLOCKS
}

pub async fn run(
    ctx: &AgentContext,
    signer: PrivateKeySigner,
    gas: GasProfile,
    spam_contract: Address,
) -> Result<FleetReport> {
    ctx.ensure_not_started().await?;
    let mut client = ctx.client_with_gas(signer, gas).await?;
    let name = client.address();
    info!(account = %name, ?gas, "fleet agent ready");

    let trigger = ctx.wait_for_window().await?;
    let count = iterations(ctx.gate.time_until(trigger), ctx.block_time);

    let mut sent: Vec<TxHash> = Vec::with_capacity(count as usize);
    for i in 0..count {
        let call = ISpammer::consumeCall {
            iterations: U256::from(i),
        };
        match client.send(spam_contract, &call, U256::ZERO).await {
            Ok(tx_hash) => sent.push(tx_hash),
            Err(e) => {
                warn!(account = %name, "spam submission failed, resyncing nonce: {e}");
                client.resync_nonce().await?;
            }
        }
    }
    info!(account = %name, submitted = sent.len(), "finished submitting");

    let mut mined = 0;
    for tx_hash in &sent {
        if client.await_receipt(*tx_hash).await.is_ok() {
            mined += 1;
        }
    }
    info!(account = %name, mined, "all fleet transactions settled");
    Ok(FleetReport {
        trigger_timestamp: trigger,
        submitted: sent.len(),
        mined,
    })
}
