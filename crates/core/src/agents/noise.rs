use std::time::Duration;

use alloy::primitives::{Address, U256};
use tracing::{debug, warn};

use crate::{broadcast::BroadcastClient, contracts::ISpammer};

/// Sends one cheap transaction to `contract` per `period` until the surrounding task is
/// cancelled, keeping block production steady on otherwise idle chains.
pub async fn generate(mut client: BroadcastClient, contract: Address, period: Duration) {
    let call = ISpammer::consumeCall {
        iterations: U256::from(client.gas().priority_fee_gwei),
    };
    loop {
        match client.send(contract, &call, U256::ZERO).await {
            Ok(tx_hash) => debug!(%tx_hash, from = %client.address(), "sent noise"),
            Err(e) => warn!(from = %client.address(), "failed to send noise: {e}"),
        }
        tokio::time::sleep(period).await;
    }
}
