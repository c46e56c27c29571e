//! The racing agents started by the job launcher, plus the ambient traffic generator.

pub mod fleet;
pub mod grouped;
pub mod noise;
pub mod single_shot;

use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, TxHash, U256},
    signers::local::PrivateKeySigner,
};

use crate::{
    broadcast::{BroadcastClient, DEFAULT_RECEIPT_TIMEOUT, DEFAULT_SEND_TIMEOUT},
    chain::{Endpoints, RaceProvider, ReceiptSummary},
    clock::RaceClock,
    config::RaceConfig,
    contracts::Launchpeg,
    error::{RuntimeErrorKind, VerificationError},
    gas::GasProfile,
    metrics::BroadcastMetrics,
    notify::Notifier,
    timing::{TimingGate, TriggerWatcher},
    Result,
};

/// How long an agent waits for its own submissions before moving on.
pub const SUBMIT_WAIT: Duration = Duration::from_secs(10);

/// Everything an agent shares with the other agents of a race.
#[derive(Clone)]
pub struct AgentContext {
    pub endpoints: Endpoints,
    pub target: Address,
    pub gas: GasProfile,
    pub gate: TimingGate,
    pub sink: Arc<dyn Notifier>,
    pub block_time: Duration,
    pub send_timeout: Duration,
    pub receipt_timeout: Duration,
    pub submit_wait: Duration,
    pub metrics: Option<BroadcastMetrics>,
}

impl AgentContext {
    pub fn new(
        endpoints: Endpoints,
        target: Address,
        gas: GasProfile,
        clock: RaceClock,
        sink: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            endpoints,
            target,
            gas,
            gate: TimingGate::new(clock),
            sink,
            block_time: Duration::from_secs(2),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            submit_wait: SUBMIT_WAIT,
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: &RaceConfig) -> Self {
        self.block_time = config.block_time();
        self.send_timeout = config.timing.send_timeout();
        self.receipt_timeout = config.timing.receipt_timeout();
        self.submit_wait = Duration::from_secs(config.timing.agent_receipt_wait_secs);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<BroadcastMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn primary(&self) -> Result<Arc<dyn RaceProvider>> {
        Ok(self
            .endpoints
            .first()
            .cloned()
            .ok_or(RuntimeErrorKind::EndpointsMissing)?)
    }

    /// A client for `signer` using the given gas profile over every endpoint.
    pub async fn client_with_gas(
        &self,
        signer: PrivateKeySigner,
        gas: GasProfile,
    ) -> Result<BroadcastClient> {
        Ok(
            BroadcastClient::connect(signer, self.endpoints.clone(), gas)
                .await?
                .with_send_timeout(self.send_timeout)
                .with_receipt_timeout(self.receipt_timeout)
                .with_metrics(self.metrics.clone()),
        )
    }

    pub async fn client(&self, signer: PrivateKeySigner) -> Result<BroadcastClient> {
        self.client_with_gas(signer, self.gas).await
    }

    /// Fails unless the target's allowlist phase has not been scheduled yet.
    pub async fn ensure_not_started(&self) -> Result<()> {
        let provider = self.primary()?;
        let start_time = Launchpeg::at(provider.as_ref(), self.target)
            .allowlist_start_time()
            .await?;
        if !start_time.is_zero() {
            return Err(VerificationError::UnexpectedStartTime(start_time).into());
        }
        Ok(())
    }

    /// Fails unless every account in `accounts` has a non-zero allowlist allocation.
    pub async fn ensure_allowlisted(&self, accounts: &[Address]) -> Result<()> {
        let provider = self.primary()?;
        let launchpeg = Launchpeg::at(provider.as_ref(), self.target);
        for account in accounts {
            if launchpeg.allowlist(*account).await? == U256::ZERO {
                return Err(VerificationError::NotAllowlisted(*account).into());
            }
        }
        Ok(())
    }

    /// Waits for the trigger, then for the race window to open. Returns the trigger timestamp.
    pub async fn wait_for_window(&self) -> Result<u64> {
        let trigger = TriggerWatcher::new(self.primary()?)
            .watch_for_trigger(self.target)
            .await;
        self.gate.wait_until_window(trigger).await;
        Ok(trigger)
    }
}

/// Formats a receipt outcome the way agents report it.
pub fn status_line(from: Address, tx_hash: TxHash, receipt: &Result<ReceiptSummary>) -> String {
    let status = match receipt {
        Ok(r) if r.success => "success".to_owned(),
        Ok(_) => "failure".to_owned(),
        Err(e) => format!("unknown ({e})"),
    };
    format!("{from} @ {tx_hash} -> {status}")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        contracts::IFlatLaunchpeg,
        test_utils::{MockChain, RecordingNotifier},
    };
    use alloy::{primitives::address, sol_types::SolEvent};

    pub const TARGET: Address = address!("0x00000000000000000000000000000000000000aa");
    pub const START: u64 = 1_700_000_000;

    pub fn context(chain: &Arc<MockChain>, sink: Arc<RecordingNotifier>) -> AgentContext {
        AgentContext::new(
            chain.endpoints(),
            TARGET,
            GasProfile::default(),
            RaceClock::starting_at(START),
            sink,
        )
    }

    /// Emits the trigger for `ts` on the target once `after` has elapsed.
    pub fn trigger_after(chain: Arc<MockChain>, after: Duration, ts: u64) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            chain.emit_log(
                TARGET,
                IFlatLaunchpeg::Initialized {
                    allowlistStartTime: U256::from(ts),
                    publicSaleStartTime: U256::from(ts + 60),
                    allowlistPrice: U256::ZERO,
                    salePrice: U256::ZERO,
                }
                .encode_log_data(),
            );
        });
    }
}
