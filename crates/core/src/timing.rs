//! Trigger detection and race-window countdowns.

use std::{sync::Arc, time::Duration};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, U256},
    rpc::types::Filter,
    sol_types::SolEvent,
};
use tracing::{debug, info, warn};

use crate::{
    chain::RaceProvider,
    clock::RaceClock,
    contracts::{decode_trigger, IFlatLaunchpeg},
};

/// How long before the trigger timestamp racing agents start flooding.
pub const FLOOD_LEAD_TIME: Duration = Duration::from_secs(20);
pub const FILTER_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const FILTER_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const LAUNCH_BIAS: Duration = Duration::from_millis(400);
/// Below this much time left before the trigger, the single-shot agent fires without bias.
pub const LAUNCH_BIAS_CUTOFF: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FilterState {
    NoFilter,
    FilterOpen(U256),
    EventSeen(u64),
}

/// Waits for a launchpeg's `Initialized` event.
#[derive(Clone)]
pub struct TriggerWatcher {
    provider: Arc<dyn RaceProvider>,
    poll_interval: Duration,
    backoff: Duration,
}

impl TriggerWatcher {
    pub fn new(provider: Arc<dyn RaceProvider>) -> Self {
        Self {
            provider,
            poll_interval: FILTER_POLL_INTERVAL,
            backoff: FILTER_RETRY_BACKOFF,
        }
    }

    /// Returns the allowlist start time carried by the first `Initialized` event `contract` emits
    /// after the filter is installed. Filter failures are retried forever after a backoff.
    pub async fn watch_for_trigger(&self, contract: Address) -> u64 {
        let filter = Filter::new()
            .address(contract)
            .event_signature(IFlatLaunchpeg::Initialized::SIGNATURE_HASH)
            .from_block(BlockNumberOrTag::Latest);

        let mut state = FilterState::NoFilter;
        loop {
            state = match state {
                FilterState::NoFilter => match self.provider.new_log_filter(&filter).await {
                    Ok(id) => {
                        debug!(%contract, %id, "installed trigger filter");
                        FilterState::FilterOpen(id)
                    }
                    Err(e) => {
                        warn!(%contract, "failed to install trigger filter, will retry: {e}");
                        tokio::time::sleep(self.backoff).await;
                        FilterState::NoFilter
                    }
                },
                FilterState::FilterOpen(id) => match self.provider.poll_log_filter(id).await {
                    Ok(logs) => match logs.iter().find_map(decode_trigger) {
                        Some(ts) => FilterState::EventSeen(ts),
                        None => {
                            tokio::time::sleep(self.poll_interval).await;
                            FilterState::FilterOpen(id)
                        }
                    },
                    Err(e) => {
                        warn!(%contract, "trigger filter failed, will recreate: {e}");
                        tokio::time::sleep(self.backoff).await;
                        FilterState::NoFilter
                    }
                },
                FilterState::EventSeen(ts) => {
                    info!(%contract, trigger = ts, "observed trigger event");
                    return ts;
                }
            };
        }
    }
}

/// The interval racing agents compete in, fixed once the trigger is observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RaceWindow {
    pub trigger_timestamp: u64,
    pub lead_time: Duration,
}

impl RaceWindow {
    pub fn new(trigger_timestamp: u64) -> Self {
        Self {
            trigger_timestamp,
            lead_time: FLOOD_LEAD_TIME,
        }
    }

    /// Unix time at which flooding starts.
    pub fn opens_at(&self) -> Duration {
        Duration::from_secs(self.trigger_timestamp).saturating_sub(self.lead_time)
    }
}

/// Countdown primitives shared by every racing agent.
#[derive(Clone, Copy, Debug)]
pub struct TimingGate {
    clock: RaceClock,
    lead_time: Duration,
    poll_interval: Duration,
}

impl TimingGate {
    pub fn new(clock: RaceClock) -> Self {
        Self {
            clock,
            lead_time: FLOOD_LEAD_TIME,
            poll_interval: WINDOW_POLL_INTERVAL,
        }
    }

    pub fn with_lead_time(mut self, lead_time: Duration) -> Self {
        self.lead_time = lead_time;
        self
    }

    pub fn clock(&self) -> RaceClock {
        self.clock
    }

    pub fn window(&self, trigger_timestamp: u64) -> RaceWindow {
        RaceWindow {
            trigger_timestamp,
            lead_time: self.lead_time,
        }
    }

    /// Returns once `now >= trigger_timestamp - lead_time`, never earlier.
    pub async fn wait_until_window(&self, trigger_timestamp: u64) -> RaceWindow {
        let window = self.window(trigger_timestamp);
        loop {
            let remaining = window.opens_at().saturating_sub(self.clock.now());
            if remaining.is_zero() {
                return window;
            }
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }
    }

    /// Extra delay for a one-off submission so it lands behind the fleet. Zero once less than
    /// [`LAUNCH_BIAS_CUTOFF`] is left before the trigger.
    pub fn launch_bias(&self, trigger_timestamp: u64) -> Duration {
        if self.clock.until(trigger_timestamp) > LAUNCH_BIAS_CUTOFF {
            LAUNCH_BIAS
        } else {
            Duration::ZERO
        }
    }

    pub async fn apply_launch_bias(&self, trigger_timestamp: u64) {
        let bias = self.launch_bias(trigger_timestamp);
        if !bias.is_zero() {
            tokio::time::sleep(bias).await;
        }
    }

    /// True while the trigger timestamp is still in the future.
    pub fn should_keep_racing(&self, trigger_timestamp: u64) -> bool {
        Duration::from_secs(trigger_timestamp) > self.clock.now()
    }

    pub fn time_until(&self, trigger_timestamp: u64) -> Duration {
        self.clock.until(trigger_timestamp)
    }
}
