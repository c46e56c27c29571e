//! Block-level congestion monitor.
//!
//! The monitor scans every block exactly once, in order, and reports how busy it was and how
//! often the contracts of interest were called. It never stops on errors: a block that is not
//! available yet or a failed fetch only skips the current tick, and a block is never retried once
//! it was fetched.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use alloy::primitives::Address;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    chain::{BlockSummary, RaceProvider, TxSummary},
    metrics::MonitorMetrics,
    notify::{announce, Notifier},
    timing::TriggerWatcher,
};

pub const SCAN_INTERVAL: Duration = Duration::from_millis(100);
const REBASE_RETRY: Duration = Duration::from_secs(1);
pub const WINDOW_BANNER: &str = "===== ALLOWLIST START BLOCK =====";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedContract {
    pub label: String,
    pub address: Address,
}

impl NamedContract {
    pub fn new(label: impl Into<String>, address: Address) -> Self {
        Self {
            label: label.into(),
            address,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContractInteractions {
    pub unique_addresses: usize,
    pub total_interactions: usize,
}

/// Caller tally for the transactions of one block.
#[derive(Debug, Default)]
pub struct InteractionTally {
    callers: HashMap<Address, HashMap<Address, usize>>,
    pub skipped: usize,
}

impl InteractionTally {
    pub fn from_transactions(contracts: &[NamedContract], txs: &[TxSummary]) -> Self {
        let mut tally = Self {
            callers: contracts
                .iter()
                .map(|c| (c.address, HashMap::new()))
                .collect(),
            skipped: 0,
        };
        for tx in txs {
            let Some(to) = tx.to else {
                // contract creation; nothing to attribute
                tally.skipped += 1;
                debug!(tx_hash = %tx.hash, "skipping tx without recipient");
                continue;
            };
            if let Some(callers) = tally.callers.get_mut(&to) {
                *callers.entry(tx.from).or_default() += 1;
            }
        }
        tally
    }

    pub fn interactions(&self, contract: Address) -> ContractInteractions {
        self.callers
            .get(&contract)
            .map(|callers| ContractInteractions {
                unique_addresses: callers.len(),
                total_interactions: callers.values().sum(),
            })
            .unwrap_or_default()
    }
}

/// One scanned block, formatted for the announce sink.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockReport {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_gwei: u64,
    pub gas_used_fraction: f64,
    pub tx_count: usize,
    pub delta: Duration,
    pub window_opened: bool,
    pub contracts: Vec<(String, ContractInteractions)>,
}

impl fmt::Display for BlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block:{} TS:{} Fee:{:3} GasUsed:{:3.0}% Count:{:3} Delta:{:.2}",
            self.number,
            self.timestamp,
            self.base_fee_gwei,
            self.gas_used_fraction * 100.0,
            self.tx_count,
            self.delta.as_secs_f64(),
        )?;
        if self.window_opened {
            write!(f, "\n{WINDOW_BANNER}")?;
        }
        for (label, hits) in &self.contracts {
            write!(
                f,
                "\n\t{label} : {:2} from {:2}",
                hits.total_interactions, hits.unique_addresses
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanOutcome {
    Scanned(BlockReport),
    /// The next block does not exist yet.
    Pending,
    /// Fetching the next block failed for another reason.
    Failed,
}

#[derive(Clone, Copy, Debug)]
pub struct MonitorState {
    pub last_scanned_block: u64,
    pub last_scan_at: Instant,
    pub pending_window_trigger: Option<u64>,
    last_armed: Option<u64>,
}

/// Hands a window-open timestamp to a running monitor.
#[derive(Clone, Debug)]
pub struct WindowAlert(Arc<watch::Sender<Option<u64>>>);

impl WindowAlert {
    /// Asks the monitor to mark the first block at or past `trigger_timestamp`.
    /// Arming again with the same timestamp has no effect.
    pub fn arm(&self, trigger_timestamp: u64) {
        self.0.send_replace(Some(trigger_timestamp));
    }
}

pub struct BlockMonitor {
    provider: Arc<dyn RaceProvider>,
    contracts: Vec<NamedContract>,
    sink: Arc<dyn Notifier>,
    state: MonitorState,
    alerts: watch::Receiver<Option<u64>>,
    interval: Duration,
    metrics: Option<MonitorMetrics>,
}

impl BlockMonitor {
    pub fn new(
        provider: Arc<dyn RaceProvider>,
        contracts: Vec<NamedContract>,
        sink: Arc<dyn Notifier>,
    ) -> (Self, WindowAlert) {
        let (tx, alerts) = watch::channel(None);
        let monitor = Self {
            provider,
            contracts,
            sink,
            state: MonitorState {
                last_scanned_block: 0,
                last_scan_at: Instant::now(),
                pending_window_trigger: None,
                last_armed: None,
            },
            alerts,
            interval: SCAN_INTERVAL,
            metrics: None,
        };
        (monitor, WindowAlert(Arc::new(tx)))
    }

    pub fn with_metrics(mut self, metrics: Option<MonitorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the block after which scanning continues.
    pub fn starting_after(mut self, block: u64) -> Self {
        self.state.last_scanned_block = block;
        self.state.last_scan_at = Instant::now();
        self
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    fn absorb_alerts(&mut self) {
        if !self.alerts.has_changed().unwrap_or(false) {
            return;
        }
        let armed = *self.alerts.borrow_and_update();
        if armed.is_some() && armed != self.state.last_armed {
            self.state.last_armed = armed;
            self.state.pending_window_trigger = armed;
        }
    }

    /// Scans the block after the last scanned one, if it exists.
    pub async fn scan_once(&mut self) -> ScanOutcome {
        self.absorb_alerts();
        let next = self.state.last_scanned_block + 1;
        let block = match self.provider.block_with_txs(next).await {
            Ok(Some(block)) => block,
            Ok(None) => return ScanOutcome::Pending,
            Err(e) if e.is_block_unavailable() => return ScanOutcome::Pending,
            Err(e) => {
                warn!(block = next, "unexpected error while scanning: {e}");
                return ScanOutcome::Failed;
            }
        };

        let report = self.process(&block);
        self.state.last_scanned_block = block.number;
        if let Some(metrics) = &self.metrics {
            metrics.last_block.set(block.number as i64);
            metrics.base_fee_gwei.set(report.base_fee_gwei as i64);
            metrics.gas_used_fraction.set(report.gas_used_fraction);
        }
        announce(self.sink.as_ref(), &report.to_string()).await;
        ScanOutcome::Scanned(report)
    }

    fn process(&mut self, block: &BlockSummary) -> BlockReport {
        let mut tally = InteractionTally::from_transactions(&self.contracts, &block.transactions);
        tally.skipped += block.undecoded;
        if tally.skipped > 0 {
            debug!(block = block.number, skipped = tally.skipped, "skipped transactions");
        }

        let now = Instant::now();
        let delta = now.duration_since(self.state.last_scan_at);
        self.state.last_scan_at = now;

        let window_opened = match self.state.pending_window_trigger {
            Some(ts) if block.timestamp >= ts => {
                self.state.pending_window_trigger = None;
                true
            }
            _ => false,
        };

        BlockReport {
            number: block.number,
            timestamp: block.timestamp,
            base_fee_gwei: block.base_fee_per_gas.unwrap_or_default() / 1_000_000_000,
            gas_used_fraction: block.gas_used_fraction(),
            tx_count: block.tx_count(),
            delta,
            window_opened,
            contracts: self
                .contracts
                .iter()
                .map(|c| (c.label.clone(), tally.interactions(c.address)))
                .collect(),
        }
    }

    /// Skips ahead to the chain head, retrying until the head is known or `cancel` fires.
    async fn rebase(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            match self.provider.block_number().await {
                Ok(head) => {
                    self.state.last_scanned_block = head;
                    self.state.last_scan_at = Instant::now();
                    return true;
                }
                Err(e) => warn!("failed to read block height: {e}"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(REBASE_RETRY) => {}
            }
        }
    }

    /// Polls for new blocks until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.rebase(&cancel).await {
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
            }
        }
        debug!(last_block = self.state.last_scanned_block, "monitor stopped");
    }
}

/// Waits for the trigger event on `target` and announces it once.
pub async fn announce_trigger(watcher: TriggerWatcher, target: Address, sink: Arc<dyn Notifier>) {
    let start_time = watcher.watch_for_trigger(target).await;
    announce(
        sink.as_ref(),
        &format!("Initialize triggered with start_time {start_time}"),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::RaceClock,
        test_utils::{BlockFetch, MockChain, RecordingNotifier},
    };
    use alloy::primitives::{address, TxHash};

    const TARGET: Address = address!("0x00000000000000000000000000000000000000aa");
    const SPAM: Address = address!("0x00000000000000000000000000000000000000bb");
    const A: Address = address!("0x000000000000000000000000000000000000000a");
    const B: Address = address!("0x000000000000000000000000000000000000000b");

    fn tx(from: Address, to: Option<Address>) -> TxSummary {
        TxSummary {
            hash: TxHash::ZERO,
            from,
            to,
        }
    }

    fn block(number: u64, timestamp: u64, transactions: Vec<TxSummary>) -> BlockSummary {
        BlockSummary {
            number,
            timestamp,
            base_fee_per_gas: Some(25_000_000_000),
            gas_used: 7_500_000,
            gas_limit: 15_000_000,
            transactions,
            undecoded: 0,
        }
    }

    fn monitor(chain: &Arc<MockChain>) -> (BlockMonitor, WindowAlert, Arc<RecordingNotifier>) {
        let sink = RecordingNotifier::new();
        let (monitor, alert) = BlockMonitor::new(
            chain.clone(),
            vec![
                NamedContract::new("Target", TARGET),
                NamedContract::new("Spam  ", SPAM),
            ],
            sink.clone(),
        );
        (monitor.starting_after(10), alert, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn tallies_unique_and_total_callers() {
        let chain = MockChain::new(RaceClock::starting_at(0));
        chain.push_block(block(
            11,
            100,
            vec![
                tx(A, Some(TARGET)),
                tx(A, Some(TARGET)),
                tx(B, Some(TARGET)),
                tx(B, Some(SPAM)),
                tx(A, None),
            ],
        ));
        let (mut monitor, _, sink) = monitor(&chain);

        let ScanOutcome::Scanned(report) = monitor.scan_once().await else {
            panic!("block 11 should be scanned");
        };
        let target = report.contracts[0].1;
        assert_eq!(target.unique_addresses, 2);
        assert_eq!(target.total_interactions, 3);
        assert_eq!(report.contracts[1].1.total_interactions, 1);
        assert_eq!(report.tx_count, 5);
        assert_eq!(monitor.state().last_scanned_block, 11);

        let msg = &sink.messages()[0];
        assert!(msg.starts_with("Block:11 TS:100 Fee: 25 GasUsed: 50% Count:  5"));
        assert!(msg.contains("\n\tTarget :  3 from  2"));
    }

    #[tokio::test(start_paused = true)]
    async fn scans_each_block_once_in_order() {
        let chain = MockChain::new(RaceClock::starting_at(0));
        chain.script_block_fetches([
            BlockFetch::Unavailable,
            BlockFetch::Unfinalized,
            BlockFetch::Fail("connection reset".into()),
        ]);
        let (mut monitor, _, _) = monitor(&chain);

        assert_eq!(monitor.scan_once().await, ScanOutcome::Pending);
        assert_eq!(monitor.scan_once().await, ScanOutcome::Pending);
        assert_eq!(monitor.scan_once().await, ScanOutcome::Failed);
        assert_eq!(monitor.state().last_scanned_block, 10);

        for n in 11..=14 {
            chain.push_block(block(n, n * 2, vec![]));
        }
        let mut scanned = vec![];
        for _ in 0..6 {
            if let ScanOutcome::Scanned(report) = monitor.scan_once().await {
                scanned.push(report.number);
            }
        }
        assert_eq!(scanned, vec![11, 12, 13, 14]);

        let fetched = chain.requested_blocks();
        assert_eq!(fetched[..3], [11, 11, 11]);
        // once scanned, a number is never requested again
        assert_eq!(fetched[3..], [11, 12, 13, 14, 15, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_transaction_does_not_stall_the_scan() {
        let chain = MockChain::new(RaceClock::starting_at(0));
        let call = |hash: u8, from: Address| {
            serde_json::json!({
                "type": "0x2",
                "hash": format!("{:#x}", TxHash::with_last_byte(hash)),
                "from": format!("{from:#x}"),
                "to": format!("{TARGET:#x}"),
            })
        };
        chain.script_block_fetches([BlockFetch::Json(serde_json::json!({
            "number": "0xb",
            "timestamp": "0x64",
            "baseFeePerGas": "0x5d21dba00",
            "gasUsed": "0x0",
            "gasLimit": "0x1c9c380",
            "transactions": [
                call(1, A),
                { "type": "0x7e", "sourceHash": "0x01", "mint": "0x0" },
                call(2, B),
            ],
        }))]);
        chain.push_block(block(12, 102, vec![tx(A, Some(TARGET))]));
        let (mut monitor, _, _) = monitor(&chain);

        let ScanOutcome::Scanned(report) = monitor.scan_once().await else {
            panic!("block 11 should be scanned despite the unreadable tx");
        };
        assert_eq!(report.number, 11);
        assert_eq!(report.tx_count, 3);
        assert_eq!(report.contracts[0].1.unique_addresses, 2);
        assert_eq!(report.contracts[0].1.total_interactions, 2);
        assert_eq!(monitor.state().last_scanned_block, 11);

        let ScanOutcome::Scanned(report) = monitor.scan_once().await else {
            panic!("block 12 should follow");
        };
        assert_eq!(report.number, 12);
        assert_eq!(chain.requested_blocks(), vec![11, 12]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_banner_appears_exactly_once() {
        let chain = MockChain::new(RaceClock::starting_at(0));
        let (mut monitor, alert, sink) = monitor(&chain);
        alert.arm(104);

        for (n, ts) in [(11, 100), (12, 102), (13, 104), (14, 106)] {
            chain.push_block(block(n, ts, vec![]));
        }
        let mut opened = vec![];
        for _ in 0..4 {
            if let ScanOutcome::Scanned(report) = monitor.scan_once().await {
                opened.push(report.window_opened);
            }
            // re-arming with the same timestamp must not repeat the banner
            alert.arm(104);
        }
        assert_eq!(opened, vec![false, false, true, false]);
        assert_eq!(sink.count_containing(WINDOW_BANNER), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn banner_fires_for_first_block_past_trigger() {
        let chain = MockChain::new(RaceClock::starting_at(0));
        let (mut monitor, alert, _) = monitor(&chain);
        chain.push_block(block(11, 100, vec![]));
        monitor.scan_once().await;

        alert.arm(101);
        chain.push_block(block(12, 103, vec![]));
        let ScanOutcome::Scanned(report) = monitor.scan_once().await else {
            panic!("block 12 should be scanned");
        };
        assert!(report.window_opened);
        assert!(report.to_string().contains(WINDOW_BANNER));
    }

    #[tokio::test(start_paused = true)]
    async fn run_rebases_to_head_and_stops_on_cancel() {
        let chain = MockChain::new(RaceClock::starting_at(0));
        for n in 1..=5 {
            chain.push_block(block(n, n, vec![]));
        }
        let (monitor, _, sink) = monitor(&chain);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        chain.push_block(block(6, 6, vec![]));
        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        handle.await.unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Block:6 "));
    }
}
