use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy::{
    consensus::{transaction::SignerRecoverable, Transaction, TxEnvelope},
    eips::eip2718::Decodable2718,
    primitives::{Address, Bytes, LogData, TxHash, TxKind, B256, U256},
    rpc::types::{Filter, Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::{SolCall, SolEvent, SolValue},
    transports::TransportErrorKind,
};
use async_trait::async_trait;

use crate::{
    chain::{BlockSummary, Endpoints, RaceProvider, ReceiptSummary, TxSummary},
    clock::RaceClock,
    contracts::{IAllowlistProxy, IFlatLaunchpeg, ILaunchpegFactory},
    launcher::{
        split_fleet, FleetTiers, JobCount, JobKind, JobLauncher, JobStatus, JobStatusRow,
        LaunchSpec, LauncherFactory, GROUP_SIZE,
    },
    notify::{Notifier, NotifyError},
    Result,
};

/// Deterministic signer #`i`; distinct for every index.
pub fn test_signer(i: usize) -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::from(U256::from(i as u64 + 1))).unwrap()
}

pub fn test_signers(range: std::ops::Range<usize>) -> Vec<PrivateKeySigner> {
    range.map(test_signer).collect()
}

fn rpc_error(msg: &str) -> crate::Error {
    TransportErrorKind::custom_str(msg).into()
}

fn decode_raw(raw: &[u8]) -> (TxEnvelope, Address) {
    let envelope = TxEnvelope::decode_2718(&mut &raw[..]).unwrap();
    let from = envelope.recover_signer().unwrap();
    (envelope, from)
}

#[derive(Clone, Debug)]
pub enum EndpointBehavior {
    Accept,
    Reject(String),
    Hang,
    Delay(Duration),
}

/// An endpoint that only answers raw transaction submissions, in a scripted way.
pub struct ScriptedEndpoint {
    label: String,
    behavior: EndpointBehavior,
    received: Mutex<Vec<Bytes>>,
}

impl ScriptedEndpoint {
    pub fn new(label: impl Into<String>, behavior: EndpointBehavior) -> Self {
        Self {
            label: label.into(),
            behavior,
            received: Mutex::new(vec![]),
        }
    }

    pub fn received(&self) -> Vec<TxHash> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|raw| *decode_raw(raw).0.tx_hash())
            .collect()
    }

    pub fn nonces(&self) -> Vec<u64> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|raw| decode_raw(raw).0.nonce())
            .collect()
    }
}

#[async_trait]
impl RaceProvider for ScriptedEndpoint {
    fn label(&self) -> &str {
        &self.label
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(0)
    }

    async fn block_with_txs(&self, _number: u64) -> Result<Option<BlockSummary>> {
        Ok(None)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        Ok(0)
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        Ok(U256::ZERO)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(1)
    }

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash> {
        self.received.lock().unwrap().push(Bytes::copy_from_slice(raw));
        let hash = *decode_raw(raw).0.tx_hash();
        match &self.behavior {
            EndpointBehavior::Accept => Ok(hash),
            EndpointBehavior::Reject(msg) => Err(rpc_error(msg)),
            EndpointBehavior::Hang => std::future::pending().await,
            EndpointBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(hash)
            }
        }
    }

    async fn receipt(&self, _tx_hash: TxHash) -> Result<Option<ReceiptSummary>> {
        Ok(None)
    }

    async fn call(&self, _tx: TransactionRequest) -> Result<Bytes> {
        Err(rpc_error("calls are not scripted"))
    }

    async fn new_log_filter(&self, _filter: &Filter) -> Result<U256> {
        Err(rpc_error("filters are not scripted"))
    }

    async fn poll_log_filter(&self, _id: U256) -> Result<Vec<Log>> {
        Err(rpc_error("filters are not scripted"))
    }
}

/// Injected answer for the next block fetch.
#[derive(Clone, Debug)]
pub enum BlockFetch {
    Unavailable,
    Unfinalized,
    Fail(String),
    /// A raw `eth_getBlockByNumber` response, decoded as a node's answer would be.
    Json(serde_json::Value),
}

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, BlockSummary>,
    head: u64,
    mine_on_send: bool,
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    receipts: HashMap<TxHash, ReceiptSummary>,
    reverting: Vec<[u8; 4]>,
    rejecting: Vec<[u8; 4]>,
    sent: Vec<(Address, Option<Address>, Bytes)>,
    // launchpeg simulation
    factory: Address,
    launchpeg: Address,
    allowlist: HashMap<Address, U256>,
    start_time: U256,
    owners: Vec<Address>,
    // log filters
    logs: Vec<Log>,
    filters: HashMap<U256, (Filter, usize)>,
    filter_installs: usize,
    filter_poll_failures: usize,
    block_fetches: VecDeque<BlockFetch>,
    requested_blocks: Vec<u64>,
}

/// An in-memory chain that mines one block per submitted transaction and simulates the launchpeg
/// factory, a launchpeg, its allowlist proxies and token transfers.
pub struct MockChain {
    clock: RaceClock,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(clock: RaceClock) -> Arc<Self> {
        let state = ChainState {
            mine_on_send: true,
            ..Default::default()
        };
        Arc::new(Self {
            clock,
            state: Mutex::new(state),
        })
    }

    pub fn endpoints(self: &Arc<Self>) -> Endpoints {
        vec![self.clone() as Arc<dyn RaceProvider>].into()
    }

    /// Declares the factory address and the launchpeg address it will create.
    pub fn with_launchpeg(self: Arc<Self>, factory: Address, launchpeg: Address) -> Arc<Self> {
        {
            let mut state = self.state.lock().unwrap();
            state.factory = factory;
            state.launchpeg = launchpeg;
        }
        self
    }

    pub fn set_mine_on_send(&self, mine: bool) {
        self.state.lock().unwrap().mine_on_send = mine;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn set_allowlist(&self, address: Address, amount: u64) {
        self.state
            .lock()
            .unwrap()
            .allowlist
            .insert(address, U256::from(amount));
    }

    /// Makes every call starting with `selector` revert.
    pub fn revert_selector(&self, selector: [u8; 4]) {
        self.state.lock().unwrap().reverting.push(selector);
    }

    /// Makes the node refuse any submitted call to `selector`.
    pub fn reject_selector(&self, selector: [u8; 4]) {
        self.state.lock().unwrap().rejecting.push(selector);
    }

    /// Simulates `count` transactions sent by `address` outside of this process.
    pub fn bump_nonce(&self, address: Address, count: u64) {
        *self.state.lock().unwrap().nonces.entry(address).or_default() += count;
    }

    pub fn nonce_of(&self, address: Address) -> u64 {
        self.state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub fn push_block(&self, block: BlockSummary) {
        let mut state = self.state.lock().unwrap();
        state.head = state.head.max(block.number);
        state.blocks.insert(block.number, block);
    }

    pub fn script_block_fetches(&self, fetches: impl IntoIterator<Item = BlockFetch>) {
        self.state.lock().unwrap().block_fetches.extend(fetches);
    }

    pub fn requested_blocks(&self) -> Vec<u64> {
        self.state.lock().unwrap().requested_blocks.clone()
    }

    pub fn fail_filter_polls(&self, count: usize) {
        self.state.lock().unwrap().filter_poll_failures = count;
    }

    pub fn filter_installs(&self) -> usize {
        self.state.lock().unwrap().filter_installs
    }

    /// Emits a log as if it were included in the latest block.
    pub fn emit_log(&self, address: Address, data: LogData) {
        let mut state = self.state.lock().unwrap();
        let log = Log {
            inner: alloy::primitives::Log { address, data },
            block_number: Some(state.head),
            ..Default::default()
        };
        state.logs.push(log);
    }

    /// Every transaction accepted so far as `(from, to, input)`.
    pub fn sent(&self) -> Vec<(Address, Option<Address>, Bytes)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn calls_to(&self, selector: [u8; 4]) -> usize {
        self.sent()
            .iter()
            .filter(|(_, _, input)| input.starts_with(&selector))
            .count()
    }

    /// Mints the next token to `owner` without a transaction.
    pub fn mint_to(&self, owner: Address) {
        self.state.lock().unwrap().owners.push(owner);
    }

    pub fn owners(&self) -> Vec<Address> {
        self.state.lock().unwrap().owners.clone()
    }

    fn execute(
        state: &mut ChainState,
        from: Address,
        to: Option<Address>,
        input: &[u8],
    ) -> (bool, Vec<LogData>) {
        if state.reverting.iter().any(|s| input.starts_with(s)) {
            return (false, vec![]);
        }
        let Some(to) = to else {
            return (true, vec![]);
        };
        let mut logs = vec![];
        if to == state.factory
            && input.starts_with(&ILaunchpegFactory::createFlatLaunchpegCall::SELECTOR)
        {
            logs.push(LogData::new_unchecked(
                vec![
                    ILaunchpegFactory::FlatLaunchpegCreated::SIGNATURE_HASH,
                    state.launchpeg.into_word(),
                ],
                Bytes::new(),
            ));
        } else if let Ok(call) = IFlatLaunchpeg::seedAllowlistCall::abi_decode(input) {
            for (address, amount) in call.addresses.iter().zip(call.numNfts.iter()) {
                state.allowlist.insert(*address, *amount);
            }
        } else if let Ok(call) = IFlatLaunchpeg::initializePhasesCall::abi_decode(input) {
            state.start_time = call.allowlistStartTime;
            logs.push(
                IFlatLaunchpeg::Initialized {
                    allowlistStartTime: call.allowlistStartTime,
                    publicSaleStartTime: call.publicSaleStartTime,
                    allowlistPrice: call.allowlistPrice,
                    salePrice: call.salePrice,
                }
                .encode_log_data(),
            );
        } else if IFlatLaunchpeg::allowlistMintCall::abi_decode(input).is_ok() {
            state.owners.push(from);
        } else if input.starts_with(&IAllowlistProxy::remoteAllowlistMintCall::SELECTOR) {
            state.owners.push(to);
        } else if let Ok(call) = IAllowlistProxy::withdrawCall::abi_decode(input) {
            let id = call.tokenId.saturating_to::<usize>();
            match state.owners.get_mut(id) {
                Some(owner) if *owner == to => *owner = from,
                _ => return (false, vec![]),
            }
        } else if let Ok(call) = IFlatLaunchpeg::safeTransferFromCall::abi_decode(input) {
            let id = call.tokenId.saturating_to::<usize>();
            match state.owners.get_mut(id) {
                Some(owner) if *owner == call.from && call.from == from => *owner = call.to,
                _ => return (false, vec![]),
            }
        }
        (true, logs)
    }
}

#[async_trait]
impl RaceProvider for MockChain {
    fn label(&self) -> &str {
        "mock"
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_with_txs(&self, number: u64) -> Result<Option<BlockSummary>> {
        let mut state = self.state.lock().unwrap();
        state.requested_blocks.push(number);
        match state.block_fetches.pop_front() {
            Some(BlockFetch::Unavailable) => return Ok(None),
            Some(BlockFetch::Unfinalized) => {
                return Err(rpc_error("cannot query unfinalized data"))
            }
            Some(BlockFetch::Fail(msg)) => return Err(rpc_error(&msg)),
            Some(BlockFetch::Json(value)) => return BlockSummary::from_rpc_json(value).map(Some),
            None => {}
        }
        Ok(state.blocks.get(&number).cloned())
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.nonce_of(address))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(1)
    }

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash> {
        let (envelope, from) = decode_raw(raw);
        let tx_hash = *envelope.tx_hash();
        let mut state = self.state.lock().unwrap();
        if state.rejecting.iter().any(|s| envelope.input().starts_with(s)) {
            return Err(rpc_error("insufficient funds for gas * price + value"));
        }
        let expected = state.nonces.get(&from).copied().unwrap_or_default();
        if envelope.nonce() != expected {
            return Err(rpc_error(&format!(
                "invalid nonce: expected {expected}, got {}",
                envelope.nonce()
            )));
        }
        state.nonces.insert(from, expected + 1);

        let to = match envelope.kind() {
            TxKind::Call(to) => Some(to),
            TxKind::Create => None,
        };
        let input = envelope.input().clone();
        state.sent.push((from, to, input.clone()));
        let (success, log_data) = Self::execute(&mut state, from, to, &input);
        let value = envelope.value();
        if let (true, Some(to)) = (success && !value.is_zero(), to) {
            let balance = state.balances.entry(from).or_default();
            *balance = balance.saturating_sub(value);
            *state.balances.entry(to).or_default() += value;
        }

        let number = state.head + 1;
        if state.mine_on_send {
            state.head = number;
            state.blocks.insert(
                number,
                BlockSummary {
                    number,
                    timestamp: self.clock.now_secs(),
                    base_fee_per_gas: Some(25_000_000_000),
                    gas_used: envelope.gas_limit() / 2,
                    gas_limit: 15_000_000,
                    transactions: vec![TxSummary {
                        hash: tx_hash,
                        from,
                        to,
                    }],
                    undecoded: 0,
                },
            );
        }
        let logs = log_data
            .into_iter()
            .map(|data| Log {
                inner: alloy::primitives::Log {
                    address: to.unwrap_or_default(),
                    data,
                },
                block_number: Some(number),
                transaction_hash: Some(tx_hash),
                ..Default::default()
            })
            .collect::<Vec<_>>();
        state.logs.extend(logs.iter().cloned());
        let receipt = ReceiptSummary {
            tx_hash,
            from,
            success,
            block_number: Some(number),
            gas_used: 21_000,
            contract_address: to.is_none().then(|| from.create(envelope.nonce())),
            logs,
        };
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptSummary>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, tx: TransactionRequest) -> Result<Bytes> {
        let input = tx.input.input().cloned().unwrap_or_default();
        let state = self.state.lock().unwrap();
        let out = if let Ok(call) = IFlatLaunchpeg::allowlistCall::abi_decode(&input) {
            state
                .allowlist
                .get(&call.account)
                .copied()
                .unwrap_or_default()
                .abi_encode()
        } else if input.starts_with(&IFlatLaunchpeg::allowlistStartTimeCall::SELECTOR) {
            state.start_time.abi_encode()
        } else if input.starts_with(&IFlatLaunchpeg::totalSupplyCall::SELECTOR) {
            U256::from(state.owners.len()).abi_encode()
        } else if let Ok(call) = IFlatLaunchpeg::ownerOfCall::abi_decode(&input) {
            match state.owners.get(call.tokenId.saturating_to::<usize>()) {
                Some(owner) => owner.abi_encode(),
                None => return Err(rpc_error("execution reverted: nonexistent token")),
            }
        } else {
            return Err(rpc_error("execution reverted"));
        };
        Ok(out.into())
    }

    async fn new_log_filter(&self, filter: &Filter) -> Result<U256> {
        let mut state = self.state.lock().unwrap();
        state.filter_installs += 1;
        let id = U256::from(state.filter_installs);
        let cursor = state.logs.len();
        state.filters.insert(id, (filter.clone(), cursor));
        Ok(id)
    }

    async fn poll_log_filter(&self, id: U256) -> Result<Vec<Log>> {
        let mut state = self.state.lock().unwrap();
        if state.filter_poll_failures > 0 {
            state.filter_poll_failures -= 1;
            state.filters.remove(&id);
            return Err(rpc_error("filter not found"));
        }
        let total = state.logs.len();
        let Some((filter, cursor)) = state.filters.get(&id).cloned() else {
            return Err(rpc_error("filter not found"));
        };
        let matched = state.logs[cursor..]
            .iter()
            .filter(|log| filter.address.matches(&log.address()))
            .filter(|log| {
                log.topics()
                    .first()
                    .is_some_and(|topic| filter.topics[0].matches(topic))
            })
            .cloned()
            .collect();
        state.filters.insert(id, (filter, total));
        Ok(matched)
    }
}

/// A notification sink that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink whose deliveries all fail after being recorded.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> std::result::Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_owned());
        if self.fail {
            return Err(NotifyError::Rejected(500));
        }
        Ok(())
    }
}

/// Builds [`ScriptedLauncher`]s that act on a [`MockChain`] the way real agents would: single-shot
/// accounts and resources each win a token, every agent account spends nonces.
pub struct ScriptedLaunchers {
    chain: Arc<MockChain>,
    single_shot: Vec<Address>,
    fleet_txs: u64,
    builds: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl ScriptedLaunchers {
    pub fn new(chain: Arc<MockChain>, single_shot: Vec<Address>, fleet_txs: u64) -> Self {
        Self {
            chain,
            single_shot,
            fleet_txs,
            builds: Default::default(),
        }
    }

    /// Shared view of every spec a launcher was built for.
    pub fn builds(&self) -> Arc<Mutex<Vec<LaunchSpec>>> {
        self.builds.clone()
    }
}

impl LauncherFactory for ScriptedLaunchers {
    fn build(&self, spec: LaunchSpec) -> Result<Box<dyn JobLauncher>> {
        self.builds.lock().unwrap().push(spec);
        Ok(Box::new(ScriptedLauncher {
            chain: self.chain.clone(),
            single_shot: self.single_shot.clone(),
            fleet_txs: self.fleet_txs,
            expected: vec![],
        }))
    }
}

pub struct ScriptedLauncher {
    chain: Arc<MockChain>,
    single_shot: Vec<Address>,
    fleet_txs: u64,
    expected: Vec<(JobKind, usize)>,
}

#[async_trait]
impl JobLauncher for ScriptedLauncher {
    async fn launch_single_shot(&mut self) -> Result<()> {
        for account in &self.single_shot {
            self.chain.bump_nonce(*account, 1);
            self.chain.mint_to(*account);
        }
        self.expected.push((JobKind::SingleShot, 1));
        Ok(())
    }

    async fn launch_grouped_agents(
        &mut self,
        resources: &[Address],
        participants: &[Address],
    ) -> Result<usize> {
        for account in participants {
            self.chain.bump_nonce(*account, 1);
        }
        for resource in resources {
            self.chain.mint_to(*resource);
        }
        let groups = participants.len() / GROUP_SIZE;
        self.expected.push((JobKind::Grouped, groups));
        Ok(groups)
    }

    async fn launch_fleet(&mut self, participants: &[Address]) -> Result<FleetTiers> {
        for account in participants {
            self.chain.bump_nonce(*account, self.fleet_txs);
        }
        self.expected.push((JobKind::Fleet, participants.len()));
        Ok(split_fleet(participants))
    }

    async fn fetch_status(&mut self) -> Result<JobStatus> {
        let rows = self
            .expected
            .iter()
            .map(|(kind, expected)| JobStatusRow {
                kind: *kind,
                expected: *expected,
                count: JobCount {
                    running: *expected,
                    queued: None,
                },
            })
            .collect();
        Ok(JobStatus { rows })
    }

    fn settle_time(&self) -> Duration {
        Duration::from_secs(10)
    }
}
