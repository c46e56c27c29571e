//! Multi-endpoint transaction broadcasting.
//!
//! A [`BroadcastClient`] owns one account and its nonce. Each send signs the transaction once and
//! offers the identical raw payload to every endpoint at the same time, waiting at most
//! `send_timeout` for their answers. Endpoints that have not answered by then are abandoned:
//! their tasks keep running detached and whatever they return is dropped.

use std::{sync::Arc, time::Duration};

use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxHash, U256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
};
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    chain::{Endpoints, RaceProvider, ReceiptSummary},
    error::{BroadcastError, RuntimeErrorKind},
    gas::GasProfile,
    metrics::BroadcastMetrics,
    Result,
};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What happened when one signed payload was offered to every endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutOutcome {
    pub attempted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub errors: Vec<String>,
}

impl FanOutOutcome {
    /// Endpoints that answered before the deadline, whatever the answer.
    pub fn done(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// Offers `raw` to every endpoint concurrently and collects answers until `timeout` elapses.
pub async fn fan_out(
    endpoints: &[Arc<dyn RaceProvider>],
    raw: Bytes,
    timeout: Duration,
) -> FanOutOutcome {
    let deadline = Instant::now() + timeout;
    let mut pending = JoinSet::new();
    for endpoint in endpoints.iter().cloned() {
        let raw = raw.clone();
        pending.spawn(async move {
            let res = endpoint.send_raw(&raw).await;
            (endpoint.label().to_owned(), res)
        });
    }

    let mut outcome = FanOutOutcome {
        attempted: endpoints.len(),
        ..Default::default()
    };
    loop {
        match tokio::time::timeout_at(deadline, pending.join_next()).await {
            Ok(Some(Ok((_, Ok(_))))) => outcome.accepted += 1,
            Ok(Some(Ok((label, Err(e))))) => {
                // a node that already holds the tx has it in its pool; that is what we asked for
                if e.to_string().to_lowercase().contains("already known") {
                    outcome.accepted += 1;
                } else {
                    outcome.rejected += 1;
                    outcome.errors.push(format!("{label}: {e}"));
                }
            }
            Ok(Some(Err(e))) => {
                outcome.rejected += 1;
                outcome.errors.push(format!("send task failed: {e}"));
            }
            Ok(None) => break,
            Err(_) => {
                outcome.timed_out = pending.len();
                pending.detach_all();
                break;
            }
        }
    }
    outcome
}

pub struct BroadcastClient {
    wallet: EthereumWallet,
    address: Address,
    nonce: u64,
    chain_id: u64,
    gas: GasProfile,
    endpoints: Endpoints,
    send_timeout: Duration,
    receipt_timeout: Duration,
    metrics: Option<BroadcastMetrics>,
}

impl BroadcastClient {
    /// Creates a client with an explicitly known nonce and chain id.
    pub fn new(
        signer: PrivateKeySigner,
        endpoints: Endpoints,
        gas: GasProfile,
        nonce: u64,
        chain_id: u64,
    ) -> Self {
        let address = signer.address();
        Self {
            wallet: EthereumWallet::from(signer),
            address,
            nonce,
            chain_id,
            gas,
            endpoints,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            metrics: None,
        }
    }

    /// Creates a client, reading the account's nonce and the chain id from the first endpoint.
    pub async fn connect(
        signer: PrivateKeySigner,
        endpoints: Endpoints,
        gas: GasProfile,
    ) -> Result<Self> {
        let primary = endpoints
            .first()
            .cloned()
            .ok_or(RuntimeErrorKind::EndpointsMissing)?;
        let nonce = primary.transaction_count(signer.address()).await?;
        let chain_id = primary.chain_id().await?;
        Ok(Self::new(signer, endpoints, gas, nonce, chain_id))
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_receipt_timeout(mut self, receipt_timeout: Duration) -> Self {
        self.receipt_timeout = receipt_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<BroadcastMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The nonce the next send will use.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn gas(&self) -> GasProfile {
        self.gas
    }

    /// Replaces the active gas profile, returning the previous one.
    pub fn set_gas(&mut self, gas: GasProfile) -> GasProfile {
        std::mem::replace(&mut self.gas, gas)
    }

    fn primary(&self) -> Result<&Arc<dyn RaceProvider>> {
        Ok(self
            .endpoints
            .first()
            .ok_or(RuntimeErrorKind::EndpointsMissing)?)
    }

    /// Re-reads the account nonce from the chain, e.g. after an external tool used the account.
    pub async fn resync_nonce(&mut self) -> Result<u64> {
        self.nonce = self.primary()?.transaction_count(self.address).await?;
        Ok(self.nonce)
    }

    /// Calls `to` with a typed contract call.
    pub async fn send<C: SolCall>(&mut self, to: Address, call: &C, value: U256) -> Result<TxHash> {
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(call.abi_encode())
            .with_value(value);
        self.send_request(tx).await
    }

    /// Sends `value` wei to `to` without calldata.
    pub async fn transfer(&mut self, to: Address, value: U256) -> Result<TxHash> {
        let tx = TransactionRequest::default().with_to(to).with_value(value);
        self.send_request(tx).await
    }

    /// Sends a contract creation with `init_code` as input.
    pub async fn deploy(&mut self, init_code: Bytes) -> Result<TxHash> {
        let tx = TransactionRequest::default().with_deploy_code(init_code);
        self.send_request(tx).await
    }

    /// Signs `tx` with the current nonce and gas profile and broadcasts it.
    ///
    /// The nonce advances by exactly one per call, whether or not signing or broadcasting
    /// succeeded. Fails with [`BroadcastError`] only when no endpoint accepted the payload.
    pub async fn send_request(&mut self, tx: TransactionRequest) -> Result<TxHash> {
        let tx = self
            .gas
            .apply(tx)
            .with_from(self.address)
            .with_nonce(self.nonce)
            .with_chain_id(self.chain_id);
        let signed = tx.build(&self.wallet).await;
        self.nonce += 1;
        let envelope = signed?;

        let tx_hash = *envelope.tx_hash();
        let raw: Bytes = envelope.encoded_2718().into();
        let start = Instant::now();
        let outcome = fan_out(&self.endpoints, raw, self.send_timeout).await;
        let elapsed = start.elapsed();

        info!(
            %tx_hash,
            from = %self.address,
            attempted = outcome.attempted,
            done = outcome.done(),
            accepted = outcome.accepted,
            timed_out = outcome.timed_out,
            elapsed_ms = elapsed.as_millis() as u64,
            "sent {} requests",
            outcome.attempted
        );
        if let Some(metrics) = &self.metrics {
            metrics.observe(
                outcome.accepted,
                outcome.rejected,
                outcome.timed_out,
                elapsed.as_secs_f64(),
            );
        }

        if outcome.accepted == 0 {
            return Err(BroadcastError {
                tx_hash,
                attempted: outcome.attempted,
                rejected: outcome.rejected,
                timed_out: outcome.timed_out,
                errors: outcome.errors,
            }
            .into());
        }
        if !outcome.errors.is_empty() {
            debug!(%tx_hash, "endpoint errors: {}", outcome.errors.join("; "));
        }
        Ok(tx_hash)
    }

    /// Polls until `tx_hash` is mined, giving up after the receipt timeout.
    pub async fn await_receipt(&self, tx_hash: TxHash) -> Result<ReceiptSummary> {
        await_receipt(self.primary()?.as_ref(), tx_hash, self.receipt_timeout).await
    }
}

/// Polls `provider` until `tx_hash` has a receipt or `timeout` elapses.
pub async fn await_receipt(
    provider: &dyn RaceProvider,
    tx_hash: TxHash,
    timeout: Duration,
) -> Result<ReceiptSummary> {
    let deadline = Instant::now() + timeout;
    loop {
        match provider.receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(e) => warn!(%tx_hash, "failed to fetch receipt: {e}"),
        }
        if Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
            return Err(RuntimeErrorKind::ReceiptTimeout(tx_hash, timeout).into());
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }
}
