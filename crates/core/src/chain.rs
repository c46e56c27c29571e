//! The seam between race components and a chain endpoint.
//!
//! Everything that reads from or submits to a node goes through [`RaceProvider`], which keeps
//! the broadcast client, monitor and watcher testable against in-memory chains.

use std::sync::Arc;

use alloy::{
    eips::BlockNumberOrTag,
    network::ReceiptResponse,
    primitives::{Address, Bytes, TxHash, U256, U64},
    providers::{DynProvider, Provider},
    rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest},
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::Result;

/// Read-only list of endpoints shared by every client in a process.
pub type Endpoints = Arc<[Arc<dyn RaceProvider>]>;

/// The fields of a transaction that the race components care about.
/// The fields of a transaction that the race components care about.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TxSummary {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creations.
    #[serde(default)]
    pub to: Option<Address>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<u64>,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub transactions: Vec<TxSummary>,
    /// Transactions in the block that could not be read.
    pub undecoded: usize,
}

/// Block header fields as returned by `eth_getBlockByNumber`, with transactions left raw.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: U64,
    timestamp: U64,
    #[serde(default)]
    base_fee_per_gas: Option<U64>,
    gas_used: U64,
    gas_limit: U64,
    #[serde(default)]
    transactions: Vec<serde_json::Value>,
}

impl BlockSummary {
    pub fn gas_used_fraction(&self) -> f64 {
        if self.gas_limit == 0 {
            return 0.0;
        }
        self.gas_used as f64 / self.gas_limit as f64
    }

    /// Total transactions in the block, readable or not.
    pub fn tx_count(&self) -> usize {
        self.transactions.len() + self.undecoded
    }

    /// Reads a JSON-RPC block with full transaction bodies.
    ///
    /// Transactions are decoded one at a time, so a transaction type this crate does not know
    /// about only counts towards `undecoded` instead of failing the whole block.
    pub fn from_rpc_json(value: serde_json::Value) -> Result<Self> {
        let block: RpcBlock = serde_json::from_value(value)?;
        let number = block.number.to::<u64>();
        let mut transactions = Vec::with_capacity(block.transactions.len());
        let mut undecoded = 0;
        for tx in block.transactions {
            match serde_json::from_value::<TxSummary>(tx) {
                Ok(tx) => transactions.push(tx),
                Err(e) => {
                    debug!(block = number, "undecodable transaction: {e}");
                    undecoded += 1;
                }
            }
        }
        Ok(Self {
            number,
            timestamp: block.timestamp.to(),
            base_fee_per_gas: block.base_fee_per_gas.map(|fee| fee.to()),
            gas_used: block.gas_used.to(),
            gas_limit: block.gas_limit.to(),
            transactions,
            undecoded,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: TxHash,
    pub from: Address,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

impl From<TransactionReceipt> for ReceiptSummary {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            from: receipt.from,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
            logs: receipt.inner.logs().to_vec(),
        }
    }
}

#[async_trait]
pub trait RaceProvider: Send + Sync {
    /// Short name used in logs.
    fn label(&self) -> &str;

    async fn block_number(&self) -> Result<u64>;

    /// Fetches a block with full transaction bodies. `Ok(None)` means the block does not exist yet.
    async fn block_with_txs(&self, number: u64) -> Result<Option<BlockSummary>>;

    async fn transaction_count(&self, address: Address) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    async fn chain_id(&self) -> Result<u64>;

    /// Submits an EIP-2718 encoded, signed transaction.
    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash>;

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptSummary>>;

    /// Executes a read-only call against the latest state.
    async fn call(&self, tx: TransactionRequest) -> Result<Bytes>;

    async fn new_log_filter(&self, filter: &Filter) -> Result<U256>;

    /// Returns logs matched since the previous poll of the filter.
    async fn poll_log_filter(&self, id: U256) -> Result<Vec<Log>>;
}

/// A JSON-RPC node reached through alloy.
pub struct RpcEndpoint {
    label: String,
    provider: DynProvider,
}

impl RpcEndpoint {
    pub fn new(label: impl Into<String>, provider: DynProvider) -> Self {
        Self {
            label: label.into(),
            provider,
        }
    }
}

#[async_trait]
impl RaceProvider for RpcEndpoint {
    fn label(&self) -> &str {
        &self.label
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_with_txs(&self, number: u64) -> Result<Option<BlockSummary>> {
        let block: Option<serde_json::Value> = self
            .provider
            .raw_request(
                "eth_getBlockByNumber".into(),
                (BlockNumberOrTag::Number(number), true),
            )
            .await?;
        block.map(BlockSummary::from_rpc_json).transpose()
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.provider.get_transaction_count(address).await?)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptSummary>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(ReceiptSummary::from))
    }

    async fn call(&self, tx: TransactionRequest) -> Result<Bytes> {
        Ok(self.provider.call(tx).await?)
    }

    async fn new_log_filter(&self, filter: &Filter) -> Result<U256> {
        Ok(self.provider.new_filter(filter).await?)
    }

    async fn poll_log_filter(&self, id: U256) -> Result<Vec<Log>> {
        Ok(self.provider.get_filter_changes::<Log>(id).await?)
    }
}

/// Sums the transaction counts of `addresses` as seen by `provider`.
pub async fn total_nonce(provider: &dyn RaceProvider, addresses: &[Address]) -> Result<u64> {
    let mut total = 0;
    for address in addresses {
        total += provider.transaction_count(*address).await?;
    }
    Ok(total)
}

/// Sums the balances of `addresses` as seen by `provider`.
pub async fn total_balance(provider: &dyn RaceProvider, addresses: &[Address]) -> Result<U256> {
    let mut total = U256::ZERO;
    for address in addresses {
        total += provider.balance(*address).await?;
    }
    Ok(total)
}
