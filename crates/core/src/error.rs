use alloy::{
    network::{Ethereum, TransactionBuilderError},
    primitives::{Address, TxHash, U256},
    transports::{RpcError, TransportErrorKind},
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("launcher error: {0}")]
    Launcher(#[from] LauncherError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeErrorKind),

    #[error("failed to encode or decode contract data: {0}")]
    SolTypes(#[from] alloy::sol_types::Error),

    #[error("failed to build eth transaction: {0}")]
    TransactionBuilderEth(#[from] TransactionBuilderError<Ethereum>),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),
}

impl Error {
    /// Returns true if the error is the node telling us the requested block does not exist yet.
    pub fn is_block_unavailable(&self) -> bool {
        match self {
            Error::Rpc(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("unfinalized") || msg.contains("header not found")
            }
            _ => false,
        }
    }
}

/// Raised when a signed transaction was offered to every endpoint and none accepted it.
#[derive(Debug, Error)]
#[error(
    "no endpoint accepted tx {tx_hash} ({attempted} attempted, {rejected} rejected, {timed_out} timed out): {}",
    .errors.join("; ")
)]
pub struct BroadcastError {
    pub tx_hash: TxHash,
    pub attempted: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one rpc url is required")]
    EndpointsEmpty,

    #[error("expected groups of exactly {group_size} participants, got {participants} participants")]
    GroupSize {
        participants: usize,
        group_size: usize,
    },

    #[error("invalid private key for {role} account #{index}")]
    InvalidKey { role: String, index: usize },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("missing required setting '{0}'")]
    Missing(&'static str),

    #[error("grouped agents require at least one resource address")]
    NoResources,

    #[error("ambient traffic requires at least 2 noise accounts, found {0}")]
    NotEnoughNoiseAccounts(usize),

    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("{account} has allowlist allocation {found}, expected {expected}")]
    AllowlistMismatch {
        account: Address,
        expected: u64,
        found: U256,
    },

    #[error("contract creation tx {0} produced no contract address")]
    MissingContractAddress(TxHash),

    #[error("tx {tx_hash} did not emit {event}")]
    MissingEvent {
        tx_hash: TxHash,
        event: &'static str,
    },

    #[error("{0} is not allowlisted")]
    NotAllowlisted(Address),

    #[error("{label} tx {tx_hash} reverted")]
    TxReverted { label: String, tx_hash: TxHash },

    #[error("expected allowlist start time of 0 but got {0}")]
    UnexpectedStartTime(U256),
}

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("no job descriptor configured for {0} jobs")]
    DescriptorMissing(String),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RuntimeErrorKind {
    #[error("contract artifact '{0}' has no creation bytecode")]
    BytecodeMissing(String),

    #[error("no rpc endpoints were provided")]
    EndpointsMissing,

    #[error("account {address} has insufficient balance to fund all accounts: have {have}, need {needed} ether")]
    InsufficientFunds {
        address: Address,
        have: String,
        needed: String,
    },

    #[error("failed to load contract artifact '{0}': {1}")]
    InvalidArtifact(String, serde_json::Error),

    #[error("couldn't find private key for address {0}")]
    PrivateKeyMissing(Address),

    #[error("tx {0} was not mined within {1:?}")]
    ReceiptTimeout(TxHash, Duration),

    #[error("failed to join task '{0}'")]
    TaskJoin(String),
}
