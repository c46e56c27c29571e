//! Contract creation through a [`BroadcastClient`].

use std::path::Path;

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes, TxHash},
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::{
    broadcast::BroadcastClient,
    error::{RuntimeErrorKind, VerificationError},
    gas::GasProfile,
    Result,
};

pub const DEPLOY_GAS_LIMIT: u64 = 2_000_000;

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Raw(Bytes),
    Object { object: Bytes },
}

impl BytecodeField {
    fn into_bytes(self) -> Bytes {
        match self {
            BytecodeField::Raw(b) | BytecodeField::Object { object: b } => b,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct RawArtifact {
    #[serde(default, alias = "contractName")]
    name: Option<String>,
    bytecode: BytecodeField,
    abi: JsonAbi,
}

/// A compiled contract: creation bytecode plus its interface.
#[derive(Clone, Debug)]
pub struct ContractArtifact {
    pub name: String,
    pub bytecode: Bytes,
    pub abi: JsonAbi,
}

impl ContractArtifact {
    /// Parses a compiler JSON artifact. Both `"bytecode": "0x.."` and
    /// `"bytecode": {"object": "0x.."}` layouts are accepted.
    pub fn from_json_str(json: &str, fallback_name: &str) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_str(json)
            .map_err(|e| RuntimeErrorKind::InvalidArtifact(fallback_name.to_owned(), e))?;
        let name = raw.name.unwrap_or_else(|| fallback_name.to_owned());
        let bytecode = raw.bytecode.into_bytes();
        if bytecode.is_empty() {
            return Err(RuntimeErrorKind::BytecodeMissing(name).into());
        }
        Ok(Self {
            name,
            bytecode,
            abi: raw.abi,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_json_str(&json, &stem)
    }

    /// Creation code followed by ABI-encoded constructor arguments.
    pub fn init_code(&self, constructor_args: &[u8]) -> Bytes {
        [self.bytecode.as_ref(), constructor_args].concat().into()
    }
}

#[derive(Clone, Debug)]
pub struct DeployedContract {
    pub name: String,
    pub address: Address,
    pub abi: JsonAbi,
    pub tx_hash: TxHash,
}

#[async_trait]
pub trait ContractDeployer: Send + Sync {
    /// Deploys `artifact` from `client`'s account and waits for it to be mined.
    async fn deploy(
        &self,
        client: &mut BroadcastClient,
        artifact: &ContractArtifact,
        constructor_args: &[u8],
    ) -> Result<DeployedContract>;
}

/// Deploys by broadcasting a creation transaction to every endpoint.
#[derive(Clone, Debug)]
pub struct RpcDeployer {
    gas_limit: u64,
}

impl Default for RpcDeployer {
    fn default() -> Self {
        Self {
            gas_limit: DEPLOY_GAS_LIMIT,
        }
    }
}

impl RpcDeployer {
    pub fn with_gas_limit(gas_limit: u64) -> Self {
        Self { gas_limit }
    }
}

#[async_trait]
impl ContractDeployer for RpcDeployer {
    async fn deploy(
        &self,
        client: &mut BroadcastClient,
        artifact: &ContractArtifact,
        constructor_args: &[u8],
    ) -> Result<DeployedContract> {
        let gas = client.gas();
        client.set_gas(GasProfile {
            gas_limit: self.gas_limit,
            ..gas
        });
        let sent = client.deploy(artifact.init_code(constructor_args)).await;
        client.set_gas(gas);
        let tx_hash = sent?;

        let receipt = client.await_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(VerificationError::TxReverted {
                label: format!("deploy {}", artifact.name),
                tx_hash,
            }
            .into());
        }
        let address = receipt
            .contract_address
            .ok_or(VerificationError::MissingContractAddress(tx_hash))?;
        info!(name = %artifact.name, %address, %tx_hash, "deployed contract");
        Ok(DeployedContract {
            name: artifact.name.clone(),
            address,
            abi: artifact.abi.clone(),
            tx_hash,
        })
    }
}
