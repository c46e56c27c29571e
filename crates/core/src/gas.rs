use alloy::{network::TransactionBuilder, rpc::types::TransactionRequest};
use serde::{Deserialize, Serialize};

const GWEI: u128 = 1_000_000_000;
/// Gas used by a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Fee parameters attached to every transaction a client sends.
///
/// Profiles are plain values; each derivation returns a new profile and leaves its base untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasProfile {
    pub max_fee_gwei: u64,
    pub priority_fee_gwei: u64,
    pub gas_limit: u64,
}

impl Default for GasProfile {
    fn default() -> Self {
        Self {
            max_fee_gwei: 300,
            priority_fee_gwei: 50,
            gas_limit: 300_000,
        }
    }
}

impl GasProfile {
    pub fn new(max_fee_gwei: u64, priority_fee_gwei: u64, gas_limit: u64) -> Self {
        Self {
            max_fee_gwei,
            priority_fee_gwei,
            gas_limit,
        }
    }

    /// Heavy fleet tier: outbids the base tip by one gwei and fills nearly a full block slot.
    pub fn spam(&self) -> Self {
        Self {
            priority_fee_gwei: self.priority_fee_gwei + 1,
            gas_limit: self.gas_limit.saturating_sub(1),
            ..*self
        }
    }

    /// Filler fleet tier: same tip as the heavy tier, a third of the gas.
    pub fn filler(&self) -> Self {
        Self {
            priority_fee_gwei: self.priority_fee_gwei + 1,
            gas_limit: self.gas_limit / 3,
            ..*self
        }
    }

    pub fn loud_noise(&self) -> Self {
        Self {
            priority_fee_gwei: self.priority_fee_gwei * 2,
            gas_limit: 30_000,
            ..*self
        }
    }

    pub fn quiet_noise(&self) -> Self {
        Self {
            priority_fee_gwei: self.priority_fee_gwei / 2 + 1,
            gas_limit: 30_000,
            ..*self
        }
    }

    /// Same fees, limited to a plain value transfer.
    pub fn transfer(&self) -> Self {
        Self {
            gas_limit: TRANSFER_GAS_LIMIT,
            ..*self
        }
    }

    pub fn with_priority_fee(&self, priority_fee_gwei: u64) -> Self {
        Self {
            priority_fee_gwei,
            ..*self
        }
    }

    pub fn max_fee_per_gas(&self) -> u128 {
        self.max_fee_gwei as u128 * GWEI
    }

    pub fn max_priority_fee_per_gas(&self) -> u128 {
        self.priority_fee_gwei as u128 * GWEI
    }

    /// Writes this profile's EIP-1559 fee fields and gas limit into `tx`.
    pub fn apply(&self, tx: TransactionRequest) -> TransactionRequest {
        tx.with_max_fee_per_gas(self.max_fee_per_gas())
            .with_max_priority_fee_per_gas(self.max_priority_fee_per_gas())
            .with_gas_limit(self.gas_limit)
    }
}
