//! Moving ether between the deployer and the race participants.
//!
//! Before a race every participant is topped up from the deployer; afterwards whatever is left
//! is swept back. On local chains the deployer itself can be prefunded from a development
//! account.

use std::{fmt, sync::Arc, time::Duration};

use alloy::{
    primitives::{utils::format_ether, Address, U256},
    signers::local::PrivateKeySigner,
};
use tracing::{info, warn};

use crate::{
    accounts::{ParticipantStore, Role},
    broadcast::{BroadcastClient, DEFAULT_RECEIPT_TIMEOUT, DEFAULT_SEND_TIMEOUT},
    chain::{Endpoints, RaceProvider},
    error::RuntimeErrorKind,
    gas::{GasProfile, TRANSFER_GAS_LIMIT},
    Result,
};

/// Accounts holding at least this much are left alone.
pub const TOP_UP_FLOOR_ETHER: u64 = 4;
/// Sent to accounts that still hold something.
pub const TOP_UP_PARTIAL_ETHER: u64 = 2;
/// Sent to empty accounts.
pub const TOP_UP_EMPTY_ETHER: u64 = 4;
/// The local deployer is prefunded with this much whenever it holds less.
pub const LOCAL_PREFUND_ETHER: u64 = 200;

/// Gas units each swept account keeps back, priced at the sweep max fee.
const SWEEP_RESERVE_GAS: u64 = 22_000;
const SWEEP_MAX_FEE_GWEI: u64 = 30;
const SWEEP_PRIORITY_FEE_GWEI: u64 = 1;

/// Roles that are funded before and swept after a race, in funding order.
const FUNDED_ROLES: [Role; 4] = [Role::Fleet, Role::Grouped, Role::SingleShot, Role::Noise];

fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10).pow(U256::from(18))
}

/// How much to send an account holding `balance`, if anything.
pub fn top_up_amount(balance: U256) -> Option<U256> {
    if balance >= ether(TOP_UP_FLOOR_ETHER) {
        None
    } else if balance.is_zero() {
        Some(ether(TOP_UP_EMPTY_ETHER))
    } else {
        Some(ether(TOP_UP_PARTIAL_ETHER))
    }
}

pub fn sweep_gas() -> GasProfile {
    GasProfile::new(SWEEP_MAX_FEE_GWEI, SWEEP_PRIORITY_FEE_GWEI, TRANSFER_GAS_LIMIT)
}

/// How much of `balance` a sweep sends, if the account can pay for the transfer at all.
pub fn sweep_amount(balance: U256) -> Option<U256> {
    let reserve = U256::from(SWEEP_RESERVE_GAS) * U256::from(sweep_gas().max_fee_per_gas());
    balance.checked_sub(reserve).filter(|amount| !amount.is_zero())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountBalance {
    pub role: Role,
    pub address: Address,
    pub balance: U256,
}

impl fmt::Display for AccountBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<11} {} {}",
            self.role.to_string(),
            self.address,
            format_ether(self.balance)
        )
    }
}

/// What happened to one account during a distribution or sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    Skipped {
        role: Role,
        address: Address,
        balance: U256,
    },
    Sent {
        role: Role,
        address: Address,
        amount: U256,
        success: bool,
    },
    Failed {
        role: Role,
        address: Address,
        reason: String,
    },
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transfer::Skipped {
                role,
                address,
                balance,
            } => write!(f, "{role} {address} : skipped at {} ether", format_ether(*balance)),
            Transfer::Sent {
                role,
                address,
                amount,
                success,
            } => write!(
                f,
                "{role} {address} : {} ether {}",
                format_ether(*amount),
                if *success { "success" } else { "failure" }
            ),
            Transfer::Failed {
                role,
                address,
                reason,
            } => write!(f, "{role} {address} : failed, {reason}"),
        }
    }
}

/// Participants that take part in funding, deployer excluded, each listed once.
fn funded_accounts(participants: &ParticipantStore) -> Vec<(Role, PrivateKeySigner)> {
    let mut seen = vec![participants.deployer().address()];
    let mut accounts = vec![];
    for role in FUNDED_ROLES {
        for signer in participants.pool(role).signers {
            if !seen.contains(&signer.address()) {
                seen.push(signer.address());
                accounts.push((role, signer));
            }
        }
    }
    accounts
}

async fn transfer(client: &mut BroadcastClient, to: Address, amount: U256) -> Result<bool> {
    let tx_hash = client.transfer(to, amount).await?;
    Ok(client.await_receipt(tx_hash).await?.success)
}

pub struct FundsManager {
    endpoints: Endpoints,
    send_timeout: Duration,
    receipt_timeout: Duration,
}

impl FundsManager {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, send_timeout: Duration, receipt_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self.receipt_timeout = receipt_timeout;
        self
    }

    fn primary(&self) -> Result<Arc<dyn RaceProvider>> {
        Ok(self
            .endpoints
            .first()
            .cloned()
            .ok_or(RuntimeErrorKind::EndpointsMissing)?)
    }

    async fn client(&self, signer: PrivateKeySigner, gas: GasProfile) -> Result<BroadcastClient> {
        let client = BroadcastClient::connect(signer, self.endpoints.clone(), gas).await?;
        Ok(client
            .with_send_timeout(self.send_timeout)
            .with_receipt_timeout(self.receipt_timeout))
    }

    /// Balances of every participant, deployer first.
    pub async fn check(&self, participants: &ParticipantStore) -> Result<Vec<AccountBalance>> {
        let provider = self.primary()?;
        let mut seen = vec![];
        let mut balances = vec![];
        for role in Role::ALL {
            for address in participants.pool(role).addresses() {
                if seen.contains(&address) {
                    continue;
                }
                seen.push(address);
                balances.push(AccountBalance {
                    role,
                    address,
                    balance: provider.balance(address).await?,
                });
            }
        }
        Ok(balances)
    }

    /// Sends [`LOCAL_PREFUND_ETHER`] from `funder` to `deployer` unless it already holds that much.
    pub async fn prefund(
        &self,
        funder: PrivateKeySigner,
        deployer: Address,
        gas: GasProfile,
    ) -> Result<Option<Transfer>> {
        let balance = self.primary()?.balance(deployer).await?;
        let amount = ether(LOCAL_PREFUND_ETHER);
        if balance >= amount {
            return Ok(None);
        }
        info!(%deployer, balance = %format_ether(balance), "prefunding deployer");
        let mut client = self.client(funder, gas.transfer()).await?;
        let success = transfer(&mut client, deployer, amount).await?;
        Ok(Some(Transfer::Sent {
            role: Role::Deployer,
            address: deployer,
            amount,
            success,
        }))
    }

    /// Tops up every participant below [`TOP_UP_FLOOR_ETHER`] from the deployer.
    ///
    /// Fails before sending anything if the deployer cannot cover every top-up plus gas. A failed
    /// top-up is recorded and the remaining accounts are still funded.
    pub async fn distribute(
        &self,
        participants: &ParticipantStore,
        gas: GasProfile,
    ) -> Result<Vec<Transfer>> {
        let provider = self.primary()?;
        let gas = gas.transfer();
        let fee = U256::from(gas.gas_limit) * U256::from(gas.max_fee_per_gas());

        let mut plan = vec![];
        for (role, signer) in funded_accounts(participants) {
            let address = signer.address();
            let balance = provider.balance(address).await?;
            plan.push((role, address, balance, top_up_amount(balance)));
        }
        let needed = plan
            .iter()
            .filter_map(|(_, _, _, amount)| *amount)
            .fold(U256::ZERO, |total, amount| total + amount + fee);

        let deployer = participants.deployer();
        let have = provider.balance(deployer.address()).await?;
        if have < needed {
            return Err(RuntimeErrorKind::InsufficientFunds {
                address: deployer.address(),
                have: format_ether(have),
                needed: format_ether(needed),
            }
            .into());
        }

        let mut client = self.client(deployer.clone(), gas).await?;
        let mut report = Vec::with_capacity(plan.len());
        for (role, address, balance, amount) in plan {
            let Some(amount) = amount else {
                info!(%role, %address, balance = %format_ether(balance), "skipping");
                report.push(Transfer::Skipped {
                    role,
                    address,
                    balance,
                });
                continue;
            };
            info!(%role, %address, balance = %format_ether(balance), "needs top up");
            let outcome = match transfer(&mut client, address, amount).await {
                Ok(success) => Transfer::Sent {
                    role,
                    address,
                    amount,
                    success,
                },
                Err(e) => {
                    warn!(%address, "top up failed: {e}");
                    if let Err(e) = client.resync_nonce().await {
                        warn!("failed to resync deployer nonce: {e}");
                    }
                    Transfer::Failed {
                        role,
                        address,
                        reason: e.to_string(),
                    }
                }
            };
            report.push(outcome);
        }
        Ok(report)
    }

    /// Sends every participant's balance, less a gas reserve, back to the deployer.
    pub async fn sweep(&self, participants: &ParticipantStore) -> Result<Vec<Transfer>> {
        let provider = self.primary()?;
        let to = participants.deployer().address();
        let mut report = vec![];
        for (role, signer) in funded_accounts(participants) {
            let address = signer.address();
            let balance = provider.balance(address).await?;
            let Some(amount) = sweep_amount(balance) else {
                info!(%role, %address, "not collecting");
                report.push(Transfer::Skipped {
                    role,
                    address,
                    balance,
                });
                continue;
            };
            info!(%role, %address, amount = %format_ether(amount), "collecting");
            let sent = match self.client(signer, sweep_gas()).await {
                Ok(mut client) => transfer(&mut client, to, amount).await,
                Err(e) => Err(e),
            };
            report.push(match sent {
                Ok(success) => Transfer::Sent {
                    role,
                    address,
                    amount,
                    success,
                },
                Err(e) => Transfer::Failed {
                    role,
                    address,
                    reason: e.to_string(),
                },
            });
        }
        Ok(report)
    }
}
