//! How the race target and its resources come to exist (phase 3) and how the trigger is
//! obtained (phase 8).

use std::sync::Arc;

use alloy::{
    primitives::{Address, U256},
    sol_types::{SolCall, SolValue},
};
use async_trait::async_trait;
use tracing::info;

use crate::{
    broadcast::BroadcastClient,
    chain::{Endpoints, RaceProvider, ReceiptSummary},
    clock::RaceClock,
    config::RaceConfig,
    contracts::{decode_created_launchpeg, IFlatLaunchpeg, ILaunchpegFactory, Launchpeg},
    deploy::{ContractArtifact, ContractDeployer, RpcDeployer},
    error::{ConfigError, RuntimeErrorKind, VerificationError},
    notify::{announce, Notifier},
    timing::TriggerWatcher,
    Result,
};

use super::RaceSettings;

/// Allowlist allocation given to every racing account and resource. Agents mint one, so a
/// leftover allocation of one proves a single mint went through.
pub const ALLOWLIST_ALLOCATION: u64 = 2;
/// Grouped-agent resources deployed per race.
pub const RESOURCE_COUNT: usize = 3;
pub const TRIGGER_PRIORITY_FEE_GWEI: u64 = 10;
pub const CREATE_GAS_LIMIT: u64 = 2_000_000;

/// The race target and the resources grouped agents mint through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provisioned {
    pub target: Address,
    pub resources: Vec<Address>,
}

/// State shared by the phases that act as the deployer.
pub struct RaceSession {
    pub deployer: BroadcastClient,
    pub single_shot: Vec<Address>,
    pub settings: RaceSettings,
    pub endpoints: Endpoints,
    pub sink: Arc<dyn Notifier>,
    pub clock: RaceClock,
}

impl RaceSession {
    pub fn primary(&self) -> Result<Arc<dyn RaceProvider>> {
        Ok(self
            .endpoints
            .first()
            .cloned()
            .ok_or(RuntimeErrorKind::EndpointsMissing)?)
    }

    pub async fn announce(&self, text: &str) {
        announce(self.sink.as_ref(), text).await;
    }

    /// Sends `call` from the deployer and fails unless it is mined successfully.
    pub async fn confirm<C: SolCall>(
        &mut self,
        label: &str,
        to: Address,
        call: &C,
    ) -> Result<ReceiptSummary> {
        let tx_hash = self.deployer.send(to, call, U256::ZERO).await?;
        let receipt = self.deployer.await_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(VerificationError::TxReverted {
                label: label.to_owned(),
                tx_hash,
            }
            .into());
        }
        Ok(receipt)
    }

    /// Like [`Self::confirm`], but a revert is an outcome instead of an error.
    pub async fn confirm_status<C: SolCall>(&mut self, to: Address, call: &C) -> Result<bool> {
        let tx_hash = self.deployer.send(to, call, U256::ZERO).await?;
        Ok(self.deployer.await_receipt(tx_hash).await?.success)
    }

    /// Every single-shot account and resource must hold exactly [`ALLOWLIST_ALLOCATION`].
    pub async fn verify_allowlist(&self, target: &Provisioned) -> Result<()> {
        let provider = self.primary()?;
        let launchpeg = Launchpeg::at(provider.as_ref(), target.target);
        for account in self.single_shot.iter().chain(&target.resources) {
            let found = launchpeg.allowlist(*account).await?;
            if found != U256::from(ALLOWLIST_ALLOCATION) {
                return Err(VerificationError::AllowlistMismatch {
                    account: *account,
                    expected: ALLOWLIST_ALLOCATION,
                    found,
                }
                .into());
            }
        }
        self.announce("Done checking allowlist").await;
        Ok(())
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn mode(&self) -> &'static str;

    async fn provision(&self, session: &mut RaceSession) -> Result<Provisioned>;

    /// Produces the trigger timestamp once the target is provisioned.
    async fn trigger(&self, session: &mut RaceSession, target: &Provisioned) -> Result<u64>;
}

/// Creates a fresh launchpeg and its resources for every race, then triggers it.
pub struct DeployProvisioner {
    factory: Address,
    resource_artifact: ContractArtifact,
    deployer: Box<dyn ContractDeployer>,
    collection_name: String,
}

impl DeployProvisioner {
    pub fn new(factory: Address, resource_artifact: ContractArtifact) -> Self {
        Self {
            factory,
            resource_artifact,
            deployer: Box::new(RpcDeployer::default()),
            collection_name: "test".to_owned(),
        }
    }

    pub fn with_deployer(mut self, deployer: Box<dyn ContractDeployer>) -> Self {
        self.deployer = deployer;
        self
    }

    pub fn from_config(config: &RaceConfig) -> Result<Self> {
        let factory = config
            .contracts
            .factory
            .ok_or(ConfigError::Missing("contracts.factory"))?;
        let artifact = config
            .artifacts
            .allowlist_proxy
            .as_ref()
            .ok_or(ConfigError::Missing("artifacts.allowlist_proxy"))?;
        Ok(Self::new(factory, ContractArtifact::from_file(artifact)?))
    }

    async fn create_launchpeg(&self, session: &mut RaceSession) -> Result<Address> {
        let owner = session.deployer.address();
        let call = ILaunchpegFactory::createFlatLaunchpegCall {
            name: self.collection_name.clone(),
            symbol: self.collection_name.clone(),
            projectOwner: owner,
            royaltyReceiver: owner,
            maxPerAddressDuringMint: U256::from(1),
            collectionSize: U256::from(100),
            amountForDevs: U256::ZERO,
            amountForAllowlist: U256::from(50),
            batchRevealData: [U256::from(50), U256::ZERO, U256::ZERO],
        };
        let gas = session.deployer.gas();
        session.deployer.set_gas(crate::gas::GasProfile {
            gas_limit: CREATE_GAS_LIMIT,
            ..gas
        });
        let receipt = session
            .confirm("createFlatLaunchpeg", self.factory, &call)
            .await;
        session.deployer.set_gas(gas);
        let receipt = receipt?;

        let launchpeg = decode_created_launchpeg(self.factory, &receipt.logs).ok_or(
            VerificationError::MissingEvent {
                tx_hash: receipt.tx_hash,
                event: "FlatLaunchpegCreated",
            },
        )?;
        session
            .announce(&format!("Done createFlatLaunchpeg at {launchpeg}"))
            .await;
        Ok(launchpeg)
    }
}

#[async_trait]
impl Provisioner for DeployProvisioner {
    fn mode(&self) -> &'static str {
        "deploy"
    }

    async fn provision(&self, session: &mut RaceSession) -> Result<Provisioned> {
        let target = self.create_launchpeg(session).await?;

        let mut resources = Vec::with_capacity(RESOURCE_COUNT);
        for _ in 0..RESOURCE_COUNT {
            let deployed = self
                .deployer
                .deploy(
                    &mut session.deployer,
                    &self.resource_artifact,
                    &target.abi_encode(),
                )
                .await?;
            resources.push(deployed.address);
        }
        session.announce("Done deploying resources").await;

        // the factory owns a fresh launchpeg; phases can only be initialized by its owner
        let owner = session.deployer.address();
        session
            .confirm(
                "transferOwnership",
                target,
                &IFlatLaunchpeg::transferOwnershipCall { newOwner: owner },
            )
            .await?;
        session.announce("Done transferOwnership").await;

        let provisioned = Provisioned { target, resources };
        let addresses: Vec<Address> = session
            .single_shot
            .iter()
            .chain(&provisioned.resources)
            .copied()
            .collect();
        let amounts = vec![U256::from(ALLOWLIST_ALLOCATION); addresses.len()];
        session
            .confirm(
                "seedAllowlist",
                target,
                &IFlatLaunchpeg::seedAllowlistCall {
                    addresses,
                    numNfts: amounts,
                },
            )
            .await?;
        session.announce("Done seedAllowlist").await;

        // nodes may serve stale state right after the seeding block
        tokio::time::sleep(session.settings.allowlist_settle).await;
        session.verify_allowlist(&provisioned).await?;
        Ok(provisioned)
    }

    async fn trigger(&self, session: &mut RaceSession, target: &Provisioned) -> Result<u64> {
        let start = session.clock.now_secs()
            + session.settings.trigger_delay.as_secs()
            + session.settings.trigger_buffer.as_secs();
        let call = IFlatLaunchpeg::initializePhasesCall {
            allowlistStartTime: U256::from(start),
            publicSaleStartTime: U256::from(start + session.settings.public_sale_offset.as_secs()),
            allowlistPrice: U256::ZERO,
            salePrice: U256::ZERO,
        };
        let previous = session
            .deployer
            .set_gas(session.deployer.gas().with_priority_fee(TRIGGER_PRIORITY_FEE_GWEI));
        let tx_hash = session.deployer.send(target.target, &call, U256::ZERO).await;
        session.deployer.set_gas(previous);
        let tx_hash = tx_hash?;

        let receipt = session.deployer.await_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(VerificationError::TxReverted {
                label: "initializePhases".to_owned(),
                tx_hash,
            }
            .into());
        }
        session.announce("Done initializePhases").await;
        info!(start, "allowlist phase scheduled");
        Ok(start)
    }
}

/// Races a launchpeg that already exists, with pre-deployed resources. Someone else triggers it.
pub struct FixedProvisioner {
    target: Provisioned,
}

impl FixedProvisioner {
    pub fn new(target: Address, resources: Vec<Address>) -> Self {
        Self {
            target: Provisioned { target, resources },
        }
    }

    pub fn from_config(config: &RaceConfig) -> Result<Self> {
        let target = config
            .contracts
            .target
            .ok_or(ConfigError::Missing("contracts.target"))?;
        Ok(Self::new(target, config.contracts.resources.clone()))
    }
}

#[async_trait]
impl Provisioner for FixedProvisioner {
    fn mode(&self) -> &'static str {
        "fixed"
    }

    async fn provision(&self, session: &mut RaceSession) -> Result<Provisioned> {
        session.verify_allowlist(&self.target).await?;
        Ok(self.target.clone())
    }

    async fn trigger(&self, session: &mut RaceSession, target: &Provisioned) -> Result<u64> {
        session.announce("Watching for initializePhases").await;
        let ts = TriggerWatcher::new(session.primary()?)
            .watch_for_trigger(target.target)
            .await;
        Ok(ts)
    }
}
