//! Typed interfaces for every contract the race touches.
//!
//! Call sites build `sol!` call structs and hand them to a
//! [`BroadcastClient`](crate::broadcast::BroadcastClient) or a [`Launchpeg`] reader; nothing
//! outside this module encodes calldata by hand.

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, U256},
    rpc::types::{Log, TransactionRequest},
    sol,
    sol_types::{SolCall, SolEvent},
};

use crate::{chain::RaceProvider, Result};

sol! {
    interface IFlatLaunchpeg {
        event Initialized(
            uint256 allowlistStartTime,
            uint256 publicSaleStartTime,
            uint256 allowlistPrice,
            uint256 salePrice
        );

        function allowlist(address account) external view returns (uint256);
        function allowlistStartTime() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function ownerOf(uint256 tokenId) external view returns (address);

        function allowlistMint(uint256 quantity) external payable;
        function initializePhases(
            uint256 allowlistStartTime,
            uint256 publicSaleStartTime,
            uint256 allowlistPrice,
            uint256 salePrice
        ) external;
        function seedAllowlist(address[] addresses, uint256[] numNfts) external;
        function transferOwnership(address newOwner) external;
        function safeTransferFrom(address from, address to, uint256 tokenId) external;
    }

    interface ILaunchpegFactory {
        event FlatLaunchpegCreated(
            address indexed flatLaunchpeg,
            string name,
            string symbol,
            address indexed projectOwner,
            address indexed royaltyReceiver,
            uint256 maxPerAddressDuringMint,
            uint256 collectionSize,
            uint256 amountForDevs,
            uint256 amountForAllowlist
        );

        function createFlatLaunchpeg(
            string name,
            string symbol,
            address projectOwner,
            address royaltyReceiver,
            uint256 maxPerAddressDuringMint,
            uint256 collectionSize,
            uint256 amountForDevs,
            uint256 amountForAllowlist,
            uint256[3] batchRevealData
        ) external returns (address);
    }

    interface IAllowlistProxy {
        function remoteAllowlistMint() external;
        function withdraw(uint256 tokenId) external;
    }

    interface ISpammer {
        function consume(uint256 iterations) external;
    }
}

/// Timestamp carried by an `Initialized` log, if `log` is one.
pub fn decode_trigger(log: &Log) -> Option<u64> {
    let topic = log.topics().first()?;
    if *topic != IFlatLaunchpeg::Initialized::SIGNATURE_HASH {
        return None;
    }
    log.log_decode::<IFlatLaunchpeg::Initialized>()
        .ok()
        .map(|decoded| decoded.inner.data.allowlistStartTime.saturating_to::<u64>())
}

/// Address of the launchpeg announced by `factory` in a `FlatLaunchpegCreated` log.
pub fn decode_created_launchpeg(factory: Address, logs: &[Log]) -> Option<Address> {
    logs.iter()
        .filter(|log| log.address() == factory)
        .find_map(|log| match log.topics() {
            [topic, launchpeg, ..]
                if *topic == ILaunchpegFactory::FlatLaunchpegCreated::SIGNATURE_HASH =>
            {
                Some(Address::from_word(*launchpeg))
            }
            _ => None,
        })
}

/// Executes a read-only contract call and decodes its return value.
pub async fn read<C: SolCall>(
    provider: &dyn RaceProvider,
    contract: Address,
    call: &C,
) -> Result<C::Return> {
    let tx = TransactionRequest::default()
        .with_to(contract)
        .with_input(call.abi_encode());
    let data = provider.call(tx).await?;
    Ok(C::abi_decode_returns(&data)?)
}

/// Read access to a deployed launchpeg.
pub struct Launchpeg<'a> {
    provider: &'a dyn RaceProvider,
    pub address: Address,
}

impl<'a> Launchpeg<'a> {
    pub fn at(provider: &'a dyn RaceProvider, address: Address) -> Self {
        Self { provider, address }
    }

    pub async fn allowlist(&self, account: Address) -> Result<U256> {
        read(
            self.provider,
            self.address,
            &IFlatLaunchpeg::allowlistCall { account },
        )
        .await
    }

    pub async fn allowlist_start_time(&self) -> Result<U256> {
        read(
            self.provider,
            self.address,
            &IFlatLaunchpeg::allowlistStartTimeCall {},
        )
        .await
    }

    pub async fn total_supply(&self) -> Result<U256> {
        read(self.provider, self.address, &IFlatLaunchpeg::totalSupplyCall {}).await
    }

    pub async fn owner_of(&self, token_id: U256) -> Result<Address> {
        read(
            self.provider,
            self.address,
            &IFlatLaunchpeg::ownerOfCall { tokenId: token_id },
        )
        .await
    }
}
