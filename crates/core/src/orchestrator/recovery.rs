//! Best-effort return of won tokens to the treasury.

use std::collections::HashMap;

use alloy::{
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
};
use tracing::warn;

use super::provision::{Provisioned, RaceSession};
use crate::{
    broadcast::BroadcastClient,
    contracts::{IAllowlistProxy, IFlatLaunchpeg, Launchpeg},
    Result,
};

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Maps every token holder to the last token id it holds.
async fn holdings(session: &RaceSession, target: Address) -> Result<HashMap<Address, U256>> {
    let provider = session.primary()?;
    let launchpeg = Launchpeg::at(provider.as_ref(), target);
    let supply = launchpeg.total_supply().await?;
    let mut owners = HashMap::new();
    let mut id = U256::ZERO;
    while id < supply {
        match launchpeg.owner_of(id).await {
            Ok(owner) => {
                owners.insert(owner, id);
            }
            Err(e) => warn!(token = %id, "failed to read token owner: {e}"),
        }
        id += U256::from(1);
    }
    Ok(owners)
}

/// Pulls the token out of `resource` to the deployer, forwarding it to the treasury if those
/// differ.
async fn recover_from_resource(
    session: &mut RaceSession,
    target: Address,
    resource: Address,
    token_id: U256,
    treasury: Address,
) -> Result<String> {
    let withdrawn = session
        .confirm_status(resource, &IAllowlistProxy::withdrawCall { tokenId: token_id })
        .await?;
    let mut line = format!(
        "Token #{token_id} from resource {resource} : {}",
        outcome(withdrawn)
    );
    let deployer = session.deployer.address();
    if withdrawn && treasury != deployer {
        let call = IFlatLaunchpeg::safeTransferFromCall {
            from: deployer,
            to: treasury,
            tokenId: token_id,
        };
        // the token has left the resource either way
        match session.confirm_status(target, &call).await {
            Ok(forwarded) => line.push_str(&format!(" (to treasury: {})", outcome(forwarded))),
            Err(e) => line.push_str(&format!(
                " (to treasury: failed, held by deployer {deployer} : {e})"
            )),
        }
    }
    Ok(line)
}

async fn recover_from_account(
    session: &RaceSession,
    signer: PrivateKeySigner,
    target: Address,
    token_id: U256,
    treasury: Address,
) -> Result<String> {
    let from = signer.address();
    let mut client = BroadcastClient::connect(
        signer,
        session.endpoints.clone(),
        session.settings.gas,
    )
    .await?
    .with_send_timeout(session.settings.send_timeout)
    .with_receipt_timeout(session.settings.receipt_timeout);
    let call = IFlatLaunchpeg::safeTransferFromCall {
        from,
        to: treasury,
        tokenId: token_id,
    };
    let tx_hash = client.send(target, &call, U256::ZERO).await?;
    let receipt = client.await_receipt(tx_hash).await?;
    Ok(format!(
        "Token #{token_id} from account {from} : {}",
        outcome(receipt.success)
    ))
}

/// Runs every recovery attempt in isolation and returns one summary line per attempt.
pub async fn recover_tokens(
    session: &mut RaceSession,
    provisioned: &Provisioned,
    accounts: Vec<PrivateKeySigner>,
    treasury: Address,
) -> Vec<String> {
    let owners = match holdings(session, provisioned.target).await {
        Ok(owners) => owners,
        Err(e) => return vec![format!("Failed to read token holders: {e}")],
    };

    let mut summary = vec![];
    for resource in &provisioned.resources {
        let line = match owners.get(resource) {
            None => format!("No token held by resource {resource}"),
            Some(id) => {
                recover_from_resource(session, provisioned.target, *resource, *id, treasury)
                    .await
                    .unwrap_or_else(|e| format!("Failed to get token for {resource} : {e}"))
            }
        };
        summary.push(line);
    }

    for signer in accounts {
        let from = signer.address();
        let line = match owners.get(&from) {
            None => format!("No token held by account {from}"),
            Some(id) => recover_from_account(session, signer, provisioned.target, *id, treasury)
                .await
                .unwrap_or_else(|e| format!("Failed to get token for {from} : {e}")),
        };
        summary.push(line);
    }
    summary
}
