use std::collections::HashMap;

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use rand::{seq::SliceRandom, Rng};

use crate::{config::AccountsConfig, error::ConfigError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Deployer,
    SingleShot,
    Grouped,
    Fleet,
    Noise,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Deployer,
        Role::SingleShot,
        Role::Grouped,
        Role::Fleet,
        Role::Noise,
    ];
}

/// An ordered pool of signing accounts.
#[derive(Clone, Debug, Default)]
pub struct SignerStore {
    pub signers: Vec<PrivateKeySigner>,
}

impl SignerStore {
    pub fn new(signers: Vec<PrivateKeySigner>) -> Self {
        Self { signers }
    }

    pub fn from_keys(role: Role, keys: &[String]) -> Result<Self, ConfigError> {
        let signers = keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                key.trim()
                    .parse::<PrivateKeySigner>()
                    .map_err(|_| ConfigError::InvalidKey {
                        role: role.to_string(),
                        index,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { signers })
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.address()).collect()
    }

    pub fn find(&self, address: Address) -> Option<&PrivateKeySigner> {
        self.signers.iter().find(|s| s.address() == address)
    }

    pub fn shuffle(&mut self, rng: &mut impl Rng) {
        self.signers.shuffle(rng);
    }
}

/// Every account taking part in a race, by role.
#[derive(Clone, Debug)]
pub struct ParticipantStore {
    deployer: PrivateKeySigner,
    treasury: Address,
    funder: Option<PrivateKeySigner>,
    pools: HashMap<Role, SignerStore>,
}

impl ParticipantStore {
    pub fn new(deployer: PrivateKeySigner, treasury: Option<Address>) -> Self {
        let treasury = treasury.unwrap_or(deployer.address());
        Self {
            deployer,
            treasury,
            funder: None,
            pools: HashMap::new(),
        }
    }

    pub fn with_funder(mut self, funder: PrivateKeySigner) -> Self {
        self.funder = Some(funder);
        self
    }

    pub fn with_pool(mut self, role: Role, signers: SignerStore) -> Self {
        self.pools.insert(role, signers);
        self
    }

    pub fn from_config(accounts: &AccountsConfig) -> Result<Self, ConfigError> {
        let mut deployer = SignerStore::from_keys(Role::Deployer, accounts.keys(Role::Deployer))?;
        let deployer = deployer
            .signers
            .pop()
            .ok_or(ConfigError::Missing("accounts.deployer"))?;
        let mut store = Self::new(deployer, accounts.treasury);
        if let Some(key) = &accounts.funder {
            let funder = key
                .trim()
                .parse::<PrivateKeySigner>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "accounts.funder",
                    reason: "not a private key".to_owned(),
                })?;
            store.funder = Some(funder);
        }
        for role in [Role::SingleShot, Role::Grouped, Role::Fleet, Role::Noise] {
            store
                .pools
                .insert(role, SignerStore::from_keys(role, accounts.keys(role))?);
        }
        Ok(store)
    }

    pub fn deployer(&self) -> &PrivateKeySigner {
        &self.deployer
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn funder(&self) -> Option<&PrivateKeySigner> {
        self.funder.as_ref()
    }

    /// The pool for `role`; empty when nothing was configured.
    pub fn pool(&self, role: Role) -> SignerStore {
        match role {
            Role::Deployer => SignerStore::new(vec![self.deployer.clone()]),
            role => self.pools.get(&role).cloned().unwrap_or_default(),
        }
    }

    /// Spreads gas usage across runs; fleet and noise accounts burn the most.
    pub fn shuffle_pools(&mut self, rng: &mut impl Rng) {
        for role in [Role::Fleet, Role::Noise] {
            if let Some(pool) = self.pools.get_mut(&role) {
                pool.shuffle(rng);
            }
        }
    }

    /// Every participant address, deployer first, without duplicates.
    pub fn all_addresses(&self) -> Vec<Address> {
        let mut seen = Vec::new();
        for role in Role::ALL {
            for address in self.pool(role).addresses() {
                if !seen.contains(&address) {
                    seen.push(address);
                }
            }
        }
        seen
    }

    pub fn signer_by_address(&self, address: Address) -> Option<&PrivateKeySigner> {
        if self.deployer.address() == address {
            return Some(&self.deployer);
        }
        self.pools.values().find_map(|pool| pool.find(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_signer, test_signers};
    use alloy::hex;
    use rand::{rngs::StdRng, SeedableRng};

    fn key(i: usize) -> String {
        hex::encode_prefixed(test_signer(i).to_bytes())
    }

    fn accounts() -> AccountsConfig {
        AccountsConfig {
            deployer: key(0),
            single_shot: vec![key(1)],
            grouped: (2..5).map(key).collect(),
            fleet: (5..35).map(key).collect(),
            noise: vec![key(35), key(36)],
            ..Default::default()
        }
    }

    #[test]
    fn builds_pools_from_keys() {
        let store = ParticipantStore::from_config(&accounts()).unwrap();
        assert_eq!(store.deployer().address(), test_signer(0).address());
        assert_eq!(store.treasury(), test_signer(0).address());
        assert_eq!(store.pool(Role::Grouped).len(), 3);
        assert_eq!(store.pool(Role::Fleet).len(), 30);
        assert_eq!(store.all_addresses().len(), 37);
        assert!(store.funder().is_none());
        assert_eq!(
            store.signer_by_address(test_signer(20).address()).map(|s| s.address()),
            Some(test_signer(20).address())
        );
    }

    #[test]
    fn reports_bad_key_position() {
        let mut cfg = accounts();
        cfg.fleet[3] = "0xnope".to_owned();
        match ParticipantStore::from_config(&cfg) {
            Err(ConfigError::InvalidKey { role, index }) => {
                assert_eq!(role, "fleet");
                assert_eq!(index, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reads_optional_funder() {
        let mut cfg = accounts();
        cfg.funder = Some(key(40));
        let store = ParticipantStore::from_config(&cfg).unwrap();
        assert_eq!(
            store.funder().map(|s| s.address()),
            Some(test_signer(40).address())
        );
        assert!(!store.all_addresses().contains(&test_signer(40).address()));

        cfg.funder = Some("0x12".to_owned());
        assert!(matches!(
            ParticipantStore::from_config(&cfg),
            Err(ConfigError::InvalidValue { field: "accounts.funder", .. })
        ));
    }

    #[test]
    fn shuffle_keeps_members() {
        let mut store = ParticipantStore::new(test_signer(0), None)
            .with_pool(Role::Fleet, SignerStore::new(test_signers(1..31)))
            .with_pool(Role::SingleShot, SignerStore::new(test_signers(31..32)));
        let before = store.pool(Role::Fleet).addresses();
        store.shuffle_pools(&mut StdRng::seed_from_u64(7));
        let mut after = store.pool(Role::Fleet).addresses();
        assert_ne!(before, after);
        after.sort();
        let mut sorted = before.clone();
        sorted.sort();
        assert_eq!(sorted, after);
        assert_eq!(
            store.pool(Role::SingleShot).addresses(),
            vec![test_signer(31).address()]
        );
    }

    #[test]
    fn shared_accounts_are_counted_once() {
        let store = ParticipantStore::new(test_signer(0), None)
            .with_pool(Role::Noise, SignerStore::new(test_signers(0..2)));
        assert_eq!(store.all_addresses().len(), 2);
    }
}
