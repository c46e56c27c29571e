pub mod accounts;
pub mod agents;
pub mod broadcast;
pub mod chain;
pub mod clock;
pub mod config;
pub mod contracts;
pub mod deploy;
pub mod error;
pub mod funds;
pub mod gas;
pub mod launcher;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod provider;
pub mod tasks;
pub mod timing;

#[cfg(test)]
pub mod test_utils;

pub type Result<T> = std::result::Result<T, error::Error>;
pub use error::Error;
