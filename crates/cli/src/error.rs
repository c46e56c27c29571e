use alloy::primitives::Address;
use miette::Diagnostic;
use stampede_core::error::ConfigError;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("invalid configuration")]
    #[diagnostic(help("check the race configuration file"))]
    Config(#[from] ConfigError),

    #[error("core error")]
    Core(#[from] stampede_core::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("metrics error")]
    Metrics(#[from] prometheus::Error),

    #[error("no private key configured for account {0}")]
    #[diagnostic(help("agent accounts must be listed in the [accounts] table of the config"))]
    UnknownAccount(Address),

    #[error("no accounts to run the {0} agent with")]
    NoAccounts(String),
}
