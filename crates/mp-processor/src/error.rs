use std::time::Duration;
use thiserror::Error;

use mp_transport::TransportError;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Runtime pool error: {0}")]
    Pool(String),

    #[error("Handler resolution failed: {0}")]
    Resolution(String),

    #[error("Handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Panic while processing message: {0}")]
    HandlerPanicked(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] mp_config::ConfigError),

    #[error("Processor already started: {0}")]
    AlreadyStarted(String),

    #[error("Start of {0} was abandoned before signalling completion")]
    StartAborted(String),

    #[error("Start of {service} did not complete within {timeout:?}")]
    StartTimeout { service: String, timeout: Duration },
}
