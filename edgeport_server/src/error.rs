use compiler_client::CompilerError;
use port_listener::{PortError, PortId};
use thiserror::Error;

use std::{path::PathBuf, time::Duration};

/// Errors in administrator- or operator-supplied configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Backend connection spec has no usable {0}")]
    MissingBackendField(&'static str),
    #[error("Invalid backend DSN: {0}")]
    InvalidDsn(#[from] url::ParseError),
    #[error("Malformed query field {0:?} in backend DSN")]
    MalformedDsnQuery(String),
    #[error("Unknown protocol {0:?}")]
    UnknownProtocol(String),
    #[error("I/O error on {1}: {0}")]
    IoError(std::io::Error, PathBuf),
    #[error("Parse error in {1}: {0}")]
    ParseError(json5::Error, PathBuf),
}

/// Errors from the system configuration store
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error("Database index used before init()")]
    NotInitialised,
    #[error("Nobody is listening for configuration changes")]
    NotifierClosed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Database index error: {0}")]
    Index(#[from] IndexError),
    #[error("Failed to start {port}: {source}")]
    ListenerStart {
        port: PortId,
        #[source]
        source: PortError,
    },
    #[error("Failed to stop {port}: {source}")]
    ListenerStop {
        port: PortId,
        #[source]
        source: PortError,
    },
    #[error("{port} did not finish {operation} within {after:?}")]
    ListenerTimeout {
        port: PortId,
        operation: &'static str,
        after: Duration,
    },
    #[error("Failed to provision compiler worker: {0}")]
    WorkerProvision(#[from] CompilerError),
    #[error("Backend connection failed: {0}")]
    Backend(#[from] std::io::Error),
    #[error("Illegal server state: {0}")]
    IllegalState(&'static str),
}

pub type ServerResult<T> = Result<T, ServerError>;
