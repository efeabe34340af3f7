use thiserror::Error;
use serde::{Serialize,Deserialize};
use tokio::task::JoinError;

/// An error that might occur when starting or stopping a port.
#[derive(Error,Debug,Clone,PartialEq,Eq,Serialize,Deserialize)]
pub enum PortError
{
    #[error("I/O Error: {0}")]
    IoError(String),
    #[error("Invalid listen address {0:?}")]
    InvalidAddress(String),
    #[error("Listener task failed: {0}")]
    TaskFailed(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for PortError
{
    fn from(e: std::io::Error) -> Self
    {
        Self::IoError(e.to_string())
    }
}

impl From<JoinError> for PortError
{
    fn from(e: JoinError) -> Self
    {
        Self::TaskFailed(e.to_string())
    }
}
