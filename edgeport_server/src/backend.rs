use async_trait::async_trait;
use tokio::{net::UnixStream, sync::OwnedSemaphorePermit};

/// Opens transport-level connections to the backend database.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, address: &str, database: &str) -> std::io::Result<UnixStream>;
}

/// Connects to the backend's Unix domain socket
#[derive(Debug, Default)]
pub struct UnixSocketConnector;

#[async_trait]
impl BackendConnector for UnixSocketConnector {
    async fn connect(&self, address: &str, _database: &str) -> std::io::Result<UnixStream> {
        UnixStream::connect(address).await
    }
}

/// A connection to one backend database.
///
/// Holds one of the server's backend connection slots until dropped.
#[derive(Debug)]
pub struct BackendConnection {
    pub database: String,
    pub stream: UnixStream,
    _slot: OwnedSemaphorePermit,
}

impl BackendConnection {
    pub(crate) fn new(database: String, stream: UnixStream, slot: OwnedSemaphorePermit) -> Self {
        Self {
            database,
            stream,
            _slot: slot,
        }
    }
}
