use crate::*;

use async_trait::async_trait;
use tokio::sync::oneshot;

use std::sync::Arc;

/// The server's view of the persistent system configuration store.
///
/// `init()` is awaited once by [`Server::init`]; the other methods may only be
/// relied on after it completes.
#[async_trait]
pub trait DatabaseIndex: Send + Sync {
    async fn init(&self) -> Result<(), IndexError>;

    /// The current, committed configuration snapshot
    fn get_sys_config(&self) -> Arc<SystemConfig>;

    fn get_sys_query(&self, key: &str) -> Option<String>;

    fn get_instance_data(&self, key: &str) -> Option<serde_json::Value>;
}

/// A committed configuration change, delivered to the server for reconciliation.
///
/// If `reply` is present, the outcome of handling the change is sent back on it.
#[derive(Debug)]
pub struct ConfigEvent {
    pub change: ConfigChange,
    pub reply: Option<oneshot::Sender<ServerResult<()>>>,
}

impl ConfigEvent {
    pub fn new(change: ConfigChange) -> Self {
        Self {
            change,
            reply: None,
        }
    }

    pub fn with_reply(change: ConfigChange) -> (Self, oneshot::Receiver<ServerResult<()>>) {
        let (send, recv) = oneshot::channel();
        (
            Self {
                change,
                reply: Some(send),
            },
            recv,
        )
    }
}
