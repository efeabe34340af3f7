use crate::*;

use async_trait::async_trait;

/// Lifecycle contract for a network listener.
///
/// Both operations are idempotent: starting a running port and stopping a
/// stopped one succeed without effect. `stop()` must be safe to call after a
/// `start()` that failed part way, and is the only cleanup the server performs.
#[async_trait]
pub trait Port : Send + Sync
{
    fn id(&self) -> PortId;

    async fn start(&self) -> Result<(), PortError>;

    async fn stop(&self) -> Result<(), PortError>;
}
