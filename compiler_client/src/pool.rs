use crate::*;

use async_trait::async_trait;

/// A handle to one compiler worker.
#[async_trait]
pub trait CompilerWorker : Send + Sync
{
    /// Invoke `method` on the worker and wait for its answer.
    async fn call(&self, method: &str, args: Vec<WorkerValue>) -> Result<WorkerValue, CompilerError>;

    /// Shut the worker down. The handle is gone afterwards whether or not this succeeds.
    async fn close(self: Box<Self>) -> Result<(), CompilerError>;
}

/// Source of compiler workers.
#[async_trait]
pub trait WorkerPool : Send + Sync
{
    async fn spawn_worker(&self) -> Result<Box<dyn CompilerWorker>, CompilerError>;

    /// Number of workers spawned and not yet closed.
    fn live_workers(&self) -> usize;
}
