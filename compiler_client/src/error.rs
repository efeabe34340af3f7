use thiserror::Error;

/// Errors talking to a compiler worker or the pool that owns it.
#[derive(Debug,Error)]
pub enum CompilerError
{
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worker call {method} failed: {message}")]
    Remote { method: String, message: String },
    #[error("Worker process has gone away")]
    WorkerGone,
    #[error("No worker available: {0}")]
    Unavailable(String),
}
