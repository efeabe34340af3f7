//! Query compiler workers: the pool contract used by the server, and a pool which
//! runs each worker as a child process.

mod error;
pub use error::*;

mod message;
pub use message::*;

mod pool;
pub use pool::*;

mod process_pool;
pub use process_pool::*;
