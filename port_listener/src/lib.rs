//! Network listener ("port") lifecycle, and the TCP listener shared by every protocol.
//!
//! A port is one bound endpoint serving a single wire protocol. The server process
//! only drives ports through the [`Port`] trait; the protocol handlers consume the
//! [`AcceptedConnection`]s that a running port produces.

pub mod id;
pub use id::*;

pub mod error;
pub use error::*;

mod protocols;
pub use protocols::*;

mod port;
pub use port::*;

mod tcp_port;
pub use tcp_port::*;
