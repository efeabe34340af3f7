//! The edgeport server process: owns the listening ports, keeps them and the
//! authentication rules in step with the live system configuration, and hands
//! out compiler workers and backend connections.

pub mod config;

mod error;
pub use error::*;

mod address;
pub use address::*;

pub mod auth;
pub use auth::{AuthMethod, AuthRuleSet};

mod sys_config;
pub use sys_config::*;

mod database_index;
pub use database_index::*;

mod json_index;
pub use json_index::*;

mod backend;
pub use backend::*;

mod ports;
pub use ports::*;

mod server;
pub use server::*;

mod reconciler;

mod tracing_config;
pub use tracing_config::build_subscriber;

pub mod run;
