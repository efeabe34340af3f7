use crate::*;

use port_listener::*;
use strum::IntoEnumIterator;
use tokio::sync::mpsc::Sender;

use std::{
    collections::HashMap,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Weak},
};

/// Everything a port is constructed from: the server-provided context plus
/// the fields of its configuration object.
#[derive(Clone)]
pub struct PortOptions {
    pub id: PortId,
    pub server: Weak<Server>,
    pub backend_address: String,
    pub data_dir: PathBuf,
    pub runstate_dir: PathBuf,
    pub internal_runstate_dir: PathBuf,
    pub database_index: Arc<dyn DatabaseIndex>,
    pub net_port: u16,
    pub net_host: String,
    pub database: Option<String>,
    pub user: Option<String>,
    pub protocol: Protocol,
    pub concurrency: usize,
}

/// Builds the port implementation for one protocol
pub trait PortFactory: Send + Sync {
    fn create(&self, options: PortOptions) -> Arc<dyn Port>;
}

/// Lookup table from protocol to the factory serving it, fixed at startup.
#[derive(Clone, Default)]
pub struct ProtocolTable {
    factories: HashMap<Protocol, Arc<dyn PortFactory>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table serving every known protocol with a [`TcpPort`], all delivering
    /// accepted connections to `events`.
    pub fn tcp(events: Sender<AcceptedConnection>) -> Self {
        let factory: Arc<dyn PortFactory> = Arc::new(TcpPortFactory::new(events));
        Protocol::iter().fold(Self::new(), |table, protocol| {
            table.register(protocol, Arc::clone(&factory))
        })
    }

    pub fn register(mut self, protocol: Protocol, factory: Arc<dyn PortFactory>) -> Self {
        self.factories.insert(protocol, factory);
        self
    }

    /// Find the factory for a configured protocol name.
    pub fn lookup(&self, name: &str) -> Result<(Protocol, Arc<dyn PortFactory>), ConfigurationError> {
        let protocol = Protocol::from_str(name)
            .map_err(|_| ConfigurationError::UnknownProtocol(name.to_owned()))?;
        let factory = self
            .factories
            .get(&protocol)
            .ok_or_else(|| ConfigurationError::UnknownProtocol(name.to_owned()))?;
        Ok((protocol, Arc::clone(factory)))
    }
}

/// Creates [`TcpPort`]s
pub struct TcpPortFactory {
    events: Sender<AcceptedConnection>,
}

impl TcpPortFactory {
    pub fn new(events: Sender<AcceptedConnection>) -> Self {
        Self { events }
    }
}

impl PortFactory for TcpPortFactory {
    fn create(&self, options: PortOptions) -> Arc<dyn Port> {
        let settings = TcpPortSettings {
            protocol: options.protocol,
            host: options.net_host,
            port: options.net_port,
            scope: PortScope {
                database: options.database,
                user: options.user,
            },
            concurrency: options.concurrency,
        };

        Arc::new(TcpPort::new(options.id, settings, self.events.clone()))
    }
}
