use async_trait::async_trait;
use compiler_client::*;
use edgeport_server::*;
use parking_lot::Mutex;
use port_listener::*;
use strum::IntoEnumIterator;
use tokio::net::UnixStream;

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// What the mock ports did, and what they have been told to do.
#[derive(Default)]
pub struct PortLog {
    pub started: Mutex<Vec<u16>>,
    pub stopped: Mutex<Vec<u16>>,
    pub fail_start: Mutex<HashSet<u16>>,
    pub fail_stop: Mutex<HashSet<u16>>,
    pub start_delay: Mutex<Option<Duration>>,
}

impl PortLog {
    pub fn started(&self) -> Vec<u16> {
        let mut started = self.started.lock().clone();
        started.sort_unstable();
        started
    }

    pub fn stopped(&self) -> Vec<u16> {
        let mut stopped = self.stopped.lock().clone();
        stopped.sort_unstable();
        stopped
    }
}

pub struct MockPort {
    id: PortId,
    net_port: u16,
    log: Arc<PortLog>,
}

#[async_trait]
impl Port for MockPort {
    fn id(&self) -> PortId {
        self.id
    }

    async fn start(&self) -> Result<(), PortError> {
        let delay = *self.log.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.log.started.lock().push(self.net_port);
        if self.log.fail_start.lock().contains(&self.net_port) {
            return Err(PortError::IoError("address in use".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), PortError> {
        self.log.stopped.lock().push(self.net_port);
        if self.log.fail_stop.lock().contains(&self.net_port) {
            return Err(PortError::TaskFailed("listener wedged".to_string()));
        }
        Ok(())
    }
}

pub struct MockFactory {
    pub log: Arc<PortLog>,
}

impl PortFactory for MockFactory {
    fn create(&self, options: PortOptions) -> Arc<dyn Port> {
        Arc::new(MockPort {
            id: options.id,
            net_port: options.net_port,
            log: Arc::clone(&self.log),
        })
    }
}

pub fn mock_protocols(log: &Arc<PortLog>) -> ProtocolTable {
    let factory: Arc<dyn PortFactory> = Arc::new(MockFactory { log: Arc::clone(log) });
    Protocol::iter().fold(ProtocolTable::new(), |table, protocol| {
        table.register(protocol, Arc::clone(&factory))
    })
}

/// An in-memory database index whose snapshot the test sets directly.
#[derive(Default)]
pub struct MockIndex {
    config: Mutex<Arc<SystemConfig>>,
}

impl MockIndex {
    pub fn with_config(config: SystemConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(Arc::new(config)),
        })
    }

    pub fn update(&self, change: &ConfigChange) {
        let mut config = self.config.lock();
        let mut next = SystemConfig::clone(&config);
        next.apply(change);
        *config = Arc::new(next);
    }
}

#[async_trait]
impl DatabaseIndex for MockIndex {
    async fn init(&self) -> Result<(), IndexError> {
        Ok(())
    }

    fn get_sys_config(&self) -> Arc<SystemConfig> {
        self.config.lock().clone()
    }

    fn get_sys_query(&self, key: &str) -> Option<String> {
        (key == "version").then(|| "select 1".to_string())
    }

    fn get_instance_data(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }
}

#[derive(Default)]
pub struct MockPool {
    pub live: Arc<AtomicUsize>,
    pub fail_connect: bool,
}

pub struct MockWorker {
    live: Arc<AtomicUsize>,
    fail_connect: bool,
}

#[async_trait]
impl WorkerPool for MockPool {
    async fn spawn_worker(&self) -> Result<Box<dyn CompilerWorker>, CompilerError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockWorker {
            live: Arc::clone(&self.live),
            fail_connect: self.fail_connect,
        }))
    }

    fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompilerWorker for MockWorker {
    async fn call(&self, method: &str, _args: Vec<WorkerValue>) -> Result<WorkerValue, CompilerError> {
        if self.fail_connect && method == "connect" {
            return Err(CompilerError::Remote {
                method: method.to_string(),
                message: "no such database".to_string(),
            });
        }
        Ok(WorkerValue::Null)
    }

    async fn close(self: Box<Self>) -> Result<(), CompilerError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one end of a socket pair, keeping the other end alive.
#[derive(Default)]
pub struct MockConnector {
    pub connected: Mutex<Vec<(String, String)>>,
    peers: Mutex<Vec<UnixStream>>,
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(&self, address: &str, database: &str) -> std::io::Result<UnixStream> {
        let (ours, theirs) = UnixStream::pair()?;
        self.connected.lock().push((address.to_string(), database.to_string()));
        self.peers.lock().push(theirs);
        Ok(ours)
    }
}

pub fn port_config(port: u16) -> PortConfig {
    PortConfig {
        protocol: "binary".to_string(),
        address: "127.0.0.1".to_string(),
        port,
        database: None,
        user: None,
        concurrency: 10,
    }
}

pub fn backend() -> BackendSpec {
    BackendSpec {
        host: Some("/run/pg".to_string()),
        port: Some(5432),
        dsn: None,
    }
}

/// Everything a test needs to build a server, with fakes filled in.
pub struct Fixture {
    pub index: Arc<dyn DatabaseIndex>,
    pub ports: Arc<PortLog>,
    pub pool: Arc<MockPool>,
    pub connector: Arc<MockConnector>,
    pub max_backend_connections: usize,
    pub port_timeout: Option<Duration>,
    pub warm_up: Option<WarmUp>,
}

impl Fixture {
    pub fn new(index: Arc<dyn DatabaseIndex>) -> Self {
        Self {
            index,
            ports: Arc::default(),
            pool: Arc::default(),
            connector: Arc::default(),
            max_backend_connections: 10,
            port_timeout: None,
            warm_up: None,
        }
    }

    pub fn with_config(config: SystemConfig) -> Self {
        Self::new(MockIndex::with_config(config))
    }

    pub fn params(&mut self) -> ServerParams {
        ServerParams {
            backend: backend(),
            data_dir: PathBuf::from("/var/lib/edgeport"),
            runstate_dir: PathBuf::from("/run/edgeport"),
            internal_runstate_dir: PathBuf::from("/run/edgeport/internal"),
            max_backend_connections: self.max_backend_connections,
            database_index: Arc::clone(&self.index),
            compiler_pool: self.pool.clone(),
            backend_connector: self.connector.clone(),
            protocols: mock_protocols(&self.ports),
            port_timeout: self.port_timeout,
            warm_up: self.warm_up.take(),
        }
    }

    pub async fn server(&mut self) -> Arc<Server> {
        let server = match Server::new(self.params()) {
            Ok(server) => server,
            Err(e) => panic!("failed to construct server: {}", e),
        };
        server.init().await.unwrap();
        server
    }

    pub fn factory(&self) -> MockFactory {
        MockFactory {
            log: Arc::clone(&self.ports),
        }
    }
}
