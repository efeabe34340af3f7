use crate::*;

use arc_swap::ArcSwap;
use compiler_client::{CompilerWorker, WorkerPool, WorkerValue};
use futures::future::join_all;
use parking_lot::Mutex;
use port_listener::*;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    time::Duration,
};

/// A one-shot warm-up of shared, expensive state, run at the start of [`Server::start`]
pub type WarmUp = Box<dyn FnOnce() + Send>;

/// Construction parameters for a [`Server`]
pub struct ServerParams {
    pub backend: BackendSpec,
    pub data_dir: PathBuf,
    pub runstate_dir: PathBuf,
    pub internal_runstate_dir: PathBuf,
    pub max_backend_connections: usize,
    pub database_index: Arc<dyn DatabaseIndex>,
    pub compiler_pool: Arc<dyn WorkerPool>,
    pub backend_connector: Arc<dyn BackendConnector>,
    pub protocols: ProtocolTable,
    /// Upper bound on any single port start or stop
    pub port_timeout: Option<Duration>,
    pub warm_up: Option<WarmUp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Initialised,
    Starting,
    Serving,
    Stopped,
}

/// The server process orchestrator.
///
/// Owns the static ports registered at startup and the dynamic ports derived
/// from the `ports` system setting, keeps the latter and the auth rules in step
/// with configuration changes, and hands out compiler workers and backend
/// connections.
///
/// The lifecycle is `new` → [`init`](Self::init) → [`start`](Self::start) →
/// [`stop`](Self::stop).
pub struct Server {
    self_ref: Weak<Server>,
    pub(crate) lifecycle: Mutex<Lifecycle>,

    backend_address: String,
    data_dir: PathBuf,
    runstate_dir: PathBuf,
    internal_runstate_dir: PathBuf,

    pub(crate) database_index: Arc<dyn DatabaseIndex>,
    compiler_pool: Arc<dyn WorkerPool>,
    backend_connector: Arc<dyn BackendConnector>,
    backend_slots: Arc<Semaphore>,

    pub(crate) protocols: ProtocolTable,
    port_ids: PortIdGenerator,
    port_timeout: Option<Duration>,
    warm_up: Mutex<Option<WarmUp>>,

    static_ports: Mutex<Vec<Arc<dyn Port>>>,
    // Only written by reconciliation and start/stop; held for the whole of each step
    pub(crate) dynamic_ports: AsyncMutex<HashMap<PortConfig, Arc<dyn Port>>>,
    pub(crate) auth_rules: ArcSwap<AuthRuleSet>,
}

impl Server {
    /// Construct a server. The backend address is resolved here, once.
    pub fn new(params: ServerParams) -> ServerResult<Arc<Self>> {
        let backend_address = resolve_backend_address(&params.backend)?;
        tracing::debug!(%backend_address, "Resolved backend address");

        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            lifecycle: Mutex::new(Lifecycle::Created),
            backend_address,
            data_dir: params.data_dir,
            runstate_dir: params.runstate_dir,
            internal_runstate_dir: params.internal_runstate_dir,
            database_index: params.database_index,
            compiler_pool: params.compiler_pool,
            backend_connector: params.backend_connector,
            backend_slots: Arc::new(Semaphore::new(params.max_backend_connections.max(1))),
            protocols: params.protocols,
            port_ids: PortIdGenerator::default(),
            port_timeout: params.port_timeout,
            warm_up: Mutex::new(params.warm_up),
            static_ports: Mutex::new(Vec::new()),
            dynamic_ports: AsyncMutex::new(HashMap::new()),
            auth_rules: ArcSwap::from_pointee(AuthRuleSet::default()),
        }))
    }

    /// Initialise the database index and load the initial auth rules.
    #[tracing::instrument(skip(self))]
    pub async fn init(&self) -> ServerResult<()> {
        if *self.lifecycle.lock() != Lifecycle::Created {
            return Err(ServerError::IllegalState("init() called twice"));
        }

        self.database_index.init().await?;
        self.rebuild_auth_rules();

        *self.lifecycle.lock() = Lifecycle::Initialised;
        Ok(())
    }

    pub(crate) fn port_options(&self, protocol: Protocol, config: &PortConfig) -> PortOptions {
        PortOptions {
            id: self.port_ids.next(),
            server: self.self_ref.clone(),
            backend_address: self.backend_address.clone(),
            data_dir: self.data_dir.clone(),
            runstate_dir: self.runstate_dir.clone(),
            internal_runstate_dir: self.internal_runstate_dir.clone(),
            database_index: Arc::clone(&self.database_index),
            net_port: config.port,
            net_host: config.address.clone(),
            database: config.database.clone(),
            user: config.user.clone(),
            protocol,
            concurrency: config.concurrency,
        }
    }

    /// Register a port to be started by [`start`](Self::start).
    ///
    /// Only permitted before the server starts.
    pub fn add_static_port(&self, factory: &dyn PortFactory, config: &PortConfig) -> ServerResult<PortId> {
        let protocol: Protocol = config
            .protocol
            .parse()
            .map_err(|_| ConfigurationError::UnknownProtocol(config.protocol.clone()))?;

        let lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Created | Lifecycle::Initialised) {
            return Err(ServerError::IllegalState("cannot add new ports after start() call"));
        }

        let port = factory.create(self.port_options(protocol, config));
        let id = port.id();
        self.static_ports.lock().push(port);

        tracing::debug!(%id, ?config, "Registered static port");
        Ok(id)
    }

    async fn within_port_timeout<F>(
        &self,
        port: PortId,
        operation: &'static str,
        fut: F,
    ) -> ServerResult<Result<(), PortError>>
    where
        F: Future<Output = Result<(), PortError>>,
    {
        match self.port_timeout {
            Some(after) => tokio::time::timeout(after, fut).await.map_err(|_| ServerError::ListenerTimeout {
                port,
                operation,
                after,
            }),
            None => Ok(fut.await),
        }
    }

    pub(crate) async fn start_port(&self, port: &Arc<dyn Port>) -> ServerResult<()> {
        let id = port.id();
        self.within_port_timeout(id, "start", port.start())
            .await?
            .map_err(|source| ServerError::ListenerStart { port: id, source })
    }

    pub(crate) async fn stop_port(&self, port: &Arc<dyn Port>) -> ServerResult<()> {
        let id = port.id();
        self.within_port_timeout(id, "stop", port.stop())
            .await?
            .map_err(|source| ServerError::ListenerStop { port: id, source })
    }

    /// Start serving: warm up, start every static port, then every port in
    /// the `ports` setting.
    ///
    /// Any static port failing fails the whole call, once all of them have
    /// finished trying. A configured port failing to start is logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> ServerResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Initialised => *lifecycle = Lifecycle::Starting,
                Lifecycle::Created => return Err(ServerError::IllegalState("start() called before init()")),
                _ => return Err(ServerError::IllegalState("start() called twice")),
            }
        }

        if let Some(warm_up) = self.warm_up.lock().take() {
            warm_up();
        }

        let static_ports = self.static_ports.lock().clone();
        let results = join_all(static_ports.iter().map(|port| self.start_port(port))).await;
        if let Some(error) = results.into_iter().find_map(Result::err) {
            tracing::error!(%error, "Failed to start static port");
            return Err(error);
        }

        if let Err(error) = self.ensure_starting() {
            // stop() may have run while these were starting, and missed them
            for error in join_all(static_ports.iter().map(|port| self.stop_port(port)))
                .await
                .into_iter()
                .filter_map(Result::err)
            {
                tracing::error!(%error, "Failed to stop static port");
            }
            return Err(error);
        }

        let sys_config = self.database_index.get_sys_config();
        for port_config in &sys_config.ports {
            self.ensure_starting()?;
            self.start_port_config(port_config, true).await?;
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Starting {
                return Err(ServerError::IllegalState("server stopped during start()"));
            }
            *lifecycle = Lifecycle::Serving;
        }

        let dynamic_ports = self.dynamic_port_count().await;
        tracing::info!(static_ports = static_ports.len(), dynamic_ports, "Server started");
        Ok(())
    }

    fn ensure_starting(&self) -> ServerResult<()> {
        match *self.lifecycle.lock() {
            Lifecycle::Starting => Ok(()),
            _ => Err(ServerError::IllegalState("server stopped during start()")),
        }
    }

    /// Stop every port. Failures are logged; every port is stopped regardless.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        *self.lifecycle.lock() = Lifecycle::Stopped;

        let mut dynamic_ports = self.dynamic_ports.lock().await;
        let ports: Vec<Arc<dyn Port>> = self
            .static_ports
            .lock()
            .drain(..)
            .chain(dynamic_ports.drain().map(|(_, port)| port))
            .collect();

        let results = join_all(ports.iter().map(|port| self.stop_port(port))).await;
        for error in results.into_iter().filter_map(Result::err) {
            tracing::error!(%error, "Failed to stop port");
        }

        tracing::info!(ports = ports.len(), "Server stopped");
    }

    pub fn is_serving(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Serving
    }

    /// Choose the authentication method for a connection attempt. `None` means
    /// the connection must be refused.
    pub fn resolve_auth_method(&self, user: &str, database: &str) -> Option<AuthMethod> {
        let method = self.auth_rules.load().resolve(user, database);
        tracing::trace!(user, database, ?method, "Resolved auth method");
        method
    }

    pub(crate) fn rebuild_auth_rules(&self) {
        let rules = AuthRuleSet::from_config(&self.database_index.get_sys_config());
        tracing::debug!(rules = rules.rules().len(), "Rebuilt auth rules");
        self.auth_rules.store(Arc::new(rules));
    }

    /// Obtain a compiler worker bound to the given database and schema version.
    #[tracing::instrument(skip(self))]
    pub async fn provision_compiler(&self, database: &str, version: i64) -> ServerResult<Box<dyn CompilerWorker>> {
        let worker = self.compiler_pool.spawn_worker().await?;

        let args = vec![WorkerValue::from(database), WorkerValue::from(version)];
        if let Err(e) = worker.call("connect", args).await {
            if let Err(close_error) = worker.close().await {
                tracing::warn!(%close_error, "Failed to close unbound compiler worker");
            }
            return Err(e.into());
        }

        Ok(worker)
    }

    /// Open a new connection to the backend for the given database.
    ///
    /// Waits for a free slot if `max_backend_connections` are already open.
    pub async fn new_backend_connection(&self, database: &str) -> ServerResult<BackendConnection> {
        let slot = Arc::clone(&self.backend_slots)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::IllegalState("backend connection slots closed"))?;
        let stream = self.backend_connector.connect(&self.backend_address, database).await?;
        Ok(BackendConnection::new(database.to_owned(), stream, slot))
    }

    pub fn get_sys_query(&self, key: &str) -> Option<String> {
        self.database_index.get_sys_query(key)
    }

    pub fn get_instance_data(&self, key: &str) -> Option<serde_json::Value> {
        self.database_index.get_instance_data(key)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn backend_address(&self) -> &str {
        &self.backend_address
    }

    pub fn static_port_count(&self) -> usize {
        self.static_ports.lock().len()
    }

    pub async fn dynamic_port_count(&self) -> usize {
        self.dynamic_ports.lock().await.len()
    }
}
