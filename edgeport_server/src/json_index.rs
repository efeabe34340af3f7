use crate::*;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IndexFile {
    #[serde(default)]
    system_config: SystemConfig,
    #[serde(default)]
    sys_queries: HashMap<String, String>,
    #[serde(default)]
    instance_data: HashMap<String, serde_json::Value>,
}

#[derive(Default)]
struct IndexData {
    sys_queries: HashMap<String, String>,
    instance_data: HashMap<String, serde_json::Value>,
}

/// A JSON5 file-backed [`DatabaseIndex`].
///
/// Changes made through [`configure`](Self::configure) or
/// [`reload`](Self::reload) are committed to the in-memory snapshot first, then
/// sent to the server's configuration event channel. They live only as long as
/// the process; the file is never written.
pub struct JsonConfigIndex {
    filename: PathBuf,
    initialised: AtomicBool,
    config: ArcSwap<SystemConfig>,
    data: RwLock<IndexData>,
    notifier: UnboundedSender<ConfigEvent>,
    // Held while committing and notifying, so events are delivered in commit order
    write_lock: Mutex<()>,
}

impl JsonConfigIndex {
    /// Create an index for the given file, and the receiving end of its
    /// configuration event channel.
    pub fn new(filename: impl AsRef<Path>) -> (Self, UnboundedReceiver<ConfigEvent>) {
        let (notifier, events) = unbounded_channel();
        (
            Self {
                filename: filename.as_ref().to_owned(),
                initialised: AtomicBool::new(false),
                config: ArcSwap::from_pointee(SystemConfig::default()),
                data: RwLock::new(IndexData::default()),
                notifier,
                write_lock: Mutex::new(()),
            },
            events,
        )
    }

    fn load_file(&self) -> Result<IndexFile, ConfigurationError> {
        let text = fs::read_to_string(&self.filename)
            .map_err(|e| ConfigurationError::IoError(e, self.filename.clone()))?;
        json5::from_str(&text).map_err(|e| ConfigurationError::ParseError(e, self.filename.clone()))
    }

    fn commit(&self, change: &ConfigChange) {
        let mut config = SystemConfig::clone(&self.config.load());
        config.apply(change);
        self.config.store(Arc::new(config));
    }

    // Callers hold `write_lock`, so nothing else commits in between
    async fn commit_and_notify(&self, change: ConfigChange) -> ServerResult<()> {
        let previous = self.config.load_full();
        self.commit(&change);

        let (event, reply) = ConfigEvent::with_reply(change.clone());
        let result = match self.notifier.send(event) {
            Ok(()) => reply.await.unwrap_or_else(|_| Err(IndexError::NotifierClosed.into())),
            Err(_) => Err(IndexError::NotifierClosed.into()),
        };

        // A change nobody reconciled, or a listener which couldn't be started,
        // must not stay in the configuration
        let roll_back = match &result {
            Ok(()) => false,
            Err(ServerError::Index(IndexError::NotifierClosed)) => true,
            Err(_) => matches!(change, ConfigChange::Insert(ConfigObject::Ports(_))),
        };
        if roll_back {
            tracing::debug!(?change, "Rolling back configuration change");
            self.config.store(previous);
        }

        result
    }

    /// Commit one change and wait for the server to reconcile it.
    #[tracing::instrument(skip(self))]
    pub async fn configure(&self, change: ConfigChange) -> ServerResult<()> {
        if !self.initialised.load(Ordering::Acquire) {
            return Err(IndexError::NotInitialised.into());
        }

        let _guard = self.write_lock.lock().await;
        self.commit_and_notify(change).await
    }

    /// Re-read the file and apply whatever changed, one change at a time.
    ///
    /// Every change is attempted; the first failure is returned.
    #[tracing::instrument(skip(self), fields(file = ?self.filename))]
    pub async fn reload(&self) -> ServerResult<()> {
        if !self.initialised.load(Ordering::Acquire) {
            return Err(IndexError::NotInitialised.into());
        }

        let _guard = self.write_lock.lock().await;

        let file = self.load_file()?;
        let changes = self.config.load().diff(&file.system_config);
        tracing::info!(changes = changes.len(), "Reloading system configuration");

        {
            let mut data = self.data.write();
            data.sys_queries = file.sys_queries;
            data.instance_data = file.instance_data;
        }

        let mut first_error = None;
        for change in changes {
            if let Err(e) = self.commit_and_notify(change.clone()).await {
                tracing::error!(?change, error = %e, "Failed to apply configuration change");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl DatabaseIndex for JsonConfigIndex {
    async fn init(&self) -> Result<(), IndexError> {
        let file = self.load_file()?;

        self.config.store(Arc::new(file.system_config));
        *self.data.write() = IndexData {
            sys_queries: file.sys_queries,
            instance_data: file.instance_data,
        };
        self.initialised.store(true, Ordering::Release);

        tracing::debug!(file = ?self.filename, "Loaded system configuration");
        Ok(())
    }

    fn get_sys_config(&self) -> Arc<SystemConfig> {
        self.config.load_full()
    }

    fn get_sys_query(&self, key: &str) -> Option<String> {
        self.data.read().sys_queries.get(key).cloned()
    }

    fn get_instance_data(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().instance_data.get(key).cloned()
    }
}
