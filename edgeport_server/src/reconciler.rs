//! Keeping the dynamic ports and auth rules in step with the system configuration.

use crate::server::Lifecycle;
use crate::*;

use tokio::sync::{broadcast, mpsc::UnboundedReceiver};

impl Server {
    /// Start a port for a `ports` configuration object, unless one is already running.
    ///
    /// A port that fails to start is stopped again and never recorded. With
    /// `suppress_errors` the failure is logged and `Ok` returned. An unknown
    /// protocol, or a server which has been stopped, is always an error.
    #[tracing::instrument(skip(self))]
    pub async fn start_port_config(&self, config: &PortConfig, suppress_errors: bool) -> ServerResult<()> {
        let mut ports = self.dynamic_ports.lock().await;

        // stop() takes this lock after marking the server stopped, so nothing
        // started past this point could be missed by it
        if *self.lifecycle.lock() == Lifecycle::Stopped {
            return Err(ServerError::IllegalState("server is stopped"));
        }

        if ports.contains_key(config) {
            tracing::info!(?config, "Port for config has already been started");
            return Ok(());
        }

        let (protocol, factory) = self.protocols.lookup(&config.protocol)?;
        let port = factory.create(self.port_options(protocol, config));

        if let Err(error) = self.start_port(&port).await {
            if let Err(stop_error) = self.stop_port(&port).await {
                tracing::warn!(?config, %stop_error, "Failed to clean up port after failed start");
            }

            if suppress_errors {
                tracing::error!(?config, %error, "Failed to start port for config");
                return Ok(());
            }
            return Err(error);
        }

        tracing::info!(?config, id = %port.id(), "Started port for config");
        ports.insert(config.clone(), port);
        Ok(())
    }

    /// Stop and forget the port for a `ports` configuration object, if there is one.
    #[tracing::instrument(skip(self))]
    pub async fn stop_port_config(&self, config: &PortConfig) {
        let mut ports = self.dynamic_ports.lock().await;

        let port = match ports.remove(config) {
            Some(port) => port,
            None => {
                tracing::warn!(?config, "No port to stop for config");
                return;
            }
        };

        match self.stop_port(&port).await {
            Ok(()) => tracing::info!(?config, "Stopped port for config"),
            Err(error) => tracing::error!(?config, %error, "Failed to stop port for config"),
        }
    }

    /// Reconcile one committed configuration change.
    ///
    /// Listener changes are applied first; derived snapshots are rebuilt only
    /// once those have completed.
    #[tracing::instrument(skip(self))]
    pub async fn handle_config_change(&self, change: &ConfigChange) -> ServerResult<()> {
        let stopped = *self.lifecycle.lock() == Lifecycle::Stopped;

        let result = match change {
            ConfigChange::Insert(ConfigObject::Ports(config)) if !stopped => {
                self.start_port_config(config, false).await
            }
            ConfigChange::Remove(ConfigObject::Ports(config)) if !stopped => {
                self.stop_port_config(config).await;
                Ok(())
            }
            ConfigChange::Insert(ConfigObject::Ports(_)) | ConfigChange::Remove(ConfigObject::Ports(_)) => {
                tracing::debug!("Server stopped; ignoring listener change");
                Ok(())
            }
            ConfigChange::Insert(ConfigObject::Auth(_))
            | ConfigChange::Remove(ConfigObject::Auth(_))
            | ConfigChange::Set { .. }
            | ConfigChange::Reset { .. } => Ok(()),
        };

        if let ConfigChange::Insert(ConfigObject::Auth(_)) | ConfigChange::Remove(ConfigObject::Auth(_)) = change {
            self.rebuild_auth_rules();
        }

        result
    }

    /// Handle configuration events one at a time, in delivery order, until
    /// shutdown is signalled or the sender goes away.
    pub async fn run_config_events(
        &self,
        mut events: UnboundedReceiver<ConfigEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() =>
                {
                    break;
                }
                event = events.recv() =>
                {
                    if let Some(event) = event
                    {
                        let result = self.handle_config_change(&event.change).await;
                        if let Err(error) = &result {
                            tracing::error!(change = ?event.change, %error, "Failed to apply configuration change");
                        }

                        if let Some(reply) = event.reply {
                            if reply.send(result).is_err() {
                                tracing::warn!("Configuration change submitter went away");
                            }
                        }
                    }
                    else
                    {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Configuration event pump finished");
    }
}
