use crate::*;

use async_trait::async_trait;
use tokio::{
    net::TcpListener,
    sync::{
        mpsc::Sender,
        oneshot,
        Mutex,
        Semaphore,
    },
    select,
    task::JoinHandle,
};

use std::{
    net::SocketAddr,
    sync::Arc,
};

/// Everything a [`TcpPort`] needs to know to bind and serve.
#[derive(Clone,Debug)]
pub struct TcpPortSettings
{
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub scope: PortScope,
    /// Maximum number of simultaneously open connections. Zero is treated as one.
    pub concurrency: usize,
}

struct RunningPort
{
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A TCP listener which accepts connections for one protocol and hands them to
/// an event channel.
pub struct TcpPort
{
    id: PortId,
    settings: TcpPortSettings,
    event_channel: Sender<AcceptedConnection>,
    // tokio Mutex, since start and stop hold it across the bind and the task join
    running: Mutex<Option<RunningPort>>,
}

impl TcpPort
{
    pub fn new(id: PortId, settings: TcpPortSettings, event_channel: Sender<AcceptedConnection>) -> Self
    {
        Self {
            id,
            settings,
            event_channel,
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &TcpPortSettings
    {
        &self.settings
    }

    /// The address actually bound, if the port is running.
    pub async fn local_addr(&self) -> Option<SocketAddr>
    {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    async fn accept_loop(
        id: PortId,
        settings: TcpPortSettings,
        listener: TcpListener,
        event_channel: Sender<AcceptedConnection>,
        mut shutdown: oneshot::Receiver<()>,
    )
    {
        let limit = Arc::new(Semaphore::new(settings.concurrency.max(1)));

        loop
        {
            let permit = select! {
                biased;
                _ = &mut shutdown => break,
                permit = Arc::clone(&limit).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };

            select! {
                biased;
                _ = &mut shutdown => break,
                res = listener.accept() => {
                    match res
                    {
                        Ok((stream, remote_addr)) =>
                        {
                            tracing::trace!(%id, %remote_addr, "Accepted connection");
                            let conn = AcceptedConnection::new(id, settings.protocol, settings.scope.clone(), remote_addr, stream, permit);
                            if let Err(e) = event_channel.send(conn).await
                            {
                                tracing::error!(%id, "Error sending accepted connection: {}", e);
                            }
                        }
                        Err(e) =>
                        {
                            tracing::error!(%id, "Error accepting connection: {}", e);
                        }
                    }
                }
            }
        }

        tracing::debug!(%id, "Listener loop finished");
    }
}

#[async_trait]
impl Port for TcpPort
{
    fn id(&self) -> PortId
    {
        self.id
    }

    #[tracing::instrument(skip(self), fields(id = %self.id, protocol = %self.settings.protocol))]
    async fn start(&self) -> Result<(), PortError>
    {
        let mut running = self.running.lock().await;
        if running.is_some()
        {
            return Ok(());
        }

        if self.settings.host.is_empty()
        {
            return Err(PortError::InvalidAddress(self.settings.host.clone()));
        }

        let listener = TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_send, shutdown_recv) = oneshot::channel();
        let task = tokio::spawn(Self::accept_loop(
            self.id,
            self.settings.clone(),
            listener,
            self.event_channel.clone(),
            shutdown_recv,
        ));

        tracing::info!(%local_addr, "Listening");

        *running = Some(RunningPort { local_addr, shutdown: shutdown_send, task });
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(id = %self.id))]
    async fn stop(&self) -> Result<(), PortError>
    {
        let running = self.running.lock().await.take();

        if let Some(running) = running
        {
            // The loop may already have exited, in which case nobody is listening
            let _ = running.shutdown.send(());
            running.task.await?;
            tracing::info!(local_addr = %running.local_addr, "Stopped listening");
        }

        Ok(())
    }
}

impl Drop for TcpPort
{
    fn drop(&mut self)
    {
        if let Some(running) = self.running.get_mut().take()
        {
            let _ = running.shutdown.send(());
        }
    }
}
