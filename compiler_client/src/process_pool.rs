use crate::*;

use async_trait::async_trait;
use tokio::{
    process::{
        Command,
        Child,
    },
    sync::Mutex,
};
use tokio_unix_ipc::{
    Sender as IpcSender,
    Receiver as IpcReceiver,
    channel as ipc_channel
};
use std::{
    os::unix::io::IntoRawFd,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// How long a worker is given to exit after being asked to shut down
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A [`WorkerPool`] which runs every compiler worker as a child process of the
/// configured executable.
///
/// The child receives two file descriptors as its arguments: the read end of the
/// request channel and the write end of the reply channel.
pub struct ProcessWorkerPool
{
    exec_path: PathBuf,
    max_workers: usize,
    shutdown_grace: Duration,
    live: Arc<AtomicUsize>,
}

impl ProcessWorkerPool
{
    pub fn new(exec_path: impl AsRef<Path>, max_workers: usize) -> Self
    {
        Self {
            exec_path: exec_path.as_ref().to_owned(),
            max_workers,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set how long `close()` waits for a worker to exit before killing it.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self
    {
        self.shutdown_grace = grace;
        self
    }

    fn reserve_slot(&self) -> bool
    {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| (live < self.max_workers).then(|| live + 1))
            .is_ok()
    }

    // The caller must already hold a slot in `live`; the returned worker releases it
    fn launch(&self) -> std::io::Result<WorkerProcess>
    {
        let (request_send, request_recv) = ipc_channel()?;
        let (reply_send, reply_recv) = ipc_channel()?;

        let request_fd = request_recv.into_raw_fd();
        let reply_fd = reply_send.into_raw_fd();

        let child = unsafe
        {
            Command::new(&self.exec_path)
                    .args([request_fd.to_string(), reply_fd.to_string()])
                    .pre_exec(move || {
                        use libc::{fcntl, F_GETFD, F_SETFD, FD_CLOEXEC};

                        let rfd_flags = fcntl(request_fd, F_GETFD);
                        fcntl(request_fd, F_SETFD, rfd_flags & !FD_CLOEXEC);
                        let pfd_flags = fcntl(reply_fd, F_GETFD);
                        fcntl(reply_fd, F_SETFD, pfd_flags & !FD_CLOEXEC);
                        Ok(())
                    })
                    .spawn()
        };

        // The child's ends belong to the child now; holding them here would hide its exit
        unsafe
        {
            libc::close(request_fd);
            libc::close(reply_fd);
        }

        let child = child?;

        Ok(WorkerProcess {
            pid: child.id().unwrap_or_default(),
            channel: Mutex::new((request_send, reply_recv)),
            next_call: AtomicU64::new(1),
            shutdown_grace: self.shutdown_grace,
            child: Some(child),
            live: Arc::clone(&self.live),
        })
    }
}

#[async_trait]
impl WorkerPool for ProcessWorkerPool
{
    #[tracing::instrument(skip(self))]
    async fn spawn_worker(&self) -> Result<Box<dyn CompilerWorker>, CompilerError>
    {
        if !self.reserve_slot()
        {
            return Err(CompilerError::Unavailable(format!("{} workers already running", self.max_workers)));
        }

        match self.launch()
        {
            Ok(worker) =>
            {
                tracing::debug!(pid = worker.pid, "Spawned compiler worker");
                Ok(Box::new(worker))
            }
            Err(e) =>
            {
                self.live.fetch_sub(1, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn live_workers(&self) -> usize
    {
        self.live.load(Ordering::SeqCst)
    }
}

/// One compiler worker child process
pub struct WorkerProcess
{
    pid: u32,
    // Calls are strictly request-then-reply, so the pair is locked together
    channel: Mutex<(IpcSender<WorkerRequest>, IpcReceiver<WorkerReply>)>,
    next_call: AtomicU64,
    shutdown_grace: Duration,
    child: Option<Child>,
    live: Arc<AtomicUsize>,
}

impl WorkerProcess
{
    pub fn pid(&self) -> u32
    {
        self.pid
    }

    fn reap(&mut self) -> Option<Child>
    {
        let child = self.child.take();
        if child.is_some()
        {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        child
    }
}

#[async_trait]
impl CompilerWorker for WorkerProcess
{
    #[tracing::instrument(skip(self, args), fields(pid = self.pid))]
    async fn call(&self, method: &str, args: Vec<WorkerValue>) -> Result<WorkerValue, CompilerError>
    {
        let id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let channel = self.channel.lock().await;

        channel.0.send(WorkerRequest::Call { id, method: method.to_owned(), args }).await
                 .map_err(|_| CompilerError::WorkerGone)?;

        loop
        {
            let reply = channel.1.recv().await.map_err(|_| CompilerError::WorkerGone)?;
            // Replies to calls whose caller gave up are still in the channel
            if reply.id != id
            {
                tracing::warn!(expected = id, got = reply.id, "Discarding stale worker reply");
                continue;
            }

            return reply.result.map_err(|message| CompilerError::Remote { method: method.to_owned(), message });
        }
    }

    #[tracing::instrument(skip(self), fields(pid = self.pid))]
    async fn close(mut self: Box<Self>) -> Result<(), CompilerError>
    {
        let sent = self.channel.lock().await.0.send(WorkerRequest::Shutdown).await;

        if let Some(mut child) = self.reap()
        {
            if sent.is_err()
            {
                let _ = child.start_kill();
            }

            match tokio::time::timeout(self.shutdown_grace, child.wait()).await
            {
                Ok(status) =>
                {
                    status?;
                }
                Err(_) =>
                {
                    tracing::warn!(grace = ?self.shutdown_grace, "Compiler worker ignored shutdown; killing");
                    child.kill().await?;
                }
            }
        }

        tracing::debug!("Compiler worker closed");
        Ok(())
    }
}

impl Drop for WorkerProcess
{
    fn drop(&mut self)
    {
        if let Some(mut child) = self.reap()
        {
            // The runtime reaps the killed child in the background
            tracing::warn!(pid = self.pid, "Compiler worker dropped without close; killing");
            let _ = child.start_kill();
        }
    }
}
