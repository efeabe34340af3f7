//! A compiler worker which compiles nothing. It answers the connection handshake
//! and echoes its arguments, which is enough to drive a pool end to end.

use compiler_client::*;

use std::env;
use std::os::unix::io::FromRawFd;
use std::time::Duration;

use tokio_unix_ipc::{
    Sender as IpcSender,
    Receiver as IpcReceiver,
};

struct Session
{
    database: Option<(String, i64)>,
}

impl Session
{
    async fn handle(&mut self, method: &str, args: Vec<WorkerValue>) -> Result<WorkerValue, String>
    {
        match (method, args.as_slice())
        {
            ("connect", [WorkerValue::Str(database), WorkerValue::Int(version)]) =>
            {
                self.database = Some((database.clone(), *version));
                Ok(WorkerValue::Null)
            }
            ("connect", _) =>
            {
                Err("connect expects a database name and a schema version".to_string())
            }
            ("database", _) =>
            {
                Ok(self.database.as_ref().map_or(WorkerValue::Null, |(name, _)| WorkerValue::Str(name.clone())))
            }
            ("echo", _) =>
            {
                Ok(args.first().cloned().unwrap_or(WorkerValue::Null))
            }
            ("sleep", [WorkerValue::Int(millis)]) =>
            {
                tokio::time::sleep(Duration::from_millis(*millis as u64)).await;
                Ok(WorkerValue::Null)
            }
            (other, _) =>
            {
                Err(format!("unknown method {}", other))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>>
{
    let mut args = env::args();
    args.next();

    let request_fd: i32 = args.next().ok_or("missing request fd")?.trim().parse()?;
    let reply_fd: i32 = args.next().ok_or("missing reply fd")?.trim().parse()?;

    let (request_recv, reply_send) = unsafe
    {
        (IpcReceiver::<WorkerRequest>::from_raw_fd(request_fd), IpcSender::<WorkerReply>::from_raw_fd(reply_fd))
    };

    let mut session = Session { database: None };

    loop
    {
        match request_recv.recv().await?
        {
            WorkerRequest::Shutdown =>
            {
                break;
            }
            WorkerRequest::Call { id, method, args } =>
            {
                let result = session.handle(&method, args).await;
                reply_send.send(WorkerReply { id, result }).await?;
            }
        }
    }

    Ok(())
}
