/// An argument to, or result of, a worker call.
#[derive(Clone,Debug,PartialEq,serde::Serialize,serde::Deserialize)]
pub enum WorkerValue
{
    Null,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<&str> for WorkerValue
{
    fn from(s: &str) -> Self { Self::Str(s.to_owned()) }
}

impl From<String> for WorkerValue
{
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<i64> for WorkerValue
{
    fn from(i: i64) -> Self { Self::Int(i) }
}

/// Sent from the server to a worker process
#[derive(Debug,serde::Serialize,serde::Deserialize)]
pub enum WorkerRequest
{
    Call { id: u64, method: String, args: Vec<WorkerValue> },
    Shutdown,
}

/// Sent from a worker process in answer to a [`WorkerRequest::Call`]
#[derive(Debug,serde::Serialize,serde::Deserialize)]
pub struct WorkerReply
{
    pub id: u64,
    pub result: Result<WorkerValue, String>,
}
