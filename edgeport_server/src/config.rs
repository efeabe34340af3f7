use crate::{BackendSpec, ConfigurationError, PortConfig};

use std::collections::HashMap;
use tracing_core::{
    LevelFilter,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    fs,
    time::Duration,
};

#[derive(Clone,Debug,serde::Serialize,serde::Deserialize)]
#[serde(rename_all="lowercase")]
pub enum BuiltinLogTarget
{
    Stdout,
    Stderr,
}

#[derive(Clone,Debug,serde::Serialize,serde::Deserialize)]
#[serde(untagged)]
pub enum LogTarget
{
    File { filename: PathBuf },
    Builtin(BuiltinLogTarget),
}

#[derive(Clone,Copy,Debug,serde::Serialize,serde::Deserialize)]
#[serde(rename_all ="lowercase")]
pub enum LogLevel
{
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

#[derive(Clone,Debug,serde::Deserialize)]
pub struct LogEntry
{
    pub target: LogTarget,
    #[serde(default)]
    pub modules: Vec<String>,
    pub level: Option<LogLevel>,
}

#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct LoggingConfig
{
    pub dir: PathBuf,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub default_level: Option<LogLevel>,
    #[serde(default)]
    pub module_levels: HashMap<String, LogLevel>,
    pub targets: Vec<LogEntry>,
    pub console_address: Option<std::net::SocketAddr>,
}

#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct CompilerConfig
{
    pub worker_exe: PathBuf,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize { 4 }

fn default_max_backend_connections() -> usize { 100 }

/// Configuration for one server process
#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct ServerConfig
{
    pub backend: BackendSpec,
    pub data_dir: PathBuf,
    pub runstate_dir: PathBuf,
    pub internal_runstate_dir: PathBuf,
    #[serde(default = "default_max_backend_connections")]
    pub max_backend_connections: usize,

    /// JSON5 file holding the system configuration, system queries and instance data
    pub system_config: PathBuf,
    #[serde(default)]
    pub static_ports: Vec<PortConfig>,
    pub compiler: CompilerConfig,
    pub port_timeout_secs: Option<u64>,

    pub log: LoggingConfig,
}

impl ServerConfig
{
    /// Load configuration from a file
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigurationError>
    {
        let filename = filename.as_ref();
        let text = fs::read_to_string(filename).map_err(|e| ConfigurationError::IoError(e, filename.to_owned()))?;
        json5::from_str(&text).map_err(|e| ConfigurationError::ParseError(e, filename.to_owned()))
    }

    pub fn port_timeout(&self) -> Option<Duration>
    {
        self.port_timeout_secs.map(Duration::from_secs)
    }
}

impl LoggingConfig
{
    pub fn prefix_file(&self, filename: impl AsRef<Path>) -> PathBuf
    {
        let mut path = self.dir.clone();
        path.push(filename);
        path
    }
}

impl From<LogLevel> for LevelFilter
{
    fn from(arg: LogLevel) -> LevelFilter
    {
        match arg
        {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info  => LevelFilter::INFO,
            LogLevel::Warn  => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off   => LevelFilter::OFF,
        }
    }
}
