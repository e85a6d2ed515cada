// Service seams injected into the orchestrator

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{Job, JobId};
use super::utils::{detect_network_class, NetworkClass};
use crate::ytdlp::OutputLine;

/// One supervised invocation of an external tool
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub job_id: JobId,
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Owned by the orchestrator from the moment the job is promoted, so a
    /// cancel issued before the process spawns is still observed
    pub cancel: CancellationToken,
}

/// What a finished process left behind
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Last destination / merge target seen on stdout
    pub output_file: Option<PathBuf>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Receives parsed stdout lines while a process runs
#[derive(Clone)]
pub struct ProgressEmitter {
    sink: Arc<dyn Fn(JobId, OutputLine) + Send + Sync>,
}

impl ProgressEmitter {
    pub fn new(sink: impl Fn(JobId, OutputLine) + Send + Sync + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    /// Emitter that drops everything
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn emit(&self, job_id: JobId, line: OutputLine) {
        (self.sink)(job_id, line)
    }
}

/// Runs external processes on behalf of jobs
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run to completion. Any exit, successful or not, is `Ok`; a deadline
    /// kill is `Timeout`. Once `request.cancel` fires the process must not be
    /// started, or must be killed, and the result is `Cancelled`.
    async fn execute(&self, request: ExecRequest, emitter: ProgressEmitter) -> Result<ProcessOutput, DownloadError>;

    /// Number of processes currently tracked
    fn active(&self) -> usize;
}

/// Completion hook run before a job is marked completed
#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the new output path when the file was replaced
    async fn process(&self, job: &Job, output: &ProcessOutput) -> Result<Option<PathBuf>, DownloadError>;
}

/// Time source
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Local wall clock, UTC when the local offset cannot be determined
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// Byte store used for best-effort persistence
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DownloadError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), DownloadError>;
    fn remove(&self, key: &str) -> Result<(), DownloadError>;
}

/// One file per key under a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<cache dir>/media-downloader`
    pub fn default_location() -> Option<Self> {
        dirs::cache_dir().map(|d| Self::new(d.join("media-downloader")))
    }

    fn path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DownloadError> {
        match std::fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), DownloadError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DownloadError> {
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DownloadError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), DownloadError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DownloadError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Reports the class of the active network link
pub trait NetworkProbe: Send + Sync {
    fn network_class(&self) -> NetworkClass;
}

/// Reads the OS interface table on every call
pub struct SystemNetworkProbe;

impl NetworkProbe for SystemNetworkProbe {
    fn network_class(&self) -> NetworkClass {
        detect_network_class()
    }
}

/// Always reports the same class (config override, tests)
pub struct FixedNetworkProbe(pub NetworkClass);

impl NetworkProbe for FixedNetworkProbe {
    fn network_class(&self) -> NetworkClass {
        self.0
    }
}
