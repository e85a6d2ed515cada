// Subprocess supervisor - one external process per downloading job
//
// Live processes are tracked in a fixed-capacity slot table, one slot per
// job. A guard owned by `execute` frees the slot when the call returns,
// whichever way it returns (exit, error, timeout, kill). Kills arrive through
// the request's cancellation token.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::models::JobId;
use super::traits::{ExecRequest, ProcessExecutor, ProcessOutput, ProgressEmitter};
use crate::ytdlp::{self, OutputLine};

/// Default number of process slots
pub const DEFAULT_SLOTS: usize = 16;

/// Stable handle to one occupied slot. The generation guards against releasing
/// a slot that has since been reused by another job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotKey {
    index: usize,
    generation: u64,
}

struct Slot {
    job_id: JobId,
    generation: u64,
    started_at: Instant,
}

/// Fixed-capacity arena of live process handles with free-list reuse
pub struct ProcessTable {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    next_generation: u64,
}

impl ProcessTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            // Popped from the back, so slot 0 is handed out first
            free: (0..capacity).rev().collect(),
            next_generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.position(job_id).is_some()
    }

    fn position(&self, job_id: JobId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |s| s.job_id == job_id))
    }

    pub fn insert(&mut self, job_id: JobId) -> Result<SlotKey, DownloadError> {
        if self.contains(job_id) {
            return Err(DownloadError::ExecutionError(format!("job {} already has a live process", job_id)));
        }
        let index = self
            .free
            .pop()
            .ok_or_else(|| DownloadError::ExecutionError(format!("process table full ({} slots)", self.capacity())))?;

        self.next_generation += 1;
        let generation = self.next_generation;
        self.slots[index] = Some(Slot {
            job_id,
            generation,
            started_at: Instant::now(),
        });
        Ok(SlotKey { index, generation })
    }

    /// Free a slot. Returns false when the key is stale or already released.
    pub fn release(&mut self, key: SlotKey) -> bool {
        match &self.slots[key.index] {
            Some(slot) if slot.generation == key.generation => {
                debug!(job = %slot.job_id, elapsed_ms = slot.started_at.elapsed().as_millis() as u64, "process slot released");
                self.slots[key.index] = None;
                self.free.push(key.index);
                true
            }
            _ => false,
        }
    }
}

struct SlotGuard {
    table: Arc<Mutex<ProcessTable>>,
    key: SlotKey,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.table.lock().release(self.key);
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Killed,
}

/// Production `ProcessExecutor` backed by `tokio::process`
pub struct Supervisor {
    table: Arc<Mutex<ProcessTable>>,
}

impl Supervisor {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(ProcessTable::with_capacity(capacity))),
        }
    }

    pub fn is_tracking(&self, job_id: JobId) -> bool {
        self.table.lock().contains(job_id)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

#[async_trait]
impl ProcessExecutor for Supervisor {
    async fn execute(&self, request: ExecRequest, emitter: ProgressEmitter) -> Result<ProcessOutput, DownloadError> {
        let job_id = request.job_id;
        if request.cancel.is_cancelled() {
            debug!(job = %job_id, "cancelled before spawn");
            return Err(DownloadError::Cancelled);
        }
        let key = self.table.lock().insert(job_id)?;
        let _guard = SlotGuard {
            table: self.table.clone(),
            key,
        };

        debug!(job = %job_id, program = %request.program, args = %request.args.join(" "), "spawning");
        let mut child = Command::new(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DownloadError::ToolNotFound(request.program.clone())
                } else {
                    DownloadError::ExecutionError(format!("Failed to start {}: {}", request.program, e))
                }
            })?;
        info!(job = %job_id, pid = ?child.id(), "process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".to_string()))?;

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = String::new();
            let mut output_file: Option<PathBuf> = None;

            while let Ok(Some(line)) = lines.next_line().await {
                match ytdlp::parse_line(&line) {
                    Some(parsed) => {
                        if let Some(file) = parsed.file() {
                            output_file = Some(PathBuf::from(file));
                        }
                        match &parsed {
                            OutputLine::Progress { .. } => {}
                            OutputLine::PostProcessing { stage, .. } => {
                                info!(job = %job_id, stage = %stage, "post-processing");
                                collected.push_str(&line);
                                collected.push('\n');
                            }
                            _ => {
                                debug!(job = %job_id, "{}", line);
                                collected.push_str(&line);
                                collected.push('\n');
                            }
                        }
                        emitter.emit(job_id, parsed);
                    }
                    None => {
                        collected.push_str(&line);
                        collected.push('\n');
                    }
                }
            }
            (collected, output_file)
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(request.timeout) => Outcome::TimedOut,
            _ = request.cancel.cancelled() => Outcome::Killed,
        };

        match outcome {
            Outcome::Exited(status) => {
                let status = status?;
                let (stdout, output_file) = stdout_task
                    .await
                    .map_err(|e| DownloadError::ExecutionError(format!("stdout task failed: {}", e)))?;
                let stderr = stderr_task
                    .await
                    .map_err(|e| DownloadError::ExecutionError(format!("stderr task failed: {}", e)))?;

                info!(job = %job_id, code = ?status.code(), "process exited");
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    output_file,
                })
            }
            Outcome::TimedOut => {
                let secs = request.timeout.as_secs();
                warn!(job = %job_id, timeout_secs = secs, "process timed out, killing");
                if let Err(e) = child.kill().await {
                    debug!(job = %job_id, error = %e, "kill after timeout failed");
                }
                stdout_task.abort();
                stderr_task.abort();
                Err(DownloadError::Timeout(secs))
            }
            Outcome::Killed => {
                info!(job = %job_id, "process terminated on request");
                // Already exited is fine
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(DownloadError::Cancelled)
            }
        }
    }

    fn active(&self) -> usize {
        self.table.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn slots_are_reused_through_the_free_list() {
        let mut table = ProcessTable::with_capacity(2);

        let ka = table.insert(JobId(1)).unwrap();
        let kb = table.insert(JobId(2)).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.insert(JobId(3)).is_err());

        assert!(table.release(ka));
        assert!(!table.release(ka), "second release is a no-op");

        let kc = table.insert(JobId(3)).unwrap();
        assert_eq!(kc.index, ka.index);
        assert_ne!(kc.generation, ka.generation);

        // A stale key must not free the new occupant
        assert!(!table.release(ka));
        assert!(table.contains(JobId(3)));
        assert!(table.release(kb));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_job_is_rejected() {
        let mut table = ProcessTable::with_capacity(4);
        table.insert(JobId(1)).unwrap();
        assert!(table.insert(JobId(1)).is_err());
    }

    #[cfg(unix)]
    fn sh(job: u64, script: &str, timeout: Duration) -> ExecRequest {
        ExecRequest {
            job_id: JobId(job),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_progress_and_collects_output() {
        let supervisor = Supervisor::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emitter = ProgressEmitter::new(move |_, line| {
            if let OutputLine::Progress { percent, .. } = line {
                sink.lock().push(percent);
            }
        });

        let script = r#"printf '[download] Destination: /tmp/a.mp4\n[download]  10.0%% of 1.00MiB at 1.00MiB/s ETA 00:01\n[download] 100%% of 1.00MiB in 00:00:01 at 1.00MiB/s\n'; echo 'WARNING: something' >&2"#;
        let output = supervisor
            .execute(sh(1, script, Duration::from_secs(10)), emitter)
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(*seen.lock(), vec![10.0, 100.0]);
        assert_eq!(output.output_file, Some(PathBuf::from("/tmp/a.mp4")));
        assert!(output.stderr.contains("WARNING"));
        assert_eq!(supervisor.active(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_exit_is_ok_with_code() {
        let supervisor = Supervisor::default();
        let output = supervisor
            .execute(
                sh(2, "echo 'ERROR: HTTP Error 429: Too Many Requests' >&2; exit 1", Duration::from_secs(10)),
                ProgressEmitter::noop(),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert!(output.stderr.contains("429"));
        assert_eq!(supervisor.active(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_and_frees_the_slot() {
        let supervisor = Supervisor::default();
        let err = supervisor
            .execute(sh(3, "sleep 5", Duration::from_millis(200)), ProgressEmitter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Timeout(_)));
        assert_eq!(supervisor.active(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_a_running_process() {
        let supervisor = Arc::new(Supervisor::default());
        let request = sh(4, "sleep 5", Duration::from_secs(30));
        let cancel = request.cancel.clone();
        let runner = supervisor.clone();
        let handle = tokio::spawn(async move { runner.execute(request, ProgressEmitter::noop()).await });

        while !supervisor.is_tracking(JobId(4)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn cancelled_request_never_spawns() {
        let supervisor = Supervisor::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ExecRequest {
            job_id: JobId(6),
            // Would be ToolNotFound if a spawn were attempted
            program: "definitely-not-a-real-binary-xyz".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(1),
            cancel,
        };
        let err = supervisor.execute(request, ProgressEmitter::noop()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        assert!(!supervisor.is_tracking(JobId(6)));
    }

    #[tokio::test]
    async fn missing_program_frees_the_slot() {
        let supervisor = Supervisor::default();
        let request = ExecRequest {
            job_id: JobId(5),
            program: "definitely-not-a-real-binary-xyz".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        };
        let err = supervisor.execute(request, ProgressEmitter::noop()).await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
        assert_eq!(supervisor.active(), 0);
        assert!(!supervisor.is_tracking(JobId(5)));
    }
}
