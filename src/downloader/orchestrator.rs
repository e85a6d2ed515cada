// Download orchestrator - job state machine and concurrency-limited scheduler
//
// Jobs live in one FIFO list guarded by a mutex that is never held across an
// await. `schedule` promotes pending jobs while fewer than `max_concurrent`
// are downloading; each promoted job runs in its own task, and its exit is
// folded back into the list by `handle_exit`. A failure in one job never
// touches another job's state or slot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bandwidth::{limit_rate_args, BandwidthController};
use super::cache::MetadataCache;
use super::classifier::{Classification, ErrorClassifier, ErrorKind};
use super::errors::DownloadError;
use super::extractors::{ExtendedVideoInfo, PlaylistInfo};
use super::models::{DownloadProgress, Job, JobId, JobRequest, JobStatus, NetworkConfig};
use super::monitor::{PressureLevel, ResourceMonitor};
use super::sources::{ArgContext, SourceRegistry};
use super::traits::{Clock, ExecRequest, PostProcessor, ProcessExecutor, ProcessOutput, ProgressEmitter};
use crate::ytdlp::OutputLine;

/// Upper bound for `max_concurrent`
pub const MAX_CONCURRENCY: usize = 16;

const EVENT_CAPACITY: usize = 256;

pub fn clamp_concurrency(n: usize) -> usize {
    n.clamp(1, MAX_CONCURRENCY)
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    /// Automatic retries for recoverable failures
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n * retry_delay`
    pub retry_delay: Duration,
    pub download_timeout: Duration,
    pub keep_history: bool,
    pub default_output_dir: PathBuf,
    pub ytdlp_path: String,
    /// `None` when ffmpeg was not found
    pub ffmpeg_path: Option<String>,
    pub network: NetworkConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            download_timeout: Duration::from_secs(3600),
            keep_history: true,
            default_output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: None,
            network: NetworkConfig::default(),
        }
    }
}

/// Everything the orchestrator consults, injected at construction
pub struct Services {
    pub registry: Arc<SourceRegistry>,
    pub classifier: Arc<ErrorClassifier>,
    pub executor: Arc<dyn ProcessExecutor>,
    pub bandwidth: Arc<BandwidthController>,
    pub cache: Option<Arc<MetadataCache>>,
    pub post_processors: Vec<Arc<dyn PostProcessor>>,
    pub clock: Arc<dyn Clock>,
}

/// One-way notifications for whatever renders the queue
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    JobsChanged,
    Progress(DownloadProgress),
    Completed {
        job_id: JobId,
        output_file: Option<PathBuf>,
    },
    Failed {
        job_id: JobId,
        kind: ErrorKind,
        message: String,
        hint: Option<String>,
    },
    Retrying {
        job_id: JobId,
        attempt: u32,
        delay: Duration,
    },
    Cancelled(JobId),
    MemoryPressure(PressureLevel),
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub history_len: usize,
    pub active: usize,
    pub pending: usize,
    pub max_concurrent: usize,
    pub paused: bool,
    pub live_processes: usize,
}

struct QueueState {
    /// Active queue in submission order
    jobs: Vec<Job>,
    history: Vec<Job>,
    max_concurrent: usize,
    paused: bool,
    keep_history: bool,
    next_id: u64,
    /// One per downloading job, created at promotion
    cancel_tokens: HashMap<JobId, CancellationToken>,
    /// Completions since start, independent of history
    completed_total: usize,
}

impl QueueState {
    fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn position(&self, id: JobId) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == id)
    }

    fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

struct Inner {
    config: OrchestratorConfig,
    services: Services,
    state: Mutex<QueueState>,
    events: broadcast::Sender<OrchestratorEvent>,
    changed: Notify,
}

enum CancelAction {
    Removed,
    Terminate(Option<CancellationToken>),
    RetryStopped,
    Noop,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, services: Services) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = QueueState {
            jobs: Vec::new(),
            history: Vec::new(),
            max_concurrent: clamp_concurrency(config.max_concurrent),
            paused: false,
            keep_history: config.keep_history,
            next_id: 1,
            cancel_tokens: HashMap::new(),
            completed_total: 0,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                services,
                state: Mutex::new(state),
                events,
                changed: Notify::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
        self.inner.changed.notify_waiters();
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn bandwidth(&self) -> &Arc<BandwidthController> {
        &self.inner.services.bandwidth
    }

    pub fn cache(&self) -> Option<&Arc<MetadataCache>> {
        self.inner.services.cache.as_ref()
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.inner.services.registry
    }

    /// Validate a request and append it to the queue as a pending job.
    /// Requests the source cannot serve are rejected here and never queued.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, DownloadError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("empty URL".to_string()));
        }
        let adapter = self
            .inner
            .services
            .registry
            .detect(url)
            .ok_or_else(|| DownloadError::UnsupportedSource(url.to_string()))?;
        adapter.validate(&request, self.inner.config.ffmpeg_path.is_some())?;
        let source = adapter.tag();
        let now = self.inner.services.clock.now();

        let id = {
            let mut state = self.inner.state.lock();
            let id = JobId(state.next_id);
            state.next_id += 1;
            let job = Job::from_request(id, request, source, self.inner.config.default_output_dir.clone(), now);
            info!(job = %id, source = %source, url = %job.url, kind = %job.kind, "job queued");
            state.jobs.push(job);
            id
        };

        self.emit(OrchestratorEvent::JobsChanged);
        self.schedule();
        Ok(id)
    }

    /// Submit several requests; each result is independent
    pub fn submit_all(&self, requests: Vec<JobRequest>) -> Vec<Result<JobId, DownloadError>> {
        requests.into_iter().map(|r| self.submit(r)).collect()
    }

    /// Promote pending jobs in FIFO order until the concurrency cap is reached
    pub fn schedule(&self) {
        let started: Vec<(Job, CancellationToken)> = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.paused {
                return;
            }
            let max = state.max_concurrent;
            let mut active = state.count(JobStatus::Downloading);
            let mut started = Vec::new();

            for job in state.jobs.iter_mut() {
                if active >= max {
                    break;
                }
                if job.status != JobStatus::Pending || job.transition(JobStatus::Downloading).is_err() {
                    continue;
                }
                job.progress = 0.0;
                job.status_text = "Starting".to_string();
                active += 1;
                let token = CancellationToken::new();
                state.cancel_tokens.insert(job.id, token.clone());
                started.push((job.clone(), token));
            }
            started
        };

        if started.is_empty() {
            return;
        }
        for (job, cancel) in started {
            info!(job = %job.id, attempt = job.retry_count + 1, "download started");
            let this = self.clone();
            tokio::spawn(async move { this.run_job(job, cancel).await });
        }
        self.emit(OrchestratorEvent::JobsChanged);
    }

    async fn run_job(&self, job: Job, cancel: CancellationToken) {
        let services = &self.inner.services;
        let config = &self.inner.config;

        let limit = services.bandwidth.current_limit();
        let ctx = ArgContext {
            ffmpeg_location: config.ffmpeg_path.clone(),
            network: config.network.clone(),
            rate_limit: limit_rate_args(limit),
        };

        let result = match services.registry.build_args(&job, &ctx) {
            Ok(_) if cancel.is_cancelled() => Err(DownloadError::Cancelled),
            Ok(args) => {
                let request = ExecRequest {
                    job_id: job.id,
                    program: config.ytdlp_path.clone(),
                    args,
                    timeout: config.download_timeout,
                    cancel,
                };
                services.executor.execute(request, self.progress_emitter(limit)).await
            }
            Err(e) => Err(e),
        };

        self.handle_exit(job, result).await;
    }

    fn progress_emitter(&self, requested_kib: u64) -> ProgressEmitter {
        let this = self.clone();
        ProgressEmitter::new(move |job_id, line| this.on_output(job_id, line, requested_kib))
    }

    fn on_output(&self, job_id: JobId, line: OutputLine, requested_kib: u64) {
        if let OutputLine::Progress { speed_kib: Some(speed), .. } = &line {
            self.inner.services.bandwidth.record_sample(requested_kib as f64, *speed);
        }

        let progress = {
            let mut state = self.inner.state.lock();
            let job = match state.get_mut(job_id) {
                Some(job) => job,
                None => return,
            };
            match line {
                OutputLine::Progress { percent, status, .. } => {
                    if !job.advance_progress(percent) {
                        return;
                    }
                    job.status_text = status;
                }
                OutputLine::Destination(path) => {
                    job.output_file = Some(PathBuf::from(path));
                    return;
                }
                OutputLine::AlreadyDownloaded(path) => {
                    job.output_file = Some(PathBuf::from(path));
                    job.advance_progress(100.0);
                    job.status_text = "Already downloaded".to_string();
                }
                OutputLine::PostProcessing { stage, target } => {
                    if let Some(target) = target {
                        job.output_file = Some(PathBuf::from(target));
                    }
                    job.status_text = format!("Processing ({})", stage);
                }
            }
            DownloadProgress {
                job_id,
                percent: job.progress,
                status: job.status_text.clone(),
            }
        };

        self.emit(OrchestratorEvent::Progress(progress));
    }

    async fn handle_exit(&self, job: Job, result: Result<ProcessOutput, DownloadError>) {
        let id = job.id;
        let cancel_requested = {
            let mut state = self.inner.state.lock();
            state.cancel_tokens.remove(&id);
            state.jobs.iter().any(|j| j.id == id && j.cancel_requested)
        };

        match result {
            Ok(output) if output.success() => self.complete(id, output).await,
            Err(DownloadError::Cancelled) => self.finish_cancelled(id),
            _ if cancel_requested => self.finish_cancelled(id),
            Ok(output) => {
                let mut classification = self.inner.services.classifier.classify(&output.stderr, Some(job.source));
                if classification.detail.is_none() {
                    classification.detail = Some(match output.exit_code {
                        Some(code) => format!("yt-dlp exited with code {}", code),
                        None => "yt-dlp was killed by a signal".to_string(),
                    });
                }
                self.fail(id, classification);
            }
            Err(e) => {
                let classification = self.inner.services.classifier.classify_error(&e, Some(job.source));
                self.fail(id, classification);
            }
        }

        self.schedule();
    }

    async fn complete(&self, id: JobId, output: ProcessOutput) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            match state.get_mut(id) {
                Some(job) => {
                    if job.output_file.is_none() {
                        job.output_file = output.output_file.clone();
                    }
                    job.status_text = "Post-processing".to_string();
                    job.clone()
                }
                None => return,
            }
        };

        let mut output_file = snapshot.output_file.clone();
        for processor in &self.inner.services.post_processors {
            let mut job = snapshot.clone();
            job.output_file = output_file.clone();
            match processor.process(&job, &output).await {
                Ok(Some(path)) => {
                    info!(job = %id, processor = processor.name(), file = %path.display(), "post-processed");
                    output_file = Some(path);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(job = %id, processor = processor.name(), error = %e, "post-processing failed, keeping original file")
                }
            }
        }

        let now = self.inner.services.clock.now();
        let finished = {
            let mut state = self.inner.state.lock();
            let keep_history = state.keep_history;
            let index = match state.position(id) {
                Some(index) => index,
                None => return,
            };
            let job = &mut state.jobs[index];
            if let Err(e) = job.transition(JobStatus::Completed) {
                warn!(job = %id, error = %e, "completion ignored");
                return;
            }
            job.progress = 100.0;
            job.completed_at = Some(now);
            job.status_text = "Completed".to_string();
            job.output_file = output_file.clone();
            job.cancel_requested = false;

            let job = state.jobs.remove(index);
            state.completed_total += 1;
            if keep_history {
                state.history.push(job.clone());
            }
            job
        };

        info!(job = %id, file = ?finished.output_file, "download completed");
        self.emit(OrchestratorEvent::Completed {
            job_id: id,
            output_file: finished.output_file,
        });
        self.emit(OrchestratorEvent::JobsChanged);
    }

    fn finish_cancelled(&self, id: JobId) {
        let now = self.inner.services.clock.now();
        let cancelled = {
            let mut state = self.inner.state.lock();
            match state.get_mut(id) {
                Some(job) => {
                    if job.transition(JobStatus::Cancelled).is_err() {
                        return;
                    }
                    job.completed_at = Some(now);
                    job.cancel_requested = false;
                    job.status_text = "Cancelled".to_string();
                    true
                }
                None => false,
            }
        };

        if cancelled {
            info!(job = %id, "download cancelled");
            self.emit(OrchestratorEvent::Cancelled(id));
            self.emit(OrchestratorEvent::JobsChanged);
        }
    }

    fn fail(&self, id: JobId, classification: Classification) {
        let config = &self.inner.config;
        let now = self.inner.services.clock.now();

        let retry = {
            let mut state = self.inner.state.lock();
            let job = match state.get_mut(id) {
                Some(job) => job,
                None => return,
            };
            if let Err(e) = job.transition(JobStatus::Error) {
                warn!(job = %id, error = %e, "failure ignored");
                return;
            }
            job.error = Some(classification.message.clone());
            job.error_detail = classification.detail.clone();
            job.hint = classification.hint.clone();

            let cap = classification.kind.retry_cap(config.max_retries);
            if classification.is_recoverable && job.retry_count < cap {
                job.retry_count += 1;
                job.retry_scheduled = true;
                let attempt = job.retry_count;
                let delay = config.retry_delay * attempt;
                job.status_text = format!(
                    "{} - retry {}/{} in {}s",
                    classification.message,
                    attempt,
                    cap,
                    delay.as_secs()
                );
                Some((attempt, delay))
            } else {
                job.completed_at = Some(now);
                job.status_text = classification.message.clone();
                None
            }
        };

        match retry {
            Some((attempt, delay)) => {
                warn!(
                    job = %id,
                    kind = ?classification.kind,
                    attempt,
                    delay_secs = delay.as_secs(),
                    detail = ?classification.detail,
                    "recoverable failure, retrying"
                );
                self.emit(OrchestratorEvent::Retrying {
                    job_id: id,
                    attempt,
                    delay,
                });
                if delay.is_zero() {
                    self.requeue(id);
                } else {
                    let this = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        this.requeue(id);
                    });
                }
            }
            None => {
                error!(
                    job = %id,
                    kind = ?classification.kind,
                    detail = ?classification.detail,
                    "download failed: {}",
                    classification.message
                );
                self.emit(OrchestratorEvent::Failed {
                    job_id: id,
                    kind: classification.kind,
                    message: classification.message,
                    hint: classification.hint,
                });
            }
        }
        self.emit(OrchestratorEvent::JobsChanged);
    }

    /// Retry edge: error -> pending, once the delay has passed
    fn requeue(&self, id: JobId) {
        let requeued = {
            let mut state = self.inner.state.lock();
            match state.get_mut(id) {
                Some(job) if job.retry_scheduled => {
                    job.retry_scheduled = false;
                    if job.transition(JobStatus::Pending).is_err() {
                        return;
                    }
                    job.progress = 0.0;
                    job.status_text = format!("Queued (retry {})", job.retry_count);
                    true
                }
                _ => false,
            }
        };

        if requeued {
            debug!(job = %id, "job requeued");
            self.emit(OrchestratorEvent::JobsChanged);
            self.schedule();
        }
    }

    /// Cancel a job. Pending jobs are dropped from the queue; downloading jobs
    /// have their token fired and become `cancelled` once the executor returns,
    /// whether or not the process had spawned yet.
    /// Returns false when there was nothing to cancel.
    pub fn cancel(&self, id: JobId) -> Result<bool, DownloadError> {
        let now = self.inner.services.clock.now();
        let action = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let index = match state.position(id) {
                Some(index) => index,
                None if state.history.iter().any(|j| j.id == id) => return Ok(false),
                None => return Err(DownloadError::JobNotFound(id)),
            };

            let job = &mut state.jobs[index];
            match job.status {
                JobStatus::Pending => {
                    state.jobs.remove(index);
                    CancelAction::Removed
                }
                JobStatus::Downloading if !job.cancel_requested => {
                    job.cancel_requested = true;
                    job.status_text = "Cancelling".to_string();
                    CancelAction::Terminate(state.cancel_tokens.get(&id).cloned())
                }
                JobStatus::Error if job.retry_scheduled => {
                    job.retry_scheduled = false;
                    job.completed_at = Some(now);
                    job.status_text = "Retry cancelled".to_string();
                    CancelAction::RetryStopped
                }
                _ => CancelAction::Noop,
            }
        };

        match action {
            CancelAction::Removed => {
                info!(job = %id, "pending job removed");
                self.emit(OrchestratorEvent::JobsChanged);
                Ok(true)
            }
            CancelAction::Terminate(token) => {
                match token {
                    Some(token) => token.cancel(),
                    None => warn!(job = %id, "downloading job has no cancel token"),
                }
                info!(job = %id, "cancel requested");
                self.emit(OrchestratorEvent::JobsChanged);
                Ok(true)
            }
            CancelAction::RetryStopped => {
                info!(job = %id, "pending retry cancelled");
                self.emit(OrchestratorEvent::JobsChanged);
                Ok(true)
            }
            CancelAction::Noop => Ok(false),
        }
    }

    /// Remove a job that is not downloading
    pub fn remove(&self, id: JobId) -> Result<Job, DownloadError> {
        let removed = {
            let mut state = self.inner.state.lock();
            let index = state.position(id).ok_or(DownloadError::JobNotFound(id))?;
            if state.jobs[index].status == JobStatus::Downloading {
                return Err(DownloadError::InvalidRequest(format!(
                    "job {} is downloading, cancel it first",
                    id
                )));
            }
            state.jobs.remove(index)
        };
        self.emit(OrchestratorEvent::JobsChanged);
        Ok(removed)
    }

    /// Dismiss a terminal job: it leaves the queue for history, or is dropped
    /// when history is off
    pub fn acknowledge(&self, id: JobId) -> Result<(), DownloadError> {
        {
            let mut state = self.inner.state.lock();
            let index = state.position(id).ok_or(DownloadError::JobNotFound(id))?;
            if state.jobs[index].is_live() {
                return Err(DownloadError::InvalidRequest(format!("job {} is still active", id)));
            }
            let job = state.jobs.remove(index);
            if state.keep_history {
                state.history.push(job);
            }
        }
        self.emit(OrchestratorEvent::JobsChanged);
        Ok(())
    }

    /// Acknowledge every terminal job; returns how many were dismissed
    pub fn acknowledge_all(&self) -> usize {
        let count = {
            let mut state = self.inner.state.lock();
            let (done, live): (Vec<Job>, Vec<Job>) = state.jobs.drain(..).partition(|j| !j.is_live());
            state.jobs = live;
            let count = done.len();
            if state.keep_history {
                state.history.extend(done);
            }
            count
        };
        if count > 0 {
            self.emit(OrchestratorEvent::JobsChanged);
        }
        count
    }

    /// Manually retry a job that failed terminally. Resets its retry budget.
    pub fn retry(&self, id: JobId) -> Result<(), DownloadError> {
        {
            let mut state = self.inner.state.lock();
            let job = state.get_mut(id).ok_or(DownloadError::JobNotFound(id))?;
            if job.retry_scheduled {
                return Err(DownloadError::InvalidRequest(format!("job {} already has a retry scheduled", id)));
            }
            job.transition(JobStatus::Pending)?;
            job.retry_count = 0;
            job.progress = 0.0;
            job.error = None;
            job.error_detail = None;
            job.hint = None;
            job.completed_at = None;
            job.status_text = "Queued (manual retry)".to_string();
            info!(job = %id, "manual retry");
        }
        self.emit(OrchestratorEvent::JobsChanged);
        self.schedule();
        Ok(())
    }

    /// Stop promoting pending jobs. Running jobs continue.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        info!("queue paused");
        self.emit(OrchestratorEvent::JobsChanged);
    }

    pub fn resume(&self) {
        self.inner.state.lock().paused = false;
        info!("queue resumed");
        self.emit(OrchestratorEvent::JobsChanged);
        self.schedule();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Change the concurrency cap (clamped to 1..=16). Lowering it never
    /// interrupts running jobs. Returns the value applied.
    pub fn set_max_concurrent(&self, n: usize) -> usize {
        let n = clamp_concurrency(n);
        self.inner.state.lock().max_concurrent = n;
        info!(max_concurrent = n, "concurrency changed");
        self.schedule();
        n
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.state.lock().max_concurrent
    }

    pub fn set_keep_history(&self, keep: bool) {
        self.inner.state.lock().keep_history = keep;
    }

    pub fn keep_history(&self) -> bool {
        self.inner.state.lock().keep_history
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.state.lock().jobs.clone()
    }

    /// Look a job up in the queue, then in history
    pub fn job(&self, id: JobId) -> Option<Job> {
        let state = self.inner.state.lock();
        state
            .jobs
            .iter()
            .chain(state.history.iter())
            .find(|j| j.id == id)
            .cloned()
    }

    pub fn history(&self) -> Vec<Job> {
        self.inner.state.lock().history.clone()
    }

    pub fn clear_history(&self) -> usize {
        let mut state = self.inner.state.lock();
        let count = state.history.len();
        state.history.clear();
        count
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().count(JobStatus::Downloading)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().count(JobStatus::Pending)
    }

    /// Jobs completed since this orchestrator was built, kept or not
    pub fn completed_total(&self) -> usize {
        self.inner.state.lock().completed_total
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let live_processes = self.inner.services.executor.active();
        let state = self.inner.state.lock();
        QueueSnapshot {
            jobs: state.jobs.clone(),
            history_len: state.history.len(),
            active: state.count(JobStatus::Downloading),
            pending: state.count(JobStatus::Pending),
            max_concurrent: state.max_concurrent,
            paused: state.paused,
            live_processes,
        }
    }

    /// No job is pending, downloading or waiting for a retry
    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().jobs.iter().all(|j| !j.is_live())
    }

    /// Resolve once the queue is idle. Never resolves while paused with
    /// pending work.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.changed.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Describe a single item through the metadata cache
    pub async fn describe(&self, url: &str, force_refresh: bool) -> Result<ExtendedVideoInfo, DownloadError> {
        let cache = self
            .cache()
            .ok_or_else(|| DownloadError::InvalidRequest("no metadata cache configured".to_string()))?;
        cache.get_video(url, force_refresh).await
    }

    /// Describe a collection through the metadata cache
    pub async fn describe_collection(&self, url: &str, force_refresh: bool) -> Result<PlaylistInfo, DownloadError> {
        let cache = self
            .cache()
            .ok_or_else(|| DownloadError::InvalidRequest("no metadata cache configured".to_string()))?;
        cache.get_collection(url, force_refresh).await
    }

    pub(crate) fn report_pressure(&self, level: PressureLevel) {
        self.emit(OrchestratorEvent::MemoryPressure(level));
    }

    /// One maintenance pass: bandwidth re-evaluation, cache expiry sweep,
    /// resource check
    pub fn run_maintenance(&self, monitor: Option<&ResourceMonitor>) {
        self.inner.services.bandwidth.update();
        if let Some(cache) = self.cache() {
            let pruned = cache.prune_expired();
            if pruned > 0 {
                debug!(pruned, "expired metadata entries removed");
            }
        }
        if let Some(monitor) = monitor {
            monitor.check(self);
        }
    }

    /// Run `run_maintenance` every `interval` until the handle is aborted
    pub fn spawn_maintenance(&self, interval: Duration, monitor: Option<Arc<ResourceMonitor>>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.run_maintenance(monitor.as_deref());
            }
        })
    }
}
