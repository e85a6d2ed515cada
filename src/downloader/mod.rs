// Download core: queue, source adapters, process supervision, retry policy,
// bandwidth control and metadata caching

pub mod bandwidth;
pub mod cache;
pub mod classifier;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod postprocess;
pub mod sources;
pub mod supervisor;
pub mod tools;
pub mod traits;
pub mod utils;

pub use bandwidth::{BandwidthController, BandwidthSchedule, BandwidthSettings};
pub use cache::{CacheConfig, CacheStats, MetadataCache};
pub use classifier::{Classification, ErrorClassifier, ErrorKind};
pub use errors::DownloadError;
pub use extractors::{CliInfoExtractor, ExtendedVideoInfo, InfoExtractor, PlaylistInfo};
pub use models::{ClipRange, DownloadProgress, Job, JobId, JobRequest, JobStatus, NetworkConfig, OutputKind};
pub use monitor::{MemoryThresholds, PressureLevel, ResourceMonitor};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorEvent, QueueSnapshot, Services};
pub use postprocess::CodecCompatibility;
pub use sources::{SourceAdapter, SourceRegistry, SourceTag};
pub use supervisor::Supervisor;
pub use tools::{ToolInfo, ToolManager, ToolPaths, ToolType};
pub use traits::{Clock, KvStore, NetworkProbe, PostProcessor, ProcessExecutor, ProgressEmitter};
