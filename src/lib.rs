pub mod config;
pub mod downloader;
pub mod ytdlp;

use std::sync::Arc;

use tracing::{info, warn};

use config::AppConfig;
use downloader::bandwidth::BandwidthController;
use downloader::cache::MetadataCache;
use downloader::classifier::ErrorClassifier;
use downloader::errors::DownloadError;
use downloader::extractors::{CliInfoExtractor, ExtractorConfig};
use downloader::monitor::ResourceMonitor;
use downloader::orchestrator::{Orchestrator, Services};
use downloader::postprocess::CodecCompatibility;
use downloader::sources::SourceRegistry;
use downloader::supervisor::{Supervisor, DEFAULT_SLOTS};
use downloader::tools::{ToolManager, ToolPaths};
use downloader::traits::{
    Clock, FileStore, FixedNetworkProbe, NetworkProbe, PostProcessor, SystemClock, SystemNetworkProbe,
};

/// Fully wired download core for one process
pub struct AppContext {
    pub orchestrator: Orchestrator,
    pub monitor: Arc<ResourceMonitor>,
    pub cache: Arc<MetadataCache>,
    pub tools: ToolPaths,
    persist_cache: bool,
}

impl AppContext {
    /// Resolve tools and build every service from `config`
    pub fn build(config: &AppConfig) -> Result<Self, DownloadError> {
        let tools = ToolManager::new(config.ytdlp_path.clone(), config.ffmpeg_path.clone()).resolve()?;
        info!(ytdlp = %tools.ytdlp, ffmpeg = ?tools.ffmpeg, "tools resolved");

        let network = config.network_config();
        let registry = Arc::new(SourceRegistry::with_defaults());
        let classifier = Arc::new(ErrorClassifier::with_defaults());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let probe: Arc<dyn NetworkProbe> = match config.network_class {
            Some(class) => Arc::new(FixedNetworkProbe(class)),
            None => Arc::new(SystemNetworkProbe),
        };

        let extractor = Arc::new(CliInfoExtractor::new(
            tools.ytdlp.clone(),
            registry.clone(),
            classifier.clone(),
            ExtractorConfig {
                network: network.clone(),
                timeout_seconds: config.describe_timeout_secs,
            },
        ));

        let mut cache = MetadataCache::new(extractor, clock.clone(), config.cache.to_cache_config());
        let persist_cache = match (config.cache.persist, FileStore::default_location()) {
            (true, Some(store)) => {
                cache = cache.with_store(Arc::new(store));
                true
            }
            (true, None) => {
                warn!("no cache directory on this platform, metadata cache is memory only");
                false
            }
            (false, _) => false,
        };
        let cache = Arc::new(cache);
        if persist_cache {
            let restored = cache.load();
            info!(restored, "metadata cache restored");
        }

        let compat: Arc<dyn PostProcessor> = Arc::new(CodecCompatibility::new(tools.ffmpeg.clone(), registry.clone()));
        let services = Services {
            registry,
            classifier,
            executor: Arc::new(Supervisor::new(DEFAULT_SLOTS)),
            bandwidth: Arc::new(BandwidthController::new(config.bandwidth.clone(), clock.clone(), probe)),
            cache: Some(cache.clone()),
            post_processors: vec![compat],
            clock,
        };
        let orchestrator = Orchestrator::new(config.orchestrator_config(&tools, network), services);

        Ok(Self {
            orchestrator,
            monitor: Arc::new(ResourceMonitor::new(config.memory.clone())),
            cache,
            tools,
            persist_cache,
        })
    }

    /// Flush what should survive the process
    pub fn shutdown(&self) {
        if !self.persist_cache {
            return;
        }
        if let Err(e) = self.cache.save() {
            warn!(error = %e, "failed to persist metadata cache");
        }
    }
}
