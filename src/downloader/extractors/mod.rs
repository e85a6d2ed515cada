// InfoExtractor module - metadata-only describe calls
//
// The orchestrator never describes directly; describe results go through the
// metadata cache, which holds an `Arc<dyn InfoExtractor>`.

mod cli;
mod traits;

pub use cli::CliInfoExtractor;
pub use traits::{
    ExtendedFormat, ExtendedVideoInfo, ExtractorConfig, InfoExtractor, PlaylistEntry, PlaylistInfo,
};
