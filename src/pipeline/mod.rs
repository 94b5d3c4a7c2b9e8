mod acquisition;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use crate::cache::VideoCache;
use crate::download::Downloader;
use crate::extract::Extractor;
use crate::models::Platform;

pub use acquisition::AcquisitionStateMachine;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Whether a playback surface is attached to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Foreground,
    /// Prefetch: extraction, download and cache write only.
    Background,
}

/// Collaborators shared by every pipeline.
pub(crate) struct PipelineContext {
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) downloader: Arc<dyn Downloader>,
    pub(crate) cache: VideoCache,
    pub(crate) fetch_timeout: Duration,
}

/// Builds acquisition pipelines wired to the same extractor, downloader and
/// cache. Cheap to clone.
#[derive(Clone)]
pub struct PipelineFactory {
    ctx: Arc<PipelineContext>,
}

impl PipelineFactory {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        downloader: Arc<dyn Downloader>,
        cache: VideoCache,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(PipelineContext {
                extractor,
                downloader,
                cache,
                fetch_timeout,
            }),
        }
    }

    pub fn create(
        &self,
        url: impl Into<String>,
        platform: Platform,
        mode: PipelineMode,
    ) -> AcquisitionStateMachine {
        AcquisitionStateMachine::new(url.into(), platform, mode, Arc::clone(&self.ctx))
    }

    pub fn cache(&self) -> &VideoCache {
        &self.ctx.cache
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.ctx.fetch_timeout
    }
}
