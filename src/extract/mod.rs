mod resolver;

use async_trait::async_trait;

use crate::models::Platform;

pub use resolver::ResolverClient;

/// Result of resolving a page link to a fetchable media URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Success(String),
    Error(String),
    /// The link was recognised but the content is login-gated or not a video.
    NotSupported,
}

/// Resolves social page links to direct media URLs.
///
/// Dropping the returned future must abandon the in-flight call; the
/// acquisition pipeline relies on that for cancellation and timeouts.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, platform: Platform) -> ExtractOutcome;
}
