mod http;

use std::path::PathBuf;

use futures::stream::BoxStream;

pub use self::http::{cache_key, HttpDownloader};

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// Fraction received, `0.0..=1.0`.
    Progress(f32),
    Complete(PathBuf),
    Failed(String),
}

pub type DownloadStream = BoxStream<'static, DownloadEvent>;

/// Fetches a resolved media URL into local storage.
///
/// The stream ends after `Complete` or `Failed`. Dropping it abandons the
/// transfer.
pub trait Downloader: Send + Sync {
    fn download(&self, source_url: &str, remote_url: &str) -> DownloadStream;
}
