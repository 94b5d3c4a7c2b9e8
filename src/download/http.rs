use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{DownloadEvent, DownloadStream, Downloader};
use crate::error::{AppError, Result};

const PROGRESS_STEP: f32 = 0.01;

static NEXT_PARTIAL: AtomicU64 = AtomicU64::new(0);

/// File name stem for a cached video, derived from its page link.
pub fn cache_key(source_url: &str) -> String {
    hex::encode(Sha256::digest(source_url.trim().as_bytes()))
}

/// Scratch file for one run. Runs for the same link never share it.
fn partial_path(target: &Path) -> PathBuf {
    let n = NEXT_PARTIAL.fetch_add(1, Ordering::Relaxed);
    target.with_extension(format!("{}-{}.mp4.part", std::process::id(), n))
}

pub struct HttpDownloader {
    client: Client,
    cache_dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(cache_dir: impl Into<PathBuf>, user_agent: &str) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        // No overall timeout, videos can take a while on slow links
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client, cache_dir })
    }

    pub fn target_path(&self, source_url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.mp4", cache_key(source_url)))
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, source_url: &str, remote_url: &str) -> DownloadStream {
        let (tx, rx) = mpsc::channel(16);
        let client = self.client.clone();
        let remote_url = remote_url.to_string();
        let target = self.target_path(source_url);

        tokio::spawn(async move {
            let partial = partial_path(&target);
            // Dropping the stream stops the transfer even while it is stalled
            let result = tokio::select! {
                result = fetch_to_file(&client, &remote_url, &partial, &target, &tx) => result,
                _ = tx.closed() => Err(AppError::from(anyhow::anyhow!("download abandoned"))),
            };
            match result {
                Ok(()) => {
                    let _ = tx.send(DownloadEvent::Complete(target)).await;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    if tx.is_closed() {
                        tracing::debug!("Download of {} abandoned", remote_url);
                    } else {
                        tracing::debug!("Download of {} failed: {}", remote_url, e);
                        let _ = tx.send(DownloadEvent::Failed(e.to_string())).await;
                    }
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}

async fn fetch_to_file(
    client: &Client,
    remote_url: &str,
    partial: &Path,
    target: &Path,
    tx: &mpsc::Sender<DownloadEvent>,
) -> Result<()> {
    let response = client.get(remote_url).send().await?.error_for_status()?;
    let total = response.content_length().filter(|len| *len > 0);

    let mut file = tokio::fs::File::create(partial).await?;
    let mut body = response.bytes_stream();
    let mut received: u64 = 0;
    let mut last_reported = 0.0_f32;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        if let Some(total) = total {
            let progress = (received as f32 / total as f32).min(1.0);
            if progress - last_reported >= PROGRESS_STEP {
                last_reported = progress;
                tx.send(DownloadEvent::Progress(progress))
                    .await
                    .map_err(|_| anyhow::anyhow!("download abandoned"))?;
            }
        }
    }

    file.flush().await?;
    drop(file);

    // First finished run wins, same as the cache entry
    if tokio::fs::try_exists(target).await? {
        tracing::debug!("{} already downloaded, discarding duplicate", target.display());
        tokio::fs::remove_file(partial).await?;
    } else {
        tokio::fs::rename(partial, target).await?;
    }
    Ok(())
}
