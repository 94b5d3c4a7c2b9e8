//! Scripted collaborators for pipeline and scheduler tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::{PipelineFactory, DEFAULT_FETCH_TIMEOUT};
use crate::cache::VideoCache;
use crate::download::{cache_key, DownloadEvent, DownloadStream, Downloader};
use crate::extract::{ExtractOutcome, Extractor};
use crate::models::Platform;

pub(crate) enum FakeExtract {
    Now(ExtractOutcome),
    After(Duration, ExtractOutcome),
    Wait(oneshot::Receiver<ExtractOutcome>),
    Never,
}

enum Fallback {
    Succeed,
    Outcome(ExtractOutcome),
    Hang,
}

/// Extractor that plays back queued responses, then falls back to a default.
pub(crate) struct FakeExtractor {
    script: Mutex<VecDeque<FakeExtract>>,
    fallback: Fallback,
    calls: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
}

/// Counts extractor calls dropped before they produced a result.
struct AbandonGuard {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl FakeExtractor {
    /// Every call resolves immediately to a media URL derived from the link.
    pub(crate) fn succeeding() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::Succeed,
            calls: AtomicUsize::new(0),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn always(outcome: ExtractOutcome) -> Self {
        Self {
            fallback: Fallback::Outcome(outcome),
            ..Self::succeeding()
        }
    }

    /// Calls never resolve unless scripted otherwise.
    pub(crate) fn hanging() -> Self {
        Self {
            fallback: Fallback::Hang,
            ..Self::succeeding()
        }
    }

    pub(crate) fn push(&self, step: FakeExtract) {
        self.script.lock().push_back(step);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, url: &str, _platform: Platform) -> ExtractOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front();
        let step = step.unwrap_or_else(|| match &self.fallback {
            Fallback::Succeed => FakeExtract::Now(ExtractOutcome::Success(media_url_for(url))),
            Fallback::Outcome(outcome) => FakeExtract::Now(outcome.clone()),
            Fallback::Hang => FakeExtract::Never,
        });

        let mut guard = AbandonGuard {
            counter: Arc::clone(&self.abandoned),
            armed: true,
        };
        let outcome = match step {
            FakeExtract::Now(outcome) => outcome,
            FakeExtract::After(delay, outcome) => {
                tokio::time::sleep(delay).await;
                outcome
            }
            FakeExtract::Wait(rx) => rx
                .await
                .unwrap_or_else(|_| ExtractOutcome::Error("script sender dropped".into())),
            FakeExtract::Never => futures::future::pending().await,
        };
        guard.armed = false;
        outcome
    }
}

pub(crate) fn media_url_for(url: &str) -> String {
    format!("https://cdn.test/{}.mp4", cache_key(url))
}

pub(crate) fn local_path_for(url: &str) -> PathBuf {
    PathBuf::from(format!("/cache/{}.mp4", cache_key(url)))
}

pub(crate) enum FakeDownload {
    Events(Vec<DownloadEvent>),
    Channel(mpsc::Receiver<DownloadEvent>),
}

/// Downloader that completes instantly unless scripted otherwise.
#[derive(Default)]
pub(crate) struct FakeDownloader {
    script: Mutex<VecDeque<FakeDownload>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl FakeDownloader {
    pub(crate) fn push(&self, step: FakeDownload) {
        self.script.lock().push_back(step);
    }

    /// Script a download driven by the returned sender.
    pub(crate) fn push_channel(&self) -> mpsc::Sender<DownloadEvent> {
        let (tx, rx) = mpsc::channel(8);
        self.push(FakeDownload::Channel(rx));
        tx
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().clone()
    }
}

impl Downloader for FakeDownloader {
    fn download(&self, source_url: &str, remote_url: &str) -> DownloadStream {
        self.requests
            .lock()
            .push((source_url.to_string(), remote_url.to_string()));
        match self.script.lock().pop_front() {
            Some(FakeDownload::Events(events)) => futures::stream::iter(events).boxed(),
            Some(FakeDownload::Channel(rx)) => ReceiverStream::new(rx).boxed(),
            None => futures::stream::iter(vec![
                DownloadEvent::Progress(0.5),
                DownloadEvent::Complete(local_path_for(source_url)),
            ])
            .boxed(),
        }
    }
}

pub(crate) struct Harness {
    pub(crate) extractor: Arc<FakeExtractor>,
    pub(crate) downloader: Arc<FakeDownloader>,
    pub(crate) cache: VideoCache,
    pub(crate) factory: PipelineFactory,
}

impl Harness {
    pub(crate) fn new(extractor: FakeExtractor) -> Self {
        let extractor = Arc::new(extractor);
        let downloader = Arc::new(FakeDownloader::default());
        let cache = VideoCache::in_memory();
        let factory = PipelineFactory::new(
            extractor.clone(),
            downloader.clone(),
            cache.clone(),
            DEFAULT_FETCH_TIMEOUT,
        );
        Self {
            extractor,
            downloader,
            cache,
            factory,
        }
    }
}
