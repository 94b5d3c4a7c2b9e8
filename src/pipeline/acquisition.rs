use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{PipelineContext, PipelineMode};
use crate::download::DownloadEvent;
use crate::error::AcquisitionError;
use crate::extract::ExtractOutcome;
use crate::models::{AcquisitionEvent, AcquisitionState, Platform};

/// Bookkeeping for the current run. Every state transition happens while
/// this is locked, so bumping `generation` here makes all events of older
/// runs stale atomically.
struct Control {
    generation: u64,
    active: bool,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    url: String,
    platform: Platform,
    mode: PipelineMode,
    ctx: Arc<PipelineContext>,
    state_tx: watch::Sender<AcquisitionState>,
    control: Mutex<Control>,
}

/// Drives one link from "unknown" to a locally playable file, or to a
/// failure state the user can retry from.
///
/// Owned by whoever created it; consumers observe the state through
/// [`subscribe`](Self::subscribe) and never mutate it. Dropping the machine
/// cancels any in-flight work.
pub struct AcquisitionStateMachine {
    shared: Arc<Shared>,
}

impl AcquisitionStateMachine {
    pub(crate) fn new(
        url: String,
        platform: Platform,
        mode: PipelineMode,
        ctx: Arc<PipelineContext>,
    ) -> Self {
        let (state_tx, _) = watch::channel(AcquisitionState::Idle);
        Self {
            shared: Arc::new(Shared {
                url,
                platform,
                mode,
                ctx,
                state_tx,
                control: Mutex::new(Control {
                    generation: 0,
                    active: false,
                    cancel: CancellationToken::new(),
                    task: None,
                }),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn platform(&self) -> Platform {
        self.shared.platform
    }

    pub fn mode(&self) -> PipelineMode {
        self.shared.mode
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch the state. Receivers only ever see the latest value.
    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState> {
        self.shared.state_tx.subscribe()
    }

    /// Begin acquisition. Returns `false` without doing anything when a run is
    /// already in flight or the video is already playing.
    pub fn start(&self) -> bool {
        let mut control = self.shared.control.lock();
        let state = self.state();
        if control.active || !state.can_start() {
            tracing::debug!(url = %self.shared.url, ?state, "start ignored");
            return false;
        }
        self.launch(&mut control, false);
        true
    }

    /// Restart from scratch after `Error` or `Timeout`. Partial downloads are
    /// not resumed. Returns `false` in any other state.
    pub fn retry(&self) -> bool {
        let mut control = self.shared.control.lock();
        let state = self.state();
        if control.active || !state.is_retryable() {
            tracing::debug!(url = %self.shared.url, ?state, "retry ignored");
            return false;
        }
        self.launch(&mut control, true);
        true
    }

    /// Tear down extraction, timer and download, then settle in `Dismissed`.
    /// Idempotent.
    pub fn cancel(&self) {
        let mut control = self.shared.control.lock();
        control.stop();
        self.shared.apply_locked(AcquisitionEvent::Cancelled);
    }

    fn launch(&self, control: &mut Control, begin_now: bool) {
        control.stop();
        control.active = true;
        let generation = control.generation;
        let token = control.cancel.clone();

        if begin_now {
            self.shared.apply_locked(AcquisitionEvent::Begin);
        }

        let span = tracing::debug_span!(
            "acquire",
            url = %self.shared.url,
            platform = %self.shared.platform,
            mode = ?self.shared.mode,
            generation
        );
        let shared = Arc::clone(&self.shared);
        control.task = Some(tokio::spawn(
            run(shared, generation, token).instrument(span),
        ));
    }
}

impl Drop for AcquisitionStateMachine {
    fn drop(&mut self) {
        self.shared.control.lock().stop();
    }
}

impl Control {
    /// Invalidate the current run and release its suspension points.
    fn stop(&mut self) {
        self.generation += 1;
        self.active = false;
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Shared {
    /// Apply an event from the run identified by `generation`. Events from a
    /// superseded run are dropped. Returns whether the event was applied.
    fn apply(&self, generation: u64, event: AcquisitionEvent) -> bool {
        let control = self.control.lock();
        if control.generation != generation {
            tracing::debug!(?event, "dropping event from stale run");
            return false;
        }
        self.apply_locked(event)
    }

    /// Like `apply`, for the event that ends the run.
    fn finish(&self, generation: u64, event: AcquisitionEvent) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation {
            tracing::debug!(?event, "dropping final event from stale run");
            return false;
        }
        control.active = false;
        control.task = None;
        self.apply_locked(event)
    }

    fn apply_locked(&self, event: AcquisitionEvent) -> bool {
        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            match state.on_event(event.clone()) {
                Some(next) => {
                    applied = true;
                    if next == *state {
                        return false;
                    }
                    tracing::debug!(from = ?state, to = ?next, "transition");
                    *state = next;
                    true
                }
                None => {
                    tracing::debug!(?state, ?event, "event has no effect in current state");
                    false
                }
            }
        });
        applied
    }
}

async fn run(shared: Arc<Shared>, generation: u64, token: CancellationToken) {
    let ctx = Arc::clone(&shared.ctx);

    let cached = match ctx.cache.lookup(&shared.url).await {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("Cache lookup failed, fetching instead: {}", e);
            None
        }
    };
    if let Some(path) = cached {
        shared.finish(generation, AcquisitionEvent::CacheHit(path));
        return;
    }

    if !shared.apply(generation, AcquisitionEvent::Begin) {
        return;
    }

    // Extraction races the fetch timeout; the loser is dropped with the select
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        outcome = ctx.extractor.extract(&shared.url, shared.platform) => outcome,
        _ = tokio::time::sleep(ctx.fetch_timeout) => {
            tracing::debug!("no extractor response within {:?}", ctx.fetch_timeout);
            shared.finish(generation, AcquisitionEvent::Failed(AcquisitionError::Timeout));
            return;
        }
    };

    let remote_url = match outcome {
        ExtractOutcome::Success(remote_url) => remote_url,
        ExtractOutcome::Error(message) => {
            let err = AcquisitionError::Extraction(message);
            shared.finish(generation, AcquisitionEvent::Failed(err));
            return;
        }
        ExtractOutcome::NotSupported => {
            let err = AcquisitionError::NotSupported;
            shared.finish(generation, AcquisitionEvent::Failed(err));
            return;
        }
    };

    if !shared.apply(generation, AcquisitionEvent::Extracted(remote_url.clone()))
        || !shared.apply(generation, AcquisitionEvent::DownloadStarted)
    {
        return;
    }

    let mut events = ctx.downloader.download(&shared.url, &remote_url);
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            event = events.next() => event,
        };

        match event {
            Some(DownloadEvent::Progress(progress)) => {
                if !shared.apply(generation, AcquisitionEvent::Progress(progress)) {
                    return;
                }
            }
            Some(DownloadEvent::Complete(path)) => {
                if let Err(e) = ctx.cache.store(&shared.url, &path).await {
                    tracing::warn!("Failed to record {} in cache: {}", shared.url, e);
                }
                tracing::info!(path = %path.display(), "video ready");
                shared.finish(generation, AcquisitionEvent::Completed(path));
                return;
            }
            Some(DownloadEvent::Failed(message)) => {
                let err = AcquisitionError::Download(message);
                shared.finish(generation, AcquisitionEvent::Failed(err));
                return;
            }
            None => {
                let err = AcquisitionError::Download("stream ended before completion".into());
                shared.finish(generation, AcquisitionEvent::Failed(err));
                return;
            }
        }
    }
}
