use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{AcquisitionState, FeedFilter, FeedItem};
use crate::pipeline::{AcquisitionStateMachine, PipelineFactory, PipelineMode};

pub const DEFAULT_DWELL: Duration = Duration::from_secs(2);

/// Signals for the host, e.g. to persist viewed flags.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    CursorMoved { index: usize, url: String },
    PrefetchStarted { url: String },
    PrefetchCancelled { url: String },
    Cached { url: String, path: PathBuf },
    Viewed { message_id: i64, url: String },
}

struct Dwell {
    url: String,
    token: CancellationToken,
}

struct Prefetch {
    machine: AcquisitionStateMachine,
    watcher: JoinHandle<()>,
}

impl Prefetch {
    fn cancel(self) {
        self.machine.cancel();
        self.watcher.abort();
    }
}

#[derive(Default)]
struct FeedState {
    items: Vec<FeedItem>,
    filter: FeedFilter,
    /// Positions in `items` that passed the filter when it was last applied.
    visible: Vec<usize>,
    cursor: usize,
    /// Bumped on every cursor or list change; work started for an older
    /// value is stale.
    generation: u64,
    dwell: Option<Dwell>,
    prefetch: HashMap<String, Prefetch>,
    disposed: bool,
}

impl FeedState {
    fn current(&self) -> Option<&FeedItem> {
        self.visible.get(self.cursor).map(|&i| &self.items[i])
    }

    fn current_url(&self) -> Option<&str> {
        self.current().map(|item| item.original_url.as_str())
    }

    fn item_mut(&mut self, url: &str) -> Option<&mut FeedItem> {
        self.items.iter_mut().find(|item| item.original_url == url)
    }

    /// Links at the positions directly before and after the cursor.
    fn neighbor_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(2);
        if self.cursor > 0 {
            if let Some(&i) = self.visible.get(self.cursor - 1) {
                urls.push(self.items[i].original_url.clone());
            }
        }
        if let Some(&i) = self.visible.get(self.cursor + 1) {
            urls.push(self.items[i].original_url.clone());
        }
        urls
    }

    fn refilter(&mut self) {
        let filter = self.filter;
        self.visible = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| filter.matches(item))
            .map(|(i, _)| i)
            .collect();
    }

    fn cancel_dwell(&mut self) {
        if let Some(dwell) = self.dwell.take() {
            dwell.token.cancel();
        }
    }

    /// Cancel scheduler pipelines whose link is not in `keep`.
    fn retain_prefetch(&mut self, keep: &[String], events: &broadcast::Sender<FeedEvent>) {
        let stale: Vec<String> = self
            .prefetch
            .keys()
            .filter(|url| !keep.contains(url))
            .cloned()
            .collect();
        for url in stale {
            if let Some(prefetch) = self.prefetch.remove(&url) {
                tracing::debug!("Cancelling prefetch of {}", url);
                prefetch.cancel();
                let _ = events.send(FeedEvent::PrefetchCancelled { url });
            }
        }
    }
}

fn clamp_cursor(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

struct Inner {
    factory: PipelineFactory,
    dwell: Duration,
    events: broadcast::Sender<FeedEvent>,
    state: Mutex<FeedState>,
}

/// Drives prefetch and view tracking for a vertical feed of video links.
///
/// Only the items directly before and after the cursor are prefetched, so at
/// most two scheduler pipelines run at once. An item counts as viewed once it
/// is cached and the cursor stays on it for the dwell time.
pub struct FeedScheduler {
    inner: Arc<Inner>,
}

impl FeedScheduler {
    pub fn new(factory: PipelineFactory, dwell: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                factory,
                dwell,
                events,
                state: Mutex::new(FeedState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the working list. Returns the clamped cursor position; the
    /// host reports it back through [`on_cursor_changed`](Self::on_cursor_changed)
    /// once the page settles.
    pub fn set_items(&self, items: Vec<FeedItem>, filter: FeedFilter) -> usize {
        let mut st = self.inner.state.lock();
        let previous = st.current_url().map(str::to_string);
        st.items = items;
        st.filter = filter;
        self.inner.reposition(&mut st, previous)
    }

    /// Re-apply a different filter to the current items.
    pub fn set_filter(&self, filter: FeedFilter) -> usize {
        let mut st = self.inner.state.lock();
        let previous = st.current_url().map(str::to_string);
        st.filter = filter;
        self.inner.reposition(&mut st, previous)
    }

    /// The visible page settled on `new_index`: restart view tracking for it
    /// and prefetch its neighbors.
    pub async fn on_cursor_changed(&self, new_index: usize) {
        let (generation, current, neighbors) = {
            let mut st = self.inner.state.lock();
            if st.disposed {
                return;
            }
            st.cursor = clamp_cursor(new_index, st.visible.len());
            st.generation += 1;
            st.cancel_dwell();

            let neighbors = st.neighbor_urls();
            st.retain_prefetch(&neighbors, &self.inner.events);

            let Some(current) = st.current().cloned() else {
                return;
            };
            let _ = self.inner.events.send(FeedEvent::CursorMoved {
                index: st.cursor,
                url: current.original_url.clone(),
            });
            let neighbors: Vec<FeedItem> = neighbors
                .iter()
                .filter_map(|url| st.items.iter().find(|i| &i.original_url == url).cloned())
                .collect();
            (st.generation, current, neighbors)
        };

        let current_path = self.inner.cached_path(&current).await;
        let mut to_prefetch = Vec::new();
        for item in neighbors {
            if self.inner.cached_path(&item).await.is_none() {
                to_prefetch.push(item);
            }
        }

        let mut st = self.inner.state.lock();
        if st.disposed || st.generation != generation {
            // A newer cursor move owns the feed now
            return;
        }

        if let Some(path) = current_path {
            let unviewed = st
                .item_mut(&current.original_url)
                .map(|item| {
                    item.cached_local_path.get_or_insert(path);
                    !item.is_viewed
                })
                .unwrap_or(false);
            if unviewed {
                self.inner.start_dwell(&mut st, current.original_url.clone());
            }
        }

        for item in to_prefetch {
            self.inner.start_prefetch(&mut st, &item);
        }
    }

    /// Record that a completed download exists for `url`. Starts view
    /// tracking when it is the current, unviewed item.
    pub fn mark_cached(&self, url: &str, path: PathBuf) {
        self.inner.record_cached(url, path);
    }

    /// Cancel every scheduler pipeline and the pending dwell timer.
    pub fn dispose(&self) {
        let mut st = self.inner.state.lock();
        if st.disposed {
            return;
        }
        st.disposed = true;
        st.generation += 1;
        st.cancel_dwell();
        st.retain_prefetch(&[], &self.inner.events);
        tracing::debug!("Feed scheduler disposed");
    }

    pub fn filter(&self) -> FeedFilter {
        self.inner.state.lock().filter
    }

    pub fn current_index(&self) -> usize {
        self.inner.state.lock().cursor
    }

    pub fn current_item(&self) -> Option<FeedItem> {
        self.inner.state.lock().current().cloned()
    }

    /// Items that passed the filter, in feed order.
    pub fn items(&self) -> Vec<FeedItem> {
        let st = self.inner.state.lock();
        st.visible.iter().map(|&i| st.items[i].clone()).collect()
    }

    /// Look up any item, visible or not.
    pub fn item(&self, url: &str) -> Option<FeedItem> {
        let st = self.inner.state.lock();
        st.items.iter().find(|i| i.original_url == url).cloned()
    }

    /// Links of scheduler pipelines with a run still in flight.
    pub fn active_prefetches(&self) -> Vec<String> {
        let st = self.inner.state.lock();
        let mut urls: Vec<String> = st
            .prefetch
            .iter()
            .filter(|(_, p)| {
                let state = p.machine.state();
                state.is_running() || state == AcquisitionState::Idle
            })
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }
}

impl Drop for FeedScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn reposition(&self, st: &mut FeedState, previous: Option<String>) -> usize {
        st.refilter();

        // Stay on the same item when it survived the change
        let kept = previous.as_deref().and_then(|url| {
            st.visible
                .iter()
                .position(|&i| st.items[i].original_url == url)
        });
        let fallback = clamp_cursor(st.cursor, st.visible.len());
        st.cursor = kept.unwrap_or(fallback);

        if kept.is_none() {
            st.generation += 1;
        }
        let dwell_on_current = match (&st.dwell, st.current_url()) {
            (Some(dwell), Some(url)) => dwell.url == url,
            _ => false,
        };
        if !dwell_on_current {
            st.cancel_dwell();
        }

        let neighbors = st.neighbor_urls();
        st.retain_prefetch(&neighbors, &self.events);
        st.cursor
    }

    async fn cached_path(&self, item: &FeedItem) -> Option<PathBuf> {
        if let Some(path) = &item.cached_local_path {
            return Some(path.clone());
        }
        match self.factory.cache().lookup(&item.original_url).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed: {}", item.original_url, e);
                None
            }
        }
    }

    fn start_dwell(self: &Arc<Self>, st: &mut FeedState, url: String) {
        st.cancel_dwell();
        let token = CancellationToken::new();
        st.dwell = Some(Dwell {
            url: url.clone(),
            token: token.clone(),
        });

        let generation = st.generation;
        let dwell = self.dwell;
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(dwell) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.complete_dwell(generation, &url);
                    }
                }
            }
        });
    }

    fn complete_dwell(&self, generation: u64, url: &str) {
        let mut st = self.state.lock();
        if st.generation != generation || st.current_url() != Some(url) {
            return;
        }
        st.dwell = None;

        let Some(item) = st.item_mut(url) else {
            return;
        };
        if item.is_viewed {
            return;
        }
        item.is_viewed = true;
        let message_id = item.message_id;
        tracing::info!("Marked {} as viewed", url);
        let _ = self.events.send(FeedEvent::Viewed {
            message_id,
            url: url.to_string(),
        });
    }

    fn start_prefetch(self: &Arc<Self>, st: &mut FeedState, item: &FeedItem) {
        let url = item.original_url.clone();
        if st.prefetch.contains_key(&url) {
            return;
        }

        let machine = self
            .factory
            .create(url.clone(), item.platform, PipelineMode::Background);
        let watcher = spawn_watcher(Arc::downgrade(self), url.clone(), &machine);
        machine.start();
        tracing::debug!("Prefetching {}", url);

        st.prefetch.insert(url.clone(), Prefetch { machine, watcher });
        let _ = self.events.send(FeedEvent::PrefetchStarted { url });
    }

    /// Let a later cursor move try a failed prefetch again.
    fn forget_failed(&self, url: &str) {
        let mut st = self.state.lock();
        if st
            .prefetch
            .get(url)
            .is_some_and(|p| p.machine.state().is_retryable())
        {
            st.prefetch.remove(url);
        }
    }

    fn record_cached(self: &Arc<Self>, url: &str, path: PathBuf) {
        let mut st = self.state.lock();
        if st.disposed {
            return;
        }

        // A finished prefetch has nothing left to cancel
        if st
            .prefetch
            .get(url)
            .is_some_and(|p| p.machine.state().is_playing())
        {
            st.prefetch.remove(url);
        }

        let Some(item) = st.item_mut(url) else {
            return;
        };
        item.cached_local_path.get_or_insert(path.clone());
        let viewed = item.is_viewed;
        let _ = self.events.send(FeedEvent::Cached {
            url: url.to_string(),
            path,
        });

        let dwelling = st.dwell.as_ref().is_some_and(|d| d.url == url);
        if !viewed && !dwelling && st.current_url() == Some(url) {
            self.start_dwell(&mut st, url.to_string());
        }
    }
}

/// Feed completion of a background pipeline back into the item list.
fn spawn_watcher(
    inner: Weak<Inner>,
    url: String,
    machine: &AcquisitionStateMachine,
) -> JoinHandle<()> {
    let mut rx = machine.subscribe();
    tokio::spawn(async move {
        let settled = rx
            .wait_for(|s| !s.is_running() && *s != AcquisitionState::Idle)
            .await
            .map(|s| s.clone());
        match settled {
            Ok(AcquisitionState::Playing(path)) => {
                if let Some(inner) = inner.upgrade() {
                    inner.record_cached(&url, path);
                }
            }
            Ok(state) => {
                tracing::debug!("Prefetch of {} ended in {:?}", url, state);
                if state.is_retryable() {
                    if let Some(inner) = inner.upgrade() {
                        inner.forget_failed(&url);
                    }
                }
            }
            Err(_) => {}
        }
    })
}
