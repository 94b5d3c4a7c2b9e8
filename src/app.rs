use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::cache::VideoCache;
use crate::config::Config;
use crate::db::Repository;
use crate::download::HttpDownloader;
use crate::error::{AppError, Result};
use crate::extract::ResolverClient;
use crate::feed::{FeedEvent, FeedScheduler};
use crate::ledger::{DismissalKey, DismissalLedger};
use crate::models::{AcquisitionState, FeedFilter, FeedItem, Platform};
use crate::pipeline::{AcquisitionStateMachine, PipelineFactory, PipelineMode};

/// What a chat bubble should show for a video link.
#[derive(Debug)]
pub enum LinkView {
    /// Auto-playing surface driven by a foreground pipeline.
    Pipeline(watch::Receiver<AcquisitionState>),
    /// The user opted out of auto-play for this link.
    Preview { url: String, cached: Option<PathBuf> },
}

pub struct App {
    pub repository: Arc<Repository>,
    pub cache: VideoCache,
    pub ledger: DismissalLedger,
    factory: PipelineFactory,
    dwell: Duration,

    // Foreground pipelines of links currently on screen
    pipelines: HashMap<DismissalKey, AcquisitionStateMachine>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path).await?);
        let cache = VideoCache::new(repository.clone());
        let ledger = DismissalLedger::persistent(repository.clone()).await?;

        let extractor = Arc::new(ResolverClient::new(
            config.resolver_url.clone(),
            &config.user_agent,
        )?);
        let downloader = Arc::new(HttpDownloader::new(
            config.cache_dir.clone(),
            &config.user_agent,
        )?);
        let factory = PipelineFactory::new(extractor, downloader, cache, config.fetch_timeout());

        Ok(Self::with_parts(repository, ledger, factory, config.dwell()))
    }

    pub fn with_parts(
        repository: Arc<Repository>,
        ledger: DismissalLedger,
        factory: PipelineFactory,
        dwell: Duration,
    ) -> Self {
        Self {
            repository,
            cache: factory.cache().clone(),
            ledger,
            factory,
            dwell,
            pipelines: HashMap::new(),
        }
    }

    /// Decide how a link in message `message_id` is shown, starting its
    /// pipeline the first time it is rendered.
    pub async fn render_link(&mut self, message_id: i64, url: &str) -> Result<LinkView> {
        let platform = Platform::from_url(url)
            .ok_or_else(|| AppError::UnsupportedLink(url.to_string()))?;

        if self.ledger.is_dismissed(message_id, url) {
            let cached = self.cache.lookup(url).await?;
            return Ok(LinkView::Preview {
                url: url.to_string(),
                cached,
            });
        }

        let key = DismissalKey::new(message_id, url);
        if let Some(machine) = self.pipelines.get(&key) {
            return Ok(LinkView::Pipeline(machine.subscribe()));
        }

        let machine = self.factory.create(url, platform, PipelineMode::Foreground);
        machine.start();
        let rx = machine.subscribe();
        self.pipelines.insert(key, machine);
        Ok(LinkView::Pipeline(rx))
    }

    /// Stop auto-playing a link and remember the choice.
    pub async fn dismiss_link(&mut self, message_id: i64, url: &str) -> Result<()> {
        self.ledger.dismiss(message_id, url).await?;
        if let Some(machine) = self.pipelines.remove(&DismissalKey::new(message_id, url)) {
            machine.cancel();
        }
        tracing::debug!("Dismissed {} in message {}", url, message_id);
        Ok(())
    }

    /// Re-activate a dismissed link.
    pub async fn show_cached(&mut self, message_id: i64, url: &str) -> Result<LinkView> {
        self.ledger.undismiss(message_id, url).await?;
        self.render_link(message_id, url).await
    }

    pub fn retry_link(&self, message_id: i64, url: &str) -> bool {
        self.pipelines
            .get(&DismissalKey::new(message_id, url))
            .is_some_and(|machine| machine.retry())
    }

    /// The link's bubble left the screen; any unfinished work is abandoned.
    pub fn release_link(&mut self, message_id: i64, url: &str) {
        self.pipelines.remove(&DismissalKey::new(message_id, url));
    }

    pub fn active_links(&self) -> usize {
        self.pipelines.len()
    }

    /// Open a full-screen feed over `items`. Viewed flags are loaded from and
    /// written back to the database.
    pub async fn open_feed(
        &self,
        mut items: Vec<FeedItem>,
        filter: FeedFilter,
    ) -> Result<FeedScheduler> {
        for item in &mut items {
            if !item.is_viewed
                && self
                    .repository
                    .is_item_viewed(item.message_id, &item.original_url)
                    .await?
            {
                item.is_viewed = true;
            }
            if item.cached_local_path.is_none() {
                item.cached_local_path = match self.cache.lookup(&item.original_url).await {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!("Cache lookup for {} failed: {}", item.original_url, e);
                        None
                    }
                };
            }
        }

        let scheduler = FeedScheduler::new(self.factory.clone(), self.dwell);
        let mut events = scheduler.subscribe();
        let repository = Arc::clone(&self.repository);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(FeedEvent::Viewed { message_id, url }) => {
                        if let Err(e) = repository.mark_item_viewed(message_id, &url).await {
                            tracing::warn!("Failed to persist view of {}: {}", url, e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Feed event listener skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        scheduler.set_items(items, filter);
        Ok(scheduler)
    }

    pub fn open_externally(&self, url: &str) -> Result<()> {
        open::that(url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::extract::ExtractOutcome;
    use crate::pipeline::testing::{local_path_for, FakeExtractor, Harness};

    const URL: &str = "https://www.instagram.com/reel/Cabc123/";

    async fn app(h: &Harness, dwell: Duration) -> App {
        let repository = Arc::new(Repository::in_memory().await.unwrap());
        App::with_parts(repository, DismissalLedger::new(), h.factory.clone(), dwell)
    }

    fn pipeline(view: LinkView) -> watch::Receiver<AcquisitionState> {
        match view {
            LinkView::Pipeline(rx) => rx,
            LinkView::Preview { .. } => panic!("expected a pipeline"),
        }
    }

    #[tokio::test]
    async fn rendering_twice_shares_one_pipeline() {
        let h = Harness::new(FakeExtractor::succeeding());
        let mut app = app(&h, Duration::from_secs(2)).await;

        let mut first = pipeline(app.render_link(1, URL).await.unwrap());
        let second = pipeline(app.render_link(1, URL).await.unwrap());

        let state = first.wait_for(|s| s.is_playing()).await.unwrap().clone();
        assert_eq!(state, AcquisitionState::Playing(local_path_for(URL)));
        assert_eq!(*second.borrow(), state);
        assert_eq!(h.extractor.calls(), 1);
        assert_eq!(app.active_links(), 1);
    }

    #[tokio::test]
    async fn unsupported_link_is_rejected() {
        let h = Harness::new(FakeExtractor::succeeding());
        let mut app = app(&h, Duration::from_secs(2)).await;

        let err = app.render_link(1, "https://example.com/post/1").await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedLink(_)));
        assert_eq!(app.active_links(), 0);
    }

    #[tokio::test]
    async fn dismissing_cancels_and_shows_preview() {
        let h = Harness::new(FakeExtractor::hanging());
        let mut app = app(&h, Duration::from_secs(2)).await;

        let rx = pipeline(app.render_link(4, URL).await.unwrap());
        app.dismiss_link(4, URL).await.unwrap();
        assert_eq!(*rx.borrow(), AcquisitionState::Dismissed);
        assert!(app.ledger.is_dismissed(4, URL));

        match app.render_link(4, URL).await.unwrap() {
            LinkView::Preview { url, cached } => {
                assert_eq!(url, URL);
                assert_eq!(cached, None);
            }
            LinkView::Pipeline(_) => panic!("dismissed link must not auto-play"),
        }

        // Same link in another message is unaffected
        assert!(matches!(
            app.render_link(5, URL).await.unwrap(),
            LinkView::Pipeline(_)
        ));
    }

    #[tokio::test]
    async fn show_cached_reactivates_a_dismissed_link() {
        let h = Harness::new(FakeExtractor::succeeding());
        h.cache.store(URL, &local_path_for(URL)).await.unwrap();
        let mut app = app(&h, Duration::from_secs(2)).await;

        app.dismiss_link(2, URL).await.unwrap();
        match app.render_link(2, URL).await.unwrap() {
            LinkView::Preview { cached, .. } => assert_eq!(cached, Some(local_path_for(URL))),
            LinkView::Pipeline(_) => panic!("expected a preview"),
        }

        let mut rx = pipeline(app.show_cached(2, URL).await.unwrap());
        let state = rx.wait_for(|s| s.is_playing()).await.unwrap().clone();
        assert_eq!(state, AcquisitionState::Playing(local_path_for(URL)));
        assert!(!app.ledger.is_dismissed(2, URL));
        assert_eq!(h.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn retry_link_restarts_failed_pipeline() {
        let h = Harness::new(FakeExtractor::always(ExtractOutcome::Error("blocked".into())));
        let mut app = app(&h, Duration::from_secs(2)).await;

        assert!(!app.retry_link(3, URL));
        let mut rx = pipeline(app.render_link(3, URL).await.unwrap());
        rx.wait_for(|s| s.is_retryable()).await.unwrap();

        assert!(app.retry_link(3, URL));
        rx.wait_for(|s| s.is_retryable()).await.unwrap();
        assert_eq!(h.extractor.calls(), 2);

        app.release_link(3, URL);
        assert!(!app.retry_link(3, URL));
    }

    struct OfflineStore;

    #[async_trait::async_trait]
    impl crate::cache::CacheStore for OfflineStore {
        async fn get(&self, _url: &str) -> Result<Option<crate::cache::CacheEntry>> {
            Err(AppError::Config("store offline".to_string()))
        }

        async fn insert(&self, _entry: crate::cache::CacheEntry) -> Result<bool> {
            Err(AppError::Config("store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn feed_opens_when_cache_lookups_fail() {
        let h = Harness::new(FakeExtractor::hanging());
        let factory = PipelineFactory::new(
            h.extractor.clone(),
            h.downloader.clone(),
            VideoCache::new(Arc::new(OfflineStore)),
            crate::pipeline::DEFAULT_FETCH_TIMEOUT,
        );
        let repository = Arc::new(Repository::in_memory().await.unwrap());
        let app = App::with_parts(repository, DismissalLedger::new(), factory, Duration::from_secs(2));

        let items = vec![FeedItem::new(1, 9, URL, Platform::Instagram, Utc::now())];
        let feed = app.open_feed(items, FeedFilter::All).await.unwrap();

        assert_eq!(feed.items().len(), 1);
        assert!(!feed.item(URL).unwrap().is_cached());
    }

    #[tokio::test]
    async fn feed_loads_and_persists_viewed_flags() {
        let h = Harness::new(FakeExtractor::hanging());
        let app = app(&h, Duration::from_millis(50)).await;

        let urls: Vec<String> = (0..3)
            .map(|i| format!("https://youtube.com/shorts/clip{}", i))
            .collect();
        app.repository.mark_item_viewed(1, &urls[1]).await.unwrap();
        for url in &urls {
            h.cache.store(url, &local_path_for(url)).await.unwrap();
        }

        let items: Vec<FeedItem> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| FeedItem::new(i as i64, 9, url.clone(), Platform::YouTubeShorts, Utc::now()))
            .collect();
        let feed = app.open_feed(items, FeedFilter::All).await.unwrap();

        assert!(feed.item(&urls[1]).unwrap().is_viewed);
        assert!(feed.item(&urls[0]).unwrap().is_cached());

        feed.on_cursor_changed(0).await;
        let mut persisted = false;
        for _ in 0..100 {
            if app.repository.is_item_viewed(0, &urls[0]).await.unwrap() {
                persisted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(persisted);
        assert_eq!(h.extractor.calls(), 0);
    }
}
