use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Social platforms whose links can be turned into playable video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "tiktok")]
    TikTok,
    #[serde(rename = "instagram")]
    Instagram,
    #[serde(rename = "youtube_shorts")]
    YouTubeShorts,
    #[serde(rename = "twitter")]
    Twitter,
}

fn instagram_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/(reel|reels|p|tv)/[A-Za-z0-9_-]+").expect("static regex"))
}

fn twitter_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/[A-Za-z0-9_]+/status/\d+").expect("static regex"))
}

impl Platform {
    /// Detect the platform of a shared link. Returns `None` for links that
    /// are not video posts on a supported platform.
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let path = url.path();

        match host {
            "tiktok.com" | "m.tiktok.com" => path.contains("/video/").then_some(Platform::TikTok),
            // Short links resolve server-side, accept any non-empty path
            "vm.tiktok.com" | "vt.tiktok.com" => (path.len() > 1).then_some(Platform::TikTok),
            "instagram.com" => instagram_path()
                .is_match(path)
                .then_some(Platform::Instagram),
            "youtube.com" | "m.youtube.com" => path
                .starts_with("/shorts/")
                .then_some(Platform::YouTubeShorts),
            "twitter.com" | "x.com" | "mobile.twitter.com" => {
                twitter_path().is_match(path).then_some(Platform::Twitter)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::YouTubeShorts => "youtube_shorts",
            Platform::Twitter => "twitter",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One social video link encountered in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub message_id: i64,
    pub chat_id: i64,
    pub original_url: String,
    pub platform: Platform,
    /// Present once a completed download exists; the item is then playable
    /// without running extraction again.
    pub cached_local_path: Option<PathBuf>,
    pub is_viewed: bool,
    pub sent_at: DateTime<Utc>,

    // Passed through untouched
    #[serde(default)]
    pub reactions: HashMap<String, u32>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub current_reaction: Option<String>,
}

impl FeedItem {
    pub fn new(
        message_id: i64,
        chat_id: i64,
        original_url: impl Into<String>,
        platform: Platform,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            chat_id,
            original_url: original_url.into(),
            platform,
            cached_local_path: None,
            is_viewed: false,
            sent_at,
            reactions: HashMap::new(),
            reply_count: 0,
            current_reaction: None,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached_local_path.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedFilter {
    #[default]
    All,
    Unwatched,
    Watched,
}

impl FeedFilter {
    pub fn matches(&self, item: &FeedItem) -> bool {
        match self {
            FeedFilter::All => true,
            FeedFilter::Unwatched => !item.is_viewed,
            FeedFilter::Watched => item.is_viewed,
        }
    }

    pub fn cycle(&self) -> Self {
        match self {
            FeedFilter::All => FeedFilter::Unwatched,
            FeedFilter::Unwatched => FeedFilter::Watched,
            FeedFilter::Watched => FeedFilter::All,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedFilter::All => "All",
            FeedFilter::Unwatched => "Unwatched",
            FeedFilter::Watched => "Watched",
        }
    }
}
