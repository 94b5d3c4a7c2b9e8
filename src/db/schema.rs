pub const SCHEMA: &str = r#"
-- video_cache table (write-once per url)
CREATE TABLE IF NOT EXISTS video_cache (
    url TEXT PRIMARY KEY NOT NULL,
    local_path TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- dismissals table (links shown as plain previews instead of auto-playing)
CREATE TABLE IF NOT EXISTS dismissals (
    message_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    dismissed_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (message_id, url)
);

-- viewed_items table (dwell-based view tracking)
CREATE TABLE IF NOT EXISTS viewed_items (
    message_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    viewed_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (message_id, url)
);
"#;
