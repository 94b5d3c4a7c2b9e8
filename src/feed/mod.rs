mod scheduler;

pub use scheduler::{FeedEvent, FeedScheduler, DEFAULT_DWELL};
