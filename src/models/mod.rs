mod acquisition;
mod feed_item;

pub use acquisition::{AcquisitionEvent, AcquisitionState};
pub use feed_item::{FeedFilter, FeedItem, Platform};
