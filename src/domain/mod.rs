pub mod feed;
pub mod item;
pub mod schedule;

pub use feed::FeedConfig;
pub use item::Item;
pub use schedule::{CacheValidators, ScheduleState};
