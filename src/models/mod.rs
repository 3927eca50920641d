pub mod channel;
pub mod feed;
pub mod filter;
pub mod item;
pub mod notification;

// 重新导出常用类型
pub use channel::{Channel, NOTIFICATIONS_UID};
pub use feed::{Feed, FeedStatus, WebSubSubscription};
pub use filter::{Block, Mute};
pub use item::{Author, Item, ItemContent, ItemSource, NormalizedItem};
pub use notification::{MentionType, Notification};
