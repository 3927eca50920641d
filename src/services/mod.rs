pub mod channel;
pub mod database;
pub mod discovery;
pub mod feed;
pub mod fetch;
pub mod item;
pub mod parser;
pub mod processor;
pub mod realtime;
pub mod scheduler;
pub mod webmention;
pub mod websub;

// 重新导出常用类型
pub use channel::ChannelService;
pub use database::Database;
pub use discovery::DiscoveryService;
pub use feed::FeedService;
pub use fetch::FetchService;
pub use item::ItemService;
pub use processor::ProcessorService;
pub use realtime::RealtimeService;
pub use scheduler::SchedulerService;
pub use webmention::WebmentionService;
pub use websub::WebSubService;
