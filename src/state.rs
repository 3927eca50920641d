use crate::{
    config::Config,
    services::{
        channel::ChannelService,
        database::Database,
        discovery::DiscoveryService,
        feed::FeedService,
        fetch::FetchService,
        item::ItemService,
        processor::ProcessorService,
        realtime::RealtimeService,
        scheduler::SchedulerService,
        webmention::WebmentionService,
        websub::WebSubService,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 数据库连接
    pub db: Database,

    /// 频道与过滤服务
    pub channel_service: ChannelService,

    /// 订阅服务
    pub feed_service: FeedService,

    /// 条目存储服务
    pub item_service: ItemService,

    /// HTTP 抓取服务
    pub fetch_service: FetchService,

    /// 抓取-解析-入库流水线
    pub processor_service: ProcessorService,

    /// 轮询调度服务
    pub scheduler_service: SchedulerService,

    /// WebSub 订阅服务
    pub websub_service: WebSubService,

    /// Webmention 验证服务
    pub webmention_service: WebmentionService,

    /// feed 发现与预览服务
    pub discovery_service: DiscoveryService,

    /// 事件扇出服务
    pub realtime_service: RealtimeService,
}

impl AppState {
    /// 检查是否为生产环境
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }

    /// 检查是否为开发环境
    pub fn is_development(&self) -> bool {
        self.config.is_development()
    }
}
