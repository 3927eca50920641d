use crate::{
    error::Result,
    models::channel::Channel,
    models::feed::Feed,
    models::item::NormalizedItem,
    services::{
        channel::{passes_regex_filter, passes_type_filter},
        fetch::FetchOutcome,
        parser, scheduler, ChannelService, FeedService, FetchService, ItemService,
        RealtimeService, WebSubService,
    },
};
use chrono::Utc;
use tracing::{debug, info, warn};

/// 抓取 → 解析 → 过滤 → 入库的粘合层
#[derive(Clone)]
pub struct ProcessorService {
    channel_service: ChannelService,
    feed_service: FeedService,
    item_service: ItemService,
    fetch_service: FetchService,
    websub_service: WebSubService,
    realtime_service: RealtimeService,
}

impl ProcessorService {
    pub fn new(
        channel_service: ChannelService,
        feed_service: FeedService,
        item_service: ItemService,
        fetch_service: FetchService,
        websub_service: WebSubService,
        realtime_service: RealtimeService,
    ) -> Self {
        Self {
            channel_service,
            feed_service,
            item_service,
            fetch_service,
            websub_service,
            realtime_service,
        }
    }

    /// 调度器为每个到期订阅调用一次
    pub async fn process_feed(&self, feed: &Feed) -> Result<()> {
        debug!("Processing feed {} (tier {})", feed.url, feed.tier);

        let outcome = match self
            .fetch_service
            .fetch(&feed.url, feed.etag.as_deref(), feed.last_modified.as_deref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return self.back_off(feed, &e.to_string()).await;
            }
        };

        match outcome {
            FetchOutcome::NotModified => {
                // 304 等同于无新条目的成功抓取
                let update =
                    scheduler::calculate_new_tier(feed.tier, feed.unmodified, false, false);
                self.persist_poll_result(feed, update, None, None, None, None).await?;
                self.feed_service.update_feed_status(&feed.id, None).await?;
            }
            FetchOutcome::Content {
                content_type,
                body,
                etag,
                last_modified,
                hub,
                self_url,
            } => {
                let kind = parser::detect_feed_kind(&body, content_type.as_deref());
                let parsed = match parser::parse_feed(kind, &body, &feed.url) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        return self.back_off(feed, &e.to_string()).await;
                    }
                };

                let new_items = self.ingest(feed, &parsed.items).await?;
                if new_items > 0 {
                    info!("{} new items from {}", new_items, feed.url);
                }

                let update = scheduler::calculate_new_tier(
                    feed.tier,
                    feed.unmodified,
                    new_items > 0,
                    false,
                );
                self.persist_poll_result(
                    feed,
                    update,
                    etag,
                    last_modified,
                    parsed.meta.title.clone(),
                    parsed.meta.photo.clone(),
                )
                .await?;
                self.feed_service.update_feed_status(&feed.id, None).await?;

                // meta 里宣告的 hub 优先于 Link 头
                let hub = parsed.meta.hub.or(hub);
                let topic = parsed
                    .meta
                    .self_url
                    .or(self_url)
                    .unwrap_or_else(|| feed.url.clone());
                if let Some(hub) = hub {
                    self.maybe_subscribe(feed, &hub, &topic).await;
                }
            }
        }

        Ok(())
    }

    /// hub 推送的内容直接进入解析-入库流水线, 不触碰轮询层级
    pub async fn process_pushed_content(
        &self,
        feed: &Feed,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<usize> {
        let kind = parser::detect_feed_kind(body, content_type);
        let parsed = parser::parse_feed(kind, body, &feed.url)?;

        let new_items = self.ingest(feed, &parsed.items).await?;
        if new_items > 0 {
            info!("{} new items pushed for {}", new_items, feed.url);
        }

        let topic = parsed.meta.self_url.unwrap_or_else(|| feed.url.clone());
        if let Some(hub) = parsed.meta.hub {
            self.maybe_subscribe(feed, &hub, &topic).await;
        }

        Ok(new_items)
    }

    /// 解析失败或抓取失败: 记录错误并额外上调一级退避
    async fn back_off(&self, feed: &Feed, message: &str) -> Result<()> {
        warn!("Feed {} errored: {}", feed.url, message);
        self.feed_service
            .update_feed_status(&feed.id, Some(message))
            .await?;

        let update = scheduler::calculate_new_tier(feed.tier, feed.unmodified, false, true);
        self.persist_poll_result(feed, update, None, None, None, None).await
    }

    async fn persist_poll_result(
        &self,
        feed: &Feed,
        update: scheduler::TierUpdate,
        etag: Option<String>,
        last_modified: Option<String>,
        title: Option<String>,
        photo: Option<String>,
    ) -> Result<()> {
        self.feed_service
            .update_feed_after_fetch(
                feed,
                update.tier,
                update.unmodified,
                scheduler::next_fetch_at(update.tier, Utc::now()),
                etag,
                last_modified,
                title,
                photo,
            )
            .await
    }

    /// 过滤并写入条目, 返回真正新建的数量
    async fn ingest(&self, feed: &Feed, items: &[NormalizedItem]) -> Result<usize> {
        let Some(channel) = self.channel_service.get_channel_by_id(&feed.channel).await? else {
            warn!("Feed {} has no owning channel, skipping", feed.url);
            return Ok(0);
        };

        let muted = self
            .channel_service
            .muted_urls(&channel.owner, &channel.id)
            .await?;
        if muted.iter().any(|m| m == &feed.url) {
            debug!("Feed {} is muted for {}", feed.url, channel.owner);
            return Ok(0);
        }
        let blocked = self.channel_service.blocked_urls(&channel.owner).await?;

        let mut new_count = 0;
        for item in items {
            if !self.passes_filters(&channel, item, &blocked) {
                continue;
            }
            if self.item_service.add_item(&channel, Some(feed), item).await? {
                new_count += 1;
            }
        }

        if new_count > 0 {
            self.realtime_service
                .publish_new_items(&channel.owner, &channel.uid, new_count);
        }

        Ok(new_count)
    }

    fn passes_filters(&self, channel: &Channel, item: &NormalizedItem, blocked: &[String]) -> bool {
        if !passes_type_filter(channel, item) {
            return false;
        }
        if !passes_regex_filter(channel, item) {
            return false;
        }
        if let Some(author_url) = item.author.as_ref().and_then(|a| a.url.as_ref()) {
            if blocked.iter().any(|b| b == author_url) {
                return false;
            }
        }
        true
    }

    /// 发现新 hub 且与已存不同时发起订阅
    async fn maybe_subscribe(&self, feed: &Feed, hub: &str, topic: &str) {
        let changed = match &feed.websub {
            Some(sub) => sub.hub != hub,
            None => true,
        };
        if !changed {
            return;
        }

        info!("Discovered WebSub hub {} for {}", hub, feed.url);
        if let Err(e) = self.websub_service.subscribe(feed, hub, topic).await {
            warn!("WebSub subscribe failed for {}: {}", feed.url, e);
        }
    }
}
