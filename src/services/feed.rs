use crate::{
    error::{AppError, Result},
    models::feed::{Feed, FeedStatus, WebSubSubscription},
    services::Database,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct FeedService {
    db: Arc<Database>,
}

impl FeedService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    /// 订阅 feed, 对 (channel, url) 幂等, 重复订阅返回已有记录
    pub async fn create_feed(&self, channel_id: &str, url: &str) -> Result<Feed> {
        if let Some(existing) = self.get_feed_by_url(channel_id, url).await? {
            debug!("Feed already subscribed in channel {}: {}", channel_id, url);
            return Ok(existing);
        }

        let feed = Feed {
            id: Uuid::new_v4().to_string(),
            channel: channel_id.to_string(),
            url: url.to_string(),
            title: None,
            photo: None,
            // 新订阅从 tier 1 起步, next_fetch_at 置为当下让首轮立即抓取
            tier: 1,
            unmodified: 0,
            next_fetch_at: Some(Utc::now()),
            last_fetched_at: None,
            etag: None,
            last_modified: None,
            status: FeedStatus::Active,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
            item_count: 0,
            websub: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        match self.db.create("feeds", feed).await {
            Ok(created) => {
                info!("Subscribed {} in channel {}", url, channel_id);
                Ok(created)
            }
            // 唯一索引兜底: 并发 follow 时返回先到的记录
            Err(AppError::Database(_)) => self
                .get_feed_by_url(channel_id, url)
                .await?
                .ok_or_else(|| AppError::internal("Feed vanished after duplicate insert")),
            Err(e) => Err(e),
        }
    }

    pub async fn get_feed(&self, feed_id: &str) -> Result<Option<Feed>> {
        self.db.get_by_id("feeds", feed_id).await
    }

    pub async fn get_feed_by_url(&self, channel_id: &str, url: &str) -> Result<Option<Feed>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM feeds WHERE channel = $channel AND url = $url LIMIT 1",
                json!({ "channel": channel_id, "url": url }),
            )
            .await?;
        let feeds: Vec<Feed> = response.take(0)?;
        Ok(feeds.into_iter().next())
    }

    pub async fn list_feeds(&self, channel_id: &str) -> Result<Vec<Feed>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM feeds WHERE channel = $channel ORDER BY created_at ASC",
                json!({ "channel": channel_id }),
            )
            .await?;
        let feeds: Vec<Feed> = response.take(0)?;
        Ok(feeds)
    }

    /// 退订并级联删除该 feed 的条目, 返回被删记录供调用方退订 WebSub
    pub async fn delete_feed(&self, channel_id: &str, url: &str) -> Result<Option<Feed>> {
        let Some(feed) = self.get_feed_by_url(channel_id, url).await? else {
            return Ok(None);
        };

        self.db
            .query_with_params(
                "DELETE items WHERE feed_id = $feed",
                json!({ "feed": feed.id }),
            )
            .await?;
        self.db.delete_by_id("feeds", &feed.id).await?;

        info!("Unsubscribed {} from channel {}", url, channel_id);
        Ok(Some(feed))
    }

    /// 到期待抓取的订阅
    pub async fn get_feeds_to_fetch(&self) -> Result<Vec<Feed>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM feeds WHERE next_fetch_at = NULL OR next_fetch_at = NONE OR next_fetch_at <= $now",
                json!({ "now": Utc::now() }),
            )
            .await?;
        let feeds: Vec<Feed> = response.take(0)?;
        Ok(feeds)
    }

    /// 抓取后持久化轮询元数据; title/photo 只在尚未设置时写入
    #[allow(clippy::too_many_arguments)]
    pub async fn update_feed_after_fetch(
        &self,
        feed: &Feed,
        tier: i64,
        unmodified: i64,
        next_fetch_at: DateTime<Utc>,
        etag: Option<String>,
        last_modified: Option<String>,
        title: Option<String>,
        photo: Option<String>,
    ) -> Result<()> {
        let mut updates = json!({
            "tier": tier,
            "unmodified": unmodified,
            "next_fetch_at": next_fetch_at,
            "last_fetched_at": Utc::now(),
            "updated_at": Utc::now(),
        });

        if let Some(etag) = etag {
            updates["etag"] = json!(etag);
        }
        if let Some(last_modified) = last_modified {
            updates["last_modified"] = json!(last_modified);
        }
        if feed.title.is_none() {
            if let Some(title) = title {
                updates["title"] = json!(title);
            }
        }
        if feed.photo.is_none() {
            if let Some(photo) = photo {
                updates["photo"] = json!(photo);
            }
        }

        let _: Option<Feed> = self.db.update_by_id("feeds", &feed.id, updates).await?;
        Ok(())
    }

    /// 抓取结果落到状态字段: 成功清零错误并刷新条目数, 失败累加错误
    pub async fn update_feed_status(&self, feed_id: &str, error: Option<&str>) -> Result<()> {
        let updates = match error {
            None => {
                let item_count = self.count_items(feed_id).await?;
                json!({
                    "status": FeedStatus::Active,
                    "consecutive_errors": 0,
                    "last_error": null,
                    "last_error_at": null,
                    "item_count": item_count,
                    "updated_at": Utc::now(),
                })
            }
            Some(message) => {
                self.db
                    .query_with_params(
                        "UPDATE type::thing('feeds', $id) SET consecutive_errors += 1",
                        json!({ "id": feed_id }),
                    )
                    .await?;
                json!({
                    "status": FeedStatus::Error,
                    "last_error": message,
                    "last_error_at": Utc::now(),
                    "updated_at": Utc::now(),
                })
            }
        };

        let _: Option<Feed> = self.db.update_by_id("feeds", feed_id, updates).await?;
        Ok(())
    }

    async fn count_items(&self, feed_id: &str) -> Result<i64> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT count() AS count FROM items WHERE feed_id = $feed GROUP ALL",
                json!({ "feed": feed_id }),
            )
            .await?;
        let counts: Vec<serde_json::Value> = response.take(0)?;
        Ok(counts
            .first()
            .and_then(|v| v["count"].as_i64())
            .unwrap_or(0))
    }

    /// 持久化 WebSub 订阅状态 (None 表示清除)
    pub async fn set_websub(
        &self,
        feed_id: &str,
        websub: Option<&WebSubSubscription>,
    ) -> Result<()> {
        let updates = json!({
            "websub": websub,
            "updated_at": Utc::now(),
        });
        let _: Option<Feed> = self.db.update_by_id("feeds", feed_id, updates).await?;
        Ok(())
    }

    /// 租约在 24 小时内到期的订阅, 调度循环末尾续订
    pub async fn websub_renewal_candidates(&self) -> Result<Vec<Feed>> {
        let mut response = self
            .db
            .query("SELECT * FROM feeds WHERE websub != NULL AND websub != NONE")
            .await?;
        let feeds: Vec<Feed> = response.take(0)?;
        let now = Utc::now();
        Ok(feeds
            .into_iter()
            .filter(|f| f.websub_needs_renewal(now))
            .collect())
    }
}
