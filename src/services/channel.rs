use crate::{
    error::{AppError, Result},
    models::channel::*,
    models::filter::{Block, Mute},
    models::item::NormalizedItem,
    services::Database,
    utils::shortid,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 短标识生成冲突时的重试上限
const SHORT_ID_RETRIES: usize = 5;

/// 用户提交的排除正则长度上限, 防御性截断
const MAX_FILTER_PATTERN_LEN: usize = 512;

#[derive(Clone)]
pub struct ChannelService {
    db: Arc<Database>,
}

impl ChannelService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    /// 创建频道, 外部短标识随机生成, 冲突时重试
    pub async fn create_channel(&self, owner: &str, name: &str) -> Result<Channel> {
        debug!("Creating channel '{}' for {}", name, owner);

        if name.is_empty() || name.len() > 100 {
            return Err(AppError::validation("Channel name must be 1-100 characters"));
        }

        let next_order = self
            .list_channels(owner)
            .await?
            .iter()
            .map(|c| c.sort_order)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);

        for attempt in 0..SHORT_ID_RETRIES {
            let uid = shortid::generate(8);

            if self.get_channel_by_uid(owner, &uid).await?.is_some() {
                warn!("Channel uid collision on attempt {}: {}", attempt, uid);
                continue;
            }

            let channel = Channel {
                id: Uuid::new_v4().to_string(),
                uid,
                owner: owner.to_string(),
                name: name.to_string(),
                sort_order: next_order,
                exclude_types: Vec::new(),
                exclude_regex: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };

            match self.db.create("channels", channel).await {
                Ok(created) => {
                    info!("Created channel {} ({}) for {}", created.name, created.uid, owner);
                    return Ok(created);
                }
                Err(AppError::Database(e)) if attempt + 1 < SHORT_ID_RETRIES => {
                    // 唯一索引兜底, 并发冲突时换一个短标识再试
                    warn!("Channel create failed on attempt {}: {}", attempt, e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::internal("Could not allocate a unique channel uid"))
    }

    /// 通知频道按需创建, 固定排序 -1, 不可删除
    pub async fn ensure_notifications_channel(&self, owner: &str) -> Result<Channel> {
        if let Some(channel) = self.get_channel_by_uid(owner, NOTIFICATIONS_UID).await? {
            return Ok(channel);
        }

        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            uid: NOTIFICATIONS_UID.to_string(),
            owner: owner.to_string(),
            name: "Notifications".to_string(),
            sort_order: -1,
            exclude_types: Vec::new(),
            exclude_regex: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        match self.db.create("channels", channel).await {
            Ok(created) => {
                info!("Created notifications channel for {}", owner);
                Ok(created)
            }
            // 并发请求同时创建时, 唯一索引会拦下后到的一方
            Err(AppError::Database(_)) => self
                .get_channel_by_uid(owner, NOTIFICATIONS_UID)
                .await?
                .ok_or_else(|| AppError::internal("Notifications channel vanished")),
            Err(e) => Err(e),
        }
    }

    pub async fn list_channels(&self, owner: &str) -> Result<Vec<Channel>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM channels WHERE owner = $owner ORDER BY sort_order ASC",
                json!({ "owner": owner }),
            )
            .await?;
        let channels: Vec<Channel> = response.take(0)?;
        Ok(channels)
    }

    pub async fn get_channel_by_uid(&self, owner: &str, uid: &str) -> Result<Option<Channel>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM channels WHERE owner = $owner AND uid = $uid LIMIT 1",
                json!({ "owner": owner, "uid": uid }),
            )
            .await?;
        let channels: Vec<Channel> = response.take(0)?;
        Ok(channels.into_iter().next())
    }

    pub async fn get_channel_by_id(&self, channel_id: &str) -> Result<Option<Channel>> {
        self.db.get_by_id("channels", channel_id).await
    }

    /// 按外部短标识解析频道, "notifications" 按需创建
    pub async fn resolve_channel(&self, owner: &str, uid: &str) -> Result<Channel> {
        if uid == NOTIFICATIONS_UID {
            return self.ensure_notifications_channel(owner).await;
        }
        self.get_channel_by_uid(owner, uid)
            .await?
            .ok_or_else(|| AppError::not_found("Channel"))
    }

    pub async fn update_channel(
        &self,
        owner: &str,
        uid: &str,
        request: UpdateChannelRequest,
    ) -> Result<Channel> {
        let channel = self
            .get_channel_by_uid(owner, uid)
            .await?
            .ok_or_else(|| AppError::not_found("Channel"))?;

        let mut updates = json!({ "updated_at": Utc::now() });

        if let Some(name) = request.name {
            if name.is_empty() || name.len() > 100 {
                return Err(AppError::validation("Channel name must be 1-100 characters"));
            }
            updates["name"] = json!(name);
        }
        if let Some(exclude_types) = request.exclude_types {
            updates["exclude_types"] = json!(exclude_types);
        }
        if let Some(exclude_regex) = request.exclude_regex {
            if exclude_regex.len() > MAX_FILTER_PATTERN_LEN {
                return Err(AppError::validation("Filter pattern is too long"));
            }
            updates["exclude_regex"] = if exclude_regex.is_empty() {
                json!(null)
            } else {
                json!(exclude_regex)
            };
        }

        self.db
            .update_by_id("channels", &channel.id, updates)
            .await?
            .ok_or_else(|| AppError::not_found("Channel"))
    }

    /// 删除频道并级联清理, 返回被删除的 feed 记录供调用方退订 WebSub
    pub async fn delete_channel(
        &self,
        owner: &str,
        uid: &str,
    ) -> Result<Vec<crate::models::feed::Feed>> {
        if uid == NOTIFICATIONS_UID {
            return Err(AppError::validation("The notifications channel cannot be deleted"));
        }

        let channel = self
            .get_channel_by_uid(owner, uid)
            .await?
            .ok_or_else(|| AppError::not_found("Channel"))?;

        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM feeds WHERE channel = $channel",
                json!({ "channel": channel.id }),
            )
            .await?;
        let feeds: Vec<crate::models::feed::Feed> = response.take(0)?;

        // 先删 feed 再删条目, 最后移除频道本身
        self.db
            .query_with_params(
                "DELETE feeds WHERE channel = $channel",
                json!({ "channel": channel.id }),
            )
            .await?;
        self.db
            .query_with_params(
                "DELETE items WHERE channel = $channel",
                json!({ "channel": channel.id }),
            )
            .await?;
        self.db.delete_by_id("channels", &channel.id).await?;

        info!("Deleted channel {} ({}) for {}", channel.name, uid, owner);
        Ok(feeds)
    }

    /// 按传入顺序重排频道, 通知频道保持 -1 不动
    pub async fn reorder_channels(&self, owner: &str, uids: &[String]) -> Result<()> {
        let mut order: i64 = 0;
        for uid in uids {
            if uid == NOTIFICATIONS_UID {
                continue;
            }
            if let Some(channel) = self.get_channel_by_uid(owner, uid).await? {
                let _: Option<Channel> = self
                    .db
                    .update_by_id(
                        "channels",
                        &channel.id,
                        json!({ "sort_order": order, "updated_at": Utc::now() }),
                    )
                    .await?;
                order += 1;
            }
        }
        Ok(())
    }

    // ==================== 静音 / 拉黑 ====================

    pub async fn mute(&self, owner: &str, channel_id: Option<&str>, url: &str) -> Result<()> {
        let existing = self.find_mute(owner, channel_id, url).await?;
        if existing.is_some() {
            // 幂等: 重复静音不是错误
            return Ok(());
        }

        let mute = Mute {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            url: url.to_string(),
            channel: channel_id.map(String::from),
            created_at: Utc::now(),
        };
        self.db.create("muted", mute).await?;
        Ok(())
    }

    pub async fn unmute(&self, owner: &str, channel_id: Option<&str>, url: &str) -> Result<()> {
        if let Some(mute) = self.find_mute(owner, channel_id, url).await? {
            self.db.delete_by_id("muted", &mute.id).await?;
        }
        Ok(())
    }

    async fn find_mute(
        &self,
        owner: &str,
        channel_id: Option<&str>,
        url: &str,
    ) -> Result<Option<Mute>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM muted WHERE owner = $owner AND url = $url AND channel = $channel LIMIT 1",
                json!({ "owner": owner, "url": url, "channel": channel_id }),
            )
            .await?;
        let mutes: Vec<Mute> = response.take(0)?;
        Ok(mutes.into_iter().next())
    }

    /// 某个频道生效的静音地址集合 (全局 + 频道内)
    pub async fn muted_urls(&self, owner: &str, channel_id: &str) -> Result<Vec<String>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM muted WHERE owner = $owner AND (channel = NULL OR channel = NONE OR channel = $channel)",
                json!({ "owner": owner, "channel": channel_id }),
            )
            .await?;
        let mutes: Vec<Mute> = response.take(0)?;
        Ok(mutes.into_iter().map(|m| m.url).collect())
    }

    pub async fn block(&self, owner: &str, url: &str) -> Result<()> {
        let existing: Option<Block> = self.find_block(owner, url).await?;
        if existing.is_some() {
            return Ok(());
        }

        let block = Block {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
        };
        match self.db.create("blocked", block).await {
            Ok(_) => Ok(()),
            // 唯一索引兜底
            Err(AppError::Database(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn unblock(&self, owner: &str, url: &str) -> Result<()> {
        if let Some(block) = self.find_block(owner, url).await? {
            self.db.delete_by_id("blocked", &block.id).await?;
        }
        Ok(())
    }

    async fn find_block(&self, owner: &str, url: &str) -> Result<Option<Block>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM blocked WHERE owner = $owner AND url = $url LIMIT 1",
                json!({ "owner": owner, "url": url }),
            )
            .await?;
        let blocks: Vec<Block> = response.take(0)?;
        Ok(blocks.into_iter().next())
    }

    pub async fn blocked_urls(&self, owner: &str) -> Result<Vec<String>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT * FROM blocked WHERE owner = $owner",
                json!({ "owner": owner }),
            )
            .await?;
        let blocks: Vec<Block> = response.take(0)?;
        Ok(blocks.into_iter().map(|b| b.url).collect())
    }
}

// ==================== 过滤谓词 ====================
// 过滤发生在入库边界, 时间线查询不再过滤

/// 互动类型过滤: 命中 exclude_types 的条目被丢弃
pub fn passes_type_filter(channel: &Channel, item: &NormalizedItem) -> bool {
    if channel.exclude_types.is_empty() {
        return true;
    }
    let kind = item.interaction_kind();
    !channel.exclude_types.iter().any(|t| t == kind)
}

/// 排除正则过滤: 大小写不敏感, 无效的模式直接放行
pub fn passes_regex_filter(channel: &Channel, item: &NormalizedItem) -> bool {
    let Some(pattern) = &channel.exclude_regex else {
        return true;
    };
    if pattern.is_empty() || pattern.len() > MAX_FILTER_PATTERN_LEN {
        return true;
    }

    match regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => !re.is_match(&item.filter_text()),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::ItemContent;

    fn channel_with(exclude_types: Vec<&str>, exclude_regex: Option<&str>) -> Channel {
        Channel {
            id: "chan1".to_string(),
            uid: "abcd1234".to_string(),
            owner: "https://me.example/".to_string(),
            name: "Test".to_string(),
            sort_order: 0,
            exclude_types: exclude_types.into_iter().map(String::from).collect(),
            exclude_regex: exclude_regex.map(String::from),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_type_filter() {
        let channel = channel_with(vec!["like", "repost"], None);

        let mut item = NormalizedItem {
            item_type: "entry".to_string(),
            ..Default::default()
        };
        assert!(passes_type_filter(&channel, &item));

        item.like_of = vec!["https://example.org/1".to_string()];
        assert!(!passes_type_filter(&channel, &item));

        item.like_of.clear();
        item.in_reply_to = vec!["https://example.org/1".to_string()];
        assert!(passes_type_filter(&channel, &item));
    }

    #[test]
    fn test_regex_filter_case_insensitive() {
        let channel = channel_with(vec![], Some("sponsored"));

        let item = NormalizedItem {
            item_type: "entry".to_string(),
            name: Some("SPONSORED: buy things".to_string()),
            ..Default::default()
        };
        assert!(!passes_regex_filter(&channel, &item));

        let clean = NormalizedItem {
            item_type: "entry".to_string(),
            name: Some("Weekly notes".to_string()),
            content: Some(ItemContent {
                text: Some("nothing to see".to_string()),
                html: None,
            }),
            ..Default::default()
        };
        assert!(passes_regex_filter(&channel, &clean));
    }

    #[test]
    fn test_invalid_regex_fails_open() {
        let channel = channel_with(vec![], Some("([unclosed"));
        let item = NormalizedItem {
            item_type: "entry".to_string(),
            name: Some("anything".to_string()),
            ..Default::default()
        };
        assert!(passes_regex_filter(&channel, &item));
    }
}
