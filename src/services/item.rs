use crate::{
    config::Config,
    error::{AppError, Result},
    models::channel::Channel,
    models::feed::Feed,
    models::item::{Item, ItemSource, NormalizedItem},
    services::Database,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// timeline 默认与最大页长
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// 标记全频道已读的哨兵值
const LAST_READ_SENTINEL: &str = "last-read-entry";

#[derive(Debug, Clone)]
pub struct TimelineQuery {
    pub before: Option<String>,
    pub after: Option<String>,
    pub limit: Option<usize>,
    pub owner: String,
    pub show_read: bool,
}

#[derive(Debug)]
pub struct TimelinePage {
    pub items: Vec<Item>,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// 清理扫描只需要的字段投影
#[derive(Debug, Deserialize)]
struct CleanupRow {
    #[serde(deserialize_with = "crate::utils::serde_helpers::thing_id::deserialize")]
    id: String,
    feed_id: Option<String>,
}

#[derive(Clone)]
pub struct ItemService {
    db: Arc<Database>,
    config: Config,
}

impl ItemService {
    pub async fn new(db: Arc<Database>, config: &Config) -> Result<Self> {
        Ok(Self {
            db,
            config: config.clone(),
        })
    }

    /// 频道对应的条目表: 通知频道单独一张表, 其余共用 items
    fn table_for(channel: &Channel) -> &'static str {
        if channel.is_notifications() {
            "notifications"
        } else {
            "items"
        }
    }

    // ==================== 写入 ====================

    /// 幂等写入: (channel, uid) 已存在时 (包括已裁剪的骨架) 静默跳过
    /// 返回是否真的新建了记录
    pub async fn add_item(
        &self,
        channel: &Channel,
        feed: Option<&Feed>,
        normalized: &NormalizedItem,
    ) -> Result<bool> {
        let table = Self::table_for(channel);

        let mut response = self
            .db
            .query_with_params(
                &format!(
                    "SELECT uid FROM {} WHERE channel = $channel AND uid = $uid LIMIT 1",
                    table
                ),
                json!({ "channel": channel.id, "uid": normalized.uid }),
            )
            .await?;
        let existing: Vec<serde_json::Value> = response.take(0)?;
        if !existing.is_empty() {
            debug!("Duplicate item {} in channel {}", normalized.uid, channel.uid);
            return Ok(false);
        }

        let item = Item {
            id: Uuid::new_v4().to_string(),
            channel: channel.id.clone(),
            feed_id: feed.map(|f| f.id.clone()),
            uid: normalized.uid.clone(),
            item_type: normalized.item_type.clone(),
            url: normalized.url.clone(),
            name: normalized.name.clone(),
            summary: normalized.summary.clone(),
            content: normalized.content.clone(),
            published: normalized.published.unwrap_or_else(Utc::now),
            updated: normalized.updated,
            author: normalized.author.clone(),
            category: normalized.category.clone(),
            photo: normalized.photo.clone(),
            video: normalized.video.clone(),
            audio: normalized.audio.clone(),
            like_of: normalized.like_of.clone(),
            repost_of: normalized.repost_of.clone(),
            bookmark_of: normalized.bookmark_of.clone(),
            in_reply_to: normalized.in_reply_to.clone(),
            source: Some(ItemSource {
                url: feed.map(|f| f.url.clone()).or(normalized.source_url.clone()),
                feed_url: feed.map(|f| f.url.clone()),
            }),
            read_by: Vec::new(),
            stripped: false,
            created_at: Utc::now(),
        };

        match self.db.create(table, item).await {
            Ok(_) => Ok(true),
            // 与推送路径竞争时唯一索引兜底, 重复写入折叠为 no-op
            Err(AppError::Database(e)) => {
                debug!("Insert collapsed by unique index: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ==================== 时间线 ====================

    /// 游标分页的时间线查询, 恒定新到旧输出
    pub async fn get_timeline(
        &self,
        channel: &Channel,
        query: &TimelineQuery,
    ) -> Result<TimelinePage> {
        let table = Self::table_for(channel);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
            .max(1);

        let mut conditions = vec![
            "channel = $channel".to_string(),
            "stripped != true".to_string(),
        ];
        let mut params = json!({
            "channel": channel.id,
            "owner": query.owner,
            "limit": limit + 1,
        });

        if !query.show_read {
            conditions.push("read_by CONTAINSNOT $owner".to_string());
        }

        // after 选取严格更旧的条目, before 选取严格更新的条目
        let mut ascending = false;
        if let Some(after) = &query.after {
            let cursor = crate::utils::cursor::Cursor::decode(after)?;
            params["cursor_t"] = json!(cursor.published()?);
            params["cursor_i"] = json!(cursor.i);
            conditions.push(
                "(published < $cursor_t OR (published = $cursor_t AND meta::id(id) < $cursor_i))"
                    .to_string(),
            );
        } else if let Some(before) = &query.before {
            let cursor = crate::utils::cursor::Cursor::decode(before)?;
            params["cursor_t"] = json!(cursor.published()?);
            params["cursor_i"] = json!(cursor.i);
            conditions.push(
                "(published > $cursor_t OR (published = $cursor_t AND meta::id(id) > $cursor_i))"
                    .to_string(),
            );
            ascending = true;
        }

        let order = if ascending {
            "ORDER BY published ASC, id ASC"
        } else {
            "ORDER BY published DESC, id DESC"
        };

        let sql = format!(
            "SELECT * FROM {} WHERE {} {} LIMIT $limit",
            table,
            conditions.join(" AND "),
            order
        );

        let mut response = self.db.query_with_params(&sql, params).await?;
        let mut items: Vec<Item> = response.take(0)?;

        let has_more = items.len() > limit;
        items.truncate(limit);

        if ascending {
            // before 方向检索时按升序取出, 翻转后仍然新到旧
            items.reverse();
        }

        let before_cursor = items
            .first()
            .map(|item| crate::utils::cursor::Cursor::new(item.published, &item.id).encode());
        let after_cursor = if has_more || ascending {
            items
                .last()
                .map(|item| crate::utils::cursor::Cursor::new(item.published, &item.id).encode())
        } else {
            None
        };

        Ok(TimelinePage {
            items,
            before: before_cursor,
            after: after_cursor,
        })
    }

    // ==================== 已读状态 ====================

    /// 标记已读, 条目可用内部 id / uid / url 指定
    /// 完成后触发该 (channel, owner) 的保留清理
    pub async fn mark_read(
        &self,
        channel: &Channel,
        owner: &str,
        entries: &[String],
    ) -> Result<usize> {
        let updated = self.update_read_state(channel, owner, entries, true).await?;
        if updated > 0 {
            self.cleanup_channel(channel, owner).await?;
        }
        Ok(updated)
    }

    pub async fn mark_unread(
        &self,
        channel: &Channel,
        owner: &str,
        entries: &[String],
    ) -> Result<usize> {
        self.update_read_state(channel, owner, entries, false).await
    }

    async fn update_read_state(
        &self,
        channel: &Channel,
        owner: &str,
        entries: &[String],
        read: bool,
    ) -> Result<usize> {
        let table = Self::table_for(channel);
        let match_all = entries.iter().any(|e| e == LAST_READ_SENTINEL);

        let entry_condition = if match_all {
            String::new()
        } else {
            " AND (meta::id(id) INSIDE $entries OR uid INSIDE $entries OR url INSIDE $entries)"
                .to_string()
        };

        // read_by 的写入用集合语义, 重复标记不会累积
        let mutation = if read {
            "read_by = array::union(read_by, [$owner])"
        } else {
            "read_by -= $owner"
        };

        let sql = format!(
            "UPDATE {} SET {} WHERE channel = $channel{} RETURN AFTER",
            table, mutation, entry_condition
        );

        let mut response = self
            .db
            .query_with_params(
                &sql,
                json!({
                    "channel": channel.id,
                    "owner": owner,
                    "entries": entries,
                }),
            )
            .await?;
        let updated: Vec<serde_json::Value> = response.take(0)?;
        Ok(updated.len())
    }

    /// 删除指定条目 (timeline method=remove)
    pub async fn remove_items(
        &self,
        channel: &Channel,
        entries: &[String],
    ) -> Result<usize> {
        let table = Self::table_for(channel);
        let sql = format!(
            "DELETE {} WHERE channel = $channel AND (meta::id(id) INSIDE $entries OR uid INSIDE $entries OR url INSIDE $entries) RETURN BEFORE",
            table
        );
        let mut response = self
            .db
            .query_with_params(&sql, json!({ "channel": channel.id, "entries": entries }))
            .await?;
        let removed: Vec<serde_json::Value> = response.take(0)?;
        Ok(removed.len())
    }

    // ==================== 保留清理 ====================

    /// 每个 (channel, owner) 只保留最新 max_full_read_items 条完整已读条目
    /// 更旧的已读条目: 轮询来源裁剪成去重骨架, 推送来源直接删除
    /// 未读条目永不触碰
    pub async fn cleanup_channel(&self, channel: &Channel, owner: &str) -> Result<()> {
        let table = Self::table_for(channel);
        let keep = self.config.max_full_read_items;

        let sql = format!(
            "SELECT meta::id(id) AS id, feed_id FROM {} \
             WHERE channel = $channel AND read_by CONTAINS $owner AND stripped != true \
             ORDER BY published DESC LIMIT 100000 START $start",
            table
        );
        let mut response = self
            .db
            .query_with_params(
                &sql,
                json!({ "channel": channel.id, "owner": owner, "start": keep }),
            )
            .await?;
        let rows: Vec<CleanupRow> = response.take(0)?;

        if rows.is_empty() {
            return Ok(());
        }

        let (to_strip, to_delete): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|row| row.feed_id.is_some());

        if !to_strip.is_empty() {
            let ids: Vec<String> = to_strip.into_iter().map(|r| r.id).collect();
            let count = ids.len();
            // 裁剪成骨架: 保住 (channel, uid) 唯一性, 拦下轮询的重新入库
            let sql = format!(
                "UPDATE {} SET \
                 content = NONE, name = NONE, summary = NONE, author = NONE, \
                 category = NONE, photo = NONE, video = NONE, audio = NONE, \
                 `like-of` = NONE, `repost-of` = NONE, `bookmark-of` = NONE, `in-reply-to` = NONE, \
                 url = NONE, source = NONE, stripped = true \
                 WHERE channel = $channel AND meta::id(id) INSIDE $ids",
                table
            );
            self.db
                .query_with_params(&sql, json!({ "channel": channel.id, "ids": ids }))
                .await?;
            debug!("Stripped {} read items in channel {}", count, channel.uid);
        }

        if !to_delete.is_empty() {
            let ids: Vec<String> = to_delete.into_iter().map(|r| r.id).collect();
            let count = ids.len();
            // 没有 feed 来源的条目不会被重新引入, 直接删除
            let sql = format!(
                "DELETE {} WHERE channel = $channel AND meta::id(id) INSIDE $ids",
                table
            );
            self.db
                .query_with_params(&sql, json!({ "channel": channel.id, "ids": ids }))
                .await?;
            debug!("Deleted {} read items in channel {}", count, channel.uid);
        }

        Ok(())
    }

    /// 启动时对数据里出现过的每个 (channel, owner) 跑一遍清理
    pub async fn cleanup_all(&self) -> Result<()> {
        let mut response = self.db.query("SELECT * FROM channels").await?;
        let channels: Vec<Channel> = response.take(0)?;

        info!("Running startup retention cleanup over {} channels", channels.len());
        for channel in &channels {
            if let Err(e) = self.cleanup_channel(channel, &channel.owner).await {
                warn!("Cleanup failed for channel {}: {}", channel.uid, e);
            }
        }
        Ok(())
    }

    // ==================== 统计 ====================

    /// 未读数只统计最近 unread_retention_days 天内发布且未裁剪的条目
    pub async fn unread_count(&self, channel: &Channel, owner: &str) -> Result<i64> {
        let table = Self::table_for(channel);
        let since = Utc::now() - Duration::days(self.config.unread_retention_days);

        let sql = format!(
            "SELECT count() AS count FROM {} \
             WHERE channel = $channel AND stripped != true \
             AND read_by CONTAINSNOT $owner AND published > $since GROUP ALL",
            table
        );
        let mut response = self
            .db
            .query_with_params(
                &sql,
                json!({ "channel": channel.id, "owner": owner, "since": since }),
            )
            .await?;
        let counts: Vec<serde_json::Value> = response.take(0)?;
        Ok(counts
            .first()
            .and_then(|v| v["count"].as_i64())
            .unwrap_or(0))
    }

    // ==================== 拉黑级联 ====================

    /// 拉黑作者后, 清掉该用户所有频道里这个作者的条目
    pub async fn delete_by_author(&self, owner: &str, author_url: &str) -> Result<usize> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT meta::id(id) AS id FROM channels WHERE owner = $owner",
                json!({ "owner": owner }),
            )
            .await?;
        let rows: Vec<serde_json::Value> = response.take(0)?;
        let channel_ids: Vec<String> = rows
            .iter()
            .filter_map(|v| v["id"].as_str().map(String::from))
            .collect();

        if channel_ids.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for table in ["items", "notifications"] {
            let sql = format!(
                "DELETE {} WHERE channel INSIDE $channels AND author.url = $url RETURN BEFORE",
                table
            );
            let mut response = self
                .db
                .query_with_params(
                    &sql,
                    json!({ "channels": channel_ids, "url": author_url }),
                )
                .await?;
            let deleted: Vec<serde_json::Value> = response.take(0)?;
            removed += deleted.len();
        }

        info!("Removed {} items by blocked author {}", removed, author_url);
        Ok(removed)
    }

    // ==================== 检索 ====================

    /// 频道内条目全文检索, 加权: name(10) summary(5) text(3) html(2) author(1)
    pub async fn search_items(
        &self,
        channel: &Channel,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Item>> {
        let table = Self::table_for(channel);
        let limit = limit.min(MAX_PAGE_SIZE).max(1);

        let sql = format!(
            "SELECT *, (10 * search::score(0) + 5 * search::score(1) + 3 * search::score(2) \
             + 2 * search::score(3) + 1 * search::score(4)) AS relevance \
             FROM {} \
             WHERE channel = $channel AND stripped != true \
             AND (name @0@ $query OR summary @1@ $query OR content.text @2@ $query \
             OR content.html @3@ $query OR author.name @4@ $query) \
             ORDER BY relevance DESC LIMIT $limit",
            table
        );
        let mut response = self
            .db
            .query_with_params(
                &sql,
                json!({ "channel": channel.id, "query": query, "limit": limit }),
            )
            .await?;
        let items: Vec<Item> = response.take(0)?;
        Ok(items)
    }
}
