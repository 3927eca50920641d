use crate::{
    error::Result,
    models::item::{item_uid, Author, Item, ItemContent},
    models::notification::{MentionType, Notification},
    services::{fetch::FetchOutcome, parser, ChannelService, Database, FetchService, RealtimeService},
};
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// 对 source 页面的验证结论
#[derive(Debug)]
pub(crate) struct VerifiedMention {
    pub mention_type: MentionType,
    pub url: Option<String>,
    pub name: Option<String>,
    pub content: Option<ItemContent>,
    pub author: Option<Author>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct WebmentionService {
    db: Arc<Database>,
    channel_service: ChannelService,
    fetch_service: FetchService,
    realtime_service: RealtimeService,
}

impl WebmentionService {
    pub fn new(
        db: Arc<Database>,
        channel_service: ChannelService,
        fetch_service: FetchService,
        realtime_service: RealtimeService,
    ) -> Self {
        Self {
            db,
            channel_service,
            fetch_service,
            realtime_service,
        }
    }

    /// 接收端已经回了 202, 这里在后台完成验证与落库
    /// 验证失败只影响是否持久化, 不再反馈给发送方
    pub async fn process_mention(&self, source: String, target: String) {
        match self.verify_and_store(&source, &target).await {
            Ok(Some(mention_type)) => {
                info!(
                    "Stored {} webmention {} -> {}",
                    mention_type.as_str(),
                    source,
                    target
                );
            }
            Ok(None) => debug!("Webmention {} -> {} not persisted", source, target),
            Err(e) => warn!("Webmention {} -> {} failed: {}", source, target, e),
        }
    }

    async fn verify_and_store(&self, source: &str, target: &str) -> Result<Option<MentionType>> {
        let Some(owner) = self.owner_for_target(target).await? else {
            debug!("No account matches webmention target {}", target);
            return Ok(None);
        };

        let outcome = match self.fetch_service.probe(source).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // 源页面取不回来按删除语义处理
                self.delete_mention(source, target).await?;
                return Ok(None);
            }
        };

        let FetchOutcome::Content { body, .. } = outcome else {
            return Ok(None);
        };
        let html = String::from_utf8_lossy(&body);

        let Some(mention) = analyze_source(&html, source, target) else {
            // 页面已不再链接 target, 撤掉已有的通知
            self.delete_mention(source, target).await?;
            return Ok(None);
        };

        let channel = self.channel_service.ensure_notifications_channel(&owner).await?;
        let mention_type = mention.mention_type;

        let existing_id = self.find_mention(source, target).await?;
        if let Some(id) = existing_id {
            let updates = json!({
                "type": mention_type.as_str(),
                "url": mention.url,
                "name": mention.name,
                "content": mention.content,
                "author": mention.author,
                "updated": Utc::now(),
            });
            let _: Option<serde_json::Value> =
                self.db.update_by_id("notifications", &id, updates).await?;
        } else {
            let notification = Notification {
                item: Item {
                    id: Uuid::new_v4().to_string(),
                    channel: channel.id.clone(),
                    feed_id: None,
                    uid: item_uid(source, target),
                    item_type: mention_type.as_str().to_string(),
                    url: mention.url,
                    name: mention.name,
                    summary: None,
                    content: mention.content,
                    published: mention.published.unwrap_or_else(Utc::now),
                    updated: None,
                    author: mention.author,
                    category: Vec::new(),
                    photo: Vec::new(),
                    video: Vec::new(),
                    audio: Vec::new(),
                    like_of: Vec::new(),
                    repost_of: Vec::new(),
                    bookmark_of: Vec::new(),
                    in_reply_to: Vec::new(),
                    source: Some(crate::models::item::ItemSource {
                        url: Some(source.to_string()),
                        feed_url: None,
                    }),
                    read_by: Vec::new(),
                    stripped: false,
                    created_at: Utc::now(),
                },
                mention_source: source.to_string(),
                mention_target: target.to_string(),
            };
            self.db.create("notifications", notification).await?;
            self.realtime_service
                .publish_notification(&owner, mention_type.as_str());
        }

        Ok(Some(mention_type))
    }

    /// target 属于哪个账号: 按 host 匹配已知 owner
    async fn owner_for_target(&self, target: &str) -> Result<Option<String>> {
        let Some(target_host) = Url::parse(target)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
        else {
            return Ok(None);
        };

        let mut response = self
            .db
            .query("SELECT owner FROM channels GROUP BY owner")
            .await?;
        let rows: Vec<serde_json::Value> = response.take(0)?;

        for row in rows {
            let Some(owner) = row["owner"].as_str() else { continue };
            let owner_host = Url::parse(owner)
                .ok()
                .and_then(|u| u.host_str().map(String::from));
            if owner_host.as_deref() == Some(target_host.as_str()) {
                return Ok(Some(owner.to_string()));
            }
        }

        Ok(None)
    }

    async fn find_mention(&self, source: &str, target: &str) -> Result<Option<String>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT meta::id(id) AS id FROM notifications \
                 WHERE mention_source = $source AND mention_target = $target LIMIT 1",
                json!({ "source": source, "target": target }),
            )
            .await?;
        let rows: Vec<serde_json::Value> = response.take(0)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|v| v["id"].as_str().map(String::from)))
    }

    async fn delete_mention(&self, source: &str, target: &str) -> Result<()> {
        self.db
            .query_with_params(
                "DELETE notifications WHERE mention_source = $source AND mention_target = $target",
                json!({ "source": source, "target": target }),
            )
            .await?;
        Ok(())
    }
}

/// 结尾斜杠不参与比较
fn urls_match(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// 纯函数部分: 确认 source 页面链接到 target, 并给出提及的分类与摘录
pub(crate) fn analyze_source(html: &str, source: &str, target: &str) -> Option<VerifiedMention> {
    let doc = Html::parse_document(html);

    let anchor_sel = Selector::parse("a[href]").ok()?;
    let links_back = doc
        .select(&anchor_sel)
        .filter_map(|a| a.value().attr("href"))
        .any(|href| urls_match(href, target));
    if !links_back {
        return None;
    }

    let hentry_sel = Selector::parse(".h-entry").ok()?;
    let entry = doc
        .select(&hentry_sel)
        .map(|el| parser::parse_hentry(&el, source))
        // 优先选互动数组里真正引用 target 的那个 h-entry
        .reduce(|best, candidate| {
            if references_target(&best, target) {
                best
            } else if references_target(&candidate, target) {
                candidate
            } else {
                best
            }
        });

    let mention_type = entry
        .as_ref()
        .map(|e| classify(e, target))
        .unwrap_or(MentionType::Mention);

    // 作者: h-entry 里的 h-card 优先, 页面级 h-card 兜底
    let author = entry
        .as_ref()
        .and_then(|e| e.author.clone())
        .or_else(|| page_level_hcard(&doc, source));

    let (url, name, content, published) = match entry {
        Some(e) => {
            // 正文优先, 退而求其次用摘要和标题
            let content = e.content.clone().or_else(|| {
                e.summary.as_ref().map(|s| ItemContent {
                    text: Some(s.clone()),
                    html: None,
                })
            });
            (e.url.or_else(|| Some(source.to_string())), e.name, content, e.published)
        }
        None => (Some(source.to_string()), None, None, None),
    };

    Some(VerifiedMention {
        mention_type,
        url,
        name,
        content,
        author,
        published,
    })
}

fn references_target(entry: &crate::models::item::NormalizedItem, target: &str) -> bool {
    entry
        .like_of
        .iter()
        .chain(&entry.repost_of)
        .chain(&entry.bookmark_of)
        .chain(&entry.in_reply_to)
        .any(|u| urls_match(u, target))
}

/// 提及类型按 like > repost > bookmark > reply > mention 判定
fn classify(entry: &crate::models::item::NormalizedItem, target: &str) -> MentionType {
    if entry.like_of.iter().any(|u| urls_match(u, target)) {
        MentionType::Like
    } else if entry.repost_of.iter().any(|u| urls_match(u, target)) {
        MentionType::Repost
    } else if entry.bookmark_of.iter().any(|u| urls_match(u, target)) {
        MentionType::Bookmark
    } else if entry.in_reply_to.iter().any(|u| urls_match(u, target)) {
        MentionType::Reply
    } else {
        MentionType::Mention
    }
}

fn page_level_hcard(doc: &Html, base_url: &str) -> Option<Author> {
    let hcard_sel = Selector::parse(".h-card").ok()?;
    let card = doc.select(&hcard_sel).next()?;

    let name_sel = Selector::parse(".p-name").ok()?;
    let photo_sel = Selector::parse("img.u-photo").ok()?;

    let name = card
        .select(&name_sel)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| {
            Some(card.text().collect::<String>().trim().to_string()).filter(|t| !t.is_empty())
        });
    let url = card.value().attr("href").map(|h| {
        Url::parse(base_url)
            .and_then(|b| b.join(h))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| h.to_string())
    });
    let photo = card
        .select(&photo_sel)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(String::from);

    let author = Author { name, url, photo };
    Some(author).filter(|a| !a.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY_SOURCE: &str = r#"<!DOCTYPE html>
<html><body>
  <div class="h-card"><img class="u-photo" src="/me.jpg"><span class="p-name">Site Owner</span></div>
  <article class="h-entry">
    <div class="e-content"><p>Great point, I disagree though.</p></div>
    <a class="u-in-reply-to" href="https://me.example/post/1">in reply to</a>
    <a class="p-author h-card" href="https://other.example/">Alice</a>
  </article>
</body></html>"#;

    #[test]
    fn test_reply_classification() {
        let mention = analyze_source(
            REPLY_SOURCE,
            "https://other.example/reply/9",
            "https://me.example/post/1",
        )
        .unwrap();

        assert_eq!(mention.mention_type, MentionType::Reply);
        let author = mention.author.unwrap();
        assert_eq!(author.name.as_deref(), Some("Alice"));
        assert!(mention
            .content
            .unwrap()
            .text
            .unwrap()
            .contains("Great point"));
    }

    #[test]
    fn test_trailing_slash_tolerated() {
        let mention = analyze_source(
            REPLY_SOURCE,
            "https://other.example/reply/9",
            "https://me.example/post/1/",
        );
        assert!(mention.is_some());
    }

    #[test]
    fn test_no_link_back_rejected() {
        let mention = analyze_source(
            REPLY_SOURCE,
            "https://other.example/reply/9",
            "https://me.example/unrelated",
        );
        assert!(mention.is_none());
    }

    #[test]
    fn test_like_takes_precedence_over_reply() {
        let html = r#"<div class="h-entry">
            <a class="u-like-of" href="https://me.example/post/1">like</a>
            <a class="u-in-reply-to" href="https://me.example/post/1">reply</a>
        </div>"#;
        let mention =
            analyze_source(html, "https://other.example/x", "https://me.example/post/1").unwrap();
        assert_eq!(mention.mention_type, MentionType::Like);
    }

    #[test]
    fn test_plain_mention_without_hentry() {
        let html = r#"<p>Read <a href="https://me.example/post/1">this post</a>.</p>"#;
        let mention =
            analyze_source(html, "https://other.example/x", "https://me.example/post/1").unwrap();
        assert_eq!(mention.mention_type, MentionType::Mention);
        assert_eq!(mention.url.as_deref(), Some("https://other.example/x"));
    }

    #[test]
    fn test_page_level_hcard_fallback() {
        let html = r#"<div class="h-card"><span class="p-name">Owner</span></div>
            <div class="h-entry">
              <div class="e-content">mentioning <a href="https://me.example/post/1">you</a></div>
            </div>"#;
        let mention =
            analyze_source(html, "https://other.example/x", "https://me.example/post/1").unwrap();
        assert_eq!(mention.author.unwrap().name.as_deref(), Some("Owner"));
    }
}
