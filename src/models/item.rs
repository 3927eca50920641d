use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl Author {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.photo.is_none()
    }
}

/// 条目来源, 输出到 jf2 的 _source 元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "feedUrl", skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(deserialize_with = "crate::utils::serde_helpers::thing_id::deserialize")]
    pub id: String,
    pub channel: String,
    /// 来自轮询的条目带有 feed id; 推送进通知频道的条目没有
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<String>,
    /// 每个 feed 内稳定的标识, 24 位十六进制摘要
    pub uid: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ItemContent>,
    pub published: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<String>,
    #[serde(rename = "like-of", default, skip_serializing_if = "Vec::is_empty")]
    pub like_of: Vec<String>,
    #[serde(rename = "repost-of", default, skip_serializing_if = "Vec::is_empty")]
    pub repost_of: Vec<String>,
    #[serde(rename = "bookmark-of", default, skip_serializing_if = "Vec::is_empty")]
    pub bookmark_of: Vec<String>,
    #[serde(rename = "in-reply-to", default, skip_serializing_if = "Vec::is_empty")]
    pub in_reply_to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ItemSource>,
    #[serde(default)]
    pub read_by: Vec<String>,
    /// 去重骨架: 内容已被裁剪, 仅保留 (channel, uid) 唯一性保证
    #[serde(default)]
    pub stripped: bool,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn is_read_by(&self, owner: &str) -> bool {
        self.read_by.iter().any(|o| o == owner)
    }

    /// 渲染成 Microsub timeline 的 jf2 条目
    pub fn to_jf2(&self, owner: &str) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));

        if let Some(obj) = value.as_object_mut() {
            obj.remove("id");
            obj.remove("channel");
            obj.remove("feed_id");
            obj.remove("read_by");
            obj.remove("stripped");
            obj.remove("created_at");
            let source = obj.remove("source");

            obj.insert("_id".to_string(), json!(self.id));
            obj.insert("_is_read".to_string(), json!(self.is_read_by(owner)));
            if let Some(source) = source {
                obj.insert("_source".to_string(), source);
            }
        }

        value
    }
}

/// 解析器输出的统一条目表示, 尚未归属到任何频道
/// 序列化形态即 preview 输出的 jf2
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing)]
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ItemContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<String>,
    #[serde(rename = "like-of", default, skip_serializing_if = "Vec::is_empty")]
    pub like_of: Vec<String>,
    #[serde(rename = "repost-of", default, skip_serializing_if = "Vec::is_empty")]
    pub repost_of: Vec<String>,
    #[serde(rename = "bookmark-of", default, skip_serializing_if = "Vec::is_empty")]
    pub bookmark_of: Vec<String>,
    #[serde(rename = "in-reply-to", default, skip_serializing_if = "Vec::is_empty")]
    pub in_reply_to: Vec<String>,
    /// 源站内的原始标识 (guid 或 url)
    #[serde(skip_serializing)]
    pub source_id: String,
    #[serde(skip_serializing)]
    pub source_url: Option<String>,
}

impl NormalizedItem {
    pub fn interaction_kind(&self) -> &'static str {
        interaction_kind(
            &self.like_of,
            &self.repost_of,
            &self.bookmark_of,
            &self.in_reply_to,
            &self.item_type,
        )
    }

    /// 过滤正则匹配的文本基底
    pub fn filter_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(name) = &self.name {
            parts.push(name);
        }
        if let Some(summary) = &self.summary {
            parts.push(summary);
        }
        if let Some(content) = &self.content {
            if let Some(text) = &content.text {
                parts.push(text);
            }
            if let Some(html) = &content.html {
                parts.push(html);
            }
        }
        parts.join(" ")
    }
}

fn interaction_kind(
    like_of: &[String],
    repost_of: &[String],
    bookmark_of: &[String],
    in_reply_to: &[String],
    item_type: &str,
) -> &'static str {
    if !like_of.is_empty() {
        "like"
    } else if !repost_of.is_empty() {
        "repost"
    } else if !bookmark_of.is_empty() {
        "bookmark"
    } else if !in_reply_to.is_empty() {
        "reply"
    } else if item_type == "rsvp" {
        "rsvp"
    } else if item_type == "checkin" {
        "checkin"
    } else {
        "post"
    }
}

/// 条目 uid: feed 地址和源站标识拼接后的 SHA-256 摘要, 取前 24 位十六进制
pub fn item_uid(feed_url: &str, source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_url.as_bytes());
    hasher.update(b"::");
    hasher.update(source_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..24].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_uid_is_stable() {
        let a = item_uid("https://example.org/feed.xml", "post-1");
        let b = item_uid("https://example.org/feed.xml", "post-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_item_uid_differs_per_feed() {
        let a = item_uid("https://example.org/feed.xml", "post-1");
        let b = item_uid("https://example.com/feed.xml", "post-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_interaction_kind_precedence() {
        let mut item = NormalizedItem {
            item_type: "entry".to_string(),
            ..Default::default()
        };
        assert_eq!(item.interaction_kind(), "post");

        item.in_reply_to = vec!["https://example.org/1".to_string()];
        assert_eq!(item.interaction_kind(), "reply");

        item.like_of = vec!["https://example.org/1".to_string()];
        assert_eq!(item.interaction_kind(), "like");
    }

    #[test]
    fn test_jf2_rendering() {
        let item = Item {
            id: "item123".to_string(),
            channel: "chan1".to_string(),
            feed_id: Some("feed1".to_string()),
            uid: "abc".to_string(),
            item_type: "entry".to_string(),
            url: Some("https://example.org/post/1".to_string()),
            name: Some("Hello".to_string()),
            summary: None,
            content: None,
            published: Utc::now(),
            updated: None,
            author: None,
            category: vec![],
            photo: vec![],
            video: vec![],
            audio: vec![],
            like_of: vec![],
            repost_of: vec![],
            bookmark_of: vec![],
            in_reply_to: vec!["https://example.org/parent".to_string()],
            source: Some(ItemSource {
                url: Some("https://example.org".to_string()),
                feed_url: Some("https://example.org/feed.xml".to_string()),
            }),
            read_by: vec!["https://me.example/".to_string()],
            stripped: false,
            created_at: Utc::now(),
        };

        let jf2 = item.to_jf2("https://me.example/");
        assert_eq!(jf2["_id"], "item123");
        assert_eq!(jf2["_is_read"], true);
        assert_eq!(jf2["type"], "entry");
        assert_eq!(jf2["in-reply-to"][0], "https://example.org/parent");
        assert_eq!(jf2["_source"]["feedUrl"], "https://example.org/feed.xml");
        assert!(jf2.get("read_by").is_none());
        assert!(jf2.get("channel").is_none());
    }
}
