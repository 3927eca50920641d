use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::item::Item;

/// 通知结构上就是通知频道里的条目, 额外携带 webmention 的来源和目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub item: Item,
    pub mention_source: String,
    pub mention_target: String,
}

/// 已验证提及的类型, 按 like > repost > bookmark > reply > mention 优先级判定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionType {
    Like,
    Repost,
    Bookmark,
    Reply,
    Mention,
}

impl MentionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Bookmark => "bookmark",
            Self::Reply => "reply",
            Self::Mention => "mention",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct WebmentionRequest {
    #[validate(url)]
    pub source: String,
    #[validate(url)]
    pub target: String,
}
