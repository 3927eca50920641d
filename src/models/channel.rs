use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 每个用户固定拥有一个通知频道, 外部短标识恒为 "notifications"
pub const NOTIFICATIONS_UID: &str = "notifications";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(deserialize_with = "crate::utils::serde_helpers::thing_id::deserialize")]
    pub id: String,
    /// 外部短标识, 8-24 位字母数字, 每个用户内唯一
    pub uid: String,
    pub owner: String,
    pub name: String,
    /// 显示顺序, 通知频道固定为 -1
    pub sort_order: i64,
    /// 被排除的互动类型 (like/repost/bookmark/reply/rsvp/checkin/post)
    #[serde(default)]
    pub exclude_types: Vec<String>,
    /// 可选的排除正则, 命中即丢弃条目
    pub exclude_regex: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_notifications(&self) -> bool {
        self.uid == NOTIFICATIONS_UID
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateChannelRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    pub exclude_types: Option<Vec<String>>,

    #[validate(length(max = 512))]
    pub exclude_regex: Option<String>,
}
