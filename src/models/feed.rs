use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Error,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// WebSub 订阅状态, 跟随 feed 记录持久化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSubSubscription {
    pub hub: String,
    pub topic: String,
    pub secret: Option<String>,
    pub lease_seconds: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    #[serde(deserialize_with = "crate::utils::serde_helpers::thing_id::deserialize")]
    pub id: String,
    pub channel: String,
    pub url: String,
    /// 最近一次成功解析得到的标题/头像
    pub title: Option<String>,
    pub photo: Option<String>,
    /// 轮询层级, 0-10, 间隔为 2^tier 分钟
    pub tier: i64,
    /// 连续未变化的抓取次数
    pub unmodified: i64,
    pub next_fetch_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    // HTTP 条件请求验证器
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    #[serde(default)]
    pub status: FeedStatus,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_errors: i64,
    #[serde(default)]
    pub item_count: i64,
    pub websub: Option<WebSubSubscription>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    /// Microsub API 返回的 feed 描述符
    pub fn to_descriptor(&self) -> Value {
        let mut descriptor = json!({
            "type": "feed",
            "url": self.url,
        });
        if let Some(title) = &self.title {
            descriptor["name"] = json!(title);
        }
        if let Some(photo) = &self.photo {
            descriptor["photo"] = json!(photo);
        }
        descriptor
    }

    /// 租约即将到期, 需要重新订阅
    pub fn websub_needs_renewal(&self, now: DateTime<Utc>) -> bool {
        match &self.websub {
            Some(sub) if !sub.pending => match sub.expires_at {
                Some(expires_at) => expires_at <= now + chrono::Duration::hours(24),
                None => false,
            },
            _ => false,
        }
    }
}
