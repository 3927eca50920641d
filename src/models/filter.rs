use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 静音: 按来源地址屏蔽, channel 为空时全局生效
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mute {
    #[serde(deserialize_with = "crate::utils::serde_helpers::thing_id::deserialize")]
    pub id: String,
    pub owner: String,
    pub url: String,
    pub channel: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 拉黑: 按作者地址屏蔽, 始终全局生效, (owner, url) 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(deserialize_with = "crate::utils::serde_helpers::thing_id::deserialize")]
    pub id: String,
    pub owner: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
