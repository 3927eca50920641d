use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// 时间线游标, 对客户端不透明: base64url(json{t, i})
/// 时间戳保留完整 ISO-8601 精度, 避免同一秒内的条目排序歧义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// published 时间戳
    pub t: String,
    /// 条目内部 id, 次级排序键
    pub i: String,
}

impl Cursor {
    pub fn new(published: DateTime<Utc>, id: &str) -> Self {
        Self {
            t: published.to_rfc3339_opts(SecondsFormat::Millis, true),
            i: id.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| AppError::validation("Invalid cursor"))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|_| AppError::validation("Invalid cursor"))?;
        cursor.published()?;
        Ok(cursor)
    }

    pub fn published(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| AppError::validation("Invalid cursor timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let published = Utc::now();
        let cursor = Cursor::new(published, "item-42");
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        // 毫秒精度内往返一致
        let delta = (decoded.published().unwrap() - published).num_milliseconds().abs();
        assert!(delta <= 1);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Cursor::decode("not base64!!").is_err());
        assert!(Cursor::decode("bm90IGpzb24").is_err());
    }

    #[test]
    fn test_opaque_url_safe() {
        let cursor = Cursor::new(Utc::now(), "id/with+chars");
        let encoded = cursor.encode();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }
}
