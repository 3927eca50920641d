/// 用于处理 SurrealDB Thing ID 的序列化/反序列化辅助模块

use serde::{Deserialize, Deserializer, Serializer};

/// 处理 SurrealDB 的 Thing ID 格式, 统一还原成裸 id 字符串
pub mod thing_id {
    use super::*;

    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IdValue {
            String(String),
            Thing { tb: String, id: serde_json::Value },
        }

        match IdValue::deserialize(deserializer)? {
            IdValue::String(s) => Ok(strip_table_prefix(&s)),
            IdValue::Thing { tb: _, id } => match id {
                serde_json::Value::String(s) => Ok(unescape(&s)),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                serde_json::Value::Object(map) => {
                    // Id::String 在某些协议下序列化为 {"String": "..."}
                    match map.get("String").and_then(|v| v.as_str()) {
                        Some(s) => Ok(unescape(s)),
                        None => Ok(serde_json::Value::Object(map).to_string()),
                    }
                }
                other => Ok(other.to_string()),
            },
        }
    }

    fn strip_table_prefix(s: &str) -> String {
        match s.split_once(':') {
            Some((_, id)) => unescape(id),
            None => s.to_string(),
        }
    }

    fn unescape(s: &str) -> String {
        s.trim_start_matches('⟨').trim_end_matches('⟩').to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Record {
        #[serde(deserialize_with = "super::thing_id::deserialize")]
        id: String,
    }

    #[test]
    fn test_plain_string_id() {
        let record: Record = serde_json::from_value(serde_json::json!({ "id": "abc123" })).unwrap();
        assert_eq!(record.id, "abc123");
    }

    #[test]
    fn test_prefixed_string_id() {
        let record: Record =
            serde_json::from_value(serde_json::json!({ "id": "items:⟨abc-123⟩" })).unwrap();
        assert_eq!(record.id, "abc-123");
    }

    #[test]
    fn test_thing_id() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "id": { "tb": "items", "id": { "String": "abc-123" } }
        }))
        .unwrap();
        assert_eq!(record.id, "abc-123");
    }
}
