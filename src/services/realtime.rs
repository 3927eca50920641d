use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

/// 进程内事件扇出, 给 events SSE 流用
/// 没有订阅者时事件直接丢弃, 不保证投递
#[derive(Clone)]
pub struct RealtimeService {
    sender: broadcast::Sender<Value>,
}

impl Default for RealtimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeService {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    /// 新条目入库事件
    pub fn publish_new_items(&self, owner: &str, channel_uid: &str, count: usize) {
        self.publish(json!({
            "type": "new_items",
            "owner": owner,
            "channel": channel_uid,
            "count": count,
        }));
    }

    /// 新的已验证提及
    pub fn publish_notification(&self, owner: &str, mention_type: &str) {
        self.publish(json!({
            "type": "notification",
            "owner": owner,
            "channel": crate::models::channel::NOTIFICATIONS_UID,
            "mention_type": mention_type,
        }));
    }

    fn publish(&self, event: Value) {
        // send 只在没有接收者时报错, 这不算故障
        if self.sender.send(event).is_err() {
            debug!("No realtime subscribers, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let service = RealtimeService::new();
        let mut receiver = service.subscribe();

        service.publish_new_items("https://me.example/", "abcd1234", 3);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event["type"], "new_items");
        assert_eq!(event["count"], 3);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let service = RealtimeService::new();
        service.publish_new_items("https://me.example/", "abcd1234", 1);
    }
}
