use crate::{
    config::Config,
    error::{AppError, Result},
    models::feed::{Feed, WebSubSubscription},
    services::FeedService,
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use reqwest::Client;
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

#[derive(Clone)]
pub struct WebSubService {
    feed_service: FeedService,
    client: Client,
    config: Config,
}

impl WebSubService {
    pub fn new(feed_service: FeedService, config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rainbow-reader/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.discovery_timeout_secs))
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            feed_service,
            client,
            config: config.clone(),
        })
    }

    /// 向 hub 发起订阅; hub 接受后订阅先置为 pending, 等 GET 回调验证
    pub async fn subscribe(&self, feed: &Feed, hub: &str, topic: &str) -> Result<()> {
        let secret = random_hex(32);
        let callback = self.config.websub_callback_url(&feed.id);
        let lease = self.config.websub_lease_seconds.to_string();

        debug!("Subscribing {} at hub {}", topic, hub);

        let response = self
            .client
            .post(hub)
            .form(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", topic),
                ("hub.callback", callback.as_str()),
                ("hub.secret", secret.as_str()),
                ("hub.lease_seconds", lease.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Hub request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status != 202 && status != 204 {
            return Err(AppError::Upstream(format!(
                "Hub {} refused subscription with HTTP {}",
                hub, status
            )));
        }

        let subscription = WebSubSubscription {
            hub: hub.to_string(),
            topic: topic.to_string(),
            secret: Some(secret),
            lease_seconds: None,
            expires_at: None,
            pending: true,
        };
        self.feed_service
            .set_websub(&feed.id, Some(&subscription))
            .await?;

        info!("WebSub subscription pending for {}", feed.url);
        Ok(())
    }

    /// feed 删除时退订; hub 的拒绝只记日志, 本地状态总是清掉
    pub async fn unsubscribe(&self, feed: &Feed) -> Result<()> {
        let Some(subscription) = &feed.websub else {
            return Ok(());
        };

        let callback = self.config.websub_callback_url(&feed.id);
        let result = self
            .client
            .post(&subscription.hub)
            .form(&[
                ("hub.mode", "unsubscribe"),
                ("hub.topic", subscription.topic.as_str()),
                ("hub.callback", callback.as_str()),
            ])
            .send()
            .await;

        match result {
            Ok(response) if matches!(response.status().as_u16(), 202 | 204) => {
                debug!("Hub accepted unsubscribe for {}", feed.url);
            }
            Ok(response) => {
                warn!(
                    "Hub answered unsubscribe for {} with HTTP {}",
                    feed.url,
                    response.status().as_u16()
                );
            }
            Err(e) => warn!("Unsubscribe request for {} failed: {}", feed.url, e),
        }

        self.feed_service.set_websub(&feed.id, None).await?;
        Ok(())
    }

    /// GET 回调验证: topic 必须匹配 feed 地址或已存订阅的 topic
    /// 通过后固化租约并返回 challenge
    pub async fn confirm_subscription(
        &self,
        feed: &Feed,
        topic: &str,
        lease_seconds: Option<i64>,
    ) -> Result<()> {
        let topic_matches = topic == feed.url
            || feed
                .websub
                .as_ref()
                .map(|s| s.topic == topic)
                .unwrap_or(false);
        if !topic_matches {
            return Err(AppError::validation("Topic does not match subscription"));
        }

        let lease = lease_seconds.unwrap_or(self.config.websub_lease_seconds);
        let subscription = WebSubSubscription {
            hub: feed
                .websub
                .as_ref()
                .map(|s| s.hub.clone())
                .unwrap_or_default(),
            topic: topic.to_string(),
            secret: feed.websub.as_ref().and_then(|s| s.secret.clone()),
            lease_seconds: Some(lease),
            expires_at: Some(Utc::now() + Duration::seconds(lease)),
            pending: false,
        };
        self.feed_service
            .set_websub(&feed.id, Some(&subscription))
            .await?;

        info!(
            "WebSub subscription verified for {} (lease {}s)",
            feed.url, lease
        );
        Ok(())
    }
}

/// 推送签名校验: 有 secret 在案就必须带签名, 且常量时间比较
pub fn verify_signature(
    feed: &Feed,
    signature_256: Option<&str>,
    signature_1: Option<&str>,
    body: &[u8],
) -> Result<()> {
    let Some(secret) = feed.websub.as_ref().and_then(|s| s.secret.as_deref()) else {
        // 没有共享密钥的订阅, hub 不会签名
        return Ok(());
    };

    if let Some(header) = signature_256 {
        let expected = decode_signature(header, "sha256=")?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::internal("Invalid HMAC key"))?;
        mac.update(body);
        return mac
            .verify_slice(&expected)
            .map_err(|_| AppError::unauthorized("Signature mismatch"));
    }

    if let Some(header) = signature_1 {
        let expected = decode_signature(header, "sha1=")?;
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::internal("Invalid HMAC key"))?;
        mac.update(body);
        return mac
            .verify_slice(&expected)
            .map_err(|_| AppError::unauthorized("Signature mismatch"));
    }

    Err(AppError::unauthorized("Missing content signature"))
}

fn decode_signature(header: &str, prefix: &str) -> Result<Vec<u8>> {
    let hex_part = header
        .strip_prefix(prefix)
        .ok_or_else(|| AppError::unauthorized("Malformed signature header"))?;
    hex::decode(hex_part).map_err(|_| AppError::unauthorized("Malformed signature header"))
}

/// WebSub 共享密钥, 随机字节的十六进制
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::feed::FeedStatus;

    fn feed_with_secret(secret: Option<&str>) -> Feed {
        Feed {
            id: "feed1".to_string(),
            channel: "chan1".to_string(),
            url: "https://example.com/feed.xml".to_string(),
            title: None,
            photo: None,
            tier: 1,
            unmodified: 0,
            next_fetch_at: None,
            last_fetched_at: None,
            etag: None,
            last_modified: None,
            status: FeedStatus::Active,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
            item_count: 0,
            websub: secret.map(|s| WebSubSubscription {
                hub: "https://hub.example.com/".to_string(),
                topic: "https://example.com/feed.xml".to_string(),
                secret: Some(s.to_string()),
                lease_seconds: None,
                expires_at: None,
                pending: false,
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_random_hex_length() {
        let secret = random_hex(32);
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_verification() {
        let secret = "shared-secret";
        let body = b"<feed>pushed</feed>";

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let good = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        let feed = feed_with_secret(Some(secret));

        assert!(verify_signature(&feed, Some(&good), None, body).is_ok());
        assert!(verify_signature(&feed, Some("sha256=deadbeef"), None, body).is_err());
        // 有 secret 在案时签名不可缺席
        assert!(verify_signature(&feed, None, None, body).is_err());
    }

    #[test]
    fn test_legacy_sha1_signature() {
        let secret = "shared-secret";
        let body = b"<feed>pushed</feed>";

        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let good = format!("sha1={}", hex::encode(mac.finalize().into_bytes()));

        let feed = feed_with_secret(Some(secret));
        assert!(verify_signature(&feed, None, Some(&good), body).is_ok());
    }

    #[test]
    fn test_signature_skipped_without_secret() {
        let feed = feed_with_secret(None);
        assert!(verify_signature(&feed, None, None, b"body").is_ok());
    }
}
