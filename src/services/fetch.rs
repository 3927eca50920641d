use crate::config::Config;
use crate::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, IF_MODIFIED_SINCE, IF_NONE_MATCH, LINK};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("rainbow-reader/", env!("CARGO_PKG_VERSION"));

const FEED_ACCEPT: &str = "application/atom+xml, application/rss+xml, application/json, \
                           application/feed+json, text/xml, text/html;q=0.9, */*;q=0.8";

/// Link 头里的 <url>; params 段
static LINK_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^>]+)>\s*((?:;[^,]*)*)").unwrap());

#[derive(Debug)]
pub enum FetchOutcome {
    /// HTTP 304, 内容自上次验证器之后没有变化
    NotModified,
    Content {
        content_type: Option<String>,
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
        /// Link 头里宣告的 WebSub hub 与规范自引用
        hub: Option<String>,
        self_url: Option<String>,
    },
}

#[derive(Clone)]
pub struct FetchService {
    client: Client,
    config: Config,
}

impl FetchService {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 常规抓取, 带条件请求验证器
    pub async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchOutcome> {
        self.fetch_with_timeout(
            url,
            etag,
            last_modified,
            Duration::from_secs(self.config.fetch_timeout_secs),
        )
        .await
    }

    /// 发现探测用的短超时抓取
    pub async fn probe(&self, url: &str) -> Result<FetchOutcome> {
        self.fetch_with_timeout(
            url,
            None,
            None,
            Duration::from_secs(self.config.discovery_timeout_secs),
        )
        .await
    }

    async fn fetch_with_timeout(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
        timeout: Duration,
    ) -> Result<FetchOutcome> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FEED_ACCEPT));

        if let Some(etag) = etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        if let Some(last_modified) = last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Upstream(format!("Fetch timed out: {}", url))
                } else {
                    AppError::Upstream(format!("Fetch failed: {}", e))
                }
            })?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "HTTP {} from {}",
                response.status().as_u16(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let mut hub = None;
        let mut self_url = None;
        for value in response.headers().get_all(LINK) {
            if let Ok(value) = value.to_str() {
                for (target, rels) in parse_link_header(value) {
                    if rels.iter().any(|r| r == "hub") && hub.is_none() {
                        hub = Some(target.clone());
                    }
                    if rels.iter().any(|r| r == "self") && self_url.is_none() {
                        self_url = Some(target.clone());
                    }
                }
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to read body: {}", e)))?
            .to_vec();

        Ok(FetchOutcome::Content {
            content_type,
            body,
            etag,
            last_modified,
            hub,
            self_url,
        })
    }
}

/// 宽容的 Link 头解析: rel 值大小写不敏感, 有无引号均可, 支持多 rel
pub fn parse_link_header(value: &str) -> Vec<(String, Vec<String>)> {
    let mut links = Vec::new();

    for capture in LINK_SEGMENT.captures_iter(value) {
        let target = capture[1].trim().to_string();
        let mut rels = Vec::new();

        for param in capture[2].split(';') {
            let param = param.trim();
            let Some((key, raw)) = param.split_once('=') else {
                continue;
            };
            if !key.trim().eq_ignore_ascii_case("rel") {
                continue;
            }
            let raw = raw.trim().trim_matches('"').trim_matches('\'');
            for rel in raw.split_whitespace() {
                rels.push(rel.to_ascii_lowercase());
            }
        }

        links.push((target, rels));
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_header_quoted() {
        let links = parse_link_header(r#"<https://hub.example.com/>; rel="hub""#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "https://hub.example.com/");
        assert_eq!(links[0].1, vec!["hub"]);
    }

    #[test]
    fn test_parse_link_header_unquoted_and_case() {
        let links = parse_link_header("<https://hub.example.com/>; REL=Hub");
        assert_eq!(links[0].1, vec!["hub"]);
    }

    #[test]
    fn test_parse_link_header_multiple() {
        let links = parse_link_header(
            r#"<https://hub.example.com/>; rel="hub", <https://example.com/feed>; rel="self""#,
        );
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].1, vec!["hub"]);
        assert_eq!(links[1].0, "https://example.com/feed");
        assert_eq!(links[1].1, vec!["self"]);
    }

    #[test]
    fn test_parse_link_header_multi_rel() {
        let links = parse_link_header(r#"<https://example.com/feed>; rel="self canonical""#);
        assert_eq!(links[0].1, vec!["self", "canonical"]);
    }
}
