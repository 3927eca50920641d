use crate::{
    error::{AppError, Result},
    services::{fetch::FetchOutcome, parser, FetchService},
};
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

/// preview 最多返回的条目数
const PREVIEW_ITEM_LIMIT: usize = 10;

/// feed 发现与预览, 均为短超时探测, 不落库
#[derive(Clone)]
pub struct DiscoveryService {
    fetch_service: FetchService,
}

impl DiscoveryService {
    pub fn new(fetch_service: FetchService) -> Self {
        Self { fetch_service }
    }

    /// 把查询当 URL 探测: 直接是 feed 就返回它自己,
    /// 是 HTML 页面就收集 rel=alternate 宣告的 feed
    pub async fn search(&self, query: &str) -> Result<Vec<Value>> {
        let url = normalize_query_url(query)
            .ok_or_else(|| AppError::validation("Query must be a URL or domain"))?;

        let outcome = self.fetch_service.probe(&url).await?;
        let FetchOutcome::Content { content_type, body, .. } = outcome else {
            return Ok(Vec::new());
        };

        let kind = parser::detect_feed_kind(&body, content_type.as_deref());
        match kind {
            parser::FeedKind::Rss | parser::FeedKind::Atom | parser::FeedKind::JsonFeed => {
                let parsed = parser::parse_feed(kind, &body, &url)?;
                Ok(vec![feed_descriptor(&url, &parsed.meta)])
            }
            parser::FeedKind::Hfeed => {
                let mut results = discover_alternates(&String::from_utf8_lossy(&body), &url);

                // 页面本身带 h-entry 时, 它也是一个可订阅的 mf2 源
                let parsed = parser::parse_feed(kind, &body, &url)?;
                if !parsed.items.is_empty() {
                    results.insert(0, feed_descriptor(&url, &parsed.meta));
                }

                debug!("Discovered {} feeds at {}", results.len(), url);
                Ok(results)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// 抓取并解析, 返回元数据和前几条, 不做任何持久化
    pub async fn preview(&self, url: &str) -> Result<Value> {
        let outcome = self.fetch_service.probe(url).await?;
        let FetchOutcome::Content { content_type, body, .. } = outcome else {
            return Err(AppError::upstream("Feed returned no content"));
        };

        let kind = parser::detect_feed_kind(&body, content_type.as_deref());
        let parsed = parser::parse_feed(kind, &body, url)?;

        let items: Vec<Value> = parsed
            .items
            .iter()
            .take(PREVIEW_ITEM_LIMIT)
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();

        let mut preview = feed_descriptor(url, &parsed.meta);
        preview["items"] = json!(items);
        Ok(preview)
    }
}

fn feed_descriptor(url: &str, meta: &parser::FeedMeta) -> Value {
    let mut descriptor = json!({
        "type": "feed",
        "url": url,
    });
    if let Some(title) = &meta.title {
        descriptor["name"] = json!(title);
    }
    if let Some(photo) = &meta.photo {
        descriptor["photo"] = json!(photo);
    }
    if let Some(description) = &meta.description {
        descriptor["description"] = json!(description);
    }
    descriptor
}

/// 查询词到探测地址: 裸域名补上 https
fn normalize_query_url(query: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    let candidate = if query.contains("://") {
        query.to_string()
    } else {
        format!("https://{}", query)
    };

    let url = Url::parse(&candidate).ok()?;
    if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(url.to_string())
}

/// HTML 页面里 rel=alternate 宣告的 feed 链接
fn discover_alternates(html: &str, base_url: &str) -> Vec<Value> {
    let doc = Html::parse_document(html);
    let Ok(link_sel) = Selector::parse("link[rel=alternate]") else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for link in doc.select(&link_sel) {
        let Some(feed_type) = link.value().attr("type") else { continue };
        if !matches!(
            feed_type,
            "application/rss+xml" | "application/atom+xml" | "application/feed+json" | "application/json"
        ) {
            continue;
        }
        let Some(href) = link.value().attr("href") else { continue };

        let resolved = Url::parse(base_url)
            .and_then(|b| b.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string());

        let mut descriptor = json!({ "type": "feed", "url": resolved });
        if let Some(title) = link.value().attr("title") {
            descriptor["name"] = json!(title);
        }
        if !results.contains(&descriptor) {
            results.push(descriptor);
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query_url() {
        assert_eq!(
            normalize_query_url("example.com").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            normalize_query_url("https://example.com/feed").as_deref(),
            Some("https://example.com/feed")
        );
        assert!(normalize_query_url("").is_none());
        assert!(normalize_query_url("ftp://example.com").is_none());
    }

    #[test]
    fn test_discover_alternates() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" title="Posts" href="/feed.xml">
            <link rel="alternate" type="application/feed+json" href="https://example.com/feed.json">
            <link rel="alternate" type="text/css" href="/ignored.css">
        </head></html>"#;

        let feeds = discover_alternates(html, "https://example.com/");
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0]["url"], "https://example.com/feed.xml");
        assert_eq!(feeds[0]["name"], "Posts");
        assert_eq!(feeds[1]["url"], "https://example.com/feed.json");
    }
}
