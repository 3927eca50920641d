use crate::error::{AppError, Result};
use crate::models::item::{item_uid, Author, NormalizedItem};
use crate::utils::sanitize;
use chrono::{DateTime, NaiveDateTime, Utc};
use html_escape::decode_html_entities;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// 源的格式标签, 解析是 (FeedKind, bytes) 到 ParsedFeed 的纯函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
    JsonFeed,
    Hfeed,
    ActivityPub,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub photo: Option<String>,
    /// 源在 meta 里宣告的 WebSub hub 与规范自引用
    pub hub: Option<String>,
    pub self_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub items: Vec<NormalizedItem>,
}

// ==================== 格式探测 ====================

/// Content-Type 无歧义时以它为准, 否则嗅探内容
pub fn detect_feed_kind(body: &[u8], content_type: Option<&str>) -> FeedKind {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("application/feed+json") {
            return FeedKind::JsonFeed;
        }
        if ct.contains("application/atom+xml") {
            return FeedKind::Atom;
        }
        if ct.contains("application/rss+xml") {
            return FeedKind::Rss;
        }
        if ct.contains("text/html") {
            return FeedKind::Hfeed;
        }
        if ct.contains("application/json") {
            return sniff_json(body);
        }
    }

    let head = String::from_utf8_lossy(&body[..body.len().min(2048)]);
    let head_lower = head.to_ascii_lowercase();

    if head.contains("<feed") && head.contains("http://www.w3.org/2005/Atom") {
        return FeedKind::Atom;
    }
    if head.contains("<rss") || head.contains("<rdf:RDF") {
        return FeedKind::Rss;
    }
    if head.trim_start().starts_with('{') {
        return sniff_json(body);
    }
    if head_lower.contains("<!doctype html") || head_lower.contains("<html") {
        return FeedKind::Hfeed;
    }

    FeedKind::Unknown
}

fn sniff_json(body: &[u8]) -> FeedKind {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return FeedKind::Unknown;
    };

    if value["version"]
        .as_str()
        .map(|v| v.contains("jsonfeed.org"))
        .unwrap_or(false)
    {
        return FeedKind::JsonFeed;
    }
    if value.get("@context").is_some()
        || value["type"].as_str() == Some("Group")
        || value.get("inbox").is_some()
    {
        return FeedKind::ActivityPub;
    }

    FeedKind::Unknown
}

// ==================== 解析入口 ====================

pub fn parse_feed(kind: FeedKind, body: &[u8], feed_url: &str) -> Result<ParsedFeed> {
    match kind {
        FeedKind::Rss | FeedKind::Atom => parse_xml_feed(body, feed_url),
        FeedKind::JsonFeed => parse_json_feed(body, feed_url),
        FeedKind::Hfeed => parse_hfeed(body, feed_url),
        FeedKind::ActivityPub => {
            let origin = Url::parse(feed_url)
                .ok()
                .and_then(|u| {
                    u.host_str()
                        .map(|h| format!("{}://{}", u.scheme(), h))
                })
                .unwrap_or_else(|| feed_url.to_string());
            Err(AppError::Validation(format!(
                "ActivityPub actor feeds are not supported, try {}/feed/ instead",
                origin
            )))
        }
        FeedKind::Unknown => Err(AppError::validation("Unable to detect feed format")),
    }
}

// ==================== RSS / Atom ====================

fn parse_xml_feed(body: &[u8], feed_url: &str) -> Result<ParsedFeed> {
    let feed = feed_rs::parser::parse(body)
        .map_err(|e| AppError::Upstream(format!("Feed parse error: {}", e)))?;

    let mut meta = FeedMeta {
        title: feed
            .title
            .map(|t| decode_html_entities(&t.content).trim().to_string()),
        description: feed
            .description
            .map(|d| sanitize::html_to_text(&d.content)),
        photo: feed
            .logo
            .map(|l| l.uri)
            .or(feed.icon.map(|i| i.uri)),
        hub: None,
        self_url: None,
    };

    for link in &feed.links {
        match link.rel.as_deref() {
            Some("hub") if meta.hub.is_none() => meta.hub = Some(link.href.clone()),
            Some("self") if meta.self_url.is_none() => meta.self_url = Some(link.href.clone()),
            _ => {}
        }
    }

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());

            // guid 优先, 缺失时退到链接再退到标题
            let source_id = if !entry.id.is_empty() {
                entry.id.clone()
            } else {
                link.clone()
                    .or_else(|| entry.title.as_ref().map(|t| t.content.clone()))
                    .unwrap_or_default()
            };

            let mut item = NormalizedItem {
                item_type: "entry".to_string(),
                uid: item_uid(feed_url, &source_id),
                url: link,
                name: entry
                    .title
                    .map(|t| decode_html_entities(&t.content).trim().to_string())
                    .filter(|t| !t.is_empty()),
                published: entry.published.or(entry.updated),
                updated: entry.updated,
                source_id,
                ..Default::default()
            };

            if let Some(content) = entry.content.and_then(|c| c.body) {
                item.content = Some(sanitize::sanitized_content(&content));
            }
            if let Some(summary) = entry.summary {
                item.summary = Some(sanitize::html_to_text(&summary.content));
            }

            let author = entry.authors.first().map(|a| Author {
                name: Some(a.name.clone()).filter(|n| !n.is_empty()),
                url: a.uri.clone(),
                photo: None,
            });
            item.author = author.filter(|a| !a.is_empty());

            item.category = entry
                .categories
                .iter()
                .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
                .filter(|c| !c.is_empty())
                .collect();

            // enclosure 与 media:content 按 MIME 大类分流
            for media in &entry.media {
                for content in &media.content {
                    let Some(url) = content.url.as_ref().map(|u| u.to_string()) else {
                        continue;
                    };
                    let mime = content
                        .content_type
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_default();
                    if mime.starts_with("image/") {
                        push_unique(&mut item.photo, url);
                    } else if mime.starts_with("video/") {
                        push_unique(&mut item.video, url);
                    } else if mime.starts_with("audio/") {
                        push_unique(&mut item.audio, url);
                    }
                }
                for thumbnail in &media.thumbnails {
                    push_unique(&mut item.photo, thumbnail.image.uri.clone());
                }
            }

            item
        })
        .collect();

    Ok(ParsedFeed { meta, items })
}

// ==================== JSON Feed ====================

#[derive(Debug, Deserialize)]
struct JsonFeedDoc {
    version: String,
    title: Option<String>,
    home_page_url: Option<String>,
    feed_url: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    favicon: Option<String>,
    #[serde(default)]
    hubs: Vec<JsonFeedHub>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedHub {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    id: Option<serde_json::Value>,
    url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    image: Option<String>,
    banner_image: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    attachments: Vec<JsonFeedAttachment>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
    url: Option<String>,
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedAttachment {
    url: Option<String>,
    mime_type: Option<String>,
}

fn parse_json_feed(body: &[u8], feed_url: &str) -> Result<ParsedFeed> {
    let doc: JsonFeedDoc = serde_json::from_slice(body)
        .map_err(|e| AppError::Upstream(format!("JSON Feed parse error: {}", e)))?;

    if !doc.version.contains("jsonfeed.org") {
        return Err(AppError::validation("Missing JSON Feed version marker"));
    }

    let meta = FeedMeta {
        title: doc.title,
        description: doc.description,
        photo: doc.icon.or(doc.favicon),
        hub: doc.hubs.into_iter().next().and_then(|h| h.url),
        self_url: doc.feed_url,
    };

    let items = doc
        .items
        .into_iter()
        .map(|entry| {
            // id 可能是数字, 统一转成字符串
            let source_id = entry
                .id
                .as_ref()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .or_else(|| entry.url.clone())
                .or_else(|| entry.title.clone())
                .unwrap_or_default();

            let mut item = NormalizedItem {
                item_type: "entry".to_string(),
                uid: item_uid(feed_url, &source_id),
                url: entry.url.clone(),
                name: entry.title.clone().filter(|t| !t.is_empty()),
                summary: entry.summary.map(|s| sanitize::html_to_text(&s)),
                published: entry.date_published.as_deref().and_then(parse_date),
                updated: entry.date_modified.as_deref().and_then(parse_date),
                category: entry.tags,
                source_id,
                source_url: entry.url,
                ..Default::default()
            };

            if let Some(html) = entry.content_html {
                item.content = Some(sanitize::sanitized_content(&html));
            } else if let Some(text) = entry.content_text {
                item.content = Some(crate::models::item::ItemContent {
                    text: Some(text),
                    html: None,
                });
            }

            let author = entry.authors.into_iter().next().or(entry.author);
            item.author = author
                .map(|a| Author {
                    name: a.name,
                    url: a.url,
                    photo: a.avatar,
                })
                .filter(|a| !a.is_empty());

            if let Some(image) = entry.image {
                push_unique(&mut item.photo, image);
            }
            if let Some(banner) = entry.banner_image {
                push_unique(&mut item.photo, banner);
            }
            for attachment in entry.attachments {
                let Some(url) = attachment.url else { continue };
                let mime = attachment.mime_type.unwrap_or_default();
                if mime.starts_with("image/") {
                    push_unique(&mut item.photo, url);
                } else if mime.starts_with("video/") {
                    push_unique(&mut item.video, url);
                } else if mime.starts_with("audio/") {
                    push_unique(&mut item.audio, url);
                }
            }

            item
        })
        .collect();

    Ok(ParsedFeed { meta, items })
}

// ==================== h-feed ====================

fn selector(css: &str) -> Selector {
    // 选择器都是常量字符串
    Selector::parse(css).expect("static selector")
}

fn parse_hfeed(body: &[u8], feed_url: &str) -> Result<ParsedFeed> {
    let html = String::from_utf8_lossy(body);
    let doc = Html::parse_document(&html);

    let hfeed_sel = selector(".h-feed");
    let hentry_sel = selector(".h-entry");

    let mut meta = FeedMeta::default();
    let mut entries: Vec<NormalizedItem> = Vec::new();

    if let Some(hfeed) = doc.select(&hfeed_sel).next() {
        meta.title = child_text(&hfeed, ".p-name")
            .or_else(|| hfeed.value().attr("title").map(String::from));
        meta.photo = child_url(&hfeed, ".u-photo", feed_url);

        for entry in hfeed.select(&hentry_sel) {
            entries.push(parse_hentry(&entry, feed_url));
        }
    } else {
        // 没有 h-feed 时把根上的 h-entry 当作一个合成 feed
        for entry in doc.select(&hentry_sel) {
            entries.push(parse_hentry(&entry, feed_url));
        }
    }

    if entries.is_empty() {
        debug!("No h-entry items found at {}", feed_url);
    }

    Ok(ParsedFeed {
        meta,
        items: entries,
    })
}

/// 单个 h-entry 到统一条目表示
pub(crate) fn parse_hentry(entry: &ElementRef, base_url: &str) -> NormalizedItem {
    let url = child_url(entry, ".u-url", base_url);
    let name = child_text(entry, ".p-name");

    let source_id = url.clone().or_else(|| name.clone()).unwrap_or_default();

    let mut item = NormalizedItem {
        item_type: "entry".to_string(),
        uid: item_uid(base_url, &source_id),
        url: url.clone(),
        name,
        summary: child_text(entry, ".p-summary"),
        published: child_datetime(entry, ".dt-published"),
        updated: child_datetime(entry, ".dt-updated"),
        source_id,
        source_url: url,
        ..Default::default()
    };

    if let Some(content) = entry.select(&selector(".e-content")).next() {
        item.content = Some(sanitize::sanitized_content(&content.inner_html()));
        // p-name 缺失时不再把正文误当标题
        if item.name.as_deref() == item.content.as_ref().and_then(|c| c.text.as_deref()) {
            item.name = None;
        }
    }

    item.author = parse_hcard(entry, base_url);

    item.category = entry
        .select(&selector(".p-category"))
        .map(|c| c.text().collect::<String>().trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    for photo in entry.select(&selector("img.u-photo")) {
        if let Some(src) = photo.value().attr("src") {
            push_unique(&mut item.photo, resolve_url(base_url, src));
        }
    }

    item.like_of = collect_refs(entry, ".u-like-of", base_url);
    item.repost_of = collect_refs(entry, ".u-repost-of", base_url);
    item.bookmark_of = collect_refs(entry, ".u-bookmark-of", base_url);
    item.in_reply_to = collect_refs(entry, ".u-in-reply-to", base_url);

    item
}

/// h-card 作者: 条目内的 p-author 优先
pub(crate) fn parse_hcard(entry: &ElementRef, base_url: &str) -> Option<Author> {
    let author_el = entry.select(&selector(".p-author")).next()?;

    let author = if author_el.value().classes().any(|c| c == "h-card") {
        Author {
            name: child_text(&author_el, ".p-name").or_else(|| {
                Some(author_el.text().collect::<String>().trim().to_string())
                    .filter(|t| !t.is_empty())
            }),
            url: child_url(&author_el, ".u-url", base_url).or_else(|| {
                author_el
                    .value()
                    .attr("href")
                    .map(|h| resolve_url(base_url, h))
            }),
            photo: child_url(&author_el, "img.u-photo", base_url),
        }
    } else {
        // p-author 直接写在链接上的简写形式
        Author {
            name: Some(author_el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty()),
            url: author_el
                .value()
                .attr("href")
                .map(|h| resolve_url(base_url, h)),
            photo: None,
        }
    };

    Some(author).filter(|a| !a.is_empty())
}

fn child_text(el: &ElementRef, css: &str) -> Option<String> {
    el.select(&selector(css))
        .next()
        .map(|c| c.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn child_url(el: &ElementRef, css: &str, base: &str) -> Option<String> {
    let child = el.select(&selector(css)).next()?;
    let raw = child
        .value()
        .attr("href")
        .or_else(|| child.value().attr("src"))
        .map(String::from)
        .or_else(|| {
            Some(child.text().collect::<String>().trim().to_string()).filter(|t| !t.is_empty())
        })?;
    Some(resolve_url(base, &raw))
}

fn child_datetime(el: &ElementRef, css: &str) -> Option<DateTime<Utc>> {
    let child = el.select(&selector(css)).next()?;
    let raw = child
        .value()
        .attr("datetime")
        .map(String::from)
        .unwrap_or_else(|| child.text().collect::<String>().trim().to_string());
    parse_date(&raw)
}

fn collect_refs(el: &ElementRef, css: &str, base: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for child in el.select(&selector(css)) {
        if let Some(href) = child.value().attr("href") {
            push_unique(&mut refs, resolve_url(base, href));
        }
    }
    refs
}

fn resolve_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => href.to_string(),
    }
}

// ==================== 公共辅助 ====================

fn push_unique(list: &mut Vec<String>, url: String) {
    if !url.is_empty() && !list.contains(&url) {
        list.push(url);
    }
}

/// 日期解析, 兼容缺时区写法 (按 UTC 解释); 解不出来就算没有
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <description>A test feed</description>
    <item>
      <title>Test Item 1</title>
      <link>https://example.com/item1</link>
      <guid>item-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
      <description>This is item 1</description>
      <enclosure url="https://example.com/a.jpg" type="image/jpeg" length="1000"/>
    </item>
    <item>
      <title>Test Item 2</title>
      <link>https://example.com/item2</link>
      <guid>item-2</guid>
      <description>This is item 2</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Test Feed</title>
  <link rel="hub" href="https://hub.example.com/"/>
  <link rel="self" href="https://example.com/atom"/>
  <entry>
    <title>Atom Entry 1</title>
    <link href="https://example.com/atom1"/>
    <id>atom-entry-1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>This is Atom entry 1</summary>
  </entry>
</feed>"#;

    const JSONFEED_SAMPLE: &str = r#"{
      "version": "https://jsonfeed.org/version/1.1",
      "title": "JSON Feed Test",
      "hubs": [{"type": "WebSub", "url": "https://hub.example.com/"}],
      "items": [
        {
          "id": 1,
          "url": "https://example.com/json1",
          "title": "JSON item",
          "content_html": "<p>hello <script>x</script>world</p>",
          "date_published": "2024-01-01T00:00:00Z",
          "tags": ["a", "b"],
          "image": "https://example.com/cover.png"
        }
      ]
    }"#;

    const HFEED_SAMPLE: &str = r#"<!DOCTYPE html>
<html><body>
  <div class="h-feed">
    <h1 class="p-name">My Posts</h1>
    <article class="h-entry">
      <a class="u-url" href="/posts/1"><span class="p-name">First post</span></a>
      <time class="dt-published" datetime="2024-01-02T10:00:00Z">Jan 2</time>
      <div class="e-content"><p>Hello world</p></div>
      <a class="p-author h-card" href="/about">Jane</a>
      <a class="u-in-reply-to" href="https://other.example/post">parent</a>
    </article>
  </div>
</body></html>"#;

    #[test]
    fn test_detect_by_content_type() {
        assert_eq!(
            detect_feed_kind(b"{}", Some("application/feed+json")),
            FeedKind::JsonFeed
        );
        assert_eq!(
            detect_feed_kind(b"", Some("application/atom+xml; charset=utf-8")),
            FeedKind::Atom
        );
        assert_eq!(
            detect_feed_kind(b"<p>", Some("text/html; charset=utf-8")),
            FeedKind::Hfeed
        );
    }

    #[test]
    fn test_detect_by_body() {
        assert_eq!(detect_feed_kind(RSS_SAMPLE.as_bytes(), None), FeedKind::Rss);
        assert_eq!(detect_feed_kind(ATOM_SAMPLE.as_bytes(), None), FeedKind::Atom);
        assert_eq!(
            detect_feed_kind(JSONFEED_SAMPLE.as_bytes(), Some("application/json")),
            FeedKind::JsonFeed
        );
        assert_eq!(detect_feed_kind(HFEED_SAMPLE.as_bytes(), None), FeedKind::Hfeed);
        assert_eq!(
            detect_feed_kind(br#"{"@context": "https://www.w3.org/ns/activitystreams"}"#, None),
            FeedKind::ActivityPub
        );
        assert_eq!(detect_feed_kind(b"plain text", None), FeedKind::Unknown);
    }

    #[test]
    fn test_parse_rss() {
        let parsed = parse_feed(FeedKind::Rss, RSS_SAMPLE.as_bytes(), "https://example.com/feed.xml")
            .unwrap();

        assert_eq!(parsed.meta.title.as_deref(), Some("Test Feed"));
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.name.as_deref(), Some("Test Item 1"));
        assert_eq!(first.url.as_deref(), Some("https://example.com/item1"));
        assert_eq!(first.uid.len(), 24);
        assert_eq!(first.photo, vec!["https://example.com/a.jpg"]);
        assert!(first.published.is_some());
    }

    #[test]
    fn test_rss_uid_stable_across_parses() {
        let a = parse_feed(FeedKind::Rss, RSS_SAMPLE.as_bytes(), "https://example.com/feed.xml")
            .unwrap();
        let b = parse_feed(FeedKind::Rss, RSS_SAMPLE.as_bytes(), "https://example.com/feed.xml")
            .unwrap();
        assert_eq!(a.items[0].uid, b.items[0].uid);
        assert_ne!(a.items[0].uid, a.items[1].uid);
    }

    #[test]
    fn test_parse_atom() {
        let parsed = parse_feed(FeedKind::Atom, ATOM_SAMPLE.as_bytes(), "https://example.com/atom")
            .unwrap();
        assert_eq!(parsed.meta.title.as_deref(), Some("Atom Test Feed"));
        assert_eq!(parsed.meta.hub.as_deref(), Some("https://hub.example.com/"));
        assert_eq!(parsed.meta.self_url.as_deref(), Some("https://example.com/atom"));
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].name.as_deref(), Some("Atom Entry 1"));
        assert_eq!(parsed.items[0].summary.as_deref(), Some("This is Atom entry 1"));
    }

    #[test]
    fn test_parse_json_feed() {
        let parsed = parse_feed(
            FeedKind::JsonFeed,
            JSONFEED_SAMPLE.as_bytes(),
            "https://example.com/feed.json",
        )
        .unwrap();

        assert_eq!(parsed.meta.hub.as_deref(), Some("https://hub.example.com/"));
        let item = &parsed.items[0];
        assert_eq!(item.source_id, "1");
        assert_eq!(item.category, vec!["a", "b"]);
        assert_eq!(item.photo, vec!["https://example.com/cover.png"]);
        // 正文过白名单, script 必须被剔除
        let html = item.content.as_ref().unwrap().html.as_ref().unwrap();
        assert!(!html.contains("script"));
        assert!(html.contains("hello"));
    }

    #[test]
    fn test_json_feed_requires_version() {
        let body = br#"{"version": "1.0", "items": []}"#;
        assert!(parse_feed(FeedKind::JsonFeed, body, "https://example.com/feed.json").is_err());
    }

    #[test]
    fn test_parse_hfeed() {
        let parsed = parse_feed(FeedKind::Hfeed, HFEED_SAMPLE.as_bytes(), "https://example.com/")
            .unwrap();

        assert_eq!(parsed.meta.title.as_deref(), Some("My Posts"));
        assert_eq!(parsed.items.len(), 1);

        let item = &parsed.items[0];
        assert_eq!(item.name.as_deref(), Some("First post"));
        assert_eq!(item.url.as_deref(), Some("https://example.com/posts/1"));
        assert_eq!(item.in_reply_to, vec!["https://other.example/post"]);
        assert_eq!(item.interaction_kind(), "reply");

        let author = item.author.as_ref().unwrap();
        assert_eq!(author.name.as_deref(), Some("Jane"));
        assert_eq!(author.url.as_deref(), Some("https://example.com/about"));
    }

    #[test]
    fn test_activitypub_rejected_with_hint() {
        let body = br#"{"@context": "https://www.w3.org/ns/activitystreams", "type": "Group"}"#;
        let kind = detect_feed_kind(body, None);
        let err = parse_feed(kind, body, "https://social.example/users/someone").unwrap_err();
        assert!(err.to_string().contains("https://social.example/feed/"));
    }

    #[test]
    fn test_parse_date_fallbacks() {
        assert!(parse_date("2024-01-01T10:00:00Z").is_some());
        assert!(parse_date("Mon, 01 Jan 2024 00:00:00 GMT").is_some());
        // 缺时区的写法按 UTC 解释
        let dt = parse_date("2024-01-01 10:30").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T10:30:00+00:00");
        assert!(parse_date("2024-01-01 10:30:05").is_some());
        assert!(parse_date("not a date").is_none());
    }
}
