use crate::models::{channel::Channel, feed::Feed};
use chrono::Utc;

/// feed 地址常见的路径后缀, 去掉即得站点地址
const FEED_SUFFIXES: &[&str] = &[
    "/feed", "/rss", "/atom.xml", "/rss.xml", "/feed.xml", "/index.xml", ".rss", ".atom",
];

/// OPML 2.0 导出: 每个频道一个 outline, 其下每个订阅一个 outline
pub fn render_opml(channels: &[(Channel, Vec<Feed>)]) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(r#"<opml version="2.0">"#);
    out.push('\n');
    out.push_str(&format!(
        "  <head>\n    <title>Rainbow-Reader subscriptions</title>\n    <dateCreated>{}</dateCreated>\n  </head>\n",
        Utc::now().to_rfc2822()
    ));
    out.push_str("  <body>\n");

    for (channel, feeds) in channels {
        out.push_str(&format!(
            "    <outline text=\"{}\">\n",
            xml_escape(&channel.name)
        ));
        for feed in feeds {
            let title = feed.title.as_deref().unwrap_or(&feed.url);
            out.push_str(&format!(
                "      <outline text=\"{}\" type=\"rss\" xmlUrl=\"{}\" htmlUrl=\"{}\"/>\n",
                xml_escape(title),
                xml_escape(&feed.url),
                xml_escape(&site_url_for_feed(&feed.url)),
            ));
        }
        out.push_str("    </outline>\n");
    }

    out.push_str("  </body>\n</opml>\n");
    out
}

/// 站点地址由 feed 地址剥掉常见后缀推得
pub fn site_url_for_feed(feed_url: &str) -> String {
    let trimmed = feed_url.trim_end_matches('/');
    for suffix in FEED_SUFFIXES {
        if let Some(base) = trimmed.strip_suffix(suffix) {
            if !base.is_empty() && base.contains("://") {
                return base.to_string();
            }
        }
    }
    feed_url.to_string()
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::feed::FeedStatus;

    #[test]
    fn test_site_url_for_feed() {
        assert_eq!(
            site_url_for_feed("https://example.com/feed.xml"),
            "https://example.com"
        );
        assert_eq!(
            site_url_for_feed("https://example.com/blog/feed"),
            "https://example.com/blog"
        );
        assert_eq!(
            site_url_for_feed("https://example.com/posts.atom"),
            "https://example.com/posts"
        );
        // 没有已知后缀就原样返回
        assert_eq!(
            site_url_for_feed("https://example.com/updates"),
            "https://example.com/updates"
        );
    }

    #[test]
    fn test_render_opml_escapes() {
        let channel = Channel {
            id: "c1".to_string(),
            uid: "abcd1234".to_string(),
            owner: "https://me.example/".to_string(),
            name: "News & <fun>".to_string(),
            sort_order: 0,
            exclude_types: vec![],
            exclude_regex: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let feed = Feed {
            id: "f1".to_string(),
            channel: "c1".to_string(),
            url: "https://example.com/feed.xml".to_string(),
            title: Some("Example".to_string()),
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
            websub: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let opml = render_opml(&[(channel, vec![feed])]);
        assert!(opml.contains("News &amp; &lt;fun&gt;"));
        assert!(opml.contains(r#"xmlUrl="https://example.com/feed.xml""#));
        assert!(opml.contains(r#"htmlUrl="https://example.com""#));
        assert!(opml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    }
}
