use ammonia::Builder;
use maplit::{hashmap, hashset};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::item::ItemContent;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// 进入存储的所有 HTML 必须先过这份白名单
fn get_sanitizer() -> Builder<'static> {
    let mut sanitizer = Builder::default();

    // 允许的标签
    sanitizer.tags(hashset![
        "a", "abbr", "b", "blockquote", "br", "code", "em",
        "figcaption", "figure",
        "h1", "h2", "h3", "h4", "h5", "h6",
        "hr", "i", "img", "li", "ol", "p", "pre",
        "s", "span", "strike", "strong", "sub", "sup",
        "table", "tbody", "td", "th", "thead", "tr",
        "u", "ul",
        "video", "audio", "source"
    ]);

    // 配置标签属性
    sanitizer.tag_attributes(hashmap! {
        "a" => hashset!["href", "title", "rel"],
        "img" => hashset!["src", "alt", "title", "width", "height"],
        "video" => hashset!["src", "poster", "controls", "width", "height"],
        "audio" => hashset!["src", "controls"],
        "source" => hashset!["src", "type"],
    });
    sanitizer.generic_attributes(hashset!["class"]);
    sanitizer.url_schemes(hashset!["http", "https", "mailto"]);
    sanitizer.link_rel(None);

    sanitizer
}

/// 将 HTML 清理为允许的子集
pub fn sanitize_html(html: &str) -> String {
    get_sanitizer().clean(html).to_string()
}

/// 提取纯文本: 清理后去掉全部标签, 还原实体, 折叠空白
pub fn html_to_text(html: &str) -> String {
    let mut stripper = Builder::empty();
    stripper.url_schemes(hashset!["http", "https", "mailto"]);
    let stripped = stripper.clean(html).to_string();
    let decoded = html_escape::decode_html_entities(&stripped);
    WHITESPACE.replace_all(decoded.trim(), " ").to_string()
}

/// 同时产出 html 和 text 两种形态
pub fn sanitized_content(html: &str) -> ItemContent {
    ItemContent {
        text: Some(html_to_text(html)),
        html: Some(sanitize_html(html)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_script() {
        let dirty = r#"<p>hello</p><script>alert(1)</script>"#;
        let clean = sanitize_html(dirty);
        assert!(clean.contains("<p>hello</p>"));
        assert!(!clean.contains("script"));
        assert!(!clean.contains("alert"));
    }

    #[test]
    fn test_strips_event_handlers_and_styles() {
        let dirty = r#"<p onclick="evil()" style="color:red" class="note">x</p>"#;
        let clean = sanitize_html(dirty);
        assert!(!clean.contains("onclick"));
        assert!(!clean.contains("style"));
        // class 是唯一放行的通用属性
        assert!(clean.contains(r#"class="note""#));
    }

    #[test]
    fn test_rejects_javascript_scheme() {
        let dirty = r#"<a href="javascript:alert(1)">x</a>"#;
        let clean = sanitize_html(dirty);
        assert!(!clean.contains("javascript:"));
    }

    #[test]
    fn test_keeps_media_attributes() {
        let dirty = r#"<img src="https://example.com/a.jpg" alt="a" width="10" data-x="y">"#;
        let clean = sanitize_html(dirty);
        assert!(clean.contains(r#"src="https://example.com/a.jpg""#));
        assert!(clean.contains(r#"alt="a""#));
        assert!(!clean.contains("data-x"));
    }

    #[test]
    fn test_html_to_text() {
        let html = "<p>Hello   <b>world</b></p>\n<p>again &amp; again</p>";
        assert_eq!(html_to_text(html), "Hello world again & again");
    }
}
