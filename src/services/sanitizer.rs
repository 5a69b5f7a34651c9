//! 正文图片清理 - 业务能力层
//!
//! - 完整模式：去掉无效图片，第三方图片换成占位块，其余图片补全属性
//! - 无图模式：去掉所有带图片的元素，只留下带说明文字的占位块

use std::sync::OnceLock;

use regex::{Captures, Regex};
use reqwest::Url;

/// 无图模式附加的样式，从样式层面禁止渲染图片
pub const DEGRADED_CSS: &str = "img, figure, picture, svg { display: none !important; }\n";

const PLACEHOLDER_LABEL: &str = "Изображение";
const DEFAULT_ALT: &str = "Изображение";

pub(crate) fn img_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<img\b[^>]*>").expect("static regex"))
}

pub(crate) fn attr_value(tag: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"(?is)\s{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#, name);
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| decode_entities(m.as_str().trim()))
}

/// 还原属性值中的字符实体，`&amp;` 最后处理以免二次解码
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn placeholder(alt: Option<&str>) -> String {
    match alt.map(str::trim).filter(|a| !a.is_empty()) {
        Some(alt) => format!(
            r#"<p class="image-placeholder">[{}: {}]</p>"#,
            PLACEHOLDER_LABEL,
            escape_attr(alt)
        ),
        None => format!(r#"<p class="image-placeholder">[{}]</p>"#, PLACEHOLDER_LABEL),
    }
}

pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// 图片地址是否可以由打包阶段直接下载
fn is_trusted(url: &Url, trusted_hosts: &[String]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    trusted_hosts
        .iter()
        .any(|trusted| host == trusted.as_str() || host.ends_with(&format!(".{}", trusted)))
}

/// 完整模式的清理
///
/// - 没有 src、src 为空或无法解析为 http(s) 地址的图片直接删除
/// - 不在信任域名内的图片替换为占位块，避免打包时反复下载失败
/// - 保留的图片补全 alt、懒加载和最大宽度样式
pub fn sanitize_rich(html: &str, trusted_hosts: &[String]) -> String {
    img_re()
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];
            let alt = attr_value(tag, "alt");
            let url = attr_value(tag, "src")
                .filter(|src| !src.is_empty())
                .and_then(|src| Url::parse(&src).ok())
                .filter(|url| matches!(url.scheme(), "http" | "https"));

            match url {
                None => String::new(),
                Some(url) if !is_trusted(&url, trusted_hosts) => placeholder(alt.as_deref()),
                Some(url) => {
                    let alt = alt
                        .filter(|a| !a.is_empty())
                        .unwrap_or_else(|| DEFAULT_ALT.to_string());
                    format!(
                        r#"<img src="{}" alt="{}" loading="lazy" style="max-width: 100%; height: auto;"/>"#,
                        escape_attr(url.as_str()),
                        escape_attr(&alt)
                    )
                }
            }
        })
        .into_owned()
}

/// 无图模式的清理
///
/// 依次处理图片容器、figure、picture 和剩余的 img，全部换成占位块
pub fn sanitize_degraded(html: &str) -> String {
    static NESTABLE: OnceLock<Vec<Regex>> = OnceLock::new();
    static FLAT: OnceLock<Vec<Regex>> = OnceLock::new();
    let nestable = NESTABLE.get_or_init(|| {
        [r"(?is)<(/?)div\b[^>]*>", r"(?is)<(/?)span\b[^>]*>"]
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect()
    });
    let flat = FLAT.get_or_init(|| {
        [r"(?is)<figure\b[^>]*>.*?</figure>", r"(?is)<picture\b[^>]*>.*?</picture>"]
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect()
    });

    let mut result = html.to_string();
    for tags in nestable {
        result = replace_image_blocks(&result, tags);
    }
    for re in flat {
        result = re
            .replace_all(&result, |caps: &Captures| placeholder(block_alt(&caps[0]).as_deref()))
            .into_owned();
    }

    img_re()
        .replace_all(&result, |caps: &Captures| placeholder(attr_value(&caps[0], "alt").as_deref()))
        .into_owned()
}

/// 按嵌套深度找到 class 含 image/img 的整个元素块并替换成占位块
///
/// `tags` 同时匹配开闭标签，第一个分组非空表示闭合标签。没有闭合的块保持原样
fn replace_image_blocks(html: &str, tags: &Regex) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    let mut open: Option<(usize, usize)> = None;

    for caps in tags.captures_iter(html) {
        let Some(tag) = caps.get(0) else { continue };
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());

        match open {
            None => {
                if !closing && has_image_class(tag.as_str()) {
                    open = Some((tag.start(), 1));
                }
            }
            Some((start, depth)) if closing && depth == 1 => {
                out.push_str(&html[cursor..start]);
                out.push_str(&placeholder(block_alt(&html[start..tag.end()]).as_deref()));
                cursor = tag.end();
                open = None;
            }
            Some((start, depth)) if closing => open = Some((start, depth - 1)),
            Some((start, depth)) => open = Some((start, depth + 1)),
        }
    }

    out.push_str(&html[cursor..]);
    out
}

fn has_image_class(tag: &str) -> bool {
    attr_value(tag, "class").is_some_and(|class| {
        let class = class.to_lowercase();
        class.contains("image") || class.contains("img")
    })
}

fn block_alt(block: &str) -> Option<String> {
    img_re()
        .find(block)
        .and_then(|img| attr_value(img.as_str(), "alt"))
        .or_else(|| figcaption_text(block))
}

fn figcaption_text(html: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?is)<figcaption\b[^>]*>(.*?)</figcaption>").expect("static regex"));
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

    let caption = re.captures(html)?;
    let text = tags.replace_all(&caption[1], "").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// 统计正文中的图片数量
pub fn count_images(html: &str) -> usize {
    img_re().find_iter(html).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted() -> Vec<String> {
        vec!["ranobelib.me".to_string(), "lib.social".to_string()]
    }

    #[test]
    fn rich_removes_empty_and_malformed_sources() {
        let html = r#"<p>a</p><img src=""><img><img src="not a url"><img src="javascript:alert(1)"><p>b</p>"#;
        assert_eq!(sanitize_rich(html, &trusted()), "<p>a</p><p>b</p>");
    }

    #[test]
    fn rich_replaces_third_party_images() {
        let html = r#"<img src="https://imgur.com/x.png" alt="Карта">"#;
        assert_eq!(
            sanitize_rich(html, &trusted()),
            r#"<p class="image-placeholder">[Изображение: Карта]</p>"#
        );
    }

    #[test]
    fn rich_normalizes_trusted_images() {
        let html = r#"<img class="x" src="https://cover.lib.social/a.jpg">"#;
        let out = sanitize_rich(html, &trusted());
        assert_eq!(
            out,
            r#"<img src="https://cover.lib.social/a.jpg" alt="Изображение" loading="lazy" style="max-width: 100%; height: auto;"/>"#
        );
    }

    #[test]
    fn degraded_strips_every_image_bearing_element() {
        let html = concat!(
            r#"<p>до</p>"#,
            r#"<figure><img src="https://ranobelib.me/a.png"><figcaption>Схема <b>боя</b></figcaption></figure>"#,
            r#"<div class="article-image"><img src="https://x/b.png" alt="Герой"></div>"#,
            r#"<img src="https://x/c.png">"#,
            r#"<p>после</p>"#
        );
        let out = sanitize_degraded(html);

        assert_eq!(count_images(&out), 0);
        assert!(!out.contains("<figure"));
        assert!(out.contains("[Изображение: Схема боя]"));
        assert!(out.contains("[Изображение: Герой]"));
        assert!(out.contains(r#"<p class="image-placeholder">[Изображение]</p>"#));
        assert!(out.starts_with("<p>до</p>"));
        assert!(out.ends_with("<p>после</p>"));
    }

    #[test]
    fn entity_encoded_sources_are_decoded_once() {
        let html = r#"<img src="https://ranobelib.me/i/map.png?w=1&amp;h=2" alt="Тут &quot;карта&quot;">"#;

        assert_eq!(
            attr_value(html, "src").as_deref(),
            Some("https://ranobelib.me/i/map.png?w=1&h=2")
        );
        let out = sanitize_rich(html, &trusted());
        assert!(out.contains(r#"src="https://ranobelib.me/i/map.png?w=1&amp;h=2""#));
        assert!(out.contains(r#"alt="Тут &quot;карта&quot;""#));
        assert!(!out.contains("&amp;amp;"));
    }

    #[test]
    fn degraded_handles_nested_containers() {
        let html = concat!(
            r#"<div class="article-image"><div class="wrap"><img src="https://x/a.png" alt="A"></div></div>"#,
            r#"<div class="text"><span class="img-box"><span><img src="https://x/b.png"></span></span></div>"#,
            r#"<p>after</p>"#
        );
        let out = sanitize_degraded(html);

        assert_eq!(
            out,
            concat!(
                r#"<p class="image-placeholder">[Изображение: A]</p>"#,
                r#"<div class="text"><p class="image-placeholder">[Изображение]</p></div>"#,
                r#"<p>after</p>"#
            )
        );
        assert_eq!(out.matches("<div").count(), out.matches("</div>").count());
    }

    #[test]
    fn degraded_leaves_text_untouched() {
        let html = "<p>Просто текст</p>";
        assert_eq!(sanitize_degraded(html), html);
    }
}
