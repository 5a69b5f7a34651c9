//! 章节发现 - 业务能力层
//!
//! 两种策略按顺序尝试：
//! 1. 章节列表 API（按书籍 ID 查询）
//! 2. 浏览器渲染书籍页面后扫描章节链接
//!
//! 不论来源返回的顺序如何，结果统一按 (卷号, 章节号) 排序后从 0 编号。
//! API 结果非空时即为准，不与页面扫描结果合并。

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{launch_browser, BrowserOptions, BrowserSession};
use crate::error::DiscoveryError;
use crate::models::unit::deserialize_number_string;
use crate::models::{order_units, BookMetadata, ChapterEntry, ChapterKey, UnitRef};
use crate::workflow::SessionContext;

/// 章节目录来源
#[async_trait]
pub trait ChapterCatalog: Send + Sync {
    /// 来源名称（仅用于日志）
    fn name(&self) -> &'static str;

    /// 列出章节，顺序不限
    async fn list(&self, ctx: &SessionContext) -> Result<Vec<ChapterEntry>>;
}

/// 章节发现服务
pub struct UnitDiscovery<P, F> {
    primary: P,
    fallback: F,
}

impl<P: ChapterCatalog, F: ChapterCatalog> UnitDiscovery<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// 解析书籍的有序章节列表
    pub async fn discover(&self, ctx: &SessionContext) -> Result<Vec<UnitRef>, DiscoveryError> {
        let catalogs: [&dyn ChapterCatalog; 2] = [&self.primary, &self.fallback];
        for catalog in catalogs {
            match catalog.list(ctx).await {
                Ok(entries) if !entries.is_empty() => {
                    info!("✓ {} 找到 {} 个章节", catalog.name(), entries.len());
                    return Ok(order_units(entries));
                }
                Ok(_) => warn!("⚠️ {} 没有返回章节", catalog.name()),
                Err(e) => warn!("⚠️ {} 查询失败: {:#}", catalog.name(), e),
            }
        }

        Err(DiscoveryError::NoUnits {
            locator: ctx.document_url.clone(),
        })
    }
}

// ========== API 目录 ==========

#[derive(Debug, Deserialize)]
struct ChapterListResponse {
    #[serde(default)]
    data: Vec<ApiChapter>,
}

#[derive(Debug, Deserialize)]
struct ApiChapter {
    #[serde(deserialize_with = "deserialize_number_string")]
    volume: String,
    #[serde(deserialize_with = "deserialize_number_string")]
    number: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    branches: Vec<ApiBranch>,
}

#[derive(Debug, Deserialize)]
struct ApiBranch {
    #[serde(default)]
    branch_id: Option<u64>,
}

/// 章节列表 API
pub struct ApiCatalog {
    client: reqwest::Client,
    api_base_url: String,
}

impl ApiCatalog {
    pub fn new(client: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn entry_from_api(ctx: &SessionContext, chapter: ApiChapter) -> Option<ChapterEntry> {
        let volume: u32 = chapter.volume.parse().ok()?;
        let number: f64 = chapter.number.parse().ok()?;

        // 有多个翻译分支时取 branch_id 最小的
        let branch_id = chapter
            .branches
            .iter()
            .min_by_key(|b| b.branch_id.unwrap_or(0))
            .and_then(|b| b.branch_id);

        let mut locator = format!(
            "{}/ru/{}/read/v{}/c{}",
            ctx.origin, ctx.document_id, chapter.volume, chapter.number
        );
        if let Some(bid) = branch_id {
            locator.push_str(&format!("?bid={}", bid));
        }

        let mut title = format!("Том {} Глава {}", chapter.volume, chapter.number);
        if let Some(name) = chapter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            title.push_str(" - ");
            title.push_str(name);
        }

        Some(ChapterEntry {
            key: ChapterKey::new(volume, number),
            title,
            locator,
        })
    }
}

#[async_trait]
impl ChapterCatalog for ApiCatalog {
    fn name(&self) -> &'static str {
        "章节 API"
    }

    async fn list(&self, ctx: &SessionContext) -> Result<Vec<ChapterEntry>> {
        let endpoint = format!("{}/{}/chapters", self.api_base_url, ctx.document_id);
        debug!("请求章节列表: {}", endpoint);

        let response = self
            .client
            .get(&endpoint)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("请求章节列表失败: {}", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("章节列表返回状态码 {}: {}", status.as_u16(), endpoint);
        }

        let body: ChapterListResponse = response
            .json()
            .await
            .with_context(|| format!("章节列表解析失败: {}", endpoint))?;

        let total = body.data.len();
        let entries: Vec<ChapterEntry> = body
            .data
            .into_iter()
            .filter_map(|chapter| Self::entry_from_api(ctx, chapter))
            .collect();
        if entries.len() < total {
            warn!("⚠️ 跳过 {} 个格式不正确的章节记录", total - entries.len());
        }

        Ok(entries)
    }
}

// ========== 页面扫描目录 ==========

/// 页面上的一个章节链接
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChapterLink {
    pub title: String,
    pub href: String,
}

const READ_BUTTON: &str = "div.media-sidebar__buttons.section > a.button.button_block.button_primary";
const CHAPTERS_BUTTON: &str =
    r#"div.reader-header-actions > div.reader-header-action[data-reader-modal="chapters"]"#;
const CLICK_SETTLE: Duration = Duration::from_secs(3);

const SCAN_LINKS_JS: &str = r#"
(() => {
    const anchors = document.querySelectorAll('a[href*="/read/"], div.modal__body > a.menu__item');
    return Array.from(anchors, (a) => ({
        title: (a.textContent || '').replace(/\s+/g, ' ').trim(),
        href: a.href || '',
    }));
})()
"#;

const METADATA_JS: &str = r#"
(() => {
    const text = (selector) => {
        const el = document.querySelector(selector);
        return el ? (el.textContent || '').trim() : '';
    };
    const meta = (property) => {
        const el = document.querySelector(`meta[property="${property}"]`);
        return el ? (el.getAttribute('content') || '').trim() : '';
    };
    const cover = document.querySelector('div.media-sidebar__cover.paper > img, .cover img');
    return {
        title: text('div.media-name__body > div.media-name__main') || text('h1') || meta('og:title'),
        author: text('div.media-info-list__item > div.media-info-list__value > a') || text('a[href*="/people/"]'),
        cover: (cover && cover.src) || meta('og:image'),
    };
})()
"#;

#[derive(Debug, Deserialize)]
struct ScrapedMetadata {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    cover: String,
}

/// 通过浏览器扫描书籍页面
#[derive(Debug, Clone)]
pub struct DomCatalog {
    options: BrowserOptions,
}

impl DomCatalog {
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }

    async fn open(&self, ctx: &SessionContext) -> Result<BrowserSession> {
        let session = launch_browser(&self.options).await?;
        if let Err(e) = session.navigate(&ctx.document_url).await {
            session.release().await;
            anyhow::bail!("打开书籍页面失败 ({}): {}", ctx.document_url, e);
        }
        Ok(session)
    }

    /// 从书籍页面抓取元数据
    ///
    /// 失败时返回以书籍 ID 为标题的最小元数据，不中断流程
    pub async fn metadata(&self, ctx: &SessionContext, language: &str, toc_title: &str) -> BookMetadata {
        let fallback = BookMetadata::fallback(&ctx.document_id, language, toc_title);
        let session = match self.open(ctx).await {
            Ok(session) => session,
            Err(e) => {
                warn!("⚠️ 无法获取书籍信息: {:#}", e);
                return fallback;
            }
        };

        let scraped = session.executor().eval_as::<ScrapedMetadata>(METADATA_JS).await;
        session.release().await;

        match scraped {
            Ok(scraped) => BookMetadata {
                title: non_empty(scraped.title).unwrap_or(fallback.title),
                author: scraped.author,
                cover: non_empty(scraped.cover),
                ..fallback
            },
            Err(e) => {
                warn!("⚠️ 书籍信息解析失败: {}", e);
                fallback
            }
        }
    }
}

#[async_trait]
impl ChapterCatalog for DomCatalog {
    fn name(&self) -> &'static str {
        "页面扫描"
    }

    async fn list(&self, ctx: &SessionContext) -> Result<Vec<ChapterEntry>> {
        let session = self.open(ctx).await?;
        let links = scan_chapter_links(&session).await;
        session.release().await;

        Ok(entries_from_links(links?))
    }
}

/// 书籍页面的章节列表是懒加载的，先进入阅读页再打开章节弹窗，弹窗里是完整列表
async fn scan_chapter_links(session: &BrowserSession) -> Result<Vec<ChapterLink>> {
    let executor = session.executor();
    for selector in [READ_BUTTON, CHAPTERS_BUTTON] {
        if executor.click(selector).await? {
            sleep(CLICK_SETTLE).await;
        } else {
            debug!("未找到按钮: {}", selector);
        }
    }
    executor.eval_as::<Vec<ChapterLink>>(SCAN_LINKS_JS).await
}

/// 把页面链接转换成章节记录
///
/// 按地址去重；地址和标题都解析不出卷号/章节号的链接不是章节，丢弃
pub fn entries_from_links(links: Vec<ChapterLink>) -> Vec<ChapterEntry> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| !link.href.is_empty() && seen.insert(link.href.clone()))
        .filter_map(|link| {
            let key = ChapterKey::from_locator(&link.href).or_else(|| ChapterKey::from_title(&link.title))?;
            Some(ChapterEntry {
                key,
                title: link.title,
                locator: link.href,
            })
        })
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(title: &str, href: &str) -> ChapterLink {
        ChapterLink {
            title: title.to_string(),
            href: href.to_string(),
        }
    }

    #[test]
    fn links_are_deduplicated_and_sorted_by_path() {
        let entries = entries_from_links(vec![
            link("Том 2 Глава 1", "https://r.me/ru/b/read/v2/c1"),
            link("Том 1 Глава 10", "https://r.me/ru/b/read/v1/c10"),
            link("Том 1 Глава 2", "https://r.me/ru/b/read/v1/c2"),
            link("Том 1 Глава 2", "https://r.me/ru/b/read/v1/c2"),
            link("Комментарии", "https://r.me/ru/b/comments"),
        ]);
        let units = order_units(entries);

        let locators: Vec<_> = units.iter().map(|u| u.locator.as_str()).collect();
        assert_eq!(
            locators,
            vec![
                "https://r.me/ru/b/read/v1/c2",
                "https://r.me/ru/b/read/v1/c10",
                "https://r.me/ru/b/read/v2/c1",
            ]
        );
        assert_eq!(units.iter().map(|u| u.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn api_entry_prefers_lowest_branch() {
        let ctx = SessionContext::from_url("https://ranobelib.me/ru/book/77--novel").unwrap();
        let chapter: ApiChapter = serde_json::from_value(serde_json::json!({
            "volume": "1",
            "number": 3,
            "name": "Начало",
            "branches": [{"branch_id": 12, "id": 1}, {"branch_id": 5, "id": 2}]
        }))
        .unwrap();

        let entry = ApiCatalog::entry_from_api(&ctx, chapter).unwrap();
        assert_eq!(entry.locator, "https://ranobelib.me/ru/77--novel/read/v1/c3?bid=5");
        assert_eq!(entry.title, "Том 1 Глава 3 - Начало");
        assert_eq!(entry.key, ChapterKey::new(1, 3.0));
    }

    #[test]
    fn api_entry_without_branch_has_no_bid() {
        let ctx = SessionContext::from_url("https://ranobelib.me/ru/book/77--novel").unwrap();
        let chapter: ApiChapter = serde_json::from_value(serde_json::json!({
            "volume": 2, "number": "4.5", "branches": [{"branch_id": null, "id": 9}]
        }))
        .unwrap();

        let entry = ApiCatalog::entry_from_api(&ctx, chapter).unwrap();
        assert_eq!(entry.locator, "https://ranobelib.me/ru/77--novel/read/v2/c4.5");
        assert_eq!(entry.title, "Том 2 Глава 4.5");
    }
}
