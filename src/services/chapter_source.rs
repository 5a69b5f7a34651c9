//! 章节页面来源 - 业务能力层
//!
//! 只负责"打开一页并取出正文"这一次尝试，重试和退避由 `ContentFetcher` 处理

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use phf::phf_set;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::browser::{launch_browser, BrowserOptions, BrowserSession};

/// 单次页面加载的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// 页面已加载，`None` 表示没有找到正文
    Loaded(Option<String>),
    /// 被限流（429 或限流提示页）
    RateLimited,
    /// 连接被重置、超时或中断
    ConnectionFailed(String),
    /// 非 200 的页面状态
    HttpStatus(u16),
    /// 其他不可重试的错误
    Fatal(String),
}

/// 章节页面来源
#[async_trait]
pub trait ChapterSource: Send + Sync {
    /// 打开章节页面，等待 `settle` 后提取正文
    async fn load(&self, locator: &str, settle: Duration) -> PageOutcome;
}

/// 浏览器可能返回的临时网络错误码
static TRANSIENT_NET_ERRORS: phf::Set<&'static str> = phf_set! {
    "ERR_CONNECTION_RESET",
    "ERR_CONNECTION_CLOSED",
    "ERR_CONNECTION_ABORTED",
    "ERR_CONNECTION_REFUSED",
    "ERR_CONNECTION_TIMED_OUT",
    "ERR_TIMED_OUT",
    "ERR_ABORTED",
    "ERR_NETWORK_CHANGED",
    "ERR_INTERNET_DISCONNECTED",
    "ERR_EMPTY_RESPONSE",
};

const RATE_LIMIT_MARKERS: [&str; 2] = ["too many requests", "слишком много запросов"];

/// 基于 chromiumoxide 的章节来源
///
/// 每次尝试启动一个浏览器，结束后立即关闭
pub struct BrowserChapterSource {
    options: BrowserOptions,
    content_selectors: Vec<String>,
}

impl BrowserChapterSource {
    pub fn new(options: BrowserOptions, content_selectors: Vec<String>) -> Self {
        Self {
            options,
            content_selectors,
        }
    }

    async fn load_in(&self, session: &BrowserSession, locator: &str, settle: Duration) -> PageOutcome {
        if let Err(e) = session.navigate(locator).await {
            return classify_cdp_error(&e);
        }

        let executor = session.executor();
        match executor.response_status().await {
            Ok(Some(429)) => return PageOutcome::RateLimited,
            Ok(Some(status)) if status != 200 => return PageOutcome::HttpStatus(status),
            Ok(_) => {}
            Err(e) => debug!("无法读取页面状态码: {}", e),
        }

        if let Ok(banner) = executor.page_banner().await {
            if is_rate_limit_banner(&banner) {
                return PageOutcome::RateLimited;
            }
        }

        if !settle.is_zero() {
            debug!("等待页面渲染 {} 秒", settle.as_secs());
            sleep(settle).await;
        }

        let js_code = match extract_content_script(&self.content_selectors) {
            Ok(js) => js,
            Err(e) => return PageOutcome::Fatal(e.to_string()),
        };
        match executor.eval_as::<Option<String>>(js_code).await {
            Ok(content) => PageOutcome::Loaded(content),
            Err(e) => PageOutcome::Fatal(format!("提取正文失败: {}", e)),
        }
    }
}

#[async_trait]
impl ChapterSource for BrowserChapterSource {
    async fn load(&self, locator: &str, settle: Duration) -> PageOutcome {
        let session = match launch_browser(&self.options).await {
            Ok(session) => session,
            Err(e) => return PageOutcome::Fatal(e.to_string()),
        };

        let outcome = self.load_in(&session, locator, settle).await;
        session.release().await;
        outcome
    }
}

/// 生成提取正文的脚本
///
/// 图片地址统一转成绝对地址，缺失的 src 置为空字符串，由组装阶段清理
fn extract_content_script(selectors: &[String]) -> serde_json::Result<String> {
    Ok(format!(
        r#"
        (() => {{
            const selectors = {};
            for (const selector of selectors) {{
                const content = document.querySelector(selector);
                if (!content) continue;
                content.querySelectorAll('img').forEach((img) => {{
                    const raw = img.getAttribute('src') || img.getAttribute('data-src') || '';
                    try {{
                        img.setAttribute('src', raw ? new URL(raw, location.href).href : '');
                    }} catch (e) {{
                        img.setAttribute('src', '');
                    }}
                }});
                return content.innerHTML;
            }}
            return null;
        }})()
        "#,
        serde_json::to_string(selectors)?
    ))
}

fn is_rate_limit_banner(banner: &str) -> bool {
    let lower = banner.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// 把 chromiumoxide 的错误分成"连接类"和"其他"
pub(crate) fn classify_cdp_error(err: &CdpError) -> PageOutcome {
    match err {
        CdpError::Timeout => PageOutcome::ConnectionFailed("导航超时".to_string()),
        CdpError::Ws(e) => PageOutcome::ConnectionFailed(e.to_string()),
        CdpError::Io(e) if is_transient_io(e.kind()) => PageOutcome::ConnectionFailed(e.to_string()),
        other => {
            let message = other.to_string();
            match net_error_code(&message) {
                Some(code) if TRANSIENT_NET_ERRORS.contains(code) => {
                    PageOutcome::ConnectionFailed(message)
                }
                _ => {
                    warn!("无法归类的浏览器错误: {}", message);
                    PageOutcome::Fatal(message)
                }
            }
        }
    }
}

fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

/// 从 `net::ERR_CONNECTION_RESET` 形式的消息中取出错误码
fn net_error_code(message: &str) -> Option<&str> {
    let start = message.find("net::")? + "net::".len();
    let rest = &message[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}
