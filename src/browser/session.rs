use chromiumoxide::error::CdpError;
use chromiumoxide::Browser;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::infrastructure::JsExecutor;

/// 一次性的浏览器会话
///
/// 每次获取操作启动一个，操作结束后立即释放，不跨章节持有
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    executor: JsExecutor,
}

impl BrowserSession {
    pub(crate) fn new(browser: Browser, handler_task: JoinHandle<()>, executor: JsExecutor) -> Self {
        Self {
            browser,
            handler_task,
            executor,
        }
    }

    pub fn executor(&self) -> &JsExecutor {
        &self.executor
    }

    /// 导航到指定地址，保留 chromiumoxide 的原始错误以便分类
    pub async fn navigate(&self, url: &str) -> Result<(), CdpError> {
        debug!("导航到: {}", url);
        self.executor.page().goto(url).await?;
        Ok(())
    }

    /// 关闭浏览器
    ///
    /// 关闭失败只记录日志，不影响调用方
    pub async fn release(self) {
        shutdown(self.browser, self.handler_task).await;
    }
}

pub(crate) async fn shutdown(mut browser: Browser, handler_task: JoinHandle<()>) {
    if let Err(e) = browser.close().await {
        warn!("⚠️ 关闭浏览器失败: {}", e);
    }
    if let Err(e) = browser.wait().await {
        warn!("⚠️ 等待浏览器进程退出失败: {}", e);
    }
    handler_task.abort();
    debug!("浏览器已关闭");
}
