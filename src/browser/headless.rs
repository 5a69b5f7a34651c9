use std::path::PathBuf;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error};

use crate::browser::session::{shutdown, BrowserSession};
use crate::config::Config;
use crate::infrastructure::JsExecutor;

/// 浏览器启动参数
#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
}

impl BrowserOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            executable: config.browser_executable.clone(),
            headless: config.headless,
        }
    }
}

/// 启动浏览器并打开一个空白页面
///
/// 每次调用都会启动独立的浏览器进程，调用方用完后必须 `release()`
pub async fn launch_browser(options: &BrowserOptions) -> Result<BrowserSession> {
    debug!("启动浏览器 (无头模式: {})", options.headless);

    let mut builder = BrowserConfig::builder().args(vec![
        "--disable-blink-features=AutomationControlled", // 降低被识别为自动化的概率
        "--ignore-certificate-errors",
        "--no-sandbox",
        "--disable-dev-shm-usage",
    ]);
    builder = if options.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(path) = &options.executable {
        builder = builder.chrome_executable(path);
    }

    let config = builder.build().map_err(|e| {
        error!("配置浏览器失败: {}", e);
        anyhow::anyhow!("配置浏览器失败: {}", e)
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        anyhow::anyhow!("启动浏览器失败: {}", e)
    })?;

    // 在后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let page = match browser.new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            error!("创建页面失败: {}", e);
            shutdown(browser, handler_task).await;
            return Err(anyhow::anyhow!("创建页面失败: {}", e));
        }
    };
    debug!("浏览器启动成功");

    Ok(BrowserSession::new(browser, handler_task, JsExecutor::new(page)))
}
