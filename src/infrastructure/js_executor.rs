//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS"的能力

use anyhow::Result;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力
/// - 不认识章节 / 书籍
/// - 不处理重试和流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于导航等操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 当前文档的 HTTP 状态码
    ///
    /// 浏览器没有提供状态码时返回 `None`
    pub async fn response_status(&self) -> Result<Option<u16>> {
        let status: Option<u16> = self
            .eval_as(
                r#"
                (() => {
                    const entry = performance.getEntriesByType('navigation')[0];
                    return entry && entry.responseStatus ? entry.responseStatus : null;
                })()
                "#,
            )
            .await?;
        Ok(status.filter(|s| *s != 0))
    }

    /// 当前页面的标题和可见文本开头，用于识别限流页面
    pub async fn page_banner(&self) -> Result<String> {
        self.eval_as(
            r#"
            (() => {
                const body = document.body ? document.body.innerText : '';
                return `${document.title || ''}\n${body.slice(0, 500)}`;
            })()
            "#,
        )
        .await
    }

    /// 点击第一个匹配的元素，返回是否找到
    pub async fn click(&self, selector: &str) -> Result<bool> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.click();
                return true;
            }})()
            "#,
            serde_json::to_string(selector)?
        );
        self.eval_as(js_code).await
    }
}
