//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS"的能力

use std::time::Duration;

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{AppError, AppResult, BrowserError};
use crate::utils::truncate_text;

/// 单段脚本的默认执行上限，远程浏览器卡住时不至于一直等
const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力，每段脚本有执行上限
/// - 不认识学员 / 任务
pub struct JsExecutor {
    page: Page,
    script_timeout: Duration,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self::with_timeout(page, DEFAULT_SCRIPT_TIMEOUT)
    }

    pub fn with_timeout(page: Page, script_timeout: Duration) -> Self {
        Self { page, script_timeout }
    }

    /// 获取 page 的引用（用于导航、读取 URL 等操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果，`undefined` 视为 null
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let js_code = js_code.into();
        let result = tokio::time::timeout(self.script_timeout, self.page.evaluate(js_code.clone()))
            .await
            .map_err(|elapsed| {
                debug!("脚本执行超时: {}", truncate_text(js_code.trim(), 80));
                AppError::Browser(BrowserError::ScriptExecutionFailed {
                    source: Box::new(elapsed),
                })
            })??;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        Ok(serde_json::from_value(json_value)?)
    }

    /// 关闭页面，交还 page 资源
    pub async fn close(self) -> AppResult<()> {
        self.page.close().await?;
        Ok(())
    }
}
