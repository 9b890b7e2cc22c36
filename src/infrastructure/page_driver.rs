//! 页面驱动能力 - 基础设施层
//!
//! 抓取流程只依赖这里的能力：导航、点击、填写、读取页面、执行脚本。
//! `ChromeDriver` 基于 `JsExecutor` 实现。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::js_executor::JsExecutor;
use super::locator::{ElementRef, Locator};
use crate::error::{AppError, AppResult, BrowserError};

/// 浏览器页面能力
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> AppResult<()>;

    async fn current_url(&self) -> AppResult<String>;

    /// 等待 `document.readyState == "complete"` 且 body 存在
    async fn wait_until_ready(&self, timeout: Duration) -> AppResult<()>;

    /// 返回该定位策略下所有可见元素的序号
    async fn visible_matches(&self, locator: &Locator) -> AppResult<Vec<usize>>;

    /// 滚动到元素并点击
    async fn click(&self, element: &ElementRef) -> AppResult<()>;

    /// 清空并填写输入框
    async fn fill(&self, element: &ElementRef, text: &str) -> AppResult<()>;

    async fn page_html(&self) -> AppResult<String>;

    async fn eval_json(&self, script: &str) -> AppResult<JsonValue>;
}

/// 基于 chromiumoxide 的实现
pub struct ChromeDriver {
    executor: JsExecutor,
}

impl ChromeDriver {
    pub fn new(executor: JsExecutor) -> Self {
        Self { executor }
    }

    /// 会话结束时取回执行器以关闭页面
    pub fn into_executor(self) -> JsExecutor {
        self.executor
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> AppResult<()> {
        self.executor.page().goto(url).await.map_err(|e| {
            AppError::Browser(BrowserError::NavigationFailed {
                url: url.to_string(),
                source: Box::new(e),
            })
        })?;
        debug!("已导航到: {}", url);
        Ok(())
    }

    async fn current_url(&self) -> AppResult<String> {
        Ok(self.executor.page().url().await?.unwrap_or_default())
    }

    async fn wait_until_ready(&self, timeout: Duration) -> AppResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready: bool = self
                .executor
                .eval_as("document.readyState === 'complete' && !!document.body")
                .await
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::element_not_found(format!(
                    "page not ready after {}s",
                    timeout.as_secs()
                )));
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    async fn visible_matches(&self, locator: &Locator) -> AppResult<Vec<usize>> {
        let script = locator.script(
            "return els.map((el, i) => isVisible(el) ? i : -1).filter((i) => i >= 0);",
        );
        self.executor.eval_as(script).await
    }

    async fn click(&self, element: &ElementRef) -> AppResult<()> {
        let script = element.locator.script(&format!(
            r#"
            const el = els[{index}];
            if (!el) return false;
            el.scrollIntoView({{ block: "center" }});
            try {{
                el.click();
            }} catch (e) {{
                el.dispatchEvent(new MouseEvent("click", {{ bubbles: true, cancelable: true, view: window }}));
            }}
            return true;
            "#,
            index = element.index
        ));

        let clicked: bool = self.executor.eval_as(script).await?;
        if !clicked {
            return Err(AppError::element_not_found(format!(
                "element {:?}#{} disappeared before click",
                element.locator, element.index
            )));
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementRef, text: &str) -> AppResult<()> {
        // 使用原生 setter，保证前端框架能收到 input 事件
        let script = element.locator.script(&format!(
            r#"
            const el = els[{index}];
            if (!el) return false;
            const proto = el instanceof HTMLTextAreaElement
                ? HTMLTextAreaElement.prototype
                : HTMLInputElement.prototype;
            const setter = Object.getOwnPropertyDescriptor(proto, "value").set;
            el.focus();
            setter.call(el, "");
            setter.call(el, {text});
            el.dispatchEvent(new Event("input", {{ bubbles: true }}));
            el.dispatchEvent(new Event("change", {{ bubbles: true }}));
            return true;
            "#,
            index = element.index,
            text = serde_json::to_string(text)?
        ));

        let filled: bool = self.executor.eval_as(script).await?;
        if !filled {
            return Err(AppError::element_not_found(format!(
                "input {:?}#{} not found",
                element.locator, element.index
            )));
        }
        Ok(())
    }

    async fn page_html(&self) -> AppResult<String> {
        Ok(self.executor.page().content().await?)
    }

    async fn eval_json(&self, script: &str) -> AppResult<JsonValue> {
        self.executor.eval(script).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用的脚本化页面驱动

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// 记录所有交互，按预设返回结果
    #[derive(Default)]
    pub struct FakeDriver {
        visible: Mutex<HashMap<Locator, Vec<usize>>>,
        url: Mutex<String>,
        /// 导航后实际停留的 URL（模拟重定向）
        redirect: Option<String>,
        /// 点击某个定位策略后跳转到的 URL
        navigate_on_click: HashMap<Locator, String>,
        /// 点击某个定位策略后变为可见的元素
        reveal_on_click: HashMap<Locator, (Locator, Vec<usize>)>,
        html: String,
        eval: Option<Box<dyn Fn(&str) -> JsonValue + Send + Sync>>,
        pub clicks: Mutex<Vec<ElementRef>>,
        pub fills: Mutex<Vec<(ElementRef, String)>>,
    }

    impl FakeDriver {
        pub fn with_url(self, url: &str) -> Self {
            *self.url.lock().unwrap() = url.to_string();
            self
        }

        pub fn redirect_navigation_to(mut self, url: &str) -> Self {
            self.redirect = Some(url.to_string());
            self
        }

        pub fn with_visible(self, locator: Locator, indices: Vec<usize>) -> Self {
            self.visible.lock().unwrap().insert(locator, indices);
            self
        }

        pub fn navigate_on_click(mut self, locator: Locator, url: &str) -> Self {
            self.navigate_on_click.insert(locator, url.to_string());
            self
        }

        pub fn reveal_on_click(mut self, clicked: Locator, revealed: Locator, indices: Vec<usize>) -> Self {
            self.reveal_on_click.insert(clicked, (revealed, indices));
            self
        }

        pub fn with_html(mut self, html: &str) -> Self {
            self.html = html.to_string();
            self
        }

        pub fn with_eval_result(self, value: JsonValue) -> Self {
            self.with_eval(move |_| value.clone())
        }

        /// 按脚本内容决定返回值
        pub fn with_eval(mut self, handler: impl Fn(&str) -> JsonValue + Send + Sync + 'static) -> Self {
            self.eval = Some(Box::new(handler));
            self
        }

        pub fn clicked(&self, locator: &Locator) -> usize {
            self.clicks.lock().unwrap().iter().filter(|el| &el.locator == locator).count()
        }
    }

    #[async_trait]
    impl PageDriver for FakeDriver {
        async fn navigate(&self, url: &str) -> AppResult<()> {
            *self.url.lock().unwrap() = self.redirect.clone().unwrap_or_else(|| url.to_string());
            Ok(())
        }

        async fn current_url(&self) -> AppResult<String> {
            Ok(self.url.lock().unwrap().clone())
        }

        async fn wait_until_ready(&self, _timeout: Duration) -> AppResult<()> {
            Ok(())
        }

        async fn visible_matches(&self, locator: &Locator) -> AppResult<Vec<usize>> {
            Ok(self.visible.lock().unwrap().get(locator).cloned().unwrap_or_default())
        }

        async fn click(&self, element: &ElementRef) -> AppResult<()> {
            self.clicks.lock().unwrap().push(element.clone());
            if let Some(url) = self.navigate_on_click.get(&element.locator) {
                *self.url.lock().unwrap() = url.clone();
            }
            if let Some((revealed, indices)) = self.reveal_on_click.get(&element.locator) {
                self.visible.lock().unwrap().insert(revealed.clone(), indices.clone());
            }
            Ok(())
        }

        async fn fill(&self, element: &ElementRef, text: &str) -> AppResult<()> {
            self.fills.lock().unwrap().push((element.clone(), text.to_string()));
            Ok(())
        }

        async fn page_html(&self) -> AppResult<String> {
            Ok(self.html.clone())
        }

        async fn eval_json(&self, script: &str) -> AppResult<JsonValue> {
            Ok(self.eval.as_ref().map(|handler| handler(script)).unwrap_or(JsonValue::Null))
        }
    }
}
