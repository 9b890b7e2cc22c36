//! 浏览器会话
//!
//! 每个任务独占一个会话，任务结束时无论成功失败都必须调用 `close`。
//! 未经 `close` 就被丢弃的会话由 `SessionGuard` 兜底释放。

pub mod connection;
pub mod headless;

use std::path::Path;
use std::time::Duration;

use chromiumoxide::Browser;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{BrowserMode, Config};
use crate::error::{AppError, AppResult, BrowserError};
use crate::infrastructure::{ChromeDriver, JsExecutor};

/// 释放会话的上限，需小于线程池留出的余量
const CLOSE_TIMEOUT: Duration = Duration::from_secs(20);

pub struct BrowserSession {
    driver: ChromeDriver,
    guard: SessionGuard,
}

impl BrowserSession {
    /// 按配置打开会话并创建空白页面
    pub async fn open(config: &Config) -> AppResult<Self> {
        let (browser, handler_task) = match config.browser_mode {
            BrowserMode::Remote => connection::connect_remote(&config.browser_url).await?,
            BrowserMode::Headless => {
                headless::launch_headless(config.chrome_executable.as_deref().map(Path::new)).await?
            }
        };
        let created = browser.new_page("about:blank").await;
        let mut guard = SessionGuard::new(browser, handler_task, config.browser_mode);

        let page = match created {
            Ok(page) => page,
            Err(e) => {
                // 页面没建起来也要释放会话
                let session_err = AppError::Browser(BrowserError::PageCreationFailed { source: Box::new(e) });
                guard.release().await;
                return Err(session_err);
            }
        };

        Ok(Self {
            driver: ChromeDriver::new(JsExecutor::new(page)),
            guard,
        })
    }

    pub fn driver(&self) -> &ChromeDriver {
        &self.driver
    }

    /// 释放会话资源，错误只记录不返回；超过上限时放弃等待
    pub async fn close(self) {
        let Self { driver, mut guard } = self;
        let closing = async {
            if let Err(e) = driver.into_executor().close().await {
                debug!("关闭页面失败: {}", e);
            }
            guard.release().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            warn!("⚠️ 释放会话超过 {}s，强制结束", CLOSE_TIMEOUT.as_secs());
        }
    }
}

/// 会话底层资源
///
/// 丢弃时若还没释放：有运行时就转入后台释放，否则只停掉事件处理任务
struct SessionGuard {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    mode: BrowserMode,
}

impl SessionGuard {
    fn new(browser: Browser, handler_task: JoinHandle<()>, mode: BrowserMode) -> Self {
        Self {
            browser: Some(browser),
            handler_task: Some(handler_task),
            mode,
        }
    }

    async fn release(&mut self) {
        if let Some(browser) = self.browser.take() {
            shutdown(browser, self.mode).await;
        }
        self.abort_handler();
        debug!("浏览器会话已释放");
    }

    fn abort_handler(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(browser) = self.browser.take() else {
            self.abort_handler();
            return;
        };
        match (Handle::try_current(), self.handler_task.take()) {
            (Ok(runtime), Some(task)) => {
                warn!("⚠️ 会话未关闭就被丢弃，转入后台释放");
                let mode = self.mode;
                runtime.spawn(async move {
                    shutdown(browser, mode).await;
                    task.abort();
                });
            }
            (_, task) => {
                if let Some(task) = task {
                    task.abort();
                }
                drop(browser);
            }
        }
    }
}

async fn shutdown(mut browser: Browser, mode: BrowserMode) {
    match mode {
        // 远程浏览器是共享的，只关闭本任务的隐身上下文
        BrowserMode::Remote => {
            if let Err(e) = browser.quit_incognito_context().await {
                warn!("⚠️ 关闭隐身上下文失败: {}", e);
            }
        }
        BrowserMode::Headless => {
            if let Err(e) = browser.close().await {
                warn!("⚠️ 关闭浏览器失败: {}", e);
            }
            let _ = browser.wait().await;
        }
    }
}
