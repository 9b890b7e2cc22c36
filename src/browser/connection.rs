use chromiumoxide::Browser;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::error::{AppError, AppResult, BrowserError};

/// 连接到远程浏览器，并为本次任务开启独立的隐身上下文
///
/// 同一个远程浏览器上的多个任务互不共享 cookie / 登录状态
pub async fn connect_remote(browser_url: &str) -> AppResult<(Browser, JoinHandle<()>)> {
    info!("🔌 正在连接到浏览器: {}", browser_url);

    let (mut browser, mut handler) = Browser::connect(browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        AppError::browser_connection_failed(browser_url, e)
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    browser.start_incognito_context().await.map_err(|e| {
        error!("创建隐身上下文失败: {}", e);
        AppError::Browser(BrowserError::ConfigurationFailed(e.to_string()))
    })?;
    debug!("隐身上下文已创建");

    // 添加短暂延迟以等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    Ok((browser, handler_task))
}
