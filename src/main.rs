use anyhow::{Context, Result};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use camp_scrape_jobs::utils::logging;
use camp_scrape_jobs::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load().context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    let email = std::env::var("DICODING_EMAIL").context("缺少环境变量 DICODING_EMAIL")?;
    let password = std::env::var("DICODING_PASSWORD").context("缺少环境变量 DICODING_PASSWORD")?;

    // 初始化并运行应用
    let app = App::initialize(config).await?;
    let job_id = app.submit(&email, &password).await?;
    info!("[job {}] 📨 任务已提交", job_id);

    let mut events = app.stream(&job_id);
    while let Some(event) = events.next().await {
        print!("{}", event.to_sse_frame());
    }

    let status = app.status(&job_id).await;
    if status.result.as_ref().is_some_and(|result| result.success) {
        info!("[job {}] ✅ {}", job_id, status.message);
    } else {
        warn!("[job {}] ⚠️ {}", job_id, status.message);
    }

    app.shutdown().await;
    Ok(())
}
