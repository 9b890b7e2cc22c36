//! 指标导出
//!
//! 独立的 HTTP 监听，只提供 `/metrics` 和 `/health`。

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::job_queue::JobQueue;
use crate::error::AppResult;
use crate::services::JobMetrics;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct MetricsState {
    metrics: Arc<JobMetrics>,
    queue: Arc<JobQueue>,
}

pub fn router(metrics: Arc<JobMetrics>, queue: Arc<JobQueue>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(health_check))
        .with_state(MetricsState { metrics, queue })
}

/// 绑定地址并在后台提供服务
pub async fn serve(addr: &str, metrics: Arc<JobMetrics>, queue: Arc<JobQueue>) -> AppResult<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    info!("📈 指标导出已开启: http://{}/metrics", listener.local_addr()?);

    let app = router(metrics, queue);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("❌ 指标服务异常退出: {}", e);
        }
    }))
}

async fn render_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    // 排队数在读取时刷新
    state.metrics.set_queued(state.queue.queued_len().await);
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.metrics.render())
}

async fn health_check() -> &'static str {
    "OK"
}
