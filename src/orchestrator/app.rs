//! 应用门面 - 编排层
//!
//! 组装队列、进度通道、工作线程池、状态聚合与推送，
//! 对外只暴露提交、查询、订阅、停止四个动作。
//! 指标导出和运行监控按配置在后台开启。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::job_queue::JobQueue;
use super::metrics_server;
use super::status::{StatusAggregator, UnifiedStatus};
use super::stream::{StatusStreamer, StreamEvent};
use super::worker_pool::WorkerPool;
use crate::config::Config;
use crate::error::{AdmissionError, AppResult};
use crate::infrastructure::MemoryKvStore;
use crate::models::{Credentials, JobId};
use crate::services::{
    AlertSink, ArtifactStore, AuditLogSink, EventSink, JobMetrics, ProgressChannel, SystemMonitor, WebhookNotifier,
};
use crate::workflow::{ExtractionEngine, JobExecutor};

/// 应用主结构
pub struct App {
    queue: Arc<JobQueue>,
    store: MemoryKvStore,
    aggregator: StatusAggregator,
    streamer: StatusStreamer,
    pool: WorkerPool,
    metrics: Arc<JobMetrics>,
    /// 指标服务与监控循环
    background: Vec<JoinHandle<()>>,
}

impl App {
    /// 使用真实浏览器抓取引擎初始化
    pub async fn initialize(config: Config) -> AppResult<Self> {
        let executor: Arc<dyn JobExecutor> = Arc::new(ExtractionEngine::new(&config));
        Self::with_executor(config, executor).await
    }

    /// 使用给定执行者初始化
    pub async fn with_executor(config: Config, executor: Arc<dyn JobExecutor>) -> AppResult<Self> {
        let queue = Arc::new(JobQueue::new(config.result_retention()));
        let store = MemoryKvStore::new();
        let progress = ProgressChannel::new(Arc::new(store.clone()), config.progress_ttl());
        let metrics = Arc::new(JobMetrics::new());

        let pool = WorkerPool::start(
            &config,
            Arc::clone(&queue),
            executor,
            progress.clone(),
            Arc::new(event_sinks(&config)),
            Arc::clone(&metrics),
        )?;

        let mut background = Vec::new();
        if let Some(addr) = non_blank(&config.metrics_addr) {
            background.push(metrics_server::serve(addr, Arc::clone(&metrics), Arc::clone(&queue)).await?);
        }
        if let Some(url) = non_blank(&config.monitor_webhook_url) {
            let monitor = SystemMonitor::new(
                url,
                config.monitor_interval(),
                Arc::clone(&metrics),
                ArtifactStore::new(&config.output_dir),
                config.max_concurrent_jobs * 2,
            );
            background.push(tokio::spawn(monitor.run()));
        }

        let aggregator = StatusAggregator::new(queue.clone(), progress, config.queue_page_size);
        let streamer = StatusStreamer::new(
            aggregator.clone(),
            config.stream_poll_interval(),
            config.heartbeat_interval(),
        );

        Ok(Self {
            queue,
            store,
            aggregator,
            streamer,
            pool,
            metrics,
            background,
        })
    }

    /// 提交抓取任务
    pub async fn submit(&self, email: &str, password: &str) -> Result<JobId, AdmissionError> {
        let credentials = Credentials::new(email, password)?;
        let purged = self.queue.purge_expired().await + self.store.purge_expired().await;
        if purged > 0 {
            info!("🧹 清理了 {} 条过期记录", purged);
        }
        let job_id = self.queue.submit(credentials).await?;
        self.metrics.set_queued(self.queue.queued_len().await);
        Ok(job_id)
    }

    pub fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    pub async fn status(&self, job_id: &JobId) -> UnifiedStatus {
        self.aggregator.status(job_id).await
    }

    /// 订阅任务状态推送，终态事件后自动结束
    pub fn stream(&self, job_id: &JobId) -> ReceiverStream<StreamEvent> {
        self.streamer.subscribe(job_id.clone())
    }

    /// 停止接收新任务并等待正在执行的任务结束
    pub async fn shutdown(self) {
        info!("🛑 正在停止服务...");
        for task in &self.background {
            task.abort();
        }
        self.pool.shutdown().await;
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

/// 审计日志总是开启；通知和告警按配置加上
fn event_sinks(config: &Config) -> Vec<Arc<dyn EventSink>> {
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(AuditLogSink)];
    if let Some(url) = non_blank(&config.webhook_url) {
        sinks.push(Arc::new(WebhookNotifier::new(url)));
    }
    if let Some(url) = non_blank(&config.alert_webhook_url) {
        sinks.push(Arc::new(AlertSink::new(url)));
    }
    sinks
}
