//! 运行监控
//!
//! 定期把运行概况发到监控 webhook；任务出现运行性故障时发告警。
//! 两个 webhook 都是可选的，未配置时对应功能关闭。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use super::metrics::{JobMetrics, MetricsSnapshot};
use super::notification::{EventSink, JobEvent, JobEventKind};
use super::ArtifactStore;

const COLOR_HEALTHY: u32 = 0x57f287;
const COLOR_WARNING: u32 = 0xfee75c;
const COLOR_ALERT: u32 = 0xed4245;

/// 一次运行概况
#[derive(Debug, Clone, PartialEq)]
pub struct SystemReport {
    pub uptime: Duration,
    pub metrics: MetricsSnapshot,
    /// 上次报告以来新增的失败数
    pub new_failures: u64,
    pub artifacts: Option<usize>,
    /// 排队超过这个数视为积压
    pub backlog_limit: usize,
}

impl SystemReport {
    pub fn healthy(&self) -> bool {
        self.new_failures == 0 && self.metrics.queued <= self.backlog_limit as i64
    }

    pub fn payload(&self) -> Value {
        let color = if self.healthy() { COLOR_HEALTHY } else { COLOR_WARNING };
        let average = match self.metrics.average_duration() {
            Some(average) => format!("{}s", average.as_secs()),
            None => "n/a".to_string(),
        };
        let artifacts = match self.artifacts {
            Some(count) => count.to_string(),
            None => "n/a".to_string(),
        };
        let value = format!(
            "• Queued: {}\n• Running: {}\n• Completed: {} ok / {} failed\n• Avg duration: {}\n• Exports: {}\n• Uptime: {}",
            self.metrics.queued,
            self.metrics.running,
            self.metrics.succeeded,
            self.metrics.failed,
            average,
            artifacts,
            format_uptime(self.uptime),
        );
        let footer = if self.healthy() {
            "Status: 🟢 Healthy"
        } else {
            "Status: ⚠️ Issues Detected"
        };

        json!({
            "username": "Scraper Monitor",
            "embeds": [{
                "title": "📊 Scraper Monitor",
                "color": color,
                "fields": [{"name": "System Status", "value": value, "inline": false}],
                "footer": {"text": footer},
            }],
        })
    }
}

/// `1 day, 2:03:04` 形式的运行时长
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, rest) = (total / 86_400, total % 86_400);
    let clock = format!("{}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

/// 告警消息体
pub fn alert_payload(title: &str, details: &[(&str, String)]) -> Value {
    let fields: Vec<Value> = details
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value, "inline": false}))
        .collect();
    json!({
        "username": "Scraper Alert",
        "embeds": [{
            "title": format!("🚨 {}", title),
            "color": COLOR_ALERT,
            "fields": fields,
            "timestamp": Utc::now().to_rfc3339(),
        }],
    })
}

fn webhook_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

async fn post(client: &reqwest::Client, url: &str, payload: &Value) -> Result<()> {
    client
        .post(url)
        .json(payload)
        .send()
        .await
        .context("webhook 请求失败")?
        .error_for_status()
        .context("webhook 返回错误状态")?;
    Ok(())
}

/// 定期运行报告
pub struct SystemMonitor {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    metrics: Arc<JobMetrics>,
    store: ArtifactStore,
    backlog_limit: usize,
    started_at: Instant,
}

impl SystemMonitor {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        metrics: Arc<JobMetrics>,
        store: ArtifactStore,
        backlog_limit: usize,
    ) -> Self {
        Self {
            client: webhook_client(),
            url: url.into(),
            interval,
            metrics,
            store,
            backlog_limit,
            started_at: Instant::now(),
        }
    }

    /// 采集当前概况
    pub async fn collect(&self, failures_before: u64) -> SystemReport {
        let metrics = self.metrics.snapshot();
        let artifacts = match self.store.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("⚠️ 统计导出文件失败: {:#}", e);
                None
            }
        };
        SystemReport {
            uptime: self.started_at.elapsed(),
            metrics,
            new_failures: metrics.failed.saturating_sub(failures_before),
            artifacts,
            backlog_limit: self.backlog_limit,
        }
    }

    /// 报告循环，任务被取消时结束
    pub async fn run(self) {
        info!("📊 运行监控已开启 (间隔 {}s)", self.interval.as_secs());
        let mut failures_seen = self.metrics.snapshot().failed;
        loop {
            tokio::time::sleep(self.interval).await;
            let report = self.collect(failures_seen).await;
            failures_seen = report.metrics.failed;
            if let Err(e) = post(&self.client, &self.url, &report.payload()).await {
                warn!("⚠️ 发送运行报告失败: {:#}", e);
            }
        }
    }
}

/// 运行性故障告警
///
/// 凭据错误属于用户输入问题，不告警
pub struct AlertSink {
    client: reqwest::Client,
    url: String,
}

impl AlertSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: webhook_client(),
            url: url.into(),
        }
    }

    pub fn should_alert(event: &JobEvent) -> bool {
        event.event == JobEventKind::Failed && !event.is_invalid_credentials()
    }

    pub fn payload(event: &JobEvent) -> Value {
        alert_payload(
            "Scrape job failed",
            &[
                ("Facilitator", event.facilitator.clone()),
                ("Class", event.group.clone()),
                ("Error", event.message.clone()),
                ("Type", event.error_type.clone().unwrap_or_else(|| "extraction".to_string())),
            ],
        )
    }
}

#[async_trait]
impl EventSink for AlertSink {
    fn name(&self) -> &'static str {
        "alert"
    }

    async fn deliver(&self, event: &JobEvent) -> Result<()> {
        if !Self::should_alert(event) {
            return Ok(());
        }
        post(&self.client, &self.url, &Self::payload(event)).await
    }
}
