//! 任务事件通知
//!
//! 任务开始、完成、失败时生成事件，投递给所有已配置的接收端。
//! 投递在独立任务中进行，失败只记日志，不影响任务本身。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    Completed,
    Failed,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Started => "started",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
        }
    }
}

/// 任务事件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub event: JobEventKind,
    pub facilitator: String,
    pub group: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl JobEvent {
    pub fn started(facilitator: &str, group: &str) -> Self {
        Self::new(JobEventKind::Started, facilitator, group, String::new(), None)
    }

    pub fn completed(facilitator: &str, group: &str, students: usize) -> Self {
        Self::new(
            JobEventKind::Completed,
            facilitator,
            group,
            format!("{} students exported", students),
            None,
        )
    }

    pub fn failed(facilitator: &str, group: &str, error: &str, error_type: Option<&str>) -> Self {
        Self::new(
            JobEventKind::Failed,
            facilitator,
            group,
            error.to_string(),
            error_type.map(str::to_string),
        )
    }

    fn new(
        event: JobEventKind,
        facilitator: &str,
        group: &str,
        message: String,
        error_type: Option<String>,
    ) -> Self {
        let or_unknown = |value: &str| {
            if value.trim().is_empty() {
                "Unknown".to_string()
            } else {
                value.to_string()
            }
        };
        Self {
            event,
            facilitator: or_unknown(facilitator),
            group: or_unknown(group),
            status: event.as_str().to_string(),
            message,
            error_type,
        }
    }

    pub fn is_invalid_credentials(&self) -> bool {
        self.error_type.as_deref() == Some("invalid_credentials")
    }
}

/// 事件接收端
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &JobEvent) -> Result<()>;
}

/// 审计日志：以结构化字段写入 tracing
pub struct AuditLogSink;

#[async_trait]
impl EventSink for AuditLogSink {
    fn name(&self) -> &'static str {
        "audit_log"
    }

    async fn deliver(&self, event: &JobEvent) -> Result<()> {
        info!(
            target: "audit",
            event = event.event.as_str(),
            facilitator = %event.facilitator,
            group = %event.group,
            error_type = event.error_type.as_deref().unwrap_or(""),
            "📝 {}",
            event.message
        );
        Ok(())
    }
}

const COLOR_STARTED: u32 = 0x3498db;
const COLOR_COMPLETED: u32 = 0x2ecc71;
const COLOR_AUTH_FAILED: u32 = 0xe67e22;
const COLOR_FAILED: u32 = 0xe74c3c;

/// Discord 风格的 webhook 通知
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// 构造 embed 消息体
    pub fn payload(event: &JobEvent) -> Value {
        let (title, color) = match event.event {
            JobEventKind::Started => ("🚀 Scraping Started", COLOR_STARTED),
            JobEventKind::Completed => ("✅ Scraping Completed", COLOR_COMPLETED),
            JobEventKind::Failed if event.is_invalid_credentials() => {
                ("🔐 Login Failed: Invalid Credentials", COLOR_AUTH_FAILED)
            }
            JobEventKind::Failed => ("❌ Scraping Failed", COLOR_FAILED),
        };

        let fields = if event.is_invalid_credentials() {
            vec![json!({
                "name": "Reason",
                "value": "The provided email or password was rejected.",
                "inline": false,
            })]
        } else {
            vec![
                json!({"name": "Facilitator", "value": event.facilitator, "inline": true}),
                json!({"name": "Class", "value": event.group, "inline": true}),
            ]
        };

        let mut embed = json!({
            "title": title,
            "color": color,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": fields,
            "footer": {"text": "Student Dashboard Scraper"},
        });
        if !event.message.is_empty() {
            embed["description"] = json!(format!("**Message**: {}", event.message));
        }

        json!({ "embeds": [embed] })
    }
}

#[async_trait]
impl EventSink for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &JobEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&Self::payload(event))
            .send()
            .await
            .context("webhook 请求失败")?
            .error_for_status()
            .context("webhook 返回错误状态")?;
        Ok(())
    }
}

/// 把事件投递给所有接收端，不等待结果
pub fn dispatch(sinks: &Arc<Vec<Arc<dyn EventSink>>>, event: JobEvent) {
    if sinks.is_empty() {
        return;
    }
    let sinks = Arc::clone(sinks);
    tokio::spawn(async move {
        for sink in sinks.iter() {
            if let Err(e) = sink.deliver(&event).await {
                warn!("⚠️ 事件投递失败 ({}): {:#}", sink.name(), e);
            }
        }
    });
}
