//! 状态推送
//!
//! 一个连接一个轮询循环：聚合状态 → 分类 → 去重后推送 → 到终态结束。
//! 长时间无推送时发送心跳，防止中间代理断开连接。
//! 客户端断开只结束本次推送，不影响任务本身。

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::status::{StatusAggregator, UnifiedStatus};
use crate::models::JobId;

/// 推送事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Status,
    Progress,
    Complete,
    Error,
    Heartbeat,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Status => "status",
            StreamKind::Progress => "progress",
            StreamKind::Complete => "complete",
            StreamKind::Error => "error",
            StreamKind::Heartbeat => "heartbeat",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StreamKind::Complete | StreamKind::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: StreamKind,
    pub data: Value,
}

impl StreamEvent {
    /// 文本事件流格式
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind.as_str(), self.data)
    }
}

/// 状态分类
pub fn classify(status: &UnifiedStatus) -> StreamKind {
    use crate::models::JobStatus;

    if status.status == JobStatus::NotFound {
        return StreamKind::Error;
    }
    match &status.result {
        Some(result) if result.success => StreamKind::Complete,
        Some(_) => StreamKind::Error,
        None if status.progress.is_some() => StreamKind::Progress,
        None => StreamKind::Status,
    }
}

#[derive(Clone)]
pub struct StatusStreamer {
    aggregator: StatusAggregator,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl StatusStreamer {
    pub fn new(aggregator: StatusAggregator, poll_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            aggregator,
            poll_interval,
            heartbeat_interval,
        }
    }

    /// 在后台开始推送，返回事件流
    pub fn subscribe(&self, job_id: JobId) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(16);
        let streamer = self.clone();
        tokio::spawn(async move { streamer.run(job_id, tx).await });
        ReceiverStream::new(rx)
    }

    /// 推送循环，直到终态事件发出或接收端关闭
    pub async fn run(&self, job_id: JobId, tx: mpsc::Sender<StreamEvent>) {
        let mut last_sent: Option<(StreamKind, String)> = None;
        let mut last_emit = Instant::now();

        loop {
            if tx.is_closed() {
                debug!("[job {}] 客户端已断开，停止推送", job_id);
                return;
            }

            let status = self.aggregator.status(&job_id).await;
            let kind = classify(&status);
            let data = serde_json::to_value(&status).unwrap_or(Value::Null);
            let key = (kind, data.to_string());

            if last_sent.as_ref() != Some(&key) {
                if tx.send(StreamEvent { kind, data }).await.is_err() {
                    return;
                }
                last_sent = Some(key);
                last_emit = Instant::now();
            } else if last_emit.elapsed() >= self.heartbeat_interval {
                let heartbeat = StreamEvent {
                    kind: StreamKind::Heartbeat,
                    data: json!({"job_id": job_id, "timestamp": Utc::now().to_rfc3339()}),
                };
                if tx.send(heartbeat).await.is_err() {
                    return;
                }
                last_emit = Instant::now();
            }

            if kind.is_terminal() {
                debug!("[job {}] 推送结束: {}", job_id, kind.as_str());
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ScrapeError;
    use crate::infrastructure::MemoryKvStore;
    use crate::models::{JobResult, JobStatus, ScrapeSummary};
    use crate::orchestrator::status::testing::StaticQueue;
    use crate::services::ProgressChannel;

    fn streamer(queue: Arc<StaticQueue>) -> (StatusStreamer, ProgressChannel) {
        let channel = ProgressChannel::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(60));
        let aggregator = StatusAggregator::new(queue, channel.clone(), 100);
        (
            StatusStreamer::new(aggregator, Duration::from_millis(500), Duration::from_secs(15)),
            channel,
        )
    }

    fn success() -> JobResult {
        JobResult::succeeded(&ScrapeSummary {
            file: "G_20260101T000000Z.json".to_string(),
            students: 3,
            facilitator: "Mentor".to_string(),
            group: "G".to_string(),
        })
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn classification_follows_result_and_progress() {
        let mut status = UnifiedStatus {
            job_id: JobId::from("a"),
            status: JobStatus::InProgress,
            running: true,
            message: "in progress".to_string(),
            progress: None,
            result: None,
            queue_position: None,
        };
        assert_eq!(classify(&status), StreamKind::Status);

        status.result = Some(JobResult::failed(&ScrapeError::InvalidCredentials));
        assert_eq!(classify(&status), StreamKind::Error);

        status.result = Some(success());
        assert_eq!(classify(&status), StreamKind::Complete);

        status.result = None;
        status.status = JobStatus::NotFound;
        assert_eq!(classify(&status), StreamKind::Error);

        status.status = JobStatus::Unknown;
        assert_eq!(classify(&status), StreamKind::Status);
    }

    #[tokio::test(start_paused = true)]
    async fn status_lookup_failure_keeps_stream_open() {
        let queue = Arc::new(StaticQueue {
            broken_status: true,
            ..StaticQueue::with_status(JobStatus::InProgress)
        });
        let (streamer, _) = streamer(queue);
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move { streamer.run(JobId::from("a"), tx).await });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, StreamKind::Status);
        assert_eq!(first.data["status"], "unknown");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());
    }

    #[test]
    fn sse_frame_layout() {
        let event = StreamEvent {
            kind: StreamKind::Progress,
            data: json!({"percent": 10}),
        };
        assert_eq!(event.to_sse_frame(), "event: progress\ndata: {\"percent\":10}\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn emits_exactly_one_terminal_event_then_closes() {
        let queue = Arc::new(StaticQueue::with_status(JobStatus::InProgress));
        let (streamer, channel) = streamer(queue.clone());
        let job = JobId::from("a");
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn({
            let streamer = streamer.clone();
            let job = job.clone();
            async move { streamer.run(job, tx).await }
        });

        channel.write(&job, 30, "Logged in", 3, 10).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        queue.set_result(success());
        queue.set_status(JobStatus::Complete);

        task.await.unwrap();
        let events = drain(rx).await;
        let kinds: Vec<StreamKind> = events.iter().map(|e| e.kind).collect();

        assert_eq!(kinds.iter().filter(|k| k.is_terminal()).count(), 1);
        assert_eq!(kinds.last(), Some(&StreamKind::Complete));
        assert!(kinds.contains(&StreamKind::Progress));
    }

    #[tokio::test(start_paused = true)]
    async fn identical_status_is_not_repeated() {
        let queue = Arc::new(StaticQueue::with_status(JobStatus::InProgress));
        let (streamer, _) = streamer(queue.clone());
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move { streamer.run(JobId::from("a"), tx).await });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, StreamKind::Status);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stream_sends_heartbeat() {
        let queue = Arc::new(StaticQueue::with_status(JobStatus::Queued));
        let (streamer, _) = streamer(queue);
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move { streamer.run(JobId::from("a"), tx).await });

        assert_eq!(rx.recv().await.unwrap().kind, StreamKind::Status);
        let heartbeat = rx.recv().await.unwrap();
        assert_eq!(heartbeat.kind, StreamKind::Heartbeat);
        assert_eq!(heartbeat.data["job_id"], "a");
        assert!(heartbeat.data["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_polling() {
        let queue = Arc::new(StaticQueue::with_status(JobStatus::InProgress));
        let (streamer, _) = streamer(queue);
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let finished = tokio::time::timeout(Duration::from_secs(5), streamer.run(JobId::from("a"), tx)).await;
        assert!(finished.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_job_ends_with_error() {
        let (streamer, _) = streamer(Arc::new(StaticQueue::default()));
        let events: Vec<StreamEvent> = {
            use tokio_stream::StreamExt;
            streamer.subscribe(JobId::from("gone")).collect().await
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, StreamKind::Error);
    }
}
