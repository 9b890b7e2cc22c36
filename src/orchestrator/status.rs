//! 任务状态聚合
//!
//! 把队列状态、进度快照、终态结果合成一个对外视图。
//! 任何一项子查询失败只会让视图少一块，不会让整个查询失败。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::error::AppResult;
use crate::models::{JobId, JobResult, JobStatus, ProgressSnapshot};
use crate::services::ProgressChannel;

/// 状态聚合需要的队列只读能力
#[async_trait]
pub trait QueueView: Send + Sync {
    async fn job_status(&self, job_id: &JobId) -> AppResult<JobStatus>;

    /// 按先后顺序列出排队中的任务
    async fn queued_jobs(&self, limit: usize) -> AppResult<Vec<JobId>>;

    async fn job_result(&self, job_id: &JobId) -> AppResult<Option<JobResult>>;
}

/// 对外的统一状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedStatus {
    pub job_id: JobId,
    pub status: JobStatus,
    pub running: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// 从 1 开始，只在排队时出现
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl UnifiedStatus {
    fn new(job_id: &JobId, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            status,
            running: status == JobStatus::InProgress,
            message: message.into(),
            progress: None,
            result: None,
            queue_position: None,
        }
    }
}

/// 状态聚合器
#[derive(Clone)]
pub struct StatusAggregator {
    queue: Arc<dyn QueueView>,
    progress: ProgressChannel,
    page_size: usize,
}

impl StatusAggregator {
    pub fn new(queue: Arc<dyn QueueView>, progress: ProgressChannel, page_size: usize) -> Self {
        Self {
            queue,
            progress,
            page_size,
        }
    }

    pub async fn status(&self, job_id: &JobId) -> UnifiedStatus {
        let status = match self.queue.job_status(job_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("[job {}] ⚠️ 查询任务状态失败: {}", job_id, e);
                JobStatus::Unknown
            }
        };

        match status {
            JobStatus::Queued => {
                let position = self.queue_position(job_id).await;
                let message = match position {
                    Some(position) => format!("Queued (position {})", position),
                    None => "Queued".to_string(),
                };
                UnifiedStatus {
                    queue_position: position,
                    ..UnifiedStatus::new(job_id, status, message)
                }
            }
            JobStatus::InProgress => match self.progress.read(job_id).await {
                Some(snapshot) => UnifiedStatus {
                    progress: Some(snapshot.clone()),
                    ..UnifiedStatus::new(job_id, status, snapshot.message)
                },
                None => UnifiedStatus::new(job_id, status, "in progress"),
            },
            JobStatus::Complete | JobStatus::Failed => {
                let result = self.terminal_result(job_id).await;
                let message = match (&result.error, status) {
                    (Some(error), _) => error.clone(),
                    (None, JobStatus::Complete) => "Job complete".to_string(),
                    (None, _) => "Job failed".to_string(),
                };
                UnifiedStatus {
                    result: Some(result),
                    ..UnifiedStatus::new(job_id, status, message)
                }
            }
            JobStatus::NotFound => UnifiedStatus::new(job_id, status, "Job not found or expired"),
            // 查询失败不等于任务消失，下一轮再看
            JobStatus::Unknown => UnifiedStatus::new(job_id, status, "Status temporarily unavailable"),
        }
    }

    /// 在排队列表中的位置；枚举失败或不在列表中时没有位置
    async fn queue_position(&self, job_id: &JobId) -> Option<usize> {
        match self.queue.queued_jobs(self.page_size).await {
            Ok(queued) => queued.iter().position(|id| id == job_id).map(|index| index + 1),
            Err(e) => {
                warn!("[job {}] ⚠️ 枚举排队任务失败: {}", job_id, e);
                None
            }
        }
    }

    /// 终态结果；没有结果时合成失败结果
    async fn terminal_result(&self, job_id: &JobId) -> JobResult {
        match self.queue.job_result(job_id).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!("[job {}] ⚠️ 任务已结束但没有结果", job_id);
                JobResult::missing()
            }
            Err(e) => {
                warn!("[job {}] ⚠️ 读取任务结果失败: {}", job_id, e);
                JobResult::missing()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{AppError, StoreError};

    /// 可以直接摆布的队列视图
    #[derive(Default)]
    pub struct StaticQueue {
        pub status: Mutex<Option<JobStatus>>,
        pub queued: Mutex<Vec<JobId>>,
        pub result: Mutex<Option<JobResult>>,
        pub broken_listing: bool,
        pub broken_status: bool,
    }

    impl StaticQueue {
        pub fn with_status(status: JobStatus) -> Self {
            Self {
                status: Mutex::new(Some(status)),
                ..Default::default()
            }
        }

        pub fn set_status(&self, status: JobStatus) {
            *self.status.lock().unwrap() = Some(status);
        }

        pub fn set_result(&self, result: JobResult) {
            *self.result.lock().unwrap() = Some(result);
        }
    }

    #[async_trait]
    impl QueueView for StaticQueue {
        async fn job_status(&self, _job_id: &JobId) -> AppResult<JobStatus> {
            if self.broken_status {
                return Err(AppError::Store(StoreError::Unavailable("queue status down".to_string())));
            }
            Ok(self.status.lock().unwrap().unwrap_or(JobStatus::NotFound))
        }

        async fn queued_jobs(&self, limit: usize) -> AppResult<Vec<JobId>> {
            if self.broken_listing {
                return Err(AppError::Store(StoreError::Unavailable("queue listing down".to_string())));
            }
            Ok(self.queued.lock().unwrap().iter().take(limit).cloned().collect())
        }

        async fn job_result(&self, _job_id: &JobId) -> AppResult<Option<JobResult>> {
            Ok(self.result.lock().unwrap().clone())
        }
    }
}
