//! 任务队列与准入控制 - 编排层
//!
//! - 提交时校验去重：同一账号同时只能有一个任务在排队或执行
//! - 严格先进先出，由调度器按并发上限取出
//! - 终态记录保留一段时间后过期，之后查询为 not_found

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use super::status::QueueView;
use crate::error::{AdmissionError, AppResult};
use crate::models::{Credentials, JobId, JobResult, JobStatus};
use crate::utils::mask_email;

struct JobRecord {
    identity: String,
    status: JobStatus,
    /// 被取出执行时移交给工作线程
    credentials: Option<Credentials>,
    enqueued_at: DateTime<Utc>,
    finished_at: Option<Instant>,
    result: Option<JobResult>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, JobRecord>,
    waiting: VecDeque<JobId>,
    /// 身份键 → 正在排队或执行的任务
    in_flight: HashMap<String, JobId>,
}

/// 被调度器取出的任务
#[derive(Debug)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub credentials: Credentials,
    pub enqueued_at: DateTime<Utc>,
}

/// 任务队列
pub struct JobQueue {
    state: RwLock<QueueState>,
    notify: Arc<Notify>,
    retention: Duration,
}

impl JobQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            notify: Arc::new(Notify::new()),
            retention,
        }
    }

    /// 提交任务
    ///
    /// 同一身份已有任务在排队或执行时返回 Conflict，而不是合并
    pub async fn submit(&self, credentials: Credentials) -> Result<JobId, AdmissionError> {
        let identity = credentials.identity_key();
        let masked = mask_email(credentials.email());

        let job_id = {
            let mut state = self.state.write().await;
            if let Some(existing) = state.in_flight.get(&identity) {
                debug!("重复提交被拒绝: {} (已有任务 {})", masked, existing);
                return Err(AdmissionError::Conflict {
                    existing_job_id: existing.to_string(),
                });
            }

            let job_id = JobId::generate();
            state.jobs.insert(
                job_id.clone(),
                JobRecord {
                    identity: identity.clone(),
                    status: JobStatus::Queued,
                    credentials: Some(credentials),
                    enqueued_at: Utc::now(),
                    finished_at: None,
                    result: None,
                },
            );
            state.waiting.push_back(job_id.clone());
            state.in_flight.insert(identity, job_id.clone());
            job_id
        };

        info!("[job {}] 📥 已入队: {}", job_id, masked);
        self.notify.notify_one();
        Ok(job_id)
    }

    /// 取出队首任务并标记为执行中，队列为空时等待
    pub async fn claim_next(&self) -> ClaimedJob {
        loop {
            if let Some(claimed) = self.try_claim().await {
                return claimed;
            }
            self.notify.notified().await;
        }
    }

    async fn try_claim(&self) -> Option<ClaimedJob> {
        let mut state = self.state.write().await;
        while let Some(job_id) = state.waiting.pop_front() {
            let Some(record) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            let Some(credentials) = record.credentials.take() else {
                continue;
            };
            record.status = JobStatus::InProgress;
            return Some(ClaimedJob {
                job_id,
                credentials,
                enqueued_at: record.enqueued_at,
            });
        }
        None
    }

    /// 写入终态
    ///
    /// 结果为空时也接受，状态查询会合成失败结果
    pub async fn finish(&self, job_id: &JobId, status: JobStatus, result: Option<JobResult>) {
        let mut state = self.state.write().await;
        let Some(record) = state.jobs.get_mut(job_id) else {
            return;
        };
        record.status = status;
        record.result = result;
        record.finished_at = Some(Instant::now());
        let identity = record.identity.clone();

        if state.in_flight.get(&identity) == Some(job_id) {
            state.in_flight.remove(&identity);
        }
    }

    fn expired(&self, record: &JobRecord, now: Instant) -> bool {
        record
            .finished_at
            .is_some_and(|finished| now.duration_since(finished) >= self.retention)
    }

    /// 任务当前状态，未知或已过期为 NotFound
    pub async fn status(&self, job_id: &JobId) -> JobStatus {
        let state = self.state.read().await;
        match state.jobs.get(job_id) {
            Some(record) if !self.expired(record, Instant::now()) => record.status,
            _ => JobStatus::NotFound,
        }
    }

    pub async fn result(&self, job_id: &JobId) -> Option<JobResult> {
        let state = self.state.read().await;
        state
            .jobs
            .get(job_id)
            .filter(|record| !self.expired(record, Instant::now()))
            .and_then(|record| record.result.clone())
    }

    /// 按先后顺序列出排队中的任务，最多 `limit` 个
    pub async fn list_queued(&self, limit: usize) -> Vec<JobId> {
        let state = self.state.read().await;
        state.waiting.iter().take(limit).cloned().collect()
    }

    pub async fn queued_len(&self) -> usize {
        self.state.read().await.waiting.len()
    }

    /// 清理过期的终态记录，返回清理数量
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        let retention = self.retention;
        state.jobs.retain(|_, record| {
            !record
                .finished_at
                .is_some_and(|finished| now.duration_since(finished) >= retention)
        });
        before - state.jobs.len()
    }
}

#[async_trait]
impl QueueView for JobQueue {
    async fn job_status(&self, job_id: &JobId) -> AppResult<JobStatus> {
        Ok(self.status(job_id).await)
    }

    async fn queued_jobs(&self, limit: usize) -> AppResult<Vec<JobId>> {
        Ok(self.list_queued(limit).await)
    }

    async fn job_result(&self, job_id: &JobId) -> AppResult<Option<JobResult>> {
        Ok(self.result(job_id).await)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::ScrapeError;

    fn creds(email: &str) -> Credentials {
        Credentials::new(email, "secret").unwrap()
    }

    fn queue() -> JobQueue {
        JobQueue::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn duplicate_in_flight_submission_conflicts() {
        let queue = queue();
        let first = assert_ok!(queue.submit(creds("mentor@example.com")).await);

        let err = assert_err!(queue.submit(creds("MENTOR@example.com")).await);
        assert_eq!(
            err,
            AdmissionError::Conflict {
                existing_job_id: first.to_string()
            }
        );

        // 执行中也算
        let claimed = queue.claim_next().await;
        assert_eq!(claimed.job_id, first);
        assert_err!(queue.submit(creds("mentor@example.com")).await);

        // 结束后可以再次提交
        queue
            .finish(&first, JobStatus::Complete, Some(JobResult::failed(&ScrapeError::InvalidCredentials)))
            .await;
        assert_ok!(queue.submit(creds("mentor@example.com")).await);
    }

    #[tokio::test]
    async fn claims_in_fifo_order() {
        let queue = queue();
        let a = queue.submit(creds("a@example.com")).await.unwrap();
        let b = queue.submit(creds("b@example.com")).await.unwrap();
        let c = queue.submit(creds("c@example.com")).await.unwrap();

        assert_eq!(queue.list_queued(10).await, vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(queue.list_queued(2).await.len(), 2);

        let first = queue.claim_next().await;
        assert_eq!(first.job_id, a);
        assert_eq!(first.credentials.email(), "a@example.com");
        assert_eq!(queue.status(&a).await, JobStatus::InProgress);
        assert_eq!(queue.list_queued(10).await, vec![b.clone(), c]);
        assert_eq!(queue.claim_next().await.job_id, b);
    }

    #[tokio::test]
    async fn claim_waits_for_submission() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim_next().await.job_id })
        };
        tokio::task::yield_now().await;

        let id = queue.submit(creds("late@example.com")).await.unwrap();
        assert_eq!(waiter.await.unwrap(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_expire_after_retention() {
        let queue = JobQueue::new(Duration::from_secs(60));
        let id = queue.submit(creds("a@example.com")).await.unwrap();
        queue.claim_next().await;
        queue.finish(&id, JobStatus::Failed, None).await;
        assert_eq!(queue.status(&id).await, JobStatus::Failed);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(queue.status(&id).await, JobStatus::NotFound);
        assert_eq!(queue.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        assert_eq!(queue().status(&JobId::from("nope")).await, JobStatus::NotFound);
    }
}
