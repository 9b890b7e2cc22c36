//! 进度通道
//!
//! 工作线程通过 `ProgressReporter` 发出进度事件，协调任务把它们写入键值存储；
//! 状态查询只读存储，两边不直接共享内存。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::infrastructure::KvStore;
use crate::models::{JobId, ProgressSnapshot};

/// 存储中的进度键
pub fn progress_key(job_id: &JobId) -> String {
    format!("job_progress:{}", job_id)
}

/// 进度存储的读写入口
#[derive(Clone)]
pub struct ProgressChannel {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ProgressChannel {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// 写入一份快照（百分比截断到 0..=100，打上当前时间）
    pub async fn write(
        &self,
        job_id: &JobId,
        percent: i64,
        message: &str,
        current_step: u64,
        total_steps: u64,
    ) -> AppResult<()> {
        let snapshot = ProgressSnapshot::new(percent, message, current_step, total_steps);
        self.store.set(&progress_key(job_id), snapshot.encode(), self.ttl).await
    }

    pub async fn apply(&self, update: &ProgressUpdate) -> AppResult<()> {
        self.write(
            &update.job_id,
            i64::from(update.percent),
            &update.message,
            update.current_step,
            update.total_steps,
        )
        .await
    }

    /// 读取最新快照
    ///
    /// 存储错误或无法解码都视为“暂无进度”
    pub async fn read(&self, job_id: &JobId) -> Option<ProgressSnapshot> {
        let raw = match self.store.get(&progress_key(job_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("[job {}] ⚠️ 读取进度失败: {}", job_id, e);
                return None;
            }
        };

        let snapshot = ProgressSnapshot::decode(&raw);
        if snapshot.is_none() {
            debug!("[job {}] 进度值无法解码，忽略", job_id);
        }
        snapshot
    }
}

/// 工作线程发出的一次进度更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub percent: u8,
    pub message: String,
    pub current_step: u64,
    pub total_steps: u64,
}

/// 工作线程在执行过程中发出的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Update(ProgressUpdate),
    /// 登录成功并读到导师信息，任务正式开始
    Started {
        job_id: JobId,
        facilitator: String,
        group: String,
    },
}

/// 进度事件的去向
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // 接收端关闭说明服务在退出，进度丢了也无妨
        let _ = self.send(event);
    }
}

struct ReporterState {
    last_percent: u8,
    current_step: u64,
    total_steps: u64,
    finished: bool,
}

/// 单个任务私有的进度上报器
///
/// 百分比只增不减；总步数可以随发现的工作增加；只有终态写入能到 100
pub struct ProgressReporter {
    job_id: JobId,
    sink: Arc<dyn ProgressSink>,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, sink: Arc<dyn ProgressSink>, total_steps: u64) -> Self {
        Self {
            job_id,
            sink,
            state: Mutex::new(ReporterState {
                last_percent: 0,
                current_step: 0,
                total_steps: total_steps.max(1),
                finished: false,
            }),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// 完成一步
    pub fn step(&self, message: impl Into<String>) {
        self.publish(message.into(), |state| {
            state.current_step += 1;
            state.total_steps = state.total_steps.max(state.current_step);
            None
        });
    }

    /// 发现了更多工作，总步数增加
    pub fn extend_total(&self, extra_steps: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.total_steps += extra_steps;
        }
    }

    /// 上报阶段里程碑：同样算一步，但百分比由调用方给出
    pub fn milestone(&self, percent: u8, message: impl Into<String>) {
        self.publish(message.into(), |state| {
            state.current_step += 1;
            state.total_steps = state.total_steps.max(state.current_step);
            Some(percent)
        });
    }

    /// 登录后读到导师信息
    pub fn mentor_found(&self, facilitator: &str, group: &str) {
        self.sink.emit(ProgressEvent::Started {
            job_id: self.job_id.clone(),
            facilitator: facilitator.to_string(),
            group: group.to_string(),
        });
    }

    /// 终态：固定为 100
    pub fn finish(&self, message: impl Into<String>) {
        let message = message.into();
        let update = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.finished = true;
            state.last_percent = 100;
            state.current_step = state.total_steps;
            ProgressUpdate {
                job_id: self.job_id.clone(),
                percent: 100,
                message,
                current_step: state.current_step,
                total_steps: state.total_steps,
            }
        };
        self.sink.emit(ProgressEvent::Update(update));
    }

    pub fn last_percent(&self) -> u8 {
        self.state.lock().map(|state| state.last_percent).unwrap_or(0)
    }

    fn publish(&self, message: String, mutate: impl FnOnce(&mut ReporterState) -> Option<u8>) {
        let update = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.finished {
                return;
            }
            let explicit = mutate(&mut state);
            let computed = explicit.unwrap_or_else(|| {
                (state.current_step.saturating_mul(100) / state.total_steps.max(1)).min(100) as u8
            });
            // 非终态最多到 99
            let percent = computed.min(99).max(state.last_percent);
            state.last_percent = percent;

            ProgressUpdate {
                job_id: self.job_id.clone(),
                percent,
                message,
                current_step: state.current_step,
                total_steps: state.total_steps,
            }
        };
        self.sink.emit(ProgressEvent::Update(update));
    }
}
