//! 工作线程池 - 编排层
//!
//! ## 结构
//!
//! ```text
//! JobQueue ──claim──▶ 调度任务(Semaphore) ──WorkItem──▶ scrape-worker-N (独立线程 + current_thread runtime)
//!                                                           │
//!                        协调任务 ◀──────WorkerEvent────────┘
//!                           │
//!                           ├─▶ ProgressChannel（进度写入存储）
//!                           ├─▶ JobQueue::finish（终态）
//!                           ├─▶ JobMetrics（计数与耗时）
//!                           └─▶ EventSink（开始/完成/失败事件）
//! ```
//!
//! 抓取在独立线程上长时间阻塞，不会拖慢主运行时上的状态查询；
//! 工作线程与主运行时之间只通过消息通信。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::job_queue::{ClaimedJob, JobQueue};
use crate::config::Config;
use crate::error::{AppResult, ScrapeError};
use crate::models::{JobId, JobResult, JobStatus, ScrapeSummary};
use crate::services::notification::{self, EventSink, JobEvent};
use crate::services::{JobMetrics, ProgressChannel, ProgressEvent, ProgressReporter, ProgressSink};
use crate::utils::logging::log_job_finished;
use crate::utils::mask_email;
use crate::workflow::{JobCtx, JobExecutor, BASE_STEPS};

/// 会话释放留出的余量，超出后由线程池判定超时
const CLOSE_GRACE: Duration = Duration::from_secs(30);

/// 登录前失败时还不知道导师和班级
const UNKNOWN_MENTOR: &str = "Unknown";

/// 交给工作线程的任务；许可随任务走，终态写入后才归还
struct WorkItem {
    job: ClaimedJob,
    permit: OwnedSemaphorePermit,
}

/// 工作线程发回主运行时的消息
pub enum WorkerEvent {
    Progress(ProgressEvent),
    Finished {
        job_id: JobId,
        outcome: Result<ScrapeSummary, ScrapeError>,
        /// 含重试在内的总耗时
        elapsed: Duration,
        permit: OwnedSemaphorePermit,
    },
}

impl ProgressSink for mpsc::UnboundedSender<WorkerEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(WorkerEvent::Progress(event));
    }
}

/// 重试与超时策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub job_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tries: config.max_tries.max(1),
            job_timeout: config.job_timeout(),
        }
    }
}

pub struct WorkerPool {
    workers: Vec<thread::JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    coordinator: JoinHandle<()>,
}

impl WorkerPool {
    /// 启动调度任务、协调任务和 `max_concurrent_jobs` 个工作线程
    ///
    /// 必须在 tokio 运行时中调用
    pub fn start(
        config: &Config,
        queue: Arc<JobQueue>,
        executor: Arc<dyn JobExecutor>,
        progress: ProgressChannel,
        sinks: Arc<Vec<Arc<dyn EventSink>>>,
        metrics: Arc<JobMetrics>,
    ) -> AppResult<Self> {
        let size = config.max_concurrent_jobs.max(1);
        let policy = RetryPolicy::from_config(config);

        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(size);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let work_rx = Arc::clone(&work_rx);
            let event_tx = event_tx.clone();
            let executor = Arc::clone(&executor);
            let handle = thread::Builder::new()
                .name(format!("scrape-worker-{}", index))
                .spawn(move || worker_loop(index, work_rx, event_tx, executor, policy))?;
            workers.push(handle);
        }
        // 协调任务在所有工作线程退出后结束
        drop(event_tx);

        let semaphore = Arc::new(Semaphore::new(size));
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&queue),
            semaphore,
            work_tx,
            Arc::clone(&metrics),
        ));
        let coordinator = tokio::spawn(Coordinator::new(queue, progress, sinks, metrics).run(event_rx));

        info!("🧵 已启动 {} 个工作线程", size);
        Ok(Self {
            workers,
            dispatcher,
            coordinator,
        })
    }

    /// 停止取新任务，等待正在执行的任务结束
    pub async fn shutdown(self) {
        self.dispatcher.abort();
        let _ = self.dispatcher.await;

        let workers = self.workers;
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.join().is_err() {
                    error!("❌ 工作线程异常退出");
                }
            }
        })
        .await;
        if joined.is_err() {
            error!("❌ 等待工作线程失败");
        }

        let _ = self.coordinator.await;
        info!("🛑 工作线程池已停止");
    }
}

/// 有空位时才从队列取任务，保证其余任务一直处于排队状态
async fn dispatch_loop(
    queue: Arc<JobQueue>,
    semaphore: Arc<Semaphore>,
    work_tx: mpsc::Sender<WorkItem>,
    metrics: Arc<JobMetrics>,
) {
    loop {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            return;
        };
        let job = queue.claim_next().await;
        metrics.job_started();
        metrics.set_queued(queue.queued_len().await);
        info!("[job {}] 🚚 分配给工作线程", job.job_id);
        if work_tx.send(WorkItem { job, permit }).await.is_err() {
            warn!("⚠️ 工作线程已全部退出，停止调度");
            return;
        }
    }
}

fn worker_loop(
    index: usize,
    work_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    executor: Arc<dyn JobExecutor>,
    policy: RetryPolicy,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("❌ 工作线程 #{} 无法创建运行时: {}", index, e);
            return;
        }
    };

    loop {
        let next = work_rx.blocking_lock().blocking_recv();
        let Some(WorkItem { job, permit }) = next else {
            break;
        };

        let job_id = job.job_id.clone();
        let started = Instant::now();
        let outcome = runtime.block_on(run_job(job, &event_tx, executor.as_ref(), policy));
        let _ = event_tx.send(WorkerEvent::Finished {
            job_id,
            outcome,
            elapsed: started.elapsed(),
            permit,
        });
    }
}

/// 执行一个任务，包含重试和超时
pub async fn run_job(
    job: ClaimedJob,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    executor: &dyn JobExecutor,
    policy: RetryPolicy,
) -> Result<ScrapeSummary, ScrapeError> {
    let masked = mask_email(job.credentials.email());
    let reporter = ProgressReporter::new(job.job_id.clone(), Arc::new(events.clone()), BASE_STEPS);
    let backstop = policy.job_timeout + CLOSE_GRACE;

    let mut attempt = 1;
    let outcome = loop {
        let ctx = JobCtx::new(job.job_id.clone(), attempt, masked.clone());
        info!("{} ▶️ 第 {}/{} 次尝试 ({})", ctx, attempt, policy.max_tries, ctx.masked_email);

        let execution = AssertUnwindSafe(executor.execute(&ctx, &job.credentials, &reporter)).catch_unwind();
        let result = match tokio::time::timeout(backstop, execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ScrapeError::extraction("worker panicked during extraction")),
            Err(_) => Err(ScrapeError::Timeout {
                seconds: policy.job_timeout.as_secs(),
            }),
        };

        match result {
            Ok(summary) => break Ok(summary),
            Err(e) if e.is_retryable() && attempt < policy.max_tries => {
                warn!("{} 🔁 第 {} 次尝试失败，准备重试: {}", ctx, attempt, e);
                attempt += 1;
            }
            Err(e) => break Err(e),
        }
    };

    match &outcome {
        Ok(summary) => reporter.finish(format!("Complete: {} students exported", summary.students)),
        Err(e) => reporter.finish(format!("Failed: {}", e)),
    }
    outcome
}

/// 主运行时上的协调任务：写进度、写终态、记指标、发事件
struct Coordinator {
    queue: Arc<JobQueue>,
    progress: ProgressChannel,
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
    metrics: Arc<JobMetrics>,
    /// 登录后读到的导师信息，用于失败事件
    mentors: HashMap<JobId, (String, String)>,
}

impl Coordinator {
    fn new(
        queue: Arc<JobQueue>,
        progress: ProgressChannel,
        sinks: Arc<Vec<Arc<dyn EventSink>>>,
        metrics: Arc<JobMetrics>,
    ) -> Self {
        Self {
            queue,
            progress,
            sinks,
            metrics,
            mentors: HashMap::new(),
        }
    }

    /// 所有发送端关闭后结束
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress(ProgressEvent::Update(update)) => {
                if let Err(e) = self.progress.apply(&update).await {
                    warn!("[job {}] ⚠️ 写入进度失败: {}", update.job_id, e);
                }
            }
            WorkerEvent::Progress(ProgressEvent::Started {
                job_id,
                facilitator,
                group,
            }) => {
                // 重试时只发一次
                if !self.mentors.contains_key(&job_id) {
                    notification::dispatch(&self.sinks, JobEvent::started(&facilitator, &group));
                    self.mentors.insert(job_id, (facilitator, group));
                }
            }
            WorkerEvent::Finished {
                job_id,
                outcome,
                elapsed,
                permit,
            } => {
                let (facilitator, group) = self
                    .mentors
                    .remove(&job_id)
                    .unwrap_or_else(|| (UNKNOWN_MENTOR.to_string(), UNKNOWN_MENTOR.to_string()));
                self.metrics.job_finished(outcome.is_ok(), elapsed);
                self.settle(&job_id, outcome, &facilitator, &group).await;
                drop(permit);
            }
        }
    }

    /// 写入终态并发送事件
    ///
    /// 凭据错误是“已完成但失败”，其余错误在重试用尽后为 Failed
    async fn settle(
        &self,
        job_id: &JobId,
        outcome: Result<ScrapeSummary, ScrapeError>,
        facilitator: &str,
        group: &str,
    ) {
        match outcome {
            Ok(summary) => {
                self.queue
                    .finish(job_id, JobStatus::Complete, Some(JobResult::succeeded(&summary)))
                    .await;
                log_job_finished(
                    job_id.as_str(),
                    true,
                    &format!("{} 名学员 → {}", summary.students, summary.file),
                );
                notification::dispatch(
                    &self.sinks,
                    JobEvent::completed(&summary.facilitator, &summary.group, summary.students),
                );
            }
            Err(e) => {
                let status = match e {
                    ScrapeError::InvalidCredentials => JobStatus::Complete,
                    _ => JobStatus::Failed,
                };
                self.queue.finish(job_id, status, Some(JobResult::failed(&e))).await;
                log_job_finished(job_id.as_str(), false, &e.to_string());
                notification::dispatch(
                    &self.sinks,
                    JobEvent::failed(facilitator, group, &e.to_string(), e.error_type()),
                );
            }
        }
    }
}
