//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务准入和调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `job_queue` - 任务队列
//! - 同一账号同时只允许一个任务在排队或执行
//! - 严格先进先出
//! - 终态记录按保留期过期
//!
//! ### `worker_pool` - 工作线程池
//! - 固定数量的独立线程执行抓取，不占用主运行时
//! - 重试与超时
//! - 进度和终态通过消息交回主运行时
//!
//! ### `status` / `stream` - 状态查询与推送
//! - 聚合队列、进度、结果
//! - 轮询推送，去重，心跳
//!
//! ### `metrics_server` - 指标导出
//! - `/metrics` 输出 Prometheus 文本
//!
//! ### `app` - 门面
//!
//! ## 层次关系
//!
//! ```text
//! app (submit / status / stream)
//!     ↓
//! job_queue → worker_pool (每个任务一个 JobCtx)
//!     ↓
//! workflow::ExtractionEngine (单次抓取)
//!     ↓
//! services (能力层：pagination / page_parser / artifact_store / notification / metrics / monitoring)
//!     ↓
//! infrastructure (基础设施：PageDriver / KvStore)
//! ```

pub mod app;
pub mod job_queue;
pub mod metrics_server;
pub mod status;
pub mod stream;
pub mod worker_pool;

// 重新导出主要类型
pub use app::App;
pub use job_queue::{ClaimedJob, JobQueue};
pub use status::{QueueView, StatusAggregator, UnifiedStatus};
pub use stream::{StatusStreamer, StreamEvent, StreamKind};
pub use worker_pool::{RetryPolicy, WorkerPool};
