//! # Camp Scrape Jobs
//!
//! 学员面板抓取任务服务：提交凭据 → 排队 → 浏览器抓取 → 导出文档，
//! 全程可查询或订阅进度
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page、键值存储），只暴露能力
//! - `PageDriver` - 页面能力接口，`ChromeDriver` 为真实实现
//! - `Locator` - 按优先级尝试的元素定位策略
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `ProgressChannel` - 进度读写
//! - `pagination` - 分页遍历与指纹去重
//! - `page_parser` - 学员信息解析
//! - `ArtifactStore` - 导出文件读写
//! - `notification` - 任务事件投递
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次抓取"的完整流程
//! - `JobCtx` - 任务上下文（job_id + 第几次尝试）
//! - `ExtractionEngine` - 登录 → 展开 → 解析 → 分页 → 保存
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/job_queue` - 准入与排队
//! - `orchestrator/worker_pool` - 工作线程池，重试与超时
//! - `orchestrator/status`、`orchestrator/stream` - 状态聚合与推送
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AdmissionError, AppError, AppResult, ScrapeError};
pub use models::{Credentials, JobId, JobResult, JobStatus};
pub use orchestrator::{App, StreamEvent, StreamKind, UnifiedStatus};
pub use workflow::{JobCtx, JobExecutor};
