//! 业务能力层
//!
//! 每个服务只提供一种能力，不关心任务流程

pub mod artifact_store;
pub mod metrics;
pub mod monitoring;
pub mod notification;
pub mod page_parser;
pub mod pagination;
pub mod progress_channel;

pub use artifact_store::{ArtifactInfo, ArtifactStore};
pub use metrics::{JobMetrics, MetricsSnapshot};
pub use monitoring::{AlertSink, SystemMonitor, SystemReport};
pub use notification::{AuditLogSink, EventSink, JobEvent, JobEventKind, WebhookNotifier};
pub use pagination::{ListViewport, NextControl, PagingLimits, PagingOutcome, StopReason};
pub use progress_channel::{ProgressChannel, ProgressEvent, ProgressReporter, ProgressSink, ProgressUpdate};
