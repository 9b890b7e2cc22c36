//! 抓取任务上下文
//!
//! 封装"我正在执行哪个任务的第几次尝试"这一信息

use std::fmt::Display;

use crate::models::JobId;

/// 任务执行上下文
///
/// 每次执行独享一份，不在任务之间共享
#[derive(Debug, Clone)]
pub struct JobCtx {
    pub job_id: JobId,

    /// 第几次尝试（从1开始）
    pub attempt: u32,

    /// 脱敏后的邮箱（仅用于日志显示）
    pub masked_email: String,
}

impl JobCtx {
    pub fn new(job_id: JobId, attempt: u32, masked_email: String) -> Self {
        Self {
            job_id,
            attempt,
            masked_email,
        }
    }
}

impl Display for JobCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[job {}]", self.job_id)
    }
}
