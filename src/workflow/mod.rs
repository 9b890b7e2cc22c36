//! 流程层
//!
//! 定义"一次抓取"的完整流程，只依赖业务能力（services）和页面能力（infrastructure）

pub mod scrape_ctx;
pub mod scrape_flow;
pub mod sub_lists;

use async_trait::async_trait;

use crate::error::ScrapeError;
use crate::models::{Credentials, ScrapeSummary};
use crate::services::ProgressReporter;

pub use scrape_ctx::JobCtx;
pub use scrape_flow::{ExtractionEngine, ScrapeFlow, BASE_STEPS};

/// 单次抓取的执行者
///
/// 调度层只认这个接口，真实浏览器和测试替身都实现它
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &JobCtx,
        credentials: &Credentials,
        progress: &ProgressReporter,
    ) -> Result<ScrapeSummary, ScrapeError>;
}
