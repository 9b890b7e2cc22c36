/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化 tracing 日志
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化（例如测试中）直接忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 抓取任务服务启动");
    info!("📊 最大并发数: {}", config.max_concurrent_jobs);
    info!("🌐 目标站点: {}", config.target_url);
    info!("🧭 浏览器: {:?} @ {}", config.browser_mode, config.browser_url);
    info!("{}", "=".repeat(60));
}

/// 记录任务完成信息
pub fn log_job_finished(job_id: &str, success: bool, detail: &str) {
    info!("\n{}", "─".repeat(60));
    if success {
        info!("[job {}] ✅ 任务完成: {}", job_id, detail);
    } else {
        info!("[job {}] ❌ 任务失败: {}", job_id, detail);
    }
    info!("{}", "─".repeat(60));
}

/// 邮箱脱敏，只保留首字符和域名
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
