//! 程序配置
//!
//! 加载顺序：内置默认值 → 可选 TOML 文件 → 环境变量覆盖

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AppResult, ConfigError};

/// 浏览器会话的获取方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// 连接远程 Chrome（CDP 端点）
    Remote,
    /// 本地启动无头浏览器
    Headless,
}

impl std::str::FromStr for BrowserMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(BrowserMode::Remote),
            "headless" => Ok(BrowserMode::Headless),
            other => Err(format!("unknown browser mode: {}", other)),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 调度 ---
    /// 同时执行的任务数量（远程浏览器会话上限）
    pub max_concurrent_jobs: usize,
    /// 单次执行的超时时间（秒）
    pub job_timeout_secs: u64,
    /// 每个任务的最大尝试次数
    pub max_tries: u32,
    /// 终态结果保留时间（秒）
    pub result_retention_secs: u64,
    /// 进度快照的存活时间（秒）
    pub progress_ttl_secs: u64,
    /// 排队列表单次枚举的上限
    pub queue_page_size: usize,

    // --- 状态推送 ---
    pub stream_poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,

    // --- 浏览器 ---
    /// 目标站点
    pub target_url: String,
    /// 远程浏览器地址
    pub browser_url: String,
    pub browser_mode: BrowserMode,
    /// 无头模式下的浏览器可执行文件
    pub chrome_executable: Option<String>,

    // --- 抓取 ---
    pub output_dir: String,
    pub max_pagination_steps: usize,
    pub stale_round_threshold: u32,
    pub interaction_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub page_change_timeout_ms: u64,

    // --- 通知 ---
    pub webhook_url: Option<String>,

    // --- 监控 ---
    /// 指标导出地址，例如 `0.0.0.0:9101`；为空时不开启
    pub metrics_addr: Option<String>,
    /// 定期运行报告的 webhook
    pub monitor_webhook_url: Option<String>,
    /// 运行性故障告警的 webhook
    pub alert_webhook_url: Option<String>,
    pub monitor_interval_secs: u64,

    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            job_timeout_secs: 600,
            max_tries: 2,
            result_retention_secs: 3600,
            progress_ttl_secs: 7200,
            queue_page_size: 100,
            stream_poll_interval_ms: 500,
            heartbeat_interval_secs: 15,
            target_url: "https://codingcamp.dicoding.com".to_string(),
            browser_url: "http://localhost:9222".to_string(),
            browser_mode: BrowserMode::Remote,
            chrome_executable: None,
            output_dir: "output".to_string(),
            max_pagination_steps: 300,
            stale_round_threshold: 2,
            interaction_timeout_secs: 20,
            login_timeout_secs: 30,
            page_change_timeout_ms: 5000,
            webhook_url: None,
            metrics_addr: None,
            monitor_webhook_url: None,
            alert_webhook_url: None,
            monitor_interval_secs: 60,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 完整加载：默认值 → TOML 文件（`SCRAPER_CONFIG`，默认 `scraper.toml`）→ 环境变量
    pub fn load() -> AppResult<Self> {
        let path = std::env::var("SCRAPER_CONFIG").unwrap_or_else(|_| "scraper.toml".to_string());
        let base = Self::from_toml_file(Path::new(&path))?;
        base.with_env_overrides()
    }

    /// 从 TOML 文件加载，文件不存在时返回默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!("配置文件 {} 不存在，使用默认配置", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileUnreadable {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            crate::error::AppError::Config(ConfigError::TomlParseFailed { source, .. }) => {
                ConfigError::TomlParseFailed {
                    path: path.display().to_string(),
                    source,
                }
                .into()
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::TomlParseFailed {
            path: String::new(),
            source: e,
        })?;
        config.validate()
    }

    /// 只用环境变量覆盖默认值
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> AppResult<Self> {
        let config = Self {
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", self.max_concurrent_jobs)?,
            job_timeout_secs: env_parse("JOB_TIMEOUT_SECS", self.job_timeout_secs)?,
            max_tries: env_parse("MAX_TRIES", self.max_tries)?,
            result_retention_secs: env_parse("RESULT_RETENTION_SECS", self.result_retention_secs)?,
            progress_ttl_secs: env_parse("PROGRESS_TTL_SECS", self.progress_ttl_secs)?,
            queue_page_size: env_parse("QUEUE_PAGE_SIZE", self.queue_page_size)?,
            stream_poll_interval_ms: env_parse("STREAM_POLL_INTERVAL_MS", self.stream_poll_interval_ms)?,
            heartbeat_interval_secs: env_parse("HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval_secs)?,
            target_url: std::env::var("CODINGCAMP_URL").unwrap_or(self.target_url),
            browser_url: std::env::var("BROWSER_URL").unwrap_or(self.browser_url),
            browser_mode: env_parse("BROWSER_MODE", self.browser_mode)?,
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(self.chrome_executable),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(self.output_dir),
            max_pagination_steps: env_parse("MAX_PAGINATION_STEPS", self.max_pagination_steps)?,
            stale_round_threshold: env_parse("STALE_ROUND_THRESHOLD", self.stale_round_threshold)?,
            interaction_timeout_secs: env_parse("INTERACTION_TIMEOUT_SECS", self.interaction_timeout_secs)?,
            login_timeout_secs: env_parse("LOGIN_TIMEOUT_SECS", self.login_timeout_secs)?,
            page_change_timeout_ms: env_parse("PAGE_CHANGE_TIMEOUT_MS", self.page_change_timeout_ms)?,
            webhook_url: std::env::var("WEBHOOK_URL").ok().or(self.webhook_url),
            metrics_addr: std::env::var("METRICS_ADDR").ok().or(self.metrics_addr),
            monitor_webhook_url: std::env::var("MONITOR_WEBHOOK_URL").ok().or(self.monitor_webhook_url),
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok().or(self.alert_webhook_url),
            monitor_interval_secs: env_parse("MONITOR_INTERVAL_SECS", self.monitor_interval_secs)?,
            verbose_logging: env_parse("VERBOSE_LOGGING", self.verbose_logging)?,
        };
        config.validate()
    }

    fn validate(self) -> AppResult<Self> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_jobs",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.max_tries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_tries",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.monitor_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor_interval_secs",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.stale_round_threshold == 0 {
            warn!("stale_round_threshold 为 0，分页将只读取第一页");
        }
        Ok(self)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn interaction_timeout(&self) -> Duration {
        Duration::from_secs(self.interaction_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn page_change_timeout(&self) -> Duration {
        Duration::from_millis(self.page_change_timeout_ms)
    }
}

/// 读取并解析环境变量，不存在时使用默认值
fn env_parse<T: std::str::FromStr>(var_name: &'static str, default: T) -> AppResult<T> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type: std::any::type_name::<T>(),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_limits() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.job_timeout(), Duration::from_secs(600));
        assert_eq!(config.max_tries, 2);
        assert_eq!(config.progress_ttl(), Duration::from_secs(7200));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.stream_poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let config = Config::from_toml_str(
            r#"
            max_concurrent_jobs = 5
            browser_mode = "headless"
            webhook_url = "https://example.invalid/hook"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.browser_mode, BrowserMode::Headless);
        assert_eq!(config.webhook_url.as_deref(), Some("https://example.invalid/hook"));
        assert_eq!(config.max_pagination_steps, 300);
    }

    #[test]
    fn monitoring_is_off_unless_configured() {
        let config = Config::default();
        assert!(config.metrics_addr.is_none());
        assert!(config.monitor_webhook_url.is_none());
        assert_eq!(config.monitor_interval(), Duration::from_secs(60));

        let config = Config::from_toml_str(
            r#"
            metrics_addr = "127.0.0.1:9101"
            alert_webhook_url = "https://example.invalid/alert"
            monitor_interval_secs = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.metrics_addr.as_deref(), Some("127.0.0.1:9101"));
        assert_eq!(config.alert_webhook_url.as_deref(), Some("https://example.invalid/alert"));
        assert_eq!(config.monitor_interval(), Duration::from_secs(300));

        assert!(Config::from_toml_str("monitor_interval_secs = 0").is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Config::from_toml_str("max_concurrent_jobs = 0").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::from_toml_file(Path::new("definitely/not/here.toml")).unwrap();
        assert_eq!(config.max_concurrent_jobs, 3);
    }
}
