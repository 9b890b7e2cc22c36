use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 提交被拒绝
    #[error("提交被拒绝: {0}")]
    Admission(#[from] AdmissionError),
    /// 抓取过程错误
    #[error("抓取错误: {0}")]
    Scrape(#[from] ScrapeError),
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 存储相关错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 提交阶段的错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// 同一账号已有任务在排队或执行
    #[error("a job for this account is already queued or running (job {existing_job_id})")]
    Conflict { existing_job_id: String },
    /// 参数校验失败（凭据为空等）
    #[error("invalid parameters: {reason}")]
    InvalidParameters { reason: String },
}

/// 抓取执行过程中的错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    /// 站点拒绝了登录
    #[error("Invalid email or password")]
    InvalidCredentials,
    /// 其他任何抓取失败，消息原样保留
    #[error("{message}")]
    Extraction { message: String },
    /// 单次执行超时
    #[error("job exceeded timeout of {seconds}s")]
    Timeout { seconds: u64 },
}

impl ScrapeError {
    pub fn extraction(message: impl Into<String>) -> Self {
        ScrapeError::Extraction {
            message: message.into(),
        }
    }

    /// 凭据错误不重试，避免用同样的输入反复登录
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScrapeError::InvalidCredentials)
    }

    /// 对外暴露的错误类型标签
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            ScrapeError::InvalidCredentials => Some("invalid_credentials"),
            ScrapeError::Timeout { .. } => Some("timeout"),
            ScrapeError::Extraction { .. } => None,
        }
    }
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 ({url}): {source}")]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 浏览器配置失败
    #[error("浏览器配置失败: {0}")]
    ConfigurationFailed(String),
    /// 创建页面失败
    #[error("创建页面失败: {source}")]
    PageCreationFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 导航失败
    #[error("导航到 {url} 失败: {source}")]
    NavigationFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 元素定位失败
    #[error("{0}")]
    ElementNotFound(String),
}

/// 存储相关错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("存储不可用: {0}")]
    Unavailable(String),
    #[error("文件不存在: {0}")]
    NotFound(String),
    #[error("非法文件名: {0}")]
    InvalidName(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: &'static str,
        value: String,
        expected_type: &'static str,
    },
    #[error("无法读取配置文件 {path}: {source}")]
    FileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置项 {field} 无效: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            url: url.into(),
            source: Box::new(source),
        })
    }

    /// 创建元素定位失败错误
    pub fn element_not_found(message: impl Into<String>) -> Self {
        AppError::Browser(BrowserError::ElementNotFound(message.into()))
    }

    /// 转换为抓取错误：已经是抓取错误的保持原样，其余按底层消息原文包装为 Extraction
    pub fn into_scrape_error(self) -> ScrapeError {
        match self {
            AppError::Scrape(e) => e,
            AppError::Admission(e) => ScrapeError::extraction(e.to_string()),
            AppError::Browser(e) => ScrapeError::extraction(e.to_string()),
            AppError::Store(e) => ScrapeError::extraction(e.to_string()),
            AppError::Config(e) => ScrapeError::extraction(e.to_string()),
            AppError::Io(e) => ScrapeError::extraction(e.to_string()),
            AppError::Json(e) => ScrapeError::extraction(e.to_string()),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_is_never_retried() {
        assert!(!ScrapeError::InvalidCredentials.is_retryable());
        assert!(ScrapeError::extraction("boom").is_retryable());
        assert!(ScrapeError::Timeout { seconds: 600 }.is_retryable());
    }

    #[test]
    fn scrape_errors_survive_conversion() {
        let err: AppError = ScrapeError::InvalidCredentials.into();
        assert_eq!(err.into_scrape_error(), ScrapeError::InvalidCredentials);

        let err = AppError::element_not_found("Failed to click 'Select All'");
        assert_eq!(
            err.into_scrape_error(),
            ScrapeError::extraction("Failed to click 'Select All'")
        );
    }
}
