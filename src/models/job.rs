//! 任务相关的数据模型

use std::fmt::Display;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AdmissionError, ScrapeError};

/// 任务标识（不透明、无冲突）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Complete,
    Failed,
    NotFound,
    /// 队列暂时无法查询，状态未知
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

/// 登录凭据
///
/// 密码只以 `SecretString` 保存，`Debug` 输出不会泄露
#[derive(Debug)]
pub struct Credentials {
    email: String,
    password: SecretString,
}

impl Credentials {
    /// 校验并创建凭据：邮箱需形如 `name@domain`，密码不能为空白
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Result<Self, AdmissionError> {
        let email = email.into().trim().to_string();
        let password: String = password.into();

        if email.is_empty() {
            return Err(AdmissionError::InvalidParameters {
                reason: "email must not be empty".to_string(),
            });
        }
        if !looks_like_email(&email) {
            return Err(AdmissionError::InvalidParameters {
                reason: "email is not a valid address".to_string(),
            });
        }
        if password.trim().is_empty() {
            return Err(AdmissionError::InvalidParameters {
                reason: "password must not be empty".to_string(),
            });
        }

        Ok(Self {
            email,
            password: SecretString::from(password),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }

    /// 去重用的身份键：规范化邮箱的 SHA-256
    ///
    /// 同一账号同时只允许一个任务在排队或执行
    pub fn identity_key(&self) -> String {
        let normalized = self.email.to_lowercase();
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// 一次成功抓取的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub file: String,
    pub students: usize,
    pub facilitator: String,
    pub group: String,
}

/// 任务的终态结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub students: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl JobResult {
    pub fn succeeded(summary: &ScrapeSummary) -> Self {
        Self {
            success: true,
            file: Some(summary.file.clone()),
            students: Some(summary.students),
            error: None,
            error_type: None,
        }
    }

    pub fn failed(error: &ScrapeError) -> Self {
        Self {
            success: false,
            file: None,
            students: None,
            error: Some(error.to_string()),
            error_type: error.error_type().map(str::to_string),
        }
    }

    /// 任务标记为完成却没有结果时合成的失败结果
    pub fn missing() -> Self {
        Self {
            success: false,
            file: None,
            students: None,
            error: Some("Job completed with no result".to_string()),
            error_type: None,
        }
    }
}
