//! 进度快照及其两种编码
//!
//! 结构化编码为 JSON 对象；旧版编码为 `percent|message|step|total`。
//! 解码依次尝试结构化、旧版，都失败时视为“没有进度”。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 进度快照，每个任务一份，原地覆盖
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub message: String,
    pub current_step: u64,
    pub total_steps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 结构化编码的宽松解码形式
#[derive(Deserialize)]
struct RawSnapshot {
    percent: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    current_step: u64,
    #[serde(default)]
    total_steps: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    pub fn new(percent: i64, message: impl Into<String>, current_step: u64, total_steps: u64) -> Self {
        Self {
            percent: clamp_percent(percent),
            message: message.into(),
            current_step,
            total_steps,
            updated_at: Some(Utc::now()),
        }
    }

    /// 解码存储值：先结构化，后旧版，都失败返回 None
    pub fn decode(raw: &str) -> Option<Self> {
        Self::decode_structured(raw).or_else(|| Self::decode_legacy(raw))
    }

    fn decode_structured(raw: &str) -> Option<Self> {
        let snapshot: RawSnapshot = serde_json::from_str(raw.trim()).ok()?;
        Some(Self {
            percent: clamp_percent(snapshot.percent),
            message: snapshot.message,
            current_step: snapshot.current_step,
            total_steps: snapshot.total_steps,
            updated_at: snapshot.updated_at,
        })
    }

    /// 旧版编码，消息本身可以包含 `|`
    fn decode_legacy(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.trim().split('|').collect();
        if parts.len() < 4 {
            return None;
        }

        let last = parts.len() - 1;
        let percent: i64 = parts[0].trim().parse().ok()?;
        let current_step: u64 = parts[last - 1].trim().parse().ok()?;
        let total_steps: u64 = parts[last].trim().parse().ok()?;
        let message = parts[1..last - 1].join("|");

        Some(Self {
            percent: clamp_percent(percent),
            message,
            current_step,
            total_steps,
            updated_at: None,
        })
    }

    pub fn encode(&self) -> String {
        // 字段全是简单类型，序列化不会失败
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn encode_legacy(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.percent, self.message, self.current_step, self.total_steps
        )
    }
}

pub fn clamp_percent(percent: i64) -> u8 {
    percent.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_form_decodes() {
        let snapshot = ProgressSnapshot::decode("42|step msg|4|10").unwrap();
        assert_eq!(snapshot.percent, 42);
        assert_eq!(snapshot.message, "step msg");
        assert_eq!(snapshot.current_step, 4);
        assert_eq!(snapshot.total_steps, 10);
        assert_eq!(snapshot.updated_at, None);
    }

    #[test]
    fn legacy_message_may_contain_pipes() {
        let snapshot = ProgressSnapshot::decode("7|a|b|c|1|3").unwrap();
        assert_eq!(snapshot.message, "a|b|c");
        assert_eq!(snapshot.current_step, 1);
        assert_eq!(snapshot.total_steps, 3);
    }

    #[test]
    fn structured_form_decodes_and_clamps() {
        let raw = r#"{"percent": 180, "message": "Logging in", "current_step": 3, "total_steps": 12,
                      "updated_at": "2026-01-02T03:04:05Z"}"#;
        let snapshot = ProgressSnapshot::decode(raw).unwrap();
        assert_eq!(snapshot.percent, 100);
        assert_eq!(snapshot.message, "Logging in");
        assert!(snapshot.updated_at.is_some());
    }

    #[test]
    fn garbage_is_absent_not_an_error() {
        assert_eq!(ProgressSnapshot::decode(""), None);
        assert_eq!(ProgressSnapshot::decode("not|enough"), None);
        assert_eq!(ProgressSnapshot::decode("x|msg|1|2"), None);
        assert_eq!(ProgressSnapshot::decode(r#"{"message": "no percent"}"#), None);
    }

    #[test]
    fn structured_encoding_is_preferred_on_write() {
        let snapshot = ProgressSnapshot::new(55, "Reading students", 11, 20);
        let decoded = ProgressSnapshot::decode(&snapshot.encode()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(snapshot.encode_legacy(), "55|Reading students|11|20");
    }
}
