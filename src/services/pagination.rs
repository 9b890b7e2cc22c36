//! 分页列表遍历
//!
//! 每一轮读取当前可见的行，按规范化内容计算指纹去重，
//! 然后点击“下一页”并等待内容变化。
//! 三种情况结束：没有可用的下一页、连续若干轮没有新行、达到轮数上限。

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::models::ExtractedRecord;
use crate::services::page_parser::normalize_space;

/// “下一页”控件的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextControl {
    Absent,
    Disabled,
    Enabled,
}

/// 一个可翻页的列表视口
#[async_trait]
pub trait ListViewport: Send + Sync {
    /// 每行各字段的名称
    fn columns(&self) -> &[&'static str];

    /// 当前可见的行，每行按 `columns` 顺序给出字段文本
    async fn visible_rows(&self) -> AppResult<Vec<Vec<String>>>;

    async fn next_control(&self) -> AppResult<NextControl>;

    /// 当前可见内容的签名，用来判断翻页是否生效
    async fn signature(&self) -> AppResult<String>;

    async fn activate_next(&self) -> AppResult<()>;

    /// 等待签名变化，返回是否在超时前变化
    async fn wait_for_change(&self, before: &str, timeout: Duration) -> AppResult<bool> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.signature().await? != before {
                return Ok(true);
            }
            sleep(Duration::from_millis(150)).await;
        }
        Ok(false)
    }
}

/// 遍历上限
#[derive(Debug, Clone, Copy)]
pub struct PagingLimits {
    pub max_steps: usize,
    pub stale_threshold: u32,
    pub change_timeout: Duration,
}

impl PagingLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_steps: config.max_pagination_steps,
            stale_threshold: config.stale_round_threshold.max(1),
            change_timeout: config.page_change_timeout(),
        }
    }
}

impl Default for PagingLimits {
    fn default() -> Self {
        Self {
            max_steps: 300,
            stale_threshold: 2,
            change_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 下一页控件不存在或已禁用
    NoNextControl,
    /// 连续多轮没有新行
    Stable,
    StepCap,
    /// 点击下一页失败
    NextFailed,
}

/// 一次列表遍历的状态，只在本次遍历中存在
#[derive(Debug, Default)]
pub struct PagingSession {
    records: Vec<ExtractedRecord>,
    seen: HashSet<String>,
    stale_rounds: u32,
    rounds: usize,
}

impl PagingSession {
    /// 吸收一轮的行，返回新增数量
    pub fn absorb(&mut self, columns: &[&'static str], rows: Vec<Vec<String>>) -> usize {
        let mut added = 0;
        for row in rows {
            let fields: Vec<String> = row.iter().map(|value| normalize_space(value)).collect();
            if fields.iter().all(|value| value.is_empty()) {
                continue;
            }

            let fingerprint = fingerprint(&fields);
            if !self.seen.insert(fingerprint.clone()) {
                continue;
            }

            let fields: BTreeMap<String, String> = columns
                .iter()
                .map(|name| name.to_string())
                .zip(fields)
                .collect();
            self.records.push(ExtractedRecord { fingerprint, fields });
            added += 1;
        }

        if added == 0 {
            self.stale_rounds += 1;
        } else {
            self.stale_rounds = 0;
        }
        added
    }

    pub fn records(&self) -> &[ExtractedRecord] {
        &self.records
    }
}

/// 遍历结果
#[derive(Debug)]
pub struct PagingOutcome {
    pub records: Vec<ExtractedRecord>,
    pub rounds: usize,
    pub stop: StopReason,
}

/// 行指纹：规范化字段的 SHA-256
pub fn fingerprint(fields: &[String]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// 遍历整个分页列表
pub async fn collect<V: ListViewport + ?Sized>(viewport: &V, limits: PagingLimits) -> AppResult<PagingOutcome> {
    let mut session = PagingSession::default();

    let stop = loop {
        if session.rounds >= limits.max_steps {
            break StopReason::StepCap;
        }
        session.rounds += 1;

        let rows = viewport.visible_rows().await?;
        let added = session.absorb(viewport.columns(), rows);
        debug!(
            "分页第 {} 轮: 新增 {} 行, 累计 {} 行",
            session.rounds,
            added,
            session.records.len()
        );

        if session.stale_rounds >= limits.stale_threshold {
            break StopReason::Stable;
        }
        if viewport.next_control().await? != NextControl::Enabled {
            break StopReason::NoNextControl;
        }

        let before = viewport.signature().await?;
        if let Err(e) = viewport.activate_next().await {
            warn!("⚠️ 点击下一页失败，停止翻页: {}", e);
            break StopReason::NextFailed;
        }
        // 没等到变化也继续下一轮，由去重和停滞计数兜底
        if !viewport.wait_for_change(&before, limits.change_timeout).await.unwrap_or(false) {
            debug!("翻页后内容未变化");
        }
    };

    Ok(PagingOutcome {
        records: session.records,
        rounds: session.rounds,
        stop,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedViewport;
    use super::*;

    fn dates(outcome: &PagingOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.fields["date"].as_str()).collect()
    }

    #[tokio::test]
    async fn duplicates_across_pages_are_emitted_once_in_order() {
        let viewport = ScriptedViewport::new(vec![
            vec![vec!["Mon", "a"], vec!["Tue", "b"]],
            vec![vec!["Tue", "b"], vec!["Wed", "c"]],
            vec![vec!["Wed  ", " c"], vec!["Thu", "d"]],
        ]);

        let outcome = collect(&viewport, PagingLimits::default()).await.unwrap();
        assert_eq!(dates(&outcome), vec!["Mon", "Tue", "Wed", "Thu"]);
        assert_eq!(outcome.stop, StopReason::NoNextControl);
        assert_eq!(outcome.rounds, 3);
    }

    #[tokio::test]
    async fn stuck_next_control_stops_after_stale_rounds() {
        let viewport = ScriptedViewport::new(vec![
            vec![vec!["Mon", "a"]],
            vec![vec!["Tue", "b"]],
        ])
        .sticky_next();

        let outcome = collect(&viewport, PagingLimits::default()).await.unwrap();
        assert_eq!(dates(&outcome), vec!["Mon", "Tue"]);
        assert_eq!(outcome.stop, StopReason::Stable);
        // 两轮有新内容，再加两轮停滞
        assert_eq!(outcome.rounds, 4);
    }

    #[tokio::test]
    async fn endless_list_hits_step_cap() {
        let viewport = ScriptedViewport::endless();
        let limits = PagingLimits {
            max_steps: 25,
            ..PagingLimits::default()
        };

        let outcome = collect(&viewport, limits).await.unwrap();
        assert_eq!(outcome.stop, StopReason::StepCap);
        assert_eq!(outcome.rounds, 25);
        assert_eq!(outcome.records.len(), 25);
    }

    #[tokio::test]
    async fn disabled_next_stops_without_clicking() {
        let viewport = ScriptedViewport::new(vec![vec![vec!["Mon", "a"]]]).with_last_next(NextControl::Disabled);

        let outcome = collect(&viewport, PagingLimits::default()).await.unwrap();
        assert_eq!(outcome.stop, StopReason::NoNextControl);
        assert_eq!(*viewport.activations.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_list_is_fine() {
        let viewport = ScriptedViewport::new(vec![vec![]]).with_last_next(NextControl::Absent);
        let outcome = collect(&viewport, PagingLimits::default()).await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stop, StopReason::NoNextControl);
    }

    #[tokio::test]
    async fn failed_next_click_keeps_collected_rows() {
        let viewport = ScriptedViewport::new(vec![vec![vec!["Mon", "a"]], vec![vec!["Tue", "b"]]]).failing_next();

        let outcome = collect(&viewport, PagingLimits::default()).await.unwrap();
        assert_eq!(dates(&outcome), vec!["Mon"]);
        assert_eq!(outcome.stop, StopReason::NextFailed);
    }

    #[test]
    fn fingerprint_depends_on_field_boundaries() {
        let a = fingerprint(&["ab".to_string(), "c".to_string()]);
        let b = fingerprint(&["a".to_string(), "bc".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
