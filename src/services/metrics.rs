//! 任务指标
//!
//! 进程内计数：完成/失败总数、执行耗时分布、排队数量。
//! 以 Prometheus 文本格式导出。

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// 耗时分布的桶上限（秒）
pub const DURATION_BUCKETS: [f64; 8] = [1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

#[derive(Debug, Default, Clone, PartialEq)]
struct Histogram {
    /// 各桶独立计数，导出时再累加
    buckets: [u64; DURATION_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        if let Some(index) = DURATION_BUCKETS.iter().position(|bound| seconds <= *bound) {
            self.buckets[index] += 1;
        }
        self.count += 1;
        self.sum += seconds;
    }
}

/// 某一时刻的指标读数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub queued: i64,
    pub running: i64,
    pub finished: u64,
    pub duration_sum_secs: f64,
}

impl MetricsSnapshot {
    pub fn average_duration(&self) -> Option<Duration> {
        if self.finished == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.duration_sum_secs / self.finished as f64))
    }
}

/// 任务指标，线程间共享
#[derive(Debug, Default)]
pub struct JobMetrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
    queued: AtomicI64,
    running: AtomicI64,
    durations: Mutex<Histogram>,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self) {
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一个结束的任务
    pub fn job_finished(&self, success: bool, elapsed: Duration) {
        let counter = if success { &self.succeeded } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_queued(&self, queued: usize) {
        self.queued.store(queued as i64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed).max(0),
            finished: durations.count,
            duration_sum_secs: durations.sum,
        }
    }

    /// Prometheus 文本格式
    pub fn render(&self) -> String {
        let durations = self
            .durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut out = String::new();

        let _ = writeln!(out, "# HELP scrape_jobs_total Total scrape jobs processed");
        let _ = writeln!(out, "# TYPE scrape_jobs_total counter");
        let _ = writeln!(
            out,
            "scrape_jobs_total{{status=\"success\"}} {}",
            self.succeeded.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "scrape_jobs_total{{status=\"failed\"}} {}",
            self.failed.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# HELP scrape_job_duration_seconds Duration of scrape job execution in seconds");
        let _ = writeln!(out, "# TYPE scrape_job_duration_seconds histogram");
        let mut cumulative = 0;
        for (bound, count) in DURATION_BUCKETS.iter().zip(durations.buckets.iter()) {
            cumulative += count;
            let _ = writeln!(
                out,
                "scrape_job_duration_seconds_bucket{{le=\"{}\"}} {}",
                bound, cumulative
            );
        }
        let _ = writeln!(
            out,
            "scrape_job_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            durations.count
        );
        let _ = writeln!(out, "scrape_job_duration_seconds_sum {}", durations.sum);
        let _ = writeln!(out, "scrape_job_duration_seconds_count {}", durations.count);

        let _ = writeln!(out, "# HELP scrape_jobs_queued Number of scrape jobs currently queued");
        let _ = writeln!(out, "# TYPE scrape_jobs_queued gauge");
        let _ = writeln!(out, "scrape_jobs_queued {}", self.queued.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP scrape_jobs_running Number of scrape jobs currently running");
        let _ = writeln!(out, "# TYPE scrape_jobs_running gauge");
        let _ = writeln!(out, "scrape_jobs_running {}", self.running.load(Ordering::Relaxed).max(0));
        out
    }
}
