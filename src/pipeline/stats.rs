//! 运行统计
//!
//! `RunMeter` 在一次运行中由各个 worker 并发累加，运行结束时与文章状态一起
//! 汇总成 `RunStats`。每次运行独立计数，不存在全局计数器。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{ErrorCategory, ErrorStats, NewsError};
use crate::model::Priority;

/// 处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    Translate,
    Analyze,
}

/// 运行状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Collecting,
    Translating,
    Analyzing,
    Aggregating,
    Done,
}

/// 状态转换记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub state: RunState,
    /// 翻译与分析阶段所属的优先级批次
    pub tier: Option<Priority>,
    pub offset_ms: u64,
}

/// worker 开始处理某个工作单元的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingEvent {
    pub article_id: String,
    pub stage: Stage,
    pub worker: usize,
    pub offset_ms: u64,
}

/// 单篇文章的失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleFailure {
    pub article_id: String,
    pub stage: Stage,
    pub category: ErrorCategory,
    pub message: String,
}

impl ArticleFailure {
    pub fn new(article_id: impl Into<String>, stage: Stage, error: &NewsError) -> Self {
        Self {
            article_id: article_id.into(),
            stage,
            category: error.category(),
            message: error.to_string(),
        }
    }
}

/// 运行期间的并发计数器
#[derive(Debug)]
pub struct RunMeter {
    started: Instant,
    deadline: Option<Instant>,
    api_calls: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    chars_sent: AtomicU64,
}

impl Default for RunMeter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RunMeter {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            started: Instant::now(),
            deadline,
            api_calls: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            chars_sent: AtomicU64::new(0),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// 运行截止时间；之后不再发起新的调用
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// 每次实际发出的请求（含重试）计一次
    pub fn add_api_calls(&self, service: &str, count: u32) {
        self.api_calls.fetch_add(count as usize, Ordering::Relaxed);
        metrics::counter!("newswire_api_calls_total", "service" => service.to_string())
            .increment(count as u64);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("newswire_cache_hits_total").increment(1);
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chars_sent(&self, count: u64) {
        self.chars_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            api_calls: self.api_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            chars_sent: self.chars_sent.load(Ordering::Relaxed),
        }
    }
}

/// `RunMeter` 的不可变快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeterSnapshot {
    pub api_calls: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub chars_sent: u64,
}

/// 一次运行的统计结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub total_input: usize,
    /// 实际写入译文的文章数
    pub translated: usize,
    pub analyzed: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    /// 失败条目数量
    pub errors: usize,
    pub elapsed_ms: u64,

    pub unprocessed: usize,
    /// 因配额不足延后的文章
    pub deferred: usize,
    pub untranslated: usize,
    pub unanalyzed: usize,
    pub duplicates: usize,
    pub summary_out_of_range: usize,
    pub validation_issues: usize,
    pub deadline_hit: bool,
    pub chars_translated: u64,

    pub failures: Vec<ArticleFailure>,
    pub error_stats: ErrorStats,
    pub timeline: Vec<ProcessingEvent>,
    pub states: Vec<StateTransition>,
    pub quota_remaining: BTreeMap<String, u64>,
}

impl RunStats {
    pub fn record_failure(&mut self, failure: ArticleFailure, error: &NewsError) {
        metrics::counter!("newswire_article_failures_total").increment(1);
        self.error_stats.record_error(error);
        self.failures.push(failure);
        self.errors = self.failures.len();
    }

    pub fn apply_meter(&mut self, meter: &MeterSnapshot) {
        self.api_calls = meter.api_calls;
        self.cache_hits = meter.cache_hits;
        self.chars_translated = meter.chars_sent;
    }

    /// 某篇文章在某阶段的开始顺序
    pub fn start_order(&self, stage: Stage) -> Vec<&str> {
        self.timeline
            .iter()
            .filter(|event| event.stage == stage)
            .map(|event| event.article_id.as_str())
            .collect()
    }

    pub fn error_rate(&self) -> f64 {
        self.error_stats.error_rate(self.total_input)
    }
}
