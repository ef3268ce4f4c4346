use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::clock::{Clock, SystemClock};
use super::window::{QuotaRule, QuotaUnit, QuotaWindow, WindowPeriod};
use crate::error::QuotaExceeded;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 单个服务的配额快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub unit: QuotaUnit,
    pub window: WindowPeriod,
    pub resets_at: DateTime<Utc>,
}

enum Admission {
    Granted,
    Denied {
        remaining: u64,
        limit: u64,
        resets_at: DateTime<Utc>,
    },
}

/// 按服务划分的固定窗口配额
///
/// 窗口状态的读改写在 `DashMap` 分片锁内完成，并发调用者不会重复清零。
/// 未注册的服务不受限制。
pub struct RateLimiter {
    windows: DashMap<String, QuotaWindow>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// 注册或替换服务的配额规则，用量从零开始
    pub fn register(&self, service: impl Into<String>, rule: QuotaRule) {
        let service = service.into();
        tracing::debug!(
            "注册配额: {} = {} {:?}/{:?}",
            service,
            rule.limit,
            rule.unit,
            rule.window
        );
        self.windows
            .insert(service, QuotaWindow::new(rule, self.clock.now()));
    }

    pub fn is_registered(&self, service: &str) -> bool {
        self.windows.contains_key(service)
    }

    /// 非阻塞准入，成功时计入用量
    pub fn try_acquire(&self, service: &str, cost: u64) -> bool {
        matches!(self.admit(service, cost), Admission::Granted)
    }

    /// 等待配额，最多等待 `max_wait`
    ///
    /// 如果下一个窗口边界在 `max_wait` 之外，或者花费超过窗口上限，立即失败。
    pub async fn wait_acquire(
        &self,
        service: &str,
        cost: u64,
        max_wait: Duration,
    ) -> Result<(), QuotaExceeded> {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            let (remaining, limit, resets_at) = match self.admit(service, cost) {
                Admission::Granted => return Ok(()),
                Admission::Denied {
                    remaining,
                    limit,
                    resets_at,
                } => (remaining, limit, resets_at),
            };

            let exceeded = QuotaExceeded {
                service: service.to_string(),
                requested: cost,
                remaining,
            };

            if cost > limit {
                tracing::warn!("请求花费 {} 超过服务 {} 的窗口上限 {}", cost, service, limit);
                return Err(denied(exceeded));
            }

            let until_reset = (resets_at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let budget = deadline.saturating_duration_since(tokio::time::Instant::now());

            if until_reset > budget {
                tracing::debug!(
                    "服务 {} 配额在 {:?} 后重置，超出等待上限 {:?}",
                    service,
                    until_reset,
                    budget
                );
                return Err(denied(exceeded));
            }

            tokio::time::sleep(until_reset.min(self.poll_interval).max(Duration::from_millis(1))).await;
        }
    }

    /// 剩余配额；未注册的服务返回 `u64::MAX`
    pub fn remaining(&self, service: &str) -> u64 {
        let now = self.clock.now();
        self.windows
            .get(service)
            .map(|window| window.remaining_at(now))
            .unwrap_or(u64::MAX)
    }

    pub fn status(&self, service: &str) -> Option<QuotaStatus> {
        let now = self.clock.now();
        self.windows.get(service).map(|window| status_of(&window, now))
    }

    /// 所有服务的配额快照
    pub fn snapshot(&self) -> BTreeMap<String, QuotaStatus> {
        let now = self.clock.now();
        self.windows
            .iter()
            .map(|entry| (entry.key().clone(), status_of(entry.value(), now)))
            .collect()
    }

    fn admit(&self, service: &str, cost: u64) -> Admission {
        let now = self.clock.now();
        let Some(mut window) = self.windows.get_mut(service) else {
            return Admission::Granted;
        };

        if window.roll(now) {
            tracing::debug!("服务 {} 进入新的配额窗口", service);
        }

        if window.try_consume(cost) {
            Admission::Granted
        } else {
            Admission::Denied {
                remaining: window.rule.limit.saturating_sub(window.used),
                limit: window.rule.limit,
                resets_at: window.resets_at(),
            }
        }
    }
}

/// 记录一次拒绝
fn denied(exceeded: QuotaExceeded) -> QuotaExceeded {
    metrics::counter!("newswire_quota_denied_total", "service" => exceeded.service.clone())
        .increment(1);
    exceeded
}

fn status_of(window: &QuotaWindow, now: DateTime<Utc>) -> QuotaStatus {
    let remaining = window.remaining_at(now);
    let (used, resets_at) = if now >= window.resets_at() {
        let start = window.rule.window.window_start(now);
        (0, window.rule.window.next_boundary(start))
    } else {
        (window.used, window.resets_at())
    };

    QuotaStatus {
        limit: window.rule.limit,
        used,
        remaining,
        unit: window.rule.unit,
        window: window.rule.window,
        resets_at,
    }
}
