use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 配额窗口长度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowPeriod {
    Second,
    Minute,
    Hour,
    Day,
    /// 自然月（UTC）
    Month,
}

impl WindowPeriod {
    /// 包含 `now` 的窗口起点
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ts = now.timestamp();
        let truncated = match self {
            WindowPeriod::Second => ts,
            WindowPeriod::Minute => ts - ts.rem_euclid(60),
            WindowPeriod::Hour => ts - ts.rem_euclid(3600),
            WindowPeriod::Day => ts - ts.rem_euclid(86_400),
            WindowPeriod::Month => {
                return first_of_month(now.year(), now.month()).unwrap_or(now);
            }
        };
        Utc.timestamp_opt(truncated, 0).single().unwrap_or(now)
    }

    /// `start` 所在窗口的结束边界
    pub fn next_boundary(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            WindowPeriod::Second => start + ChronoDuration::seconds(1),
            WindowPeriod::Minute => start + ChronoDuration::minutes(1),
            WindowPeriod::Hour => start + ChronoDuration::hours(1),
            WindowPeriod::Day => start + ChronoDuration::days(1),
            WindowPeriod::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                first_of_month(year, month).unwrap_or(start + ChronoDuration::days(31))
            }
        }
    }
}

fn first_of_month(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// 配额计量单位，仅用于报告；花费由调用方给出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaUnit {
    Requests,
    Characters,
}

/// 单个服务的配额规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRule {
    pub limit: u64,
    pub window: WindowPeriod,
    pub unit: QuotaUnit,
}

impl QuotaRule {
    pub fn new(limit: u64, window: WindowPeriod, unit: QuotaUnit) -> Self {
        Self { limit, window, unit }
    }

    pub fn requests_per_minute(limit: u64) -> Self {
        Self::new(limit, WindowPeriod::Minute, QuotaUnit::Requests)
    }

    pub fn characters_per_month(limit: u64) -> Self {
        Self::new(limit, WindowPeriod::Month, QuotaUnit::Characters)
    }
}

/// 当前窗口的用量
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaWindow {
    pub rule: QuotaRule,
    pub window_start: DateTime<Utc>,
    pub used: u64,
}

impl QuotaWindow {
    pub fn new(rule: QuotaRule, now: DateTime<Utc>) -> Self {
        Self {
            rule,
            window_start: rule.window.window_start(now),
            used: 0,
        }
    }

    pub fn resets_at(&self) -> DateTime<Utc> {
        self.rule.window.next_boundary(self.window_start)
    }

    /// 跨过窗口边界时清零，每个边界只发生一次
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        if now >= self.resets_at() {
            self.window_start = self.rule.window.window_start(now);
            self.used = 0;
            true
        } else {
            false
        }
    }

    /// 不修改状态的剩余量视图
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        if now >= self.resets_at() {
            self.rule.limit
        } else {
            self.rule.limit.saturating_sub(self.used)
        }
    }

    pub fn try_consume(&mut self, cost: u64) -> bool {
        match self.used.checked_add(cost) {
            Some(total) if total <= self.rule.limit => {
                self.used = total;
                true
            }
            _ => false,
        }
    }
}
