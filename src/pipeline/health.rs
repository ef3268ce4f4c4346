//! 管道健康状态

use std::collections::BTreeMap;

use serde::Serialize;

use crate::quota::QuotaStatus;
use crate::storage::CacheStats;

/// 配额剩余低于该比例时视为降级
const QUOTA_DEGRADED_RATIO: f64 = 0.1;

/// 健康状态级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    /// 功能受限但仍可用
    Degraded,
    Unhealthy,
}

/// 管道及各组件的健康状态
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub components: BTreeMap<String, HealthLevel>,
    pub quota: BTreeMap<String, QuotaStatus>,
    pub cache: CacheStats,
}

impl HealthStatus {
    pub fn evaluate(quota: BTreeMap<String, QuotaStatus>, cache: CacheStats) -> Self {
        let mut components = BTreeMap::new();

        for (service, status) in &quota {
            components.insert(format!("quota:{}", service), quota_level(status));
        }

        let cache_level = if cache.capacity == 0 {
            HealthLevel::Unhealthy
        } else {
            HealthLevel::Healthy
        };
        components.insert("cache".to_string(), cache_level);

        // 任一组件不健康则整体不健康，有降级则整体降级
        let overall = components
            .values()
            .copied()
            .max()
            .unwrap_or(HealthLevel::Healthy);

        Self {
            overall,
            components,
            quota,
            cache,
        }
    }
}

fn quota_level(status: &QuotaStatus) -> HealthLevel {
    if status.remaining == 0 {
        HealthLevel::Unhealthy
    } else if (status.remaining as f64) < status.limit as f64 * QUOTA_DEGRADED_RATIO {
        HealthLevel::Degraded
    } else {
        HealthLevel::Healthy
    }
}
