//! 分析结果模型
//!
//! `Analysis` 只能由解码校验步骤构造（缓存记录读出时也重新校验），
//! 构造后不可变。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 影响范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactScope {
    Local,
    National,
    International,
}

impl ImpactScope {
    /// 大小写不敏感解析，接受常见同义词
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" | "regional" => Some(ImpactScope::Local),
            "national" | "domestic" => Some(ImpactScope::National),
            "international" | "global" | "worldwide" => Some(ImpactScope::International),
            _ => None,
        }
    }
}

impl fmt::Display for ImpactScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImpactScope::Local => "local",
            ImpactScope::National => "national",
            ImpactScope::International => "international",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    importance_score: u8,
    summary: String,
    keywords: Vec<String>,
    sentiment_score: f32,
    is_urgent: bool,
    impact_scope: ImpactScope,
    reliability_score: u8,
    risk_factors: BTreeSet<String>,
}

impl Analysis {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_validated(
        importance_score: u8,
        summary: String,
        keywords: Vec<String>,
        sentiment_score: f32,
        is_urgent: bool,
        impact_scope: ImpactScope,
        reliability_score: u8,
        risk_factors: BTreeSet<String>,
    ) -> Self {
        Self {
            importance_score,
            summary,
            keywords,
            sentiment_score,
            is_urgent,
            impact_scope,
            reliability_score,
            risk_factors,
        }
    }

    /// 1..=10
    pub fn importance_score(&self) -> u8 {
        self.importance_score
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// -1.0..=1.0
    pub fn sentiment_score(&self) -> f32 {
        self.sentiment_score
    }

    pub fn is_urgent(&self) -> bool {
        self.is_urgent
    }

    pub fn impact_scope(&self) -> ImpactScope {
        self.impact_scope
    }

    /// 1..=10
    pub fn reliability_score(&self) -> u8 {
        self.reliability_score
    }

    pub fn risk_factors(&self) -> &BTreeSet<String> {
        &self.risk_factors
    }
}
