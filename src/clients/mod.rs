//! 外部服务客户端
//!
//! 两个客户端遵循同一流程：查缓存、配额准入、带超时和重试的调用、写回缓存。
//! 服务本身通过 trait 注入，HTTP 实现与测试替身可以互换。

pub mod analysis;
pub mod decode;
pub mod translation;

use std::time::Duration;

use crate::config::PipelineConfig;
use crate::retry::RetryPolicy;

pub use analysis::{
    AnalysisClient, AnalysisOutcome, AnalysisProvider, AnalysisRequest, ChatCompletionProvider,
    PromptSettings, ANALYSIS_PROMPT_VERSION,
};
pub use decode::{AnalysisDecoder, DecodeLimits, Decoded, ValidationIssue};
pub use translation::{DeepLxProvider, TranslatedText, TranslationClient, TranslationProvider};

/// 客户端的调用参数
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// 配额与日志使用的服务名
    pub service: String,
    /// 结果使用的目标语言
    pub language: String,
    pub call_timeout: Duration,
    pub quota_wait: Duration,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl ClientOptions {
    pub fn for_translation(config: &PipelineConfig) -> Self {
        Self {
            service: config.translation.service.clone(),
            language: config.target_language.clone(),
            call_timeout: config.translation_timeout(),
            quota_wait: config.quota_wait(),
            cache_ttl: config.cache_ttl(),
            retry: config.retry.to_policy(),
        }
    }

    pub fn for_analysis(config: &PipelineConfig) -> Self {
        Self {
            service: config.analysis.service.clone(),
            language: config.target_language.clone(),
            call_timeout: config.analysis_timeout(),
            quota_wait: config.quota_wait(),
            cache_ttl: config.cache_ttl(),
            retry: config.retry.to_policy(),
        }
    }
}
