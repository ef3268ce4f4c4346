//! 管道统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。单篇文章的错误在 worker 边界被转换为
//! 统计条目，只有构造阶段的配置错误会直接返回给调用方。

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 配额不足
///
/// 由 `RateLimiter::wait_acquire` 返回。调用方应视为“稍后可重试”，
/// 对应文章被延后处理而不是丢弃。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("服务 {service} 配额不足: 需要 {requested}, 剩余 {remaining}")]
pub struct QuotaExceeded {
    pub service: String,
    pub requested: u64,
    pub remaining: u64,
}

/// 外部服务单次调用的错误，由 `RetryPolicy` 消费
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// 网络错误或 5xx
    #[error("服务暂时故障: {0}")]
    Transient(String),

    /// 服务端限流（429）
    #[error("服务限流: {0}")]
    RateLimited(String),

    /// 其他 4xx，或响应无法使用
    #[error("服务拒绝请求: {0}")]
    Permanent(String),

    #[error("调用超时 ({0:?})")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }

    /// 按 HTTP 状态码分类
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, truncate_for_log(body, 200));
        match status {
            429 => ProviderError::RateLimited(detail),
            408 | 500..=599 => ProviderError::Transient(detail),
            _ => ProviderError::Permanent(detail),
        }
    }

    /// 重试耗尽后转换为管道错误；限流视为配额不足
    pub fn into_news_error(self, service: &str, requested: u64) -> NewsError {
        match self {
            ProviderError::Transient(msg) => NewsError::TransientProvider(format!("{}: {}", service, msg)),
            ProviderError::Timeout(after) => {
                NewsError::TransientProvider(format!("{}: 调用超时 ({:?})", service, after))
            }
            ProviderError::RateLimited(_) => NewsError::QuotaExceeded(QuotaExceeded {
                service: service.to_string(),
                requested,
                remaining: 0,
            }),
            ProviderError::Permanent(msg) => NewsError::PermanentProvider(format!("{}: {}", service, msg)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return ProviderError::from_status(status.as_u16(), &error.to_string());
        }
        if error.is_decode() || error.is_builder() {
            ProviderError::Permanent(error.to_string())
        } else {
            ProviderError::Transient(error.to_string())
        }
    }
}

fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// 管道错误类型
#[derive(Error, Debug, Clone)]
pub enum NewsError {
    /// 配额不足，稍后可重试
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    /// 网络错误、5xx 或超时，已按策略重试
    #[error("服务暂时不可用: {0}")]
    TransientProvider(String),

    /// 4xx（限流除外），不重试
    #[error("服务拒绝请求: {0}")]
    PermanentProvider(String),

    /// 服务输出违反硬性约束
    #[error("输出校验失败: {0}")]
    Validation(String),

    /// 运行截止时间已到
    #[error("运行截止时间已到: {0}")]
    DeadlineExceeded(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 输入验证错误
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl NewsError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            NewsError::QuotaExceeded(_) => true,
            NewsError::TransientProvider(_) => true,
            NewsError::Cache(_) => true,
            NewsError::Io(_) => true,
            NewsError::PermanentProvider(_) => false,
            NewsError::Validation(_) => false,
            NewsError::DeadlineExceeded(_) => false,
            NewsError::Config(_) => false,
            NewsError::InvalidInput(_) => false,
            NewsError::Serialization(_) => false,
            NewsError::Internal(_) => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            NewsError::Config(_) => ErrorSeverity::Critical,
            NewsError::Internal(_) => ErrorSeverity::Critical,
            NewsError::QuotaExceeded(_) => ErrorSeverity::Warning,
            NewsError::TransientProvider(_) => ErrorSeverity::Warning,
            NewsError::DeadlineExceeded(_) => ErrorSeverity::Warning,
            NewsError::Cache(_) => ErrorSeverity::Warning,
            NewsError::InvalidInput(_) => ErrorSeverity::Info,
            NewsError::PermanentProvider(_) => ErrorSeverity::Error,
            NewsError::Validation(_) => ErrorSeverity::Error,
            NewsError::Serialization(_) => ErrorSeverity::Error,
            NewsError::Io(_) => ErrorSeverity::Error,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            NewsError::QuotaExceeded(_) => ErrorCategory::Quota,
            NewsError::TransientProvider(_) => ErrorCategory::Transient,
            NewsError::PermanentProvider(_) => ErrorCategory::Permanent,
            NewsError::Validation(_) => ErrorCategory::Validation,
            NewsError::DeadlineExceeded(_) => ErrorCategory::Deadline,
            NewsError::Config(_) => ErrorCategory::Configuration,
            NewsError::InvalidInput(_) => ErrorCategory::Input,
            NewsError::Cache(_) => ErrorCategory::Cache,
            NewsError::Serialization(_) => ErrorCategory::Serialization,
            NewsError::Io(_) => ErrorCategory::Io,
            NewsError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(mut self, context: T) -> Self {
        if matches!(self, NewsError::QuotaExceeded(_)) {
            return self;
        }
        let new_msg = format!("{} (上下文: {})", inner_message(&self), context);

        match &mut self {
            NewsError::TransientProvider(msg)
            | NewsError::PermanentProvider(msg)
            | NewsError::Validation(msg)
            | NewsError::DeadlineExceeded(msg)
            | NewsError::Config(msg)
            | NewsError::InvalidInput(msg)
            | NewsError::Cache(msg)
            | NewsError::Serialization(msg)
            | NewsError::Io(msg)
            | NewsError::Internal(msg) => *msg = new_msg,
            NewsError::QuotaExceeded(_) => {}
        }

        self
    }
}

fn inner_message(error: &NewsError) -> &str {
    match error {
        NewsError::TransientProvider(msg)
        | NewsError::PermanentProvider(msg)
        | NewsError::Validation(msg)
        | NewsError::DeadlineExceeded(msg)
        | NewsError::Config(msg)
        | NewsError::InvalidInput(msg)
        | NewsError::Cache(msg)
        | NewsError::Serialization(msg)
        | NewsError::Io(msg)
        | NewsError::Internal(msg) => msg,
        NewsError::QuotaExceeded(_) => "",
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Quota,
    Transient,
    Permanent,
    Validation,
    Deadline,
    Configuration,
    Input,
    Cache,
    Serialization,
    Io,
    Internal,
}

impl From<std::io::Error> for NewsError {
    fn from(error: std::io::Error) -> Self {
        NewsError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for NewsError {
    fn from(error: serde_json::Error) -> Self {
        NewsError::Serialization(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for NewsError {
    fn from(error: toml::de::Error) -> Self {
        NewsError::Config(format!("TOML解析错误: {}", error))
    }
}

impl From<toml::ser::Error> for NewsError {
    fn from(error: toml::ser::Error) -> Self {
        NewsError::Serialization(format!("TOML序列化错误: {}", error))
    }
}

impl From<tokio::time::error::Elapsed> for NewsError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        NewsError::TransientProvider(format!("异步操作超时: {}", error))
    }
}

impl From<crate::env::EnvError> for NewsError {
    fn from(error: crate::env::EnvError) -> Self {
        NewsError::Config(error.to_string())
    }
}

/// 错误结果类型别名
pub type NewsResult<T> = Result<T, NewsError>;

/// 错误统计信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
    pub retryable_errors: usize,
    pub critical_errors: usize,
}

impl ErrorStats {
    /// 记录错误
    pub fn record_error(&mut self, error: &NewsError) {
        self.total_errors += 1;

        *self.by_category.entry(error.category()).or_insert(0) += 1;

        let severity = error.severity();
        *self.by_severity.entry(severity).or_insert(0) += 1;

        if error.is_retryable() {
            self.retryable_errors += 1;
        }

        if severity == ErrorSeverity::Critical {
            self.critical_errors += 1;
        }
    }

    /// 获取错误率
    pub fn error_rate(&self, total_operations: usize) -> f64 {
        if total_operations == 0 {
            0.0
        } else {
            self.total_errors as f64 / total_operations as f64
        }
    }
}

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录日志并返回错误
    pub fn log_error(error: &NewsError) {
        match error.severity() {
            ErrorSeverity::Info => tracing::info!("管道信息: {}", error),
            ErrorSeverity::Warning => tracing::warn!("管道警告: {}", error),
            ErrorSeverity::Error => tracing::error!("管道错误: {}", error),
            ErrorSeverity::Critical => tracing::error!("管道严重错误: {}", error),
        }
    }

    /// 创建配置错误
    pub fn config_error<T: fmt::Display>(msg: T) -> NewsError {
        NewsError::Config(msg.to_string())
    }

    /// 创建输入验证错误
    pub fn validation_error<T: fmt::Display>(msg: T) -> NewsError {
        NewsError::Validation(msg.to_string())
    }

    /// 创建内部错误
    pub fn internal_error<T: fmt::Display>(msg: T) -> NewsError {
        NewsError::Internal(msg.to_string())
    }
}
