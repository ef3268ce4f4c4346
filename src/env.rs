//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问。所有变量都以 `NEWSWIRE_` 为前缀，
//! 由 `ConfigManager` 在读取配置文件之后叠加覆盖。

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 只在变量被显式设置时返回值，用于覆盖配置文件
    fn get_override() -> Option<EnvResult<T>> {
        env::var(Self::NAME).ok().map(|value| Self::parse(&value))
    }
}

/// 核心环境变量
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "NEWSWIRE_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }
}

/// 管道运行相关环境变量
pub mod pipeline {
    use super::*;

    /// 目标语言
    pub struct TargetLang;
    impl EnvVar<String> for TargetLang {
        const NAME: &'static str = "NEWSWIRE_TARGET_LANG";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Target language for translation (ISO 639-1 code)";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("ja".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            let lang = value.trim().to_lowercase();
            if lang.len() != 2 || !lang.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Language code must be 2 letters (ISO 639-1)".to_string(),
                });
            }
            Ok(lang)
        }
    }

    /// 分析批次大小
    pub struct BatchSize;
    impl EnvVar<usize> for BatchSize {
        const NAME: &'static str = "NEWSWIRE_BATCH_SIZE";
        const DEFAULT: Option<usize> = Some(5);
        const DESCRIPTION: &'static str = "Articles per batched analysis prompt";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 50)
        }
    }

    /// 翻译并发数
    pub struct MaxConcurrentTranslations;
    impl EnvVar<usize> for MaxConcurrentTranslations {
        const NAME: &'static str = "NEWSWIRE_MAX_CONCURRENT_TRANSLATIONS";
        const DEFAULT: Option<usize> = Some(5);
        const DESCRIPTION: &'static str = "Translation worker pool size";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 64)
        }
    }

    /// 分析并发数
    pub struct MaxConcurrentAnalyses;
    impl EnvVar<usize> for MaxConcurrentAnalyses {
        const NAME: &'static str = "NEWSWIRE_MAX_CONCURRENT_ANALYSES";
        const DEFAULT: Option<usize> = Some(3);
        const DESCRIPTION: &'static str = "Analysis worker pool size";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 64)
        }
    }

    /// 运行截止时间
    pub struct RunDeadline;
    impl EnvVar<Duration> for RunDeadline {
        const NAME: &'static str = "NEWSWIRE_RUN_DEADLINE";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(600));
        const DESCRIPTION: &'static str = "Overall run deadline in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 6 * 3600)
        }
    }
}

/// 缓存相关环境变量
pub mod cache {
    use super::*;

    /// 缓存容量
    pub struct Capacity;
    impl EnvVar<usize> for Capacity {
        const NAME: &'static str = "NEWSWIRE_CACHE_CAPACITY";
        const DEFAULT: Option<usize> = Some(1000);
        const DESCRIPTION: &'static str = "Result cache capacity (number of entries)";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 10, 1_000_000)
        }
    }

    /// 缓存TTL
    pub struct Ttl;
    impl EnvVar<Duration> for Ttl {
        const NAME: &'static str = "NEWSWIRE_CACHE_TTL";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(86400));
        const DESCRIPTION: &'static str = "Result cache TTL in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 60, 86400 * 30)
        }
    }
}

/// 服务凭证与地址
pub mod providers {
    use super::*;

    /// 翻译服务地址
    pub struct TranslationApiUrl;
    impl EnvVar<String> for TranslationApiUrl {
        const NAME: &'static str = "NEWSWIRE_TRANSLATION_API_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Translation API endpoint URL";

        fn parse(value: &str) -> EnvResult<String> {
            parse_http_url(value, Self::NAME)
        }
    }

    /// 翻译服务密钥
    pub struct TranslationApiKey;
    impl EnvVar<String> for TranslationApiKey {
        const NAME: &'static str = "NEWSWIRE_TRANSLATION_API_KEY";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Translation API key";

        fn parse(value: &str) -> EnvResult<String> {
            parse_api_key(value, Self::NAME)
        }
    }

    /// 分析服务地址
    pub struct AnalysisApiUrl;
    impl EnvVar<String> for AnalysisApiUrl {
        const NAME: &'static str = "NEWSWIRE_ANALYSIS_API_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "OpenAI-compatible analysis API base URL";

        fn parse(value: &str) -> EnvResult<String> {
            parse_http_url(value, Self::NAME)
        }
    }

    /// 分析服务密钥
    pub struct AnalysisApiKey;
    impl EnvVar<String> for AnalysisApiKey {
        const NAME: &'static str = "NEWSWIRE_ANALYSIS_API_KEY";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Analysis API key";

        fn parse(value: &str) -> EnvResult<String> {
            parse_api_key(value, Self::NAME)
        }
    }

    /// 分析模型
    pub struct AnalysisModel;
    impl EnvVar<String> for AnalysisModel {
        const NAME: &'static str = "NEWSWIRE_ANALYSIS_MODEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Model name used for editorial analysis";

        fn parse(value: &str) -> EnvResult<String> {
            let model = value.trim();
            if model.is_empty() {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Model name cannot be empty".to_string(),
                });
            }
            Ok(model.to_string())
        }
    }
}

/// 辅助函数
fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

fn parse_seconds(value: &str, var_name: &str, min: u64, max: u64) -> EnvResult<Duration> {
    let seconds: u64 = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid number of seconds".to_string(),
    })?;

    if seconds < min || seconds > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value must be between {} and {} seconds", min, max),
        });
    }

    Ok(Duration::from_secs(seconds))
}

fn parse_http_url(value: &str, var_name: &str) -> EnvResult<String> {
    let url = value.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(EnvError {
            variable: var_name.to_string(),
            message: "API URL must start with http:// or https://".to_string(),
        })
    }
}

fn parse_api_key(value: &str, var_name: &str) -> EnvResult<String> {
    let key = value.trim();
    if key.len() < 8 {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: "API key must be at least 8 characters".to_string(),
        });
    }
    Ok(key.to_string())
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    fn line<T: fmt::Debug>(name: &str, description: &str, default: Option<T>) -> String {
        match default {
            Some(value) => format!("- `{}`: {} (default: {:?})\n", name, description, value),
            None => format!("- `{}`: {}\n", name, description),
        }
    }

    let mut docs = String::new();
    docs.push_str("# Environment Variables\n\n");

    docs.push_str("## Core\n\n");
    docs.push_str(&line(core::LogLevel::NAME, core::LogLevel::DESCRIPTION, Some("info")));

    docs.push_str("\n## Pipeline\n\n");
    docs.push_str(&line(pipeline::TargetLang::NAME, pipeline::TargetLang::DESCRIPTION, Some("ja")));
    docs.push_str(&line(pipeline::BatchSize::NAME, pipeline::BatchSize::DESCRIPTION, pipeline::BatchSize::DEFAULT));
    docs.push_str(&line(
        pipeline::MaxConcurrentTranslations::NAME,
        pipeline::MaxConcurrentTranslations::DESCRIPTION,
        pipeline::MaxConcurrentTranslations::DEFAULT,
    ));
    docs.push_str(&line(
        pipeline::MaxConcurrentAnalyses::NAME,
        pipeline::MaxConcurrentAnalyses::DESCRIPTION,
        pipeline::MaxConcurrentAnalyses::DEFAULT,
    ));
    docs.push_str(&line(pipeline::RunDeadline::NAME, pipeline::RunDeadline::DESCRIPTION, pipeline::RunDeadline::DEFAULT));

    docs.push_str("\n## Cache\n\n");
    docs.push_str(&line(cache::Capacity::NAME, cache::Capacity::DESCRIPTION, cache::Capacity::DEFAULT));
    docs.push_str(&line(cache::Ttl::NAME, cache::Ttl::DESCRIPTION, cache::Ttl::DEFAULT));

    docs.push_str("\n## Providers\n\n");
    docs.push_str(&line::<String>(providers::TranslationApiUrl::NAME, providers::TranslationApiUrl::DESCRIPTION, None));
    docs.push_str(&line::<String>(providers::TranslationApiKey::NAME, providers::TranslationApiKey::DESCRIPTION, None));
    docs.push_str(&line::<String>(providers::AnalysisApiUrl::NAME, providers::AnalysisApiUrl::DESCRIPTION, None));
    docs.push_str(&line::<String>(providers::AnalysisApiKey::NAME, providers::AnalysisApiKey::DESCRIPTION, None));
    docs.push_str(&line::<String>(providers::AnalysisModel::NAME, providers::AnalysisModel::DESCRIPTION, None));

    docs
}
