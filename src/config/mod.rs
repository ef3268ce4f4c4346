//! 管道配置管理模块
//!
//! 提供简化的配置管理，支持环境变量、配置文件和默认值

pub mod manager;

// 重新导出主要类型
pub use manager::{
    AnalysisProviderSettings, ConfigManager, PipelineConfig, RetrySettings,
    TranslationProviderSettings,
};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 语言与批次
    pub const DEFAULT_TARGET_LANGUAGE: &str = "ja";
    pub const DEFAULT_BATCH_SIZE: usize = 5;
    pub const DEFAULT_MAX_CONCURRENT_TRANSLATIONS: usize = 5;
    pub const DEFAULT_MAX_CONCURRENT_ANALYSES: usize = 3;

    // 分析输出约束
    pub const DEFAULT_SUMMARY_RANGE: (usize, usize) = (200, 250);
    pub const DEFAULT_SUMMARY_TOLERANCE: usize = 20;
    pub const DEFAULT_MAX_KEYWORDS: usize = 5;
    pub const DAILY_SUMMARY_MAX_CHARS: usize = 300;
    pub const DEFAULT_URGENT_CVSS_THRESHOLD: f32 = 9.0;

    // 缓存
    pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

    // 时间预算
    pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(600);
    pub const DEFAULT_TRANSLATION_TIMEOUT: Duration = Duration::from_millis(2000);
    pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_millis(30_000);
    pub const DEFAULT_QUOTA_WAIT: Duration = Duration::from_millis(5000);

    // 重试
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

    // 默认服务
    pub const DEFAULT_TRANSLATION_SERVICE: &str = "deepl";
    pub const DEFAULT_TRANSLATION_API_URL: &str = "http://localhost:1188/translate";
    pub const DEFAULT_TRANSLATION_MONTHLY_CHARS: u64 = 500_000;
    pub const DEFAULT_ANALYSIS_SERVICE: &str = "openai";
    pub const DEFAULT_ANALYSIS_API_URL: &str = "https://api.openai.com/v1";
    pub const DEFAULT_ANALYSIS_MODEL: &str = "gpt-4o-mini";
    pub const DEFAULT_ANALYSIS_REQUESTS_PER_MINUTE: u64 = 60;

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "newswire.toml",
        ".newswire.toml",
        "newswire.json",
        "~/.config/newswire/config.toml",
        "/etc/newswire/config.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}
