//! 配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::error::{helpers::config_error, NewsError, NewsResult};
use crate::pipeline::language;
use crate::quota::{QuotaRule, QuotaUnit, WindowPeriod};
use crate::retry::RetryPolicy;

/// 重试设置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// 总尝试次数（含首次调用）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: constants::DEFAULT_BASE_DELAY_MS,
            backoff_factor: constants::DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: constants::DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.backoff_factor,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// 翻译服务设置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationProviderSettings {
    /// 配额服务名
    pub service: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub quota: Option<QuotaRule>,
}

impl Default for TranslationProviderSettings {
    fn default() -> Self {
        Self {
            service: constants::DEFAULT_TRANSLATION_SERVICE.to_string(),
            api_url: constants::DEFAULT_TRANSLATION_API_URL.to_string(),
            api_key: None,
            quota: Some(QuotaRule::new(
                constants::DEFAULT_TRANSLATION_MONTHLY_CHARS,
                WindowPeriod::Month,
                QuotaUnit::Characters,
            )),
        }
    }
}

/// 分析服务设置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisProviderSettings {
    pub service: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub quota: Option<QuotaRule>,
}

impl Default for AnalysisProviderSettings {
    fn default() -> Self {
        Self {
            service: constants::DEFAULT_ANALYSIS_SERVICE.to_string(),
            api_url: constants::DEFAULT_ANALYSIS_API_URL.to_string(),
            api_key: None,
            model: constants::DEFAULT_ANALYSIS_MODEL.to_string(),
            quota: Some(QuotaRule::new(
                constants::DEFAULT_ANALYSIS_REQUESTS_PER_MINUTE,
                WindowPeriod::Minute,
                QuotaUnit::Requests,
            )),
        }
    }
}

/// 管道配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    // 基础配置
    pub target_language: String,
    pub batch_size: usize,
    pub max_concurrent_translations: usize,
    pub max_concurrent_analyses: usize,

    // 分析输出约束
    pub summary_length_range: (usize, usize),
    pub summary_tolerance: usize,
    pub max_keywords: usize,
    pub urgent_cvss_threshold: f32,

    // 缓存配置
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,

    // 时间预算
    pub run_deadline_secs: u64,
    pub translation_timeout_ms: u64,
    pub analysis_timeout_ms: u64,
    pub quota_wait_ms: u64,

    pub retry: RetrySettings,
    pub translation: TranslationProviderSettings,
    pub analysis: AnalysisProviderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_language: constants::DEFAULT_TARGET_LANGUAGE.to_string(),
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_concurrent_translations: constants::DEFAULT_MAX_CONCURRENT_TRANSLATIONS,
            max_concurrent_analyses: constants::DEFAULT_MAX_CONCURRENT_ANALYSES,

            summary_length_range: constants::DEFAULT_SUMMARY_RANGE,
            summary_tolerance: constants::DEFAULT_SUMMARY_TOLERANCE,
            max_keywords: constants::DEFAULT_MAX_KEYWORDS,
            urgent_cvss_threshold: constants::DEFAULT_URGENT_CVSS_THRESHOLD,

            cache_capacity: constants::DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: constants::DEFAULT_CACHE_TTL.as_secs(),

            run_deadline_secs: constants::DEFAULT_RUN_DEADLINE.as_secs(),
            translation_timeout_ms: constants::DEFAULT_TRANSLATION_TIMEOUT.as_millis() as u64,
            analysis_timeout_ms: constants::DEFAULT_ANALYSIS_TIMEOUT.as_millis() as u64,
            quota_wait_ms: constants::DEFAULT_QUOTA_WAIT.as_millis() as u64,

            retry: RetrySettings::default(),
            translation: TranslationProviderSettings::default(),
            analysis: AnalysisProviderSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// 验证配置
    pub fn validate(&self) -> NewsResult<()> {
        if !language::is_valid_code(&self.target_language) {
            return Err(config_error(format!(
                "目标语言代码无效: {}",
                self.target_language
            )));
        }

        if self.batch_size == 0 {
            return Err(config_error("批次大小不能为0"));
        }

        if self.max_concurrent_translations == 0 || self.max_concurrent_analyses == 0 {
            return Err(config_error("最大并发数不能为0"));
        }

        let (min, max) = self.summary_length_range;
        if min == 0 || min > max {
            return Err(config_error(format!("摘要长度范围无效: [{}, {}]", min, max)));
        }

        if self.max_keywords == 0 {
            return Err(config_error("关键词数量上限不能为0"));
        }

        if self.cache_capacity == 0 {
            return Err(config_error("缓存容量不能为0"));
        }

        if self.run_deadline_secs == 0 {
            return Err(config_error("运行截止时间必须大于0"));
        }

        if self.translation_timeout_ms == 0 || self.analysis_timeout_ms == 0 {
            return Err(config_error("调用超时必须大于0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(config_error("重试次数至少为1"));
        }

        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(config_error("退避因子必须不小于1.0"));
        }

        for (name, rule) in [
            (&self.translation.service, &self.translation.quota),
            (&self.analysis.service, &self.analysis.quota),
        ] {
            if name.trim().is_empty() {
                return Err(config_error("服务名不能为空"));
            }
            if let Some(rule) = rule {
                if rule.limit == 0 {
                    return Err(config_error(format!("服务 {} 的配额上限不能为0", name)));
                }
            }
        }

        if self.analysis.model.trim().is_empty() {
            return Err(config_error("分析模型不能为空"));
        }

        Ok(())
    }

    /// 验证外部服务凭证与地址
    ///
    /// 只有使用真实 HTTP 服务时才需要；测试中注入的服务不经过这里。
    pub fn validate_credentials(&self) -> NewsResult<()> {
        validate_endpoint("translation.api_url", &self.translation.api_url)?;
        validate_endpoint("analysis.api_url", &self.analysis.api_url)?;

        match self.analysis.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {}
            _ => return Err(config_error("缺少分析服务的 API 密钥 (analysis.api_key)")),
        }

        if let Some(key) = self.translation.api_key.as_deref() {
            if key.trim().is_empty() {
                return Err(config_error("翻译服务的 API 密钥为空"));
            }
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) -> NewsResult<()> {
        use crate::env::{cache, pipeline, providers, EnvVar};

        if let Some(value) = pipeline::TargetLang::get_override() {
            self.target_language = value?;
        }

        if let Some(value) = pipeline::BatchSize::get_override() {
            self.batch_size = value?;
        }

        if let Some(value) = pipeline::MaxConcurrentTranslations::get_override() {
            self.max_concurrent_translations = value?;
        }

        if let Some(value) = pipeline::MaxConcurrentAnalyses::get_override() {
            self.max_concurrent_analyses = value?;
        }

        if let Some(value) = pipeline::RunDeadline::get_override() {
            self.run_deadline_secs = value?.as_secs();
        }

        if let Some(value) = cache::Capacity::get_override() {
            self.cache_capacity = value?;
        }

        if let Some(value) = cache::Ttl::get_override() {
            self.cache_ttl_secs = value?.as_secs();
        }

        if let Some(value) = providers::TranslationApiUrl::get_override() {
            self.translation.api_url = value?;
            tracing::info!("环境变量覆盖翻译 API URL: {}", self.translation.api_url);
        }

        if let Some(value) = providers::TranslationApiKey::get_override() {
            self.translation.api_key = Some(value?);
        }

        if let Some(value) = providers::AnalysisApiUrl::get_override() {
            self.analysis.api_url = value?;
            tracing::info!("环境变量覆盖分析 API URL: {}", self.analysis.api_url);
        }

        if let Some(value) = providers::AnalysisApiKey::get_override() {
            self.analysis.api_key = Some(value?);
        }

        if let Some(value) = providers::AnalysisModel::get_override() {
            self.analysis.model = value?;
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_millis(self.translation_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn quota_wait(&self) -> Duration {
        Duration::from_millis(self.quota_wait_ms)
    }

    /// 单次调用的最长耗时，用于限定截止时间后的收尾
    pub fn max_call_timeout(&self) -> Duration {
        self.translation_timeout().max(self.analysis_timeout())
    }
}

fn validate_endpoint(field: &str, value: &str) -> NewsResult<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| config_error(format!("{} 不是有效的 URL ({}): {}", field, value, e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(config_error(format!(
            "{} 使用了不支持的协议: {}",
            field, other
        ))),
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: PipelineConfig,
}

impl ConfigManager {
    /// 按搜索路径加载配置，叠加环境变量并验证
    pub fn new() -> NewsResult<Self> {
        let mut config = Self::load_config()?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self { config })
    }

    /// 从指定文件加载配置
    pub fn from_path<P: AsRef<Path>>(path: P) -> NewsResult<Self> {
        Self::load_dotenv();

        let expanded = shellexpand::tilde(&path.as_ref().to_string_lossy()).into_owned();
        let mut config = Self::load_from_file(&expanded)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self { config })
    }

    /// 获取配置
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn into_config(self) -> PipelineConfig {
        self.config
    }

    fn load_config() -> NewsResult<PipelineConfig> {
        // 首先尝试加载 .env 文件
        Self::load_dotenv();

        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Self::load_from_file(&expanded_path);
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok(PipelineConfig::default())
    }

    fn load_from_file(path: &str) -> NewsResult<PipelineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("读取配置文件失败 {}: {}", path, e)))?;

        if path.ends_with(".json") {
            serde_json::from_str(&content)
                .map_err(|e| config_error(format!("解析JSON配置失败: {}", e)))
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> NewsResult<()> {
        let config = PipelineConfig::default();
        let content = toml::to_string_pretty(&config)?;

        std::fs::write(path.as_ref(), content).map_err(|e| {
            NewsError::Io(format!("写入配置文件失败 {}: {}", path.as_ref().display(), e))
        })?;

        Ok(())
    }
}
