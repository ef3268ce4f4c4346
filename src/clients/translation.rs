//! 翻译客户端
//!
//! 客户端不关心语言策略：源语言与目标语言相同时是否跳过由管道决定。
//! 配额按字符数计费，缓存命中不消耗配额也不发起网络请求。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::ClientOptions;
use crate::error::{helpers::config_error, NewsError, NewsResult, ProviderError};
use crate::pipeline::stats::RunMeter;
use crate::quota::RateLimiter;
use crate::storage::{CacheKey, CacheOperation, ResultCache};

/// 翻译服务
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError>;
}

/// 翻译结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedText {
    pub text: String,
    pub from_cache: bool,
}

pub struct TranslationClient {
    provider: Arc<dyn TranslationProvider>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResultCache>,
    options: ClientOptions,
}

impl TranslationClient {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResultCache>,
        options: ClientOptions,
    ) -> Self {
        Self {
            provider,
            limiter,
            cache,
            options,
        }
    }

    pub fn service(&self) -> &str {
        &self.options.service
    }

    pub fn call_timeout(&self) -> Duration {
        self.options.call_timeout
    }

    /// 翻译一段文本
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        meter: &RunMeter,
    ) -> NewsResult<TranslatedText> {
        if text.trim().is_empty() {
            return Ok(TranslatedText {
                text: text.to_string(),
                from_cache: false,
            });
        }

        let variant = format!("{}>{}", source_lang, target_lang);
        let key = CacheKey::new(CacheOperation::Translate, text, &variant);

        if let Some(cached) = self.cache.get(&key).await {
            meter.inc_cache_hits();
            tracing::debug!("翻译缓存命中: {}", variant);
            return Ok(TranslatedText {
                text: cached,
                from_cache: true,
            });
        }
        meter.inc_cache_misses();

        if meter.deadline_passed() {
            return Err(NewsError::DeadlineExceeded("翻译请求未发出".to_string()));
        }

        let cost = text.chars().count() as u64;
        self.limiter
            .wait_acquire(&self.options.service, cost, self.options.quota_wait)
            .await?;

        let label = format!("翻译 {} ({})", variant, self.provider.name());
        let outcome = self
            .options
            .retry
            .execute(&label, self.options.call_timeout, meter.deadline(), |_| {
                self.provider.translate(text, source_lang, target_lang)
            })
            .await;
        meter.add_api_calls(&self.options.service, outcome.attempts);

        match outcome.result {
            Ok(translated) if translated.trim().is_empty() => Err(NewsError::PermanentProvider(
                format!("{}: 返回了空译文", self.options.service),
            )),
            Ok(translated) => {
                meter.add_chars_sent(cost);
                self.cache
                    .put(key, translated.clone(), self.options.cache_ttl)
                    .await;
                Ok(TranslatedText {
                    text: translated,
                    from_cache: false,
                })
            }
            Err(error) => Err(error.into_news_error(&self.options.service, cost)),
        }
    }

    /// 同时翻译标题和正文，任一失败则都不返回
    pub async fn translate_pair(
        &self,
        title: &str,
        content: &str,
        source_lang: &str,
        target_lang: &str,
        meter: &RunMeter,
    ) -> NewsResult<(TranslatedText, TranslatedText)> {
        let title = self.translate(title, source_lang, target_lang, meter).await?;
        let content = self
            .translate(content, source_lang, target_lang, meter)
            .await?;
        Ok((title, content))
    }
}

// ============================================================================
// DeepLX 兼容的 HTTP 实现
// ============================================================================

#[derive(Debug, Serialize)]
struct DeepLxRequest<'a> {
    text: &'a str,
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Deserialize)]
struct DeepLxResponse {
    code: i64,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// DeepLX 风格的翻译服务：POST `{text, source_lang, target_lang}`，返回 `{code, data}`
pub struct DeepLxProvider {
    client: reqwest::Client,
    api_url: String,
}

impl DeepLxProvider {
    pub fn new(api_url: &str, api_key: Option<&str>) -> NewsResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| config_error(format!("翻译 API 密钥格式无效: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| config_error(format!("创建 HTTP 客户端失败: {}", e)))?;

        tracing::info!("翻译服务: {}", api_url);
        Ok(Self {
            client,
            api_url: api_url.to_string(),
        })
    }
}

/// DeepL 使用大写语言代码，`auto` 保持原样
fn deepl_lang(code: &str) -> String {
    if code.eq_ignore_ascii_case("auto") {
        "auto".to_string()
    } else {
        code.to_uppercase()
    }
}

#[async_trait]
impl TranslationProvider for DeepLxProvider {
    fn name(&self) -> &str {
        "deeplx"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        let request = DeepLxRequest {
            text,
            source_lang: deepl_lang(source_lang),
            target_lang: deepl_lang(target_lang),
        };

        let response = self.client.post(&self.api_url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let body: DeepLxResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("无法解析翻译响应: {}", e)))?;

        match (body.code, body.data) {
            (200, Some(data)) => Ok(data),
            (200, None) => Err(ProviderError::Permanent("翻译响应缺少 data 字段".to_string())),
            (code, _) if (100..=599).contains(&code) => Err(ProviderError::from_status(
                code as u16,
                body.message.as_deref().unwrap_or_default(),
            )),
            (code, _) => Err(ProviderError::Permanent(format!("未知响应代码 {}", code))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaRule;
    use crate::retry::RetryPolicy;
    use crate::storage::LocalResultCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl TranslationProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn translate(&self, text: &str, _: &str, target: &str) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ProviderError::Transient("503".to_string()));
            }
            Ok(format!("[{}] {}", target, text))
        }
    }

    fn client(provider: Arc<Echo>, limiter: Arc<RateLimiter>) -> TranslationClient {
        TranslationClient::new(
            provider,
            limiter,
            Arc::new(LocalResultCache::new(100)),
            ClientOptions {
                service: "deepl".to_string(),
                language: "ja".to_string(),
                call_timeout: Duration::from_secs(2),
                quota_wait: Duration::from_millis(100),
                cache_ttl: Duration::from_secs(3600),
                retry: RetryPolicy::default(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_is_served_from_cache() {
        let provider = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        let client = client(provider.clone(), Arc::new(RateLimiter::new()));
        let meter = RunMeter::default();

        let first = client.translate("Hello", "en", "ja", &meter).await.unwrap();
        let second = client.translate(" hello ", "en", "ja", &meter).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.text, "[ja] Hello");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(meter.snapshot().api_calls, 1);
        assert_eq!(meter.snapshot().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_count_every_attempt() {
        let provider = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let client = client(provider, Arc::new(RateLimiter::new()));
        let meter = RunMeter::default();

        client.translate("Hello", "en", "ja", &meter).await.unwrap();
        assert_eq!(meter.snapshot().api_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_is_charged_in_characters() {
        let limiter = Arc::new(RateLimiter::new());
        limiter.register("deepl", QuotaRule::characters_per_month(8));
        let provider = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        let client = client(provider.clone(), limiter.clone());
        let meter = RunMeter::default();

        client.translate("Hello", "en", "ja", &meter).await.unwrap();
        assert_eq!(limiter.remaining("deepl"), 3);

        let error = client.translate("World!", "en", "ja", &meter).await.unwrap_err();
        assert!(matches!(error, NewsError::QuotaExceeded(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deepl_codes_are_uppercased() {
        assert_eq!(deepl_lang("ja"), "JA");
        assert_eq!(deepl_lang("AUTO"), "auto");
    }
}
