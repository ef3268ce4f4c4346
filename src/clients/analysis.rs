//! AI 分析客户端
//!
//! 单篇与批量两种调用方式。批量结果按位置与输入对齐；已缓存的文章不发起调用；
//! 批量响应无法解码或条数不符时，该批回退为逐篇调用。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::decode::{AnalysisDecoder, Decoded, ValidationIssue};
use super::ClientOptions;
use crate::error::{helpers::config_error, NewsError, NewsResult, ProviderError};
use crate::model::Analysis;
use crate::pipeline::stats::RunMeter;
use crate::quota::RateLimiter;
use crate::storage::{CacheKey, CacheOperation, ResultCache};

/// 提示词版本，变更后旧缓存自动失效
pub const ANALYSIS_PROMPT_VERSION: &str = "v3";

/// 一篇待分析的文章
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub article_id: String,
    pub title: String,
    pub content: String,
    pub category: String,
}

impl AnalysisRequest {
    pub fn new(article_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            title: title.into(),
            content: content.into(),
            category: String::new(),
        }
    }

    fn cache_text(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }
}

/// 分析服务，返回未经校验的模型输出
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// 一次请求分析一篇或多篇文章；多篇时输出应为按顺序排列的 JSON 数组
    async fn analyze(&self, requests: &[AnalysisRequest]) -> Result<String, ProviderError>;
}

/// 分析结果
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub from_cache: bool,
    pub issues: Vec<ValidationIssue>,
    pub summary_out_of_range: bool,
}

impl AnalysisOutcome {
    fn fresh(decoded: Decoded) -> Self {
        Self {
            analysis: decoded.analysis,
            from_cache: false,
            issues: decoded.issues,
            summary_out_of_range: decoded.summary_out_of_range,
        }
    }
}

pub struct AnalysisClient {
    provider: Arc<dyn AnalysisProvider>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResultCache>,
    decoder: AnalysisDecoder,
    options: ClientOptions,
}

impl AnalysisClient {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResultCache>,
        decoder: AnalysisDecoder,
        options: ClientOptions,
    ) -> Self {
        Self {
            provider,
            limiter,
            cache,
            decoder,
            options,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.options.call_timeout
    }

    /// 影响分析结果的设置都进入缓存键
    fn cache_key(&self, request: &AnalysisRequest) -> CacheKey {
        let limits = self.decoder.limits();
        let variant = format!(
            "{}:{}:{}:k{}:s{}-{}",
            ANALYSIS_PROMPT_VERSION,
            self.provider.model(),
            self.options.language,
            limits.max_keywords,
            limits.summary_range.0,
            limits.summary_range.1
        );
        CacheKey::new(CacheOperation::Analyze, &request.cache_text(), &variant)
    }

    /// 分析单篇文章
    pub async fn analyze(&self, request: &AnalysisRequest, meter: &RunMeter) -> NewsResult<AnalysisOutcome> {
        if let Some(outcome) = self.lookup(request, meter).await {
            return Ok(outcome);
        }
        self.analyze_uncached(request, meter).await
    }

    /// 批量分析，结果与 `requests` 按位置对齐
    pub async fn analyze_batch(
        &self,
        requests: &[AnalysisRequest],
        batch_size: usize,
        meter: &RunMeter,
    ) -> Vec<NewsResult<AnalysisOutcome>> {
        let mut results: Vec<Option<NewsResult<AnalysisOutcome>>> = Vec::with_capacity(requests.len());
        let mut pending = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            let cached = self.lookup(request, meter).await;
            if cached.is_none() {
                pending.push(index);
            }
            results.push(cached.map(Ok));
        }

        for chunk in pending.chunks(batch_size.max(1)) {
            let chunk_requests: Vec<AnalysisRequest> =
                chunk.iter().map(|&index| requests[index].clone()).collect();

            let chunk_results = if chunk_requests.len() == 1 {
                vec![self.analyze_uncached(&chunk_requests[0], meter).await]
            } else {
                self.analyze_chunk(&chunk_requests, meter).await
            };

            for (&index, result) in chunk.iter().zip(chunk_results) {
                results[index] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(NewsError::Internal("批量分析结果缺失".to_string())))
            })
            .collect()
    }

    async fn analyze_chunk(&self, requests: &[AnalysisRequest], meter: &RunMeter) -> Vec<NewsResult<AnalysisOutcome>> {
        let raw = match self.fetch(requests, meter).await {
            Ok(raw) => raw,
            Err(error) => return requests.iter().map(|_| Err(error.clone())).collect(),
        };

        match self.decoder.decode_batch(&raw, requests.len()) {
            Ok(decoded) => {
                let mut outcomes = Vec::with_capacity(decoded.len());
                for (request, result) in requests.iter().zip(decoded) {
                    outcomes.push(match result {
                        Ok(decoded) => {
                            self.store(request, &decoded.analysis).await;
                            Ok(AnalysisOutcome::fresh(decoded))
                        }
                        Err(error) => Err(error.with_context(&request.article_id)),
                    });
                }
                outcomes
            }
            Err(error) => {
                tracing::warn!("批量分析响应无效，回退为逐篇分析: {}", error);
                let mut outcomes = Vec::with_capacity(requests.len());
                for request in requests {
                    outcomes.push(self.analyze_uncached(request, meter).await);
                }
                outcomes
            }
        }
    }

    async fn analyze_uncached(&self, request: &AnalysisRequest, meter: &RunMeter) -> NewsResult<AnalysisOutcome> {
        let raw = self.fetch(std::slice::from_ref(request), meter).await?;
        let decoded = self
            .decoder
            .decode_one(&raw)
            .map_err(|error| error.with_context(&request.article_id))?;
        self.store(request, &decoded.analysis).await;
        Ok(AnalysisOutcome::fresh(decoded))
    }

    async fn lookup(&self, request: &AnalysisRequest, meter: &RunMeter) -> Option<AnalysisOutcome> {
        let key = self.cache_key(request);
        let Some(cached) = self.cache.get(&key).await else {
            meter.inc_cache_misses();
            return None;
        };

        // 缓存记录同样不可信，重新走一遍钳制、去重和截断
        match self.decoder.decode_one(&cached) {
            Ok(decoded) => {
                meter.inc_cache_hits();
                Some(AnalysisOutcome {
                    analysis: decoded.analysis,
                    from_cache: true,
                    issues: decoded.issues,
                    summary_out_of_range: decoded.summary_out_of_range,
                })
            }
            Err(error) => {
                tracing::warn!("缓存中的分析记录无法解析，重新分析: {}", error);
                meter.inc_cache_misses();
                None
            }
        }
    }

    async fn store(&self, request: &AnalysisRequest, analysis: &Analysis) {
        match serde_json::to_string(analysis) {
            Ok(json) => {
                self.cache
                    .put(self.cache_key(request), json, self.options.cache_ttl)
                    .await
            }
            Err(error) => tracing::warn!("分析结果序列化失败，未写入缓存: {}", error),
        }
    }

    /// 配额准入后带重试地调用服务，一次请求计一次配额
    async fn fetch(&self, requests: &[AnalysisRequest], meter: &RunMeter) -> NewsResult<String> {
        if meter.deadline_passed() {
            return Err(NewsError::DeadlineExceeded("分析请求未发出".to_string()));
        }

        self.limiter
            .wait_acquire(&self.options.service, 1, self.options.quota_wait)
            .await?;

        let label = format!("分析 {} 篇 ({})", requests.len(), self.provider.name());
        let outcome = self
            .options
            .retry
            .execute(&label, self.options.call_timeout, meter.deadline(), |_| {
                self.provider.analyze(requests)
            })
            .await;
        meter.add_api_calls(&self.options.service, outcome.attempts);

        outcome
            .result
            .map_err(|error| error.into_news_error(&self.options.service, 1))
    }
}

// ============================================================================
// OpenAI 兼容的 HTTP 实现
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// 提示词参数
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub language: String,
    pub summary_range: (usize, usize),
    pub max_keywords: usize,
}

impl PromptSettings {
    fn system_prompt(&self) -> String {
        format!(
            "You are a news editor. For each article return a JSON object with the fields \
             importance_score (integer 1-10), summary ({min}-{max} characters, written in '{lang}'), \
             keywords (at most {kw} strings), sentiment_score (number -1.0 to 1.0), is_urgent (boolean), \
             impact_scope (one of local, national, international), reliability_score (integer 1-10), \
             risk_factors (array of strings). Respond with JSON only.",
            min = self.summary_range.0,
            max = self.summary_range.1,
            lang = self.language,
            kw = self.max_keywords,
        )
    }
}

/// 构造用户提示词；多篇文章时要求按顺序返回 JSON 数组
pub fn build_user_prompt(requests: &[AnalysisRequest]) -> String {
    if let [single] = requests {
        return format!("Title: {}\n\n{}", single.title, single.content);
    }

    let mut prompt = format!(
        "Analyze the following {} articles. Return a JSON array with exactly one object per article, in the same order.\n",
        requests.len()
    );
    for (index, request) in requests.iter().enumerate() {
        prompt.push_str(&format!(
            "\n### Article {}\nTitle: {}\n\n{}\n",
            index + 1,
            request.title,
            request.content
        ));
    }
    prompt
}

/// OpenAI 兼容的 `/chat/completions` 服务
pub struct ChatCompletionProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: PromptSettings,
}

impl ChatCompletionProvider {
    pub fn new(api_url: &str, api_key: &str, model: &str, prompt: PromptSettings) -> NewsResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| config_error(format!("分析 API 密钥格式无效: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| config_error(format!("创建 HTTP 客户端失败: {}", e)))?;

        let endpoint = if api_url.trim_end_matches('/').ends_with("/chat/completions") {
            api_url.to_string()
        } else {
            format!("{}/chat/completions", api_url.trim_end_matches('/'))
        };

        tracing::info!("分析服务: {} (模型 {})", endpoint, model);
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            prompt,
        })
    }
}

#[async_trait]
impl AnalysisProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, requests: &[AnalysisRequest]) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.prompt.system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_user_prompt(requests),
                },
            ],
            temperature: 0.2,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("无法解析分析响应: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Permanent("分析响应没有 choices".to_string()))
    }
}
