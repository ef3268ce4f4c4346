// 集成测试公共模块
//
// 提供可编排的服务替身、测试数据生成和断言工具

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use newswire::clients::{AnalysisProvider, AnalysisRequest, TranslationProvider};
use newswire::quota::{ManualClock, RateLimiter};
use newswire::storage::{LocalResultCache, ResultCache};
use newswire::{Article, Pipeline, PipelineConfig, Priority, ProviderError, RawArticle};

/// 测试使用的摘要长度，落在默认范围 [200, 250] 内
pub const SUMMARY_LEN: usize = 220;

/// 可编排的翻译服务
pub struct ScriptedTranslator {
    calls: AtomicUsize,
    delay: Duration,
    fail_marker: Option<String>,
    transient_failures: AtomicUsize,
}

impl ScriptedTranslator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_marker: None,
            transient_failures: AtomicUsize::new(0),
        }
    }

    /// 每次调用耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 文本包含 `marker` 时返回永久错误
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// 前 `count` 次调用返回 503
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationProvider for ScriptedTranslator {
    fn name(&self) -> &str {
        "scripted-translator"
    }

    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("503 Service Unavailable".to_string()));
        }

        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(ProviderError::Permanent("400 unsupported text".to_string()));
            }
        }

        Ok(format!("[{}] {}", target_lang, text))
    }
}

/// 可编排的分析服务
///
/// 标题包含失败标记的文章得到缺少摘要的记录，只有这一篇校验失败。
pub struct ScriptedAnalyst {
    calls: AtomicUsize,
    delay: Duration,
    fail_markers: HashSet<String>,
}

impl ScriptedAnalyst {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_markers: HashSet::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_markers.insert(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, request: &AnalysisRequest) -> String {
        if self
            .fail_markers
            .iter()
            .any(|marker| request.title.contains(marker.as_str()))
        {
            return r#"{"importance_score": 5, "reliability_score": 5}"#.to_string();
        }

        let importance = 3 + request.title.len() % 7;
        format!(
            r#"{{"Importance_Score": {}, "summary": "{}", "keywords": ["Rust", "rust", "CVE", "Linux", "kernel", "patch", "extra"],
                "sentiment_score": -0.2, "is_urgent": false, "impact_scope": "Global",
                "reliability_score": 12, "risk_factors": ["rce"], "source_model": "ignored"}}"#,
            importance,
            "s".repeat(SUMMARY_LEN)
        )
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedAnalyst {
    fn name(&self) -> &str {
        "scripted-analyst"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn analyze(&self, requests: &[AnalysisRequest]) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let records: Vec<String> = requests.iter().map(|request| self.record(request)).collect();
        if records.len() == 1 {
            Ok(format!("```json\n{}\n```", records[0]))
        } else {
            Ok(format!("[{}]", records.join(",")))
        }
    }
}

/// 测试环境：一条管道加上可以观察的服务替身
pub struct TestEnvironment {
    pub pipeline: Pipeline,
    pub translator: Arc<ScriptedTranslator>,
    pub analyst: Arc<ScriptedAnalyst>,
}

impl TestEnvironment {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_services(config, ScriptedTranslator::new(), ScriptedAnalyst::new())
    }

    pub fn with_services(
        config: PipelineConfig,
        translator: ScriptedTranslator,
        analyst: ScriptedAnalyst,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::with_clock(Arc::new(fixed_clock())));
        let cache: Arc<dyn ResultCache> = Arc::new(LocalResultCache::new(config.cache_capacity));
        Self::with_components(config, translator, analyst, limiter, cache)
    }

    pub fn with_components(
        config: PipelineConfig,
        translator: ScriptedTranslator,
        analyst: ScriptedAnalyst,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        let translator = Arc::new(translator);
        let analyst = Arc::new(analyst);
        let pipeline = Pipeline::with_components(
            config,
            translator.clone(),
            analyst.clone(),
            limiter,
            cache,
        )
        .expect("test config should be valid");

        Self {
            pipeline,
            translator,
            analyst,
        }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new(test_config())
    }
}

/// 固定在月中某分钟开头的时钟，配额窗口在测试期间不会翻转
pub fn fixed_clock() -> ManualClock {
    ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 15, 9, 30, 0)
            .single()
            .expect("valid timestamp"),
    )
}

/// 测试配置：目标语言为日语，重试不等待
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.quota_wait_ms = 100;
    config
}

/// 测试数据生成器
pub struct TestDataGenerator;

impl TestDataGenerator {
    /// 英文文章，标题编号从 0 开始
    pub fn english_article(index: usize) -> RawArticle {
        RawArticle::new(
            format!("Security bulletin {}", index),
            format!(
                "Researchers disclosed issue number {} affecting widely used server software.",
                index
            ),
            format!("https://news.example.com/articles/{}", index),
        )
        .with_language("en")
        .with_category("security")
    }

    /// 前 `urgent` 篇之后是 `normal` 篇，紧急文章穿插在列表中
    pub fn mixed_batch(urgent: usize, normal: usize) -> Vec<RawArticle> {
        let total = urgent + normal;
        let stride = if urgent == 0 { usize::MAX } else { (total / urgent).max(1) };
        let mut remaining_urgent = urgent;

        (0..total)
            .map(|i| {
                let article = Self::english_article(i);
                if remaining_urgent > 0 && (i + 1) % stride == 0 {
                    remaining_urgent -= 1;
                    article.with_priority(Priority::Urgent)
                } else {
                    article.with_priority(Priority::Normal)
                }
            })
            .collect()
    }

    pub fn japanese_article(index: usize) -> RawArticle {
        RawArticle::new(
            format!("新しい脆弱性 {}", index),
            "東京の研究者が新しい脆弱性を発表しました。".to_string(),
            format!("https://news.example.jp/{}", index),
        )
        .with_language("ja")
    }
}

/// 断言工具
pub struct AssertionHelper;

impl AssertionHelper {
    /// 已分析文章的评分、关键词满足约束
    pub fn assert_analysis_bounds(article: &Article) {
        let Some(analysis) = &article.analysis else {
            return;
        };
        assert!((1..=10).contains(&analysis.importance_score()), "importance out of range");
        assert!((1..=10).contains(&analysis.reliability_score()), "reliability out of range");
        assert!(analysis.keywords().len() <= 5, "too many keywords");

        let lowered: HashSet<String> = analysis.keywords().iter().map(|k| k.to_lowercase()).collect();
        assert_eq!(lowered.len(), analysis.keywords().len(), "duplicate keywords");
    }

    /// 紧急文章排在普通文章之前
    pub fn assert_urgent_first(articles: &[Article]) {
        let first_normal = articles
            .iter()
            .position(|article| article.priority == Priority::Normal)
            .unwrap_or(articles.len());
        assert!(
            articles[first_normal..]
                .iter()
                .all(|article| article.priority == Priority::Normal),
            "urgent article found after a normal one"
        );
    }
}
