//! 错误处理集成测试
//!
//! 测试服务故障、配额耗尽和无效输入时管道的降级行为

use newswire::error::ErrorCategory;
use newswire::pipeline::Stage;
use newswire::quota::QuotaRule;
use newswire::{NewsError, Pipeline, PipelineConfig, RawArticle, TranslationState};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{test_config, ScriptedAnalyst, ScriptedTranslator, TestDataGenerator, TestEnvironment};

/// 暂时故障按策略重试，每次尝试都计入调用次数
#[tokio::test]
async fn test_transient_translation_failures_are_retried() {
    let env = TestEnvironment::with_services(
        test_config(),
        ScriptedTranslator::new().with_transient_failures(2),
        ScriptedAnalyst::new(),
    );

    let result = env
        .pipeline
        .process(vec![TestDataGenerator::english_article(0)])
        .await;

    assert!(result.articles[0].processed);
    assert_eq!(result.stats.errors, 0);
    // 标题两次失败后成功，正文一次成功，分析一次
    assert_eq!(env.translator.calls(), 4);
    assert_eq!(result.stats.api_calls, 5);
}

/// 永久错误不重试，文章以原文继续分析
#[tokio::test]
async fn test_permanent_translation_failure_degrades_article() {
    let env = TestEnvironment::with_services(
        test_config(),
        ScriptedTranslator::new().failing_on("bulletin 1"),
        ScriptedAnalyst::new(),
    );

    let input: Vec<_> = (0..3).map(TestDataGenerator::english_article).collect();
    let result = env.pipeline.process(input).await;

    let degraded = result
        .articles
        .iter()
        .find(|a| a.title == "Security bulletin 1")
        .expect("degraded article kept");
    assert_eq!(degraded.translation_state(), TranslationState::Unavailable);
    assert!(degraded.title_translated().is_none());
    assert!(degraded.analysis.is_some());
    assert!(!degraded.processed);

    assert_eq!(result.stats.untranslated, 1);
    assert_eq!(result.stats.analyzed, 3);
    assert_eq!(result.stats.errors, 1);
    assert_eq!(result.stats.failures[0].stage, Stage::Translate);
    assert_eq!(result.stats.failures[0].category, ErrorCategory::Permanent);
    assert_eq!(result.articles.iter().filter(|a| a.processed).count(), 2);
}

/// 分析配额耗尽的文章延后，不丢弃
#[tokio::test]
async fn test_analysis_quota_exhaustion_defers_articles() {
    let mut config = test_config();
    config.analysis.quota = Some(QuotaRule::requests_per_minute(1));
    let env = TestEnvironment::new(config);

    let input: Vec<_> = (0..10).map(TestDataGenerator::english_article).collect();
    let result = env.pipeline.process(input).await;

    assert_eq!(result.articles.len(), 10);
    assert_eq!(result.stats.analyzed, 5);
    assert_eq!(result.stats.deferred, 5);
    assert_eq!(result.stats.unprocessed, 5);
    assert_eq!(env.analyst.calls(), 1);
    assert_eq!(
        result
            .stats
            .failures
            .iter()
            .filter(|f| f.category == ErrorCategory::Quota)
            .count(),
        5
    );
    assert_eq!(result.stats.quota_remaining.get("openai"), Some(&0));
}

/// 翻译字符配额不足时文章延后，不进入分析
#[tokio::test]
async fn test_translation_quota_exhaustion_defers_articles() {
    let mut config = test_config();
    config.max_concurrent_translations = 1;
    config.translation.quota = Some(QuotaRule::characters_per_month(100));
    let env = TestEnvironment::new(config);

    let input: Vec<_> = (0..3).map(TestDataGenerator::english_article).collect();
    let result = env.pipeline.process(input).await;

    assert_eq!(result.stats.translated, 1);
    assert_eq!(result.stats.deferred, 2);
    assert_eq!(result.stats.analyzed, 1);
    for article in result.articles.iter().filter(|a| !a.processed) {
        assert!(article.analysis.is_none());
        assert_eq!(article.translation_state(), TranslationState::Pending);
    }
    assert!(result.stats.quota_remaining["deepl"] < 100);
    assert!(result
        .stats
        .failures
        .iter()
        .all(|f| f.stage == Stage::Translate && f.category == ErrorCategory::Quota));
}

/// 标题或正文为空的文章保留在结果中并记录错误
#[tokio::test]
async fn test_invalid_input_is_reported() {
    let env = TestEnvironment::default();
    let input = vec![
        RawArticle::new("", "content without title", "https://news.example.com/empty"),
        RawArticle::new("Title only", "   ", "https://news.example.com/blank"),
        TestDataGenerator::english_article(0),
    ];

    let result = env.pipeline.process(input).await;

    assert_eq!(result.articles.len(), 3);
    assert_eq!(result.stats.unprocessed, 2);
    assert_eq!(result.stats.errors, 2);
    assert!(result
        .stats
        .failures
        .iter()
        .all(|f| f.stage == Stage::Collect && f.category == ErrorCategory::Input));
    assert_eq!(env.analyst.calls(), 1);
}

/// 全部服务失败时仍然返回完整结果
#[tokio::test]
async fn test_total_outage_still_returns_result() {
    let env = TestEnvironment::with_services(
        test_config(),
        ScriptedTranslator::new().failing_on("bulletin"),
        ScriptedAnalyst::new().failing_on("bulletin"),
    );

    let input: Vec<_> = (0..4).map(TestDataGenerator::english_article).collect();
    let result = env.pipeline.process(input).await;

    assert_eq!(result.articles.len(), 4);
    assert!(result.articles.iter().all(|a| !a.processed));
    assert_eq!(result.stats.unprocessed, 4);
    assert_eq!(result.stats.errors, 8);
    assert!(result.stats.error_rate() > 1.0);
}

/// 只有配置错误在构造时失败
#[test]
fn test_configuration_errors_are_fatal() {
    let missing_key = PipelineConfig::default();
    assert!(matches!(
        Pipeline::from_config(missing_key),
        Err(NewsError::Config(_))
    ));

    let mut bad_url = PipelineConfig::default();
    bad_url.analysis.api_key = Some("sk-test-123456".to_string());
    bad_url.translation.api_url = "ftp://translate.example.com".to_string();
    assert!(matches!(
        Pipeline::from_config(bad_url),
        Err(NewsError::Config(_))
    ));

    let mut zero_batch = test_config();
    zero_batch.batch_size = 0;
    let result = Pipeline::new(
        zero_batch,
        std::sync::Arc::new(ScriptedTranslator::new()),
        std::sync::Arc::new(ScriptedAnalyst::new()),
    );
    assert!(matches!(result, Err(NewsError::Config(_))));
}

#[test]
fn test_valid_credentials_build_http_pipeline() {
    let mut config = PipelineConfig::default();
    config.analysis.api_key = Some("sk-test-123456".to_string());
    assert!(Pipeline::from_config(config).is_ok());
}
