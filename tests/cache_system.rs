//! 缓存系统集成测试
//!
//! 测试结果缓存的键规范化、过期、容量上限以及跨运行共享

use std::sync::Arc;
use std::time::Duration;

use newswire::clients::{ClientOptions, TranslationClient};
use newswire::pipeline::RunMeter;
use newswire::quota::RateLimiter;
use newswire::storage::{CacheKey, CacheOperation, LocalResultCache, ResultCache};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{test_config, ScriptedAnalyst, ScriptedTranslator, TestDataGenerator, TestEnvironment};

fn translation_client(
    translator: Arc<ScriptedTranslator>,
    cache: Arc<dyn ResultCache>,
) -> TranslationClient {
    TranslationClient::new(
        translator,
        Arc::new(RateLimiter::new()),
        cache,
        ClientOptions::for_translation(&test_config()),
    )
}

/// 只差空白和大小写的文本命中同一条缓存
#[tokio::test]
async fn test_normalized_text_hits_cache() {
    let translator = Arc::new(ScriptedTranslator::new());
    let cache: Arc<dyn ResultCache> = Arc::new(LocalResultCache::new(100));
    let client = translation_client(translator.clone(), cache.clone());
    let meter = RunMeter::new(None);

    let first = client
        .translate("Kernel patch released", "en", "ja", &meter)
        .await
        .expect("first translation");
    let second = client
        .translate("  kernel   PATCH released\n", "en", "ja", &meter)
        .await
        .expect("second translation");

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.text, second.text);
    assert_eq!(translator.calls(), 1);

    let snapshot = meter.snapshot();
    assert_eq!(snapshot.api_calls, 1);
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.cache_misses, 1);
}

/// 目标语言不同的请求不共用缓存
#[tokio::test]
async fn test_target_language_is_part_of_key() {
    let translator = Arc::new(ScriptedTranslator::new());
    let cache: Arc<dyn ResultCache> = Arc::new(LocalResultCache::new(100));
    let client = translation_client(translator.clone(), cache);
    let meter = RunMeter::new(None);

    let ja = client.translate("Hello", "en", "ja", &meter).await.expect("ja");
    let zh = client.translate("Hello", "en", "zh", &meter).await.expect("zh");

    assert_ne!(ja.text, zh.text);
    assert_eq!(translator.calls(), 2);
}

#[test]
fn test_cache_key_distinguishes_operation_and_variant() {
    let translate = CacheKey::new(CacheOperation::Translate, "text", "en>ja");
    let analyze = CacheKey::new(CacheOperation::Analyze, "text", "en>ja");
    let other_model = CacheKey::new(CacheOperation::Analyze, "text", "v3:other");

    assert_ne!(translate, analyze);
    assert_ne!(analyze, other_model);
    assert_eq!(
        CacheKey::new(CacheOperation::Translate, "Text ", "en>ja"),
        CacheKey::new(CacheOperation::Translate, "text", "en>ja")
    );
}

/// 过期条目不再返回
#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_misses() {
    let cache = LocalResultCache::new(10);
    let key = CacheKey::new(CacheOperation::Translate, "short lived", "en>ja");
    cache.put(key.clone(), "短命".to_string(), Duration::from_secs(1)).await;

    assert_eq!(cache.get(&key).await.as_deref(), Some("短命"));

    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(cache.get(&key).await, None);
    let stats = cache.stats().await;
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.total_entries, 0);
}

/// 运行结束后缓存不超过容量
#[tokio::test]
async fn test_capacity_is_enforced_after_run() {
    let mut config = test_config();
    config.cache_capacity = 4;
    let env = TestEnvironment::new(config);

    let input: Vec<_> = (0..5).map(TestDataGenerator::english_article).collect();
    let result = env.pipeline.process(input).await;
    assert_eq!(result.stats.analyzed, 5);

    let stats = env.pipeline.cache().stats().await;
    assert!(stats.total_entries <= 4);
    assert!(stats.evictions > 0);
    assert_eq!(env.pipeline.cache().size().await, stats.total_entries);
}

/// 共享缓存的两条管道之间复用结果
#[tokio::test]
async fn test_cache_is_shared_between_pipelines() {
    let cache: Arc<dyn ResultCache> = Arc::new(LocalResultCache::new(100));
    let limiter = Arc::new(RateLimiter::with_clock(Arc::new(common::fixed_clock())));
    let input: Vec<_> = (0..2).map(TestDataGenerator::english_article).collect();

    let first = TestEnvironment::with_components(
        test_config(),
        ScriptedTranslator::new(),
        ScriptedAnalyst::new(),
        limiter.clone(),
        cache.clone(),
    );
    first.pipeline.process(input.clone()).await;

    let second = TestEnvironment::with_components(
        test_config(),
        ScriptedTranslator::new(),
        ScriptedAnalyst::new(),
        limiter,
        cache,
    );
    let result = second.pipeline.process(input).await;

    assert_eq!(second.translator.calls(), 0);
    assert_eq!(second.analyst.calls(), 0);
    assert_eq!(result.stats.api_calls, 0);
    assert!(result.articles.iter().all(|a| a.processed));
}

/// 分析设置不同的管道不复用彼此的分析结果
#[tokio::test]
async fn test_analysis_settings_are_part_of_key() {
    let cache: Arc<dyn ResultCache> = Arc::new(LocalResultCache::new(100));
    let limiter = Arc::new(RateLimiter::with_clock(Arc::new(common::fixed_clock())));
    let input: Vec<_> = (0..2).map(TestDataGenerator::english_article).collect();

    let first = TestEnvironment::with_components(
        test_config(),
        ScriptedTranslator::new(),
        ScriptedAnalyst::new(),
        limiter.clone(),
        cache.clone(),
    );
    let baseline = first.pipeline.process(input.clone()).await;
    assert!(baseline
        .articles
        .iter()
        .all(|a| a.analysis.as_ref().is_some_and(|x| x.keywords().len() == 5)));

    let mut config = test_config();
    config.max_keywords = 2;
    let second = TestEnvironment::with_components(
        config,
        ScriptedTranslator::new(),
        ScriptedAnalyst::new(),
        limiter,
        cache,
    );
    let result = second.pipeline.process(input).await;

    // 翻译仍然命中，分析重新调用
    assert_eq!(second.translator.calls(), 0);
    assert!(second.analyst.calls() > 0);
    assert_eq!(result.stats.analyzed, 2);
    for article in &result.articles {
        let analysis = article.analysis.as_ref().expect("analysis present");
        assert_eq!(analysis.keywords(), ["Rust", "CVE"]);
    }
}

/// 健康状态包含缓存统计
#[tokio::test]
async fn test_health_reports_cache_usage() {
    let env = TestEnvironment::default();
    let input: Vec<_> = (0..2).map(TestDataGenerator::english_article).collect();
    env.pipeline.process(input.clone()).await;
    env.pipeline.process(input).await;

    let health = env.pipeline.health().await;
    assert!(health.cache.cache_hits > 0);
    assert!(health.cache.hit_rate() > 0.0);
    assert!(health.components.contains_key("cache"));
    assert!(health.quota.contains_key("openai"));
}
