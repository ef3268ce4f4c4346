//! 管道集成测试
//!
//! 测试从原始文章到分析结果的端到端流程

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use newswire::error::ErrorCategory;
use newswire::pipeline::{RunState, Stage};
use newswire::{Priority, TranslationState};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{
    test_config, AssertionHelper, ScriptedAnalyst, ScriptedTranslator, TestDataGenerator,
    TestEnvironment,
};

/// 10 篇英文文章，3 篇紧急，全部成功
#[tokio::test]
async fn test_mixed_batch_is_fully_processed() {
    let env = TestEnvironment::default();
    let input = TestDataGenerator::mixed_batch(3, 7);
    let urgent_ids: HashSet<String> = input
        .iter()
        .filter(|raw| raw.priority_hint == Some(Priority::Urgent))
        .map(|raw| newswire::model::article_id(&raw.url, &raw.title, &raw.content))
        .collect();
    assert_eq!(urgent_ids.len(), 3);

    let result = env.pipeline.process(input).await;

    assert_eq!(result.articles.len(), 10);
    assert_eq!(result.stats.errors, 0);
    assert_eq!(result.stats.total_input, 10);
    assert_eq!(result.stats.translated, 10);
    assert_eq!(result.stats.analyzed, 10);
    assert_eq!(result.stats.unprocessed, 0);

    for article in &result.articles {
        assert!(article.processed, "article {} not processed", article.id);
        assert!(article.title_translated().is_some_and(|t| !t.is_empty()));
        assert!(article.title_translated().unwrap_or_default().starts_with("[ja]"));
        assert_eq!(article.translation_state(), TranslationState::Translated);
    }

    // 开始顺序与输出顺序都是紧急在前
    let started = result.stats.start_order(Stage::Translate);
    assert_eq!(started.len(), 10);
    assert!(started[..3].iter().all(|id| urgent_ids.contains(*id)));
    AssertionHelper::assert_urgent_first(&result.articles);
    assert!(result.articles[..3].iter().all(|a| urgent_ids.contains(&a.id)));
}

/// 源语言与目标语言相同时不翻译
#[tokio::test]
async fn test_same_language_skips_translation() {
    let env = TestEnvironment::default();
    let input = vec![
        TestDataGenerator::japanese_article(0),
        TestDataGenerator::japanese_article(1).with_language("JA-jp"),
    ];

    let result = env.pipeline.process(input).await;

    assert_eq!(env.translator.calls(), 0);
    assert_eq!(result.stats.translated, 0);
    for article in &result.articles {
        assert!(article.title_translated().is_none());
        assert!(article.content_translated().is_none());
        assert_eq!(article.translation_state(), TranslationState::NotRequired);
        assert!(article.processed);
    }
}

/// 未声明语言时按文字检测
#[tokio::test]
async fn test_language_is_detected_when_missing() {
    let env = TestEnvironment::default();
    let input = vec![TestDataGenerator::japanese_article(0).with_language("")];

    let result = env.pipeline.process(input).await;

    assert_eq!(result.articles[0].source_language, "ja");
    assert_eq!(env.translator.calls(), 0);
}

/// 模型输出经过钳制和去重
#[tokio::test]
async fn test_analysis_respects_bounds() {
    let env = TestEnvironment::default();
    let result = env.pipeline.process(TestDataGenerator::mixed_batch(1, 4)).await;

    assert_eq!(result.stats.analyzed, 5);
    for article in &result.articles {
        AssertionHelper::assert_analysis_bounds(article);
        let analysis = article.analysis.as_ref().expect("analysis present");
        assert_eq!(analysis.reliability_score(), 10);
        assert_eq!(analysis.keywords(), ["Rust", "CVE", "Linux", "kernel", "patch"]);
        assert_eq!(analysis.impact_scope(), newswire::ImpactScope::International);
    }
    assert_eq!(result.stats.summary_out_of_range, 0);
    assert!(result.stats.validation_issues >= 5);
}

/// 同样的输入第二次运行全部命中缓存
#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let env = TestEnvironment::default();
    let input: Vec<_> = (0..3).map(TestDataGenerator::english_article).collect();

    let first = env.pipeline.process(input.clone()).await;
    let translator_calls = env.translator.calls();
    let analyst_calls = env.analyst.calls();
    assert!(first.stats.api_calls > 0);
    assert_eq!(first.stats.cache_hits, 0);

    let second = env.pipeline.process(input).await;

    assert_eq!(second.stats.api_calls, 0);
    assert_eq!(second.stats.cache_hits, 9);
    assert_eq!(env.translator.calls(), translator_calls);
    assert_eq!(env.analyst.calls(), analyst_calls);

    for (a, b) in first.articles.iter().zip(&second.articles) {
        assert_eq!(a.title_translated(), b.title_translated());
        assert_eq!(a.analysis, b.analysis);
    }
}

/// 单个翻译 worker 时紧急文章全部完成后普通文章才开始
#[tokio::test(start_paused = true)]
async fn test_urgent_tier_finishes_before_normal_starts() {
    let mut config = test_config();
    config.max_concurrent_translations = 1;
    let env = TestEnvironment::with_services(
        config,
        ScriptedTranslator::new().with_delay(Duration::from_millis(10)),
        ScriptedAnalyst::new().with_delay(Duration::from_millis(50)),
    );

    let result = env.pipeline.process(TestDataGenerator::mixed_batch(3, 7)).await;
    let stats = &result.stats;

    let urgent: HashSet<&str> = result
        .articles
        .iter()
        .filter(|a| a.priority == Priority::Urgent)
        .map(|a| a.id.as_str())
        .collect();

    let last_urgent_analysis = stats
        .timeline
        .iter()
        .filter(|e| e.stage == Stage::Analyze && urgent.contains(e.article_id.as_str()))
        .map(|e| e.offset_ms)
        .max()
        .expect("urgent analysis events");
    let first_normal_start = stats
        .timeline
        .iter()
        .filter(|e| !urgent.contains(e.article_id.as_str()))
        .map(|e| e.offset_ms)
        .min()
        .expect("normal events");

    assert!(first_normal_start >= last_urgent_analysis + 50);

    let states: Vec<(RunState, Option<Priority>)> =
        stats.states.iter().map(|t| (t.state, t.tier)).collect();
    assert_eq!(
        states,
        vec![
            (RunState::Collecting, None),
            (RunState::Translating, Some(Priority::Urgent)),
            (RunState::Analyzing, Some(Priority::Urgent)),
            (RunState::Translating, Some(Priority::Normal)),
            (RunState::Analyzing, Some(Priority::Normal)),
            (RunState::Aggregating, None),
            (RunState::Done, None),
        ]
    );
}

/// 一篇文章分析失败不影响其他文章
#[tokio::test]
async fn test_single_analysis_failure_is_contained() {
    let env = TestEnvironment::with_services(
        test_config(),
        ScriptedTranslator::new(),
        ScriptedAnalyst::new().failing_on("bulletin 4"),
    );

    let result = env.pipeline.process(TestDataGenerator::mixed_batch(0, 8)).await;

    assert_eq!(result.articles.len(), 8);
    let failed: Vec<_> = result.articles.iter().filter(|a| !a.processed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].title, "Security bulletin 4");
    assert!(failed[0].analysis.is_none());
    assert!(failed[0].title_translated().is_some());

    assert_eq!(result.stats.errors, 1);
    assert_eq!(result.stats.unanalyzed, 1);
    assert_eq!(result.stats.failures[0].stage, Stage::Analyze);
    assert_eq!(result.stats.failures[0].category, ErrorCategory::Validation);
}

/// 截止时间到达后尽快返回，未处理的文章仍在结果中
#[tokio::test(start_paused = true)]
async fn test_run_deadline_is_respected() {
    let mut config = test_config();
    config.run_deadline_secs = 1;
    config.max_concurrent_translations = 1;
    let limit = config.run_deadline() + config.max_call_timeout();

    let env = TestEnvironment::with_services(
        config,
        ScriptedTranslator::new().with_delay(Duration::from_millis(400)),
        ScriptedAnalyst::new(),
    );

    let started = Instant::now();
    let result = env.pipeline.process(TestDataGenerator::mixed_batch(3, 7)).await;

    assert!(started.elapsed() <= limit);
    assert_eq!(result.articles.len(), 10);
    assert!(result.stats.deadline_hit);
    assert!(result.stats.unprocessed > 0);
    assert_eq!(
        result.stats.unprocessed,
        result.articles.iter().filter(|a| !a.processed).count()
    );
    assert!(result
        .stats
        .failures
        .iter()
        .any(|f| f.category == ErrorCategory::Deadline));
}

/// 重复文章只保留一篇
#[tokio::test]
async fn test_duplicates_are_dropped() {
    let env = TestEnvironment::default();
    let article = TestDataGenerator::english_article(1);
    let result = env
        .pipeline
        .process(vec![article.clone(), article, TestDataGenerator::english_article(2)])
        .await;

    assert_eq!(result.articles.len(), 2);
    assert_eq!(result.stats.duplicates, 1);
    assert_eq!(result.stats.total_input, 3);
}

/// CVSS 达到阈值的文章提升为紧急
#[tokio::test]
async fn test_high_cvss_is_promoted() {
    let env = TestEnvironment::default();
    let input = vec![
        TestDataGenerator::english_article(0),
        TestDataGenerator::english_article(1).with_cvss(9.8),
    ];

    let result = env.pipeline.process(input).await;

    assert_eq!(result.articles[0].title, "Security bulletin 1");
    assert_eq!(result.articles[0].priority, Priority::Urgent);
    assert_eq!(result.articles[1].priority, Priority::Normal);
}

/// 紧急通道把所有文章视为紧急
#[tokio::test]
async fn test_high_priority_path() {
    let env = TestEnvironment::default();
    let result = env
        .pipeline
        .process_high_priority(TestDataGenerator::mixed_batch(0, 3))
        .await;

    assert!(result.articles.iter().all(|a| a.priority == Priority::Urgent));
    assert!(result.articles.iter().all(|a| a.processed));
    assert!(!result
        .stats
        .states
        .iter()
        .any(|t| t.state == RunState::Collecting));
}

/// 每日摘要使用已有分析，不再调用服务
#[tokio::test]
async fn test_daily_summary_uses_existing_analyses() {
    let env = TestEnvironment::default();
    let result = env.pipeline.process(TestDataGenerator::mixed_batch(1, 2)).await;
    let calls = env.analyst.calls();

    let digest = env.pipeline.summarize(&result.articles);

    assert!(!digest.is_empty());
    assert!(digest.chars().count() <= 300);
    assert_eq!(env.analyst.calls(), calls);
    assert_eq!(env.pipeline.summarize(&[]), "");
}
