//! 管道编排
//!
//! 一次运行的状态：`Collecting -> (每个优先级批次: Translating -> Analyzing) ->
//! Aggregating -> Done`。紧急批次完整处理完之后普通批次才开始。
//! worker 只返回结果值，文章状态只在这里写入。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use super::health::HealthStatus;
use super::language;
use super::scheduler::{BatchScheduler, StageReport, WorkItem, WorkOutcome};
use super::stats::{ArticleFailure, RunMeter, RunState, RunStats, Stage, StateTransition};
use super::summary;
use crate::clients::{
    AnalysisClient, AnalysisDecoder, AnalysisOutcome, AnalysisProvider, AnalysisRequest,
    ChatCompletionProvider, ClientOptions, DecodeLimits, DeepLxProvider, PromptSettings,
    TranslatedText, TranslationClient, TranslationProvider,
};
use crate::config::PipelineConfig;
use crate::error::{helpers::log_error, NewsError, NewsResult};
use crate::model::{Article, Priority, RawArticle};
use crate::quota::RateLimiter;
use crate::storage::{LocalResultCache, ResultCache};

/// 一次运行的输出
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// 紧急在前，同级保持输入顺序
    pub articles: Vec<Article>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Scheduled,
    HighPriority,
}

#[derive(Debug, Clone)]
struct TranslatePayload {
    index: usize,
    title: String,
    content: String,
    source: String,
}

#[derive(Debug, Clone)]
struct AnalyzePayload {
    indices: Vec<usize>,
    requests: Vec<AnalysisRequest>,
}

/// 单次运行的可变状态
struct RunContext {
    origin: Instant,
    deadline: Instant,
    meter: RunMeter,
    articles: Vec<Article>,
    /// 可以进入翻译与分析的文章
    eligible: Vec<bool>,
    stats: RunStats,
}

impl RunContext {
    fn transition(&mut self, state: RunState, tier: Option<Priority>) {
        let offset_ms = self.origin.elapsed().as_millis() as u64;
        tracing::debug!("运行状态 -> {:?} ({:?}) @{}ms", state, tier, offset_ms);
        self.stats.states.push(StateTransition {
            state,
            tier,
            offset_ms,
        });
    }

    fn fail(&mut self, index: usize, stage: Stage, error: NewsError) {
        log_error(&error);
        let failure = ArticleFailure::new(self.articles[index].id.clone(), stage, &error);
        self.stats.record_failure(failure, &error);
    }

    fn exclude(&mut self, index: usize) {
        self.eligible[index] = false;
    }
}

/// 翻译与分析管道
pub struct Pipeline {
    config: PipelineConfig,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResultCache>,
    translator: TranslationClient,
    analyst: AnalysisClient,
}

impl Pipeline {
    /// 使用注入的服务创建管道，配额与缓存在进程内新建
    pub fn new(
        config: PipelineConfig,
        translation: Arc<dyn TranslationProvider>,
        analysis: Arc<dyn AnalysisProvider>,
    ) -> NewsResult<Self> {
        let cache: Arc<dyn ResultCache> = Arc::new(LocalResultCache::new(config.cache_capacity));
        Self::with_components(config, translation, analysis, Arc::new(RateLimiter::new()), cache)
    }

    /// 使用共享的配额管理器和缓存创建管道
    ///
    /// 已在 `limiter` 中注册的服务保持原有规则。
    pub fn with_components(
        config: PipelineConfig,
        translation: Arc<dyn TranslationProvider>,
        analysis: Arc<dyn AnalysisProvider>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResultCache>,
    ) -> NewsResult<Self> {
        config.validate()?;

        for (service, rule) in [
            (&config.translation.service, config.translation.quota),
            (&config.analysis.service, config.analysis.quota),
        ] {
            if let Some(rule) = rule {
                if !limiter.is_registered(service) {
                    limiter.register(service.clone(), rule);
                }
            }
        }

        let translator = TranslationClient::new(
            translation,
            limiter.clone(),
            cache.clone(),
            ClientOptions::for_translation(&config),
        );
        let analyst = AnalysisClient::new(
            analysis,
            limiter.clone(),
            cache.clone(),
            AnalysisDecoder::new(DecodeLimits::from(&config)),
            ClientOptions::for_analysis(&config),
        );

        tracing::info!(
            "管道已创建: 目标语言 {}, 并发 {}/{}, 批次 {}",
            config.target_language,
            config.max_concurrent_translations,
            config.max_concurrent_analyses,
            config.batch_size
        );

        Ok(Self {
            config,
            limiter,
            cache,
            translator,
            analyst,
        })
    }

    /// 按配置创建使用 HTTP 服务的管道，校验配置和凭证
    pub fn from_config(config: PipelineConfig) -> NewsResult<Self> {
        config.validate()?;
        config.validate_credentials()?;

        let translation = Arc::new(DeepLxProvider::new(
            &config.translation.api_url,
            config.translation.api_key.as_deref(),
        )?);

        let api_key = config
            .analysis
            .api_key
            .as_deref()
            .ok_or_else(|| NewsError::Config("缺少分析服务的 API 密钥".to_string()))?;
        let analysis = Arc::new(ChatCompletionProvider::new(
            &config.analysis.api_url,
            api_key,
            &config.analysis.model,
            PromptSettings {
                language: config.target_language.clone(),
                summary_range: config.summary_length_range,
                max_keywords: config.max_keywords,
            },
        )?);

        Self::new(config, translation, analysis)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    /// 处理一批原始文章
    pub async fn process(&self, raw: Vec<RawArticle>) -> PipelineResult {
        self.run(raw, RunMode::Scheduled).await
    }

    /// 立即处理紧急文章：跳过采集阶段的分级与 CVSS 判定，全部视为紧急
    pub async fn process_high_priority(&self, raw: Vec<RawArticle>) -> PipelineResult {
        self.run(raw, RunMode::HighPriority).await
    }

    /// 基于已有分析生成每日摘要，不调用 AI
    pub fn summarize(&self, articles: &[Article]) -> String {
        summary::summarize(articles)
    }

    pub async fn health(&self) -> HealthStatus {
        HealthStatus::evaluate(self.limiter.snapshot(), self.cache.stats().await)
    }

    async fn run(&self, raw: Vec<RawArticle>, mode: RunMode) -> PipelineResult {
        let origin = Instant::now();
        let deadline = origin + self.config.run_deadline();
        let mut ctx = RunContext {
            origin,
            deadline,
            meter: RunMeter::new(Some(deadline)),
            articles: Vec::with_capacity(raw.len()),
            eligible: Vec::with_capacity(raw.len()),
            stats: RunStats {
                total_input: raw.len(),
                ..RunStats::default()
            },
        };

        tracing::info!("开始处理 {} 篇文章 ({:?})", raw.len(), mode);

        if mode == RunMode::Scheduled {
            ctx.transition(RunState::Collecting, None);
        }
        self.collect(&mut ctx, raw, mode);

        for tier in [Priority::Urgent, Priority::Normal] {
            let indices: Vec<usize> = (0..ctx.articles.len())
                .filter(|&i| ctx.eligible[i] && ctx.articles[i].priority == tier)
                .collect();
            if indices.is_empty() {
                continue;
            }

            tracing::info!("{:?} 批次: {} 篇", tier, indices.len());
            self.translate_wave(&mut ctx, tier, &indices).await;
            self.analyze_wave(&mut ctx, tier, &indices).await;
        }

        self.aggregate(ctx).await
    }

    fn collect(&self, ctx: &mut RunContext, raw: Vec<RawArticle>, mode: RunMode) {
        let mut seen = HashSet::new();

        for raw in raw {
            let priority = match mode {
                RunMode::HighPriority => Priority::Urgent,
                RunMode::Scheduled => self.tier_of(&raw),
            };
            let source = language::resolve(&raw.source_language, &raw.title, &raw.content);
            let article = Article::new(raw, source, priority);

            if !seen.insert(article.id.clone()) {
                ctx.stats.duplicates += 1;
                tracing::debug!("跳过重复文章 {}", article.id);
                continue;
            }

            let valid = !article.title.trim().is_empty() && !article.content.trim().is_empty();
            ctx.articles.push(article);
            ctx.eligible.push(valid);

            if !valid {
                let index = ctx.articles.len() - 1;
                ctx.fail(
                    index,
                    Stage::Collect,
                    NewsError::InvalidInput("标题或正文为空".to_string()),
                );
            }
        }
    }

    fn tier_of(&self, raw: &RawArticle) -> Priority {
        let promoted = raw
            .cvss_score
            .is_some_and(|score| score >= self.config.urgent_cvss_threshold);
        if promoted {
            Priority::Urgent
        } else {
            raw.priority_hint.unwrap_or_default()
        }
    }

    fn scheduler(&self, ctx: &RunContext, stage: Stage, workers: usize) -> BatchScheduler {
        BatchScheduler::new(stage, workers, ctx.origin)
            .with_deadline(ctx.deadline, self.config.max_call_timeout())
    }

    async fn translate_wave(&self, ctx: &mut RunContext, tier: Priority, indices: &[usize]) {
        ctx.transition(RunState::Translating, Some(tier));
        let target = self.config.target_language.as_str();

        let mut work = Vec::new();
        for &index in indices {
            let article = &mut ctx.articles[index];
            if language::same_language(&article.source_language, target) {
                article.mark_translation_not_required();
                continue;
            }
            work.push(WorkItem::single(
                article.id.clone(),
                article.priority,
                TranslatePayload {
                    index,
                    title: article.title.clone(),
                    content: article.content.clone(),
                    source: article.source_language.clone(),
                },
            ));
        }

        if work.is_empty() {
            return;
        }

        let translator = &self.translator;
        let meter = &ctx.meter;
        let report: StageReport<TranslatePayload, NewsResult<(TranslatedText, TranslatedText)>> = self
            .scheduler(ctx, Stage::Translate, self.config.max_concurrent_translations)
            .run(work, |item| async move {
                let payload = &item.payload;
                translator
                    .translate_pair(&payload.title, &payload.content, &payload.source, target, meter)
                    .await
            })
            .await;

        ctx.stats.timeline.extend(report.events);
        ctx.stats.deadline_hit |= report.deadline_hit;

        for (item, outcome) in report.results {
            let index = item.payload.index;
            match outcome {
                WorkOutcome::Completed(Ok((title, content))) => {
                    ctx.articles[index].apply_translation(title.text, content.text);
                    ctx.stats.translated += 1;
                }
                WorkOutcome::Completed(Err(error)) => self.translation_failed(ctx, index, error),
                WorkOutcome::Skipped | WorkOutcome::TimedOut => {
                    ctx.exclude(index);
                    ctx.fail(
                        index,
                        Stage::Translate,
                        NewsError::DeadlineExceeded("翻译未完成".to_string()),
                    );
                }
            }
        }
    }

    fn translation_failed(&self, ctx: &mut RunContext, index: usize, error: NewsError) {
        match &error {
            NewsError::QuotaExceeded(_) => {
                tracing::warn!("文章 {} 翻译配额不足，延后处理", ctx.articles[index].id);
                ctx.stats.deferred += 1;
                ctx.exclude(index);
            }
            NewsError::DeadlineExceeded(_) => {
                ctx.stats.deadline_hit = true;
                ctx.exclude(index);
            }
            _ => {
                tracing::warn!("文章 {} 翻译失败，使用原文继续分析", ctx.articles[index].id);
                ctx.articles[index].mark_translation_unavailable();
                ctx.stats.untranslated += 1;
            }
        }
        ctx.fail(index, Stage::Translate, error);
    }

    async fn analyze_wave(&self, ctx: &mut RunContext, tier: Priority, indices: &[usize]) {
        ctx.transition(RunState::Analyzing, Some(tier));

        let candidates: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&index| ctx.eligible[index])
            .collect();
        if candidates.is_empty() {
            return;
        }

        let batch_size = self.config.batch_size;
        let work: Vec<WorkItem<AnalyzePayload>> = candidates
            .chunks(batch_size)
            .map(|chunk| {
                let requests = chunk
                    .iter()
                    .map(|&index| {
                        let article = &ctx.articles[index];
                        let (title, content) = article.analysis_text();
                        AnalysisRequest {
                            article_id: article.id.clone(),
                            title: title.to_string(),
                            content: content.to_string(),
                            category: article.category.clone(),
                        }
                    })
                    .collect::<Vec<_>>();
                WorkItem {
                    article_ids: requests.iter().map(|r| r.article_id.clone()).collect(),
                    priority: tier,
                    payload: AnalyzePayload {
                        indices: chunk.to_vec(),
                        requests,
                    },
                }
            })
            .collect();

        let analyst = &self.analyst;
        let meter = &ctx.meter;
        let report: StageReport<AnalyzePayload, Vec<NewsResult<AnalysisOutcome>>> = self
            .scheduler(ctx, Stage::Analyze, self.config.max_concurrent_analyses)
            .run(work, |item| async move {
                analyst
                    .analyze_batch(&item.payload.requests, batch_size, meter)
                    .await
            })
            .await;

        ctx.stats.timeline.extend(report.events);
        ctx.stats.deadline_hit |= report.deadline_hit;

        for (item, outcome) in report.results {
            match outcome {
                WorkOutcome::Completed(results) => {
                    for (&index, result) in item.payload.indices.iter().zip(results) {
                        match result {
                            Ok(outcome) => self.analysis_succeeded(ctx, index, outcome),
                            Err(error) => self.analysis_failed(ctx, index, error),
                        }
                    }
                }
                WorkOutcome::Skipped | WorkOutcome::TimedOut => {
                    for &index in &item.payload.indices {
                        ctx.fail(
                            index,
                            Stage::Analyze,
                            NewsError::DeadlineExceeded("分析未完成".to_string()),
                        );
                    }
                }
            }
        }
    }

    fn analysis_succeeded(&self, ctx: &mut RunContext, index: usize, outcome: AnalysisOutcome) {
        if outcome.summary_out_of_range {
            ctx.stats.summary_out_of_range += 1;
        }
        ctx.stats.validation_issues += outcome.issues.len();
        for issue in &outcome.issues {
            tracing::debug!(
                "文章 {} 字段 {} 已修正: {}",
                ctx.articles[index].id,
                issue.field,
                issue.message
            );
        }
        ctx.articles[index].analysis = Some(outcome.analysis);
        ctx.stats.analyzed += 1;
    }

    fn analysis_failed(&self, ctx: &mut RunContext, index: usize, error: NewsError) {
        match &error {
            NewsError::QuotaExceeded(_) => {
                tracing::warn!("文章 {} 分析配额不足，延后处理", ctx.articles[index].id);
                ctx.stats.deferred += 1;
            }
            NewsError::DeadlineExceeded(_) => ctx.stats.deadline_hit = true,
            _ => {
                tracing::warn!("文章 {} 分析失败: {}", ctx.articles[index].id, error);
                ctx.stats.unanalyzed += 1;
            }
        }
        ctx.fail(index, Stage::Analyze, error);
    }

    async fn aggregate(&self, mut ctx: RunContext) -> PipelineResult {
        ctx.transition(RunState::Aggregating, None);

        for article in &mut ctx.articles {
            article.finalize();
        }
        // 稳定排序保持同级内的输入顺序
        ctx.articles.sort_by_key(|article| article.priority);

        let evicted = self.cache.evict_if_over_capacity().await;
        if evicted > 0 {
            tracing::debug!("缓存清理 {} 个条目", evicted);
        }

        ctx.stats.unprocessed = ctx.articles.iter().filter(|a| !a.processed).count();
        ctx.stats.apply_meter(&ctx.meter.snapshot());
        ctx.stats.quota_remaining = self
            .limiter
            .snapshot()
            .into_iter()
            .map(|(service, status)| (service, status.remaining))
            .collect();
        ctx.stats.elapsed_ms = ctx.origin.elapsed().as_millis() as u64;
        ctx.transition(RunState::Done, None);

        tracing::info!(
            "处理完成: {} 篇输入, {} 篇翻译, {} 篇分析, {} 个错误, 用时 {}ms",
            ctx.stats.total_input,
            ctx.stats.translated,
            ctx.stats.analyzed,
            ctx.stats.errors,
            ctx.stats.elapsed_ms
        );

        PipelineResult {
            articles: ctx.articles,
            stats: ctx.stats,
        }
    }
}
