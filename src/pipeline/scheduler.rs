//! 批处理调度
//!
//! 工作单元先按优先级稳定排序（紧急在前，同级保持原顺序），再由固定数量的
//! worker 从共享队列中依次领取。每个工作单元只属于一个 worker；单元的失败
//! 作为值返回，不影响其他 worker。截止时间之后不再领取新单元，已开始的单元
//! 最迟在截止时间加单次调用超时后结束，未领取的单元报告为 `Skipped`。

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use super::stats::{ProcessingEvent, Stage};
use crate::model::Priority;

/// 一个工作单元
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    /// 单元覆盖的文章 id，分析批次可能包含多篇
    pub article_ids: Vec<String>,
    pub priority: Priority,
    pub payload: T,
}

impl<T> WorkItem<T> {
    pub fn single(article_id: impl Into<String>, priority: Priority, payload: T) -> Self {
        Self {
            article_ids: vec![article_id.into()],
            priority,
            payload,
        }
    }
}

/// 单元的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome<R> {
    Completed(R),
    /// 截止时间后未被领取
    Skipped,
    /// 超过截止时间加调用超时仍未结束，被中止
    TimedOut,
}

/// 按调度顺序排列的结果
#[derive(Debug)]
pub struct StageReport<T, R> {
    pub results: Vec<(WorkItem<T>, WorkOutcome<R>)>,
    pub events: Vec<ProcessingEvent>,
    pub deadline_hit: bool,
}

/// 稳定排序：紧急在前，同级保持输入顺序
pub fn order_by_priority<T>(items: &mut [WorkItem<T>]) {
    items.sort_by_key(|item| item.priority);
}

pub struct BatchScheduler {
    stage: Stage,
    max_workers: usize,
    origin: Instant,
    deadline: Option<Instant>,
    grace: Duration,
}

impl BatchScheduler {
    pub fn new(stage: Stage, max_workers: usize, origin: Instant) -> Self {
        Self {
            stage,
            max_workers: max_workers.max(1),
            origin,
            deadline: None,
            grace: Duration::ZERO,
        }
    }

    /// `grace` 是单次调用的最长耗时
    pub fn with_deadline(mut self, deadline: Instant, grace: Duration) -> Self {
        self.deadline = Some(deadline);
        self.grace = grace;
        self
    }

    pub async fn run<T, R, F, Fut>(&self, mut items: Vec<WorkItem<T>>, work: F) -> StageReport<T, R>
    where
        T: Clone,
        F: Fn(WorkItem<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        order_by_priority(&mut items);
        let total = items.len();

        let queue: Mutex<VecDeque<(usize, WorkItem<T>)>> =
            Mutex::new(items.into_iter().enumerate().collect());
        let finished: Mutex<Vec<(usize, WorkItem<T>, WorkOutcome<R>)>> = Mutex::new(Vec::with_capacity(total));
        let events: Mutex<Vec<ProcessingEvent>> = Mutex::new(Vec::new());

        let workers = self.max_workers.min(total.max(1));
        tracing::debug!("{:?} 阶段: {} 个单元, {} 个 worker", self.stage, total, workers);

        let hard_deadline = self.deadline.map(|deadline| deadline + self.grace);

        join_all((0..workers).map(|worker| {
            let queue = &queue;
            let finished = &finished;
            let events = &events;
            let work = &work;

            async move {
                loop {
                    if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        break;
                    }

                    let Some((index, item)) = lock(queue).pop_front() else {
                        break;
                    };

                    let offset_ms = self.origin.elapsed().as_millis() as u64;
                    lock(events).extend(item.article_ids.iter().map(|id| ProcessingEvent {
                        article_id: id.clone(),
                        stage: self.stage,
                        worker,
                        offset_ms,
                    }));

                    let outcome = match hard_deadline {
                        Some(limit) => match tokio::time::timeout_at(limit, work(item.clone())).await {
                            Ok(result) => WorkOutcome::Completed(result),
                            Err(_) => {
                                tracing::warn!("{:?} 单元 {:?} 超过截止时间被中止", self.stage, item.article_ids);
                                WorkOutcome::TimedOut
                            }
                        },
                        None => WorkOutcome::Completed(work(item.clone()).await),
                    };

                    lock(finished).push((index, item, outcome));
                }
            }
        }))
        .await;

        let mut results = finished.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let skipped: Vec<_> = queue
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .map(|(index, item)| (index, item, WorkOutcome::Skipped))
            .collect();

        let deadline_hit = !skipped.is_empty()
            || results
                .iter()
                .any(|(_, _, outcome)| matches!(outcome, WorkOutcome::TimedOut));
        if !skipped.is_empty() {
            tracing::warn!("截止时间已到，{} 个 {:?} 单元未处理", skipped.len(), self.stage);
        }

        results.extend(skipped);
        results.sort_by_key(|(index, _, _)| *index);

        let mut events = events.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        events.sort_by_key(|event| event.offset_ms);

        StageReport {
            results: results
                .into_iter()
                .map(|(_, item, outcome)| (item, outcome))
                .collect(),
            events,
            deadline_hit,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
