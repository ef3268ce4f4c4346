//! 处理管道
//!
//! 按优先级分批翻译和分析文章，汇总统计并生成每日摘要

pub mod health;
pub mod language;
pub mod orchestrator;
pub mod scheduler;
pub mod stats;
pub mod summary;

// 重新导出主要类型
pub use health::{HealthLevel, HealthStatus};
pub use orchestrator::{Pipeline, PipelineResult};
pub use scheduler::{BatchScheduler, StageReport, WorkItem, WorkOutcome};
pub use stats::{
    ArticleFailure, MeterSnapshot, ProcessingEvent, RunMeter, RunState, RunStats, Stage,
    StateTransition,
};
