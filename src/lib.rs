//! # Newswire
//!
//! 新闻文章的翻译与 AI 分析管道。
//!
//! ## 模块组织
//!
//! - `pipeline` - 按优先级分批调度翻译与分析，汇总统计
//! - `clients` - 翻译服务与分析服务的客户端及响应校验
//! - `quota` - 按服务的配额窗口
//! - `storage` - 带过期时间的结果缓存
//! - `config` - 配置文件与环境变量
//! - `model` - 文章与分析结果
//!
//! ```no_run
//! use newswire::{ConfigManager, Pipeline, RawArticle};
//!
//! # async fn run() -> newswire::NewsResult<()> {
//! let config = ConfigManager::new()?.into_config();
//! let pipeline = Pipeline::from_config(config)?;
//! let result = pipeline
//!     .process(vec![RawArticle::new("Title", "Body", "https://example.com/a")])
//!     .await;
//! println!("{}", pipeline.summarize(&result.articles));
//! # Ok(())
//! # }
//! ```

pub mod clients;
pub mod config;
pub mod env;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod quota;
pub mod retry;
pub mod storage;

// Re-export commonly used items for convenience
pub use config::{ConfigManager, PipelineConfig};
pub use error::{NewsError, NewsResult, ProviderError, QuotaExceeded};
pub use model::{Analysis, Article, ImpactScope, Priority, RawArticle, TranslationState};
pub use pipeline::{HealthStatus, Pipeline, PipelineResult, RunStats};
