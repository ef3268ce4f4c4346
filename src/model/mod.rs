//! 文章与分析结果的数据模型

pub mod analysis;
pub mod article;

pub use analysis::{Analysis, ImpactScope};
pub use article::{article_id, Article, Priority, RawArticle, TranslationState};
