//! 结果存储

pub mod cache;

pub use cache::{CacheKey, CacheOperation, CacheStats, LocalResultCache, ResultCache};
