//! 文章模型
//!
//! `RawArticle` 是采集端交给管道的原始记录，`Article` 是管道内部和输出使用的
//! 记录。文章 id 由 URL（URL 为空时由标题和正文）经 blake3 计算得到，
//! 同一次运行中 id 唯一。

use serde::{Deserialize, Serialize};

use super::analysis::Analysis;

/// 调度优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// 紧急文章先于普通文章处理
    Urgent,
    #[default]
    Normal,
}

/// 翻译状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationState {
    /// 源语言与目标语言相同
    NotRequired,
    Translated,
    /// 翻译失败，保留原文继续分析
    Unavailable,
    /// 需要翻译但尚未执行（延后或未被调度）
    #[default]
    Pending,
}

/// 采集端的原始文章
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawArticle {
    pub title: String,
    pub content: String,
    pub url: String,
    /// 为空或 `auto` 时按文字检测
    pub source_language: String,
    pub category: String,
    pub priority_hint: Option<Priority>,
    pub cvss_score: Option<f32>,
}

impl RawArticle {
    pub fn new(title: impl Into<String>, content: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.source_language = language.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority_hint = Some(priority);
        self
    }

    pub fn with_cvss(mut self, score: f32) -> Self {
        self.cvss_score = Some(score);
        self
    }
}

/// 计算文章 id
pub fn article_id(url: &str, title: &str, content: &str) -> String {
    let url = url.trim();
    let hash = if url.is_empty() {
        let mut hasher = blake3::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(b"\n");
        hasher.update(content.as_bytes());
        hasher.finalize()
    } else {
        blake3::hash(url.as_bytes())
    };
    hash.to_hex().to_string()
}

/// 管道中的文章
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub category: String,
    pub priority: Priority,
    pub source_language: String,
    title_translated: Option<String>,
    content_translated: Option<String>,
    translation: TranslationState,
    pub analysis: Option<Analysis>,
    pub processed: bool,
}

impl Article {
    pub fn new(raw: RawArticle, source_language: String, priority: Priority) -> Self {
        let id = article_id(&raw.url, &raw.title, &raw.content);
        Self {
            id,
            title: raw.title,
            content: raw.content,
            url: raw.url,
            category: raw.category,
            priority,
            source_language,
            title_translated: None,
            content_translated: None,
            translation: TranslationState::Pending,
            analysis: None,
            processed: false,
        }
    }

    pub fn title_translated(&self) -> Option<&str> {
        self.title_translated.as_deref()
    }

    pub fn content_translated(&self) -> Option<&str> {
        self.content_translated.as_deref()
    }

    pub fn translation_state(&self) -> TranslationState {
        self.translation
    }

    /// 标题和正文同时写入译文
    pub fn apply_translation(&mut self, title: String, content: String) {
        self.title_translated = Some(title);
        self.content_translated = Some(content);
        self.translation = TranslationState::Translated;
    }

    pub fn mark_translation_not_required(&mut self) {
        self.title_translated = None;
        self.content_translated = None;
        self.translation = TranslationState::NotRequired;
    }

    pub fn mark_translation_unavailable(&mut self) {
        self.title_translated = None;
        self.content_translated = None;
        self.translation = TranslationState::Unavailable;
    }

    /// 分析使用的文本：有译文时用译文，否则用原文
    pub fn analysis_text(&self) -> (&str, &str) {
        match (&self.title_translated, &self.content_translated) {
            (Some(title), Some(content)) => (title, content),
            _ => (&self.title, &self.content),
        }
    }

    /// 翻译不需要或已成功
    pub fn translation_satisfied(&self) -> bool {
        matches!(
            self.translation,
            TranslationState::NotRequired | TranslationState::Translated
        )
    }

    pub fn is_urgent(&self) -> bool {
        self.priority == Priority::Urgent
    }

    /// 根据当前状态重新计算 `processed`
    pub fn finalize(&mut self) {
        self.processed = self.translation_satisfied() && self.analysis.is_some();
    }
}
