//! 每日摘要
//!
//! 从已有分析中挑选重要度最高的文章，拼接它们的摘要，不发起任何 AI 调用。

use crate::config::constants::DAILY_SUMMARY_MAX_CHARS;
use crate::model::Article;

const SEPARATOR: &str = " / ";
const ELLIPSIS: char = '…';

/// 生成不超过 300 字符的摘要；没有已分析文章时返回空字符串
pub fn summarize(articles: &[Article]) -> String {
    summarize_with_limit(articles, DAILY_SUMMARY_MAX_CHARS)
}

pub fn summarize_with_limit(articles: &[Article], max_chars: usize) -> String {
    let mut ranked: Vec<(u8, bool, &str)> = articles
        .iter()
        .filter_map(|article| {
            article.analysis.as_ref().map(|analysis| {
                (
                    analysis.importance_score(),
                    analysis.is_urgent() || article.is_urgent(),
                    analysis.summary().trim(),
                )
            })
        })
        .filter(|(_, _, summary)| !summary.is_empty())
        .collect();

    // 稳定排序：重要度高的在前，同分时紧急的在前，其余保持输入顺序
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

    let mut digest = String::new();
    let mut used = 0;

    for (_, _, summary) in ranked {
        let separator = if digest.is_empty() { 0 } else { SEPARATOR.chars().count() };
        let length = summary.chars().count();

        if used + separator + length <= max_chars {
            if separator > 0 {
                digest.push_str(SEPARATOR);
            }
            digest.push_str(summary);
            used += separator + length;
            continue;
        }

        if digest.is_empty() {
            digest = truncate_chars(summary, max_chars);
        }
        break;
    }

    digest
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push(ELLIPSIS);
    truncated
}
