//! 分析结果的解码与校验
//!
//! 模型输出是不可信的自由文本。这里把它解码成严格的 `Analysis`：
//! 从代码块或前后说明文字中提取 JSON，字段名大小写与驼峰/下划线不敏感，
//! 多余字段忽略，数值接受数字或数字字符串。可以安全修正的字段被钳制或
//! 取默认值并记录问题；摘要缺失没有安全默认值，整条记录被拒绝。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{constants, PipelineConfig};
use crate::error::{helpers::validation_error, NewsResult};
use crate::model::{Analysis, ImpactScope};

const DEFAULT_SCORE: u8 = 5;
const DEFAULT_SCOPE: ImpactScope = ImpactScope::National;

/// 校验约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub summary_range: (usize, usize),
    pub summary_tolerance: usize,
    pub max_keywords: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            summary_range: constants::DEFAULT_SUMMARY_RANGE,
            summary_tolerance: constants::DEFAULT_SUMMARY_TOLERANCE,
            max_keywords: constants::DEFAULT_MAX_KEYWORDS,
        }
    }
}

impl From<&PipelineConfig> for DecodeLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            summary_range: config.summary_length_range,
            summary_tolerance: config.summary_tolerance,
            max_keywords: config.max_keywords,
        }
    }
}

/// 被修正或取默认值的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// 一条解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub analysis: Analysis,
    pub issues: Vec<ValidationIssue>,
    /// 摘要长度超出范围（含容差），记录仍被接受
    pub summary_out_of_range: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisDecoder {
    limits: DecodeLimits,
}

impl AnalysisDecoder {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    /// 摘要长度是否超出范围（含容差）
    pub fn summary_out_of_range(&self, summary: &str) -> bool {
        let (min, max) = self.limits.summary_range;
        let length = summary.chars().count();
        length + self.limits.summary_tolerance < min || length > max + self.limits.summary_tolerance
    }

    /// 解码单篇文章的分析
    pub fn decode_one(&self, raw: &str) -> NewsResult<Decoded> {
        let value = parse_json(raw)?;
        let object = match value {
            Value::Object(map) => map,
            Value::Array(mut items) if items.len() == 1 => match items.remove(0) {
                Value::Object(map) => map,
                _ => return Err(validation_error("分析结果不是 JSON 对象")),
            },
            _ => return Err(validation_error("分析结果不是 JSON 对象")),
        };
        self.validate(&object)
    }

    /// 解码批量分析，结果与输入按位置对齐
    ///
    /// 整体无法解码或条数不符时返回错误，由调用方回退到逐篇分析；
    /// 单条记录的校验失败只影响该条。
    pub fn decode_batch(&self, raw: &str, expected: usize) -> NewsResult<Vec<NewsResult<Decoded>>> {
        let items = match parse_json(raw)? {
            Value::Array(items) => items,
            Value::Object(map) => {
                let nested = find_field(&map, &["results", "analyses", "articles", "items"])
                    .and_then(Value::as_array)
                    .cloned();
                match nested {
                    Some(items) => items,
                    None if expected == 1 => vec![Value::Object(map)],
                    None => return Err(validation_error("批量分析结果缺少数组")),
                }
            }
            _ => return Err(validation_error("批量分析结果不是 JSON 数组")),
        };

        if items.len() != expected {
            return Err(validation_error(format!(
                "批量分析结果数量不符: 期望 {}, 实际 {}",
                expected,
                items.len()
            )));
        }

        Ok(items
            .iter()
            .map(|item| match item {
                Value::Object(map) => self.validate(map),
                _ => Err(validation_error("批量分析中的条目不是 JSON 对象")),
            })
            .collect())
    }

    fn validate(&self, object: &Map<String, Value>) -> NewsResult<Decoded> {
        let mut issues = Vec::new();

        let summary = find_field(object, &["summary", "abstract"])
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| validation_error("分析结果缺少 summary"))?
            .to_string();

        let summary_out_of_range = self.summary_out_of_range(&summary);

        let importance = score_field(object, &["importance_score", "importance"], "importance_score", &mut issues);
        let reliability = score_field(object, &["reliability_score", "reliability"], "reliability_score", &mut issues);

        let sentiment = match find_field(object, &["sentiment_score", "sentiment"]).and_then(number_of) {
            Some(value) if value.is_finite() => {
                if !(-1.0..=1.0).contains(&value) {
                    issues.push(ValidationIssue::new("sentiment_score", format!("{} 超出范围，已钳制", value)));
                }
                value.clamp(-1.0, 1.0) as f32
            }
            _ => {
                issues.push(ValidationIssue::new("sentiment_score", "缺失或不是有限数值，使用 0.0"));
                0.0
            }
        };

        let impact_scope = match find_field(object, &["impact_scope", "impact", "scope"])
            .and_then(Value::as_str)
            .and_then(ImpactScope::parse)
        {
            Some(scope) => scope,
            None => {
                issues.push(ValidationIssue::new("impact_scope", "无法识别，使用 national"));
                DEFAULT_SCOPE
            }
        };

        let is_urgent = find_field(object, &["is_urgent", "urgent"])
            .map(bool_of)
            .unwrap_or(false);

        let keywords = self.keywords(find_field(object, &["keywords", "tags"]), &mut issues);

        let risk_factors: BTreeSet<String> = find_field(object, &["risk_factors", "risks"])
            .map(string_list)
            .unwrap_or_default()
            .into_iter()
            .collect();

        let analysis = Analysis::from_validated(
            importance,
            summary,
            keywords,
            sentiment,
            is_urgent,
            impact_scope,
            reliability,
            risk_factors,
        );

        Ok(Decoded {
            analysis,
            issues,
            summary_out_of_range,
        })
    }

    fn keywords(&self, value: Option<&Value>, issues: &mut Vec<ValidationIssue>) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut keywords: Vec<String> = value
            .map(string_list)
            .unwrap_or_default()
            .into_iter()
            .filter(|keyword| seen.insert(keyword.to_lowercase()))
            .collect();

        if keywords.len() > self.limits.max_keywords {
            issues.push(ValidationIssue::new(
                "keywords",
                format!("{} 个关键词，截断为 {}", keywords.len(), self.limits.max_keywords),
            ));
            keywords.truncate(self.limits.max_keywords);
        }
        keywords
    }
}

fn score_field(
    object: &Map<String, Value>,
    names: &[&str],
    field: &'static str,
    issues: &mut Vec<ValidationIssue>,
) -> u8 {
    match find_field(object, names).and_then(number_of) {
        Some(value) if value.is_finite() => {
            let rounded = value.round();
            if !(1.0..=10.0).contains(&rounded) {
                issues.push(ValidationIssue::new(field, format!("{} 超出 1-10，已钳制", value)));
            }
            rounded.clamp(1.0, 10.0) as u8
        }
        _ => {
            issues.push(ValidationIssue::new(field, "缺失或不是数值，使用默认值 5"));
            DEFAULT_SCORE
        }
    }
}

/// 字段名规范化：小写并去掉 `_`、`-` 和空格
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn find_field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    let wanted: Vec<String> = names.iter().map(|name| normalize_key(name)).collect();
    wanted.iter().find_map(|name| {
        object
            .iter()
            .find(|(key, _)| normalize_key(key) == *name)
            .map(|(_, value)| value)
    })
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn bool_of(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => matches!(text.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// 字符串数组或逗号分隔字符串，去掉空项
fn string_list(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Value::String(text) => text.split([',', '、', '，']).map(str::to_string).collect(),
        _ => Vec::new(),
    };

    raw.into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").ok())
        .as_ref()
}

/// 从自由文本中提取 JSON 片段
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }

    if let Some(captures) = fence_regex().and_then(|re| re.captures(trimmed)) {
        if let Some(body) = captures.get(1) {
            let body = body.as_str().trim();
            if body.starts_with('{') || body.starts_with('[') {
                return Some(body);
            }
        }
    }

    let start = trimmed.find(['{', '['])?;
    let closing = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(closing)?;
    (end > start).then(|| &trimmed[start..=end])
}

fn parse_json(raw: &str) -> NewsResult<Value> {
    let fragment = extract_json(raw).ok_or_else(|| validation_error("响应中没有 JSON"))?;
    serde_json::from_str(fragment)
        .map_err(|e| validation_error(format!("无法解析分析 JSON: {}", e)))
}
