//! 语言代码规范化与按文字检测

/// 规范化语言代码，只保留主标签并转小写
///
/// `"EN-us"` -> `"en"`；空字符串和 `auto` 返回 `None`。
pub fn normalize(code: &str) -> Option<String> {
    let primary = code
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if primary.is_empty() || primary == "auto" {
        return None;
    }

    if (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(primary)
    } else {
        None
    }
}

pub fn is_valid_code(code: &str) -> bool {
    normalize(code).is_some()
}

/// 两个代码是否指同一种语言
pub fn same_language(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[derive(Default)]
struct ScriptCounts {
    latin: usize,
    kana: usize,
    han: usize,
    hangul: usize,
    cyrillic: usize,
    arabic: usize,
}

/// 按文字系统检测语言
///
/// 假名判为日语，谚文判为韩语，只有汉字判为中文，西里尔字母判为俄语，
/// 阿拉伯字母判为阿拉伯语，其他情况判为英语。
pub fn detect(text: &str) -> &'static str {
    let mut counts = ScriptCounts::default();

    for c in text.chars() {
        match c as u32 {
            0x3040..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9F => counts.kana += 1,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => counts.han += 1,
            0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => counts.hangul += 1,
            0x0400..=0x04FF => counts.cyrillic += 1,
            0x0600..=0x06FF => counts.arabic += 1,
            _ if c.is_ascii_alphabetic() => counts.latin += 1,
            _ => {}
        }
    }

    let cjk = counts.kana + counts.han;
    let candidates = [
        (cjk, if counts.kana > 0 { "ja" } else { "zh" }),
        (counts.hangul, "ko"),
        (counts.cyrillic, "ru"),
        (counts.arabic, "ar"),
    ];

    candidates
        .iter()
        .filter(|(count, _)| *count > 0 && *count * 2 >= counts.latin)
        .max_by_key(|(count, _)| *count)
        .map(|(_, lang)| *lang)
        .unwrap_or("en")
}

/// 使用给定代码，缺省或 `auto` 时按正文检测
pub fn resolve(declared: &str, title: &str, content: &str) -> String {
    normalize(declared).unwrap_or_else(|| {
        let sample: String = title.chars().chain(content.chars()).take(2000).collect();
        detect(&sample).to_string()
    })
}
