//! 텍스트 정리 유틸리티
//!
//! 줄바꿈 정규화, 공백 축약, 줄끝 하이픈 연결, 문단 분할을 담당합니다.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// 바이라인으로 간주하는 앞부분 길이 (문자 수)
pub const BYLINE_WINDOW: usize = 400;

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("valid horizontal space regex"));
static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" ?\n{2,}").expect("valid blank line regex"));
static WRAP_HYPHEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w)-\n(\w)").expect("valid hyphen regex"));
static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{2,}").expect("valid paragraph regex"));
static INNER_NEWLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\n\s*").expect("valid inner newline regex"));
static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("valid space regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid word regex"));

/// 텍스트 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStats {
    pub chars: usize,
    pub words: usize,
    pub paragraphs: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        Self {
            chars: text.chars().count(),
            words: word_count(text),
            paragraphs: paragraphs(text).len(),
        }
    }
}

/// 원문 텍스트 정리
///
/// # Returns
/// (정리된 텍스트, 문단 목록). 문단은 빈 줄 하나로 구분되며 문단 안의 줄바꿈은 공백이 됩니다.
pub fn clean_text(text: &str) -> (String, Vec<String>) {
    if text.is_empty() {
        return (String::new(), Vec::new());
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let normalized = HORIZONTAL_SPACE.replace_all(&normalized, " ");
    let normalized = BLANK_LINES.replace_all(&normalized, "\n\n");
    let normalized = join_wrapped_words(&normalized);
    let normalized = EXCESS_NEWLINES.replace_all(&normalized, "\n\n");

    let paragraphs: Vec<String> = PARAGRAPH_BREAK
        .split(normalized.trim())
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            let merged = INNER_NEWLINE.replace_all(block, " ");
            SPACE_RUN.replace_all(&merged, " ").trim().to_string()
        })
        .filter(|merged| !merged.is_empty())
        .collect();

    (paragraphs.join("\n\n"), paragraphs)
}

/// `trans-\nport` → `trans port`
///
/// 매치가 글자를 소비하므로 `a-\nb-\nc` 같은 연속 패턴은 변화가 없을 때까지 반복합니다.
fn join_wrapped_words(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = WRAP_HYPHEN.replace_all(&current, "${1} ${2}").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// 빈 줄 기준 문단 분할
pub fn paragraphs(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    PARAGRAPH_BREAK
        .split(trimmed)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// 유니코드 단어 수
pub fn word_count(text: &str) -> usize {
    WORD.find_iter(text).count()
}

/// 저자 이름 등 토큰 제거
///
/// 대소문자 무시 첫 등장 위치가 앞쪽 [`BYLINE_WINDOW`] 문자 이내면 그 한 번만 지우고,
/// 그렇지 않으면 토큰만 있는 줄만 지웁니다. 본문 문장 속 이름은 그대로 둡니다.
pub fn remove_token_occurrence(text: &str, token: &str) -> String {
    if text.is_empty() || token.is_empty() {
        return text.to_string();
    }

    let cleaned = match find_case_insensitive(text, token) {
        Some((start, end)) if text[..start].chars().count() <= BYLINE_WINDOW => {
            format!("{}{}", &text[..start], &text[end..])
        }
        _ => remove_standalone_lines(text, token),
    };

    EXCESS_NEWLINES.replace_all(&cleaned, "\n\n").into_owned()
}

fn remove_standalone_lines(text: &str, token: &str) -> String {
    let pattern = format!(r"(?m)^\s*{}\s*$", regex::escape(token));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(e) => {
            tracing::debug!(token, error = %e, "Skipping token removal");
            text.to_string()
        }
    }
}

/// 대소문자 무시 검색 (바이트 범위 반환)
fn find_case_insensitive(text: &str, token: &str) -> Option<(usize, usize)> {
    let pattern = regex::escape(token);
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()?;
    re.find(text).map(|m| (m.start(), m.end()))
}

// ============================================================================
// Tests
// ============================================================================
