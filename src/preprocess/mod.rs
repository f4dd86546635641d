//! Preprocess 모듈 - 청킹 전 문서 정리
//!
//! - 원문 정리: 줄바꿈/공백 정규화, 줄끝 하이픈 연결, 문단 분할
//! - Deep clean: 섹션 타입 기준 제거 + 저자 바이라인 제거 후 재정리
//! - 섹션별 통계 (청커가 섹션 순서로 사용)

pub mod text;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::artifact::{page_span_from_value, IngestArtifact, PageSpan, Section};
use crate::error::Result;

pub use text::{clean_text, remove_token_occurrence, word_count, TextStats, BYLINE_WINDOW};

// ============================================================================
// Options
// ============================================================================

/// 전처리 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    pub enable_deep_clean: bool,
    /// 제거할 섹션 타입 (대소문자 무시)
    pub remove_section_types: Vec<String>,
    pub strip_author_metadata: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            enable_deep_clean: true,
            remove_section_types: [
                "front_matter",
                "references",
                "acknowledgements",
                "appendix",
                "table_of_contents",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            strip_author_metadata: true,
        }
    }
}

impl PreprocessOptions {
    /// 정리만 수행 (deep clean 없음)
    pub fn clean_only() -> Self {
        Self {
            enable_deep_clean: false,
            ..Self::default()
        }
    }

    /// 소문자화, 빈 항목 제거, 순서 유지 중복 제거
    pub fn normalized_remove_types(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for entry in &self.remove_section_types {
            if entry.is_empty() {
                continue;
            }
            let lowered = entry.to_lowercase();
            if !seen.contains(&lowered) {
                seen.push(lowered);
            }
        }
        seen
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// 섹션별 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionMetrics {
    pub block_id: String,
    pub title: String,
    pub section_type: Option<String>,
    #[serde(deserialize_with = "lenient_page_span")]
    pub page_span: Option<PageSpan>,
    pub chars: usize,
    pub words: usize,
}

/// Deep clean 에서 제거된 섹션 기록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovedSection {
    pub block_id: String,
    pub title: String,
    pub section_type: Option<String>,
    /// `section_type:<type>`
    pub reason: String,
}

/// 전처리 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessResult {
    pub cleaned_text: String,
    pub deep_clean_text: String,
    pub paragraphs: Vec<String>,
    pub deep_clean_paragraphs: Vec<String>,
    pub stats_raw: TextStats,
    pub stats_clean: TextStats,
    pub stats_deep_clean: TextStats,
    pub section_metrics: Vec<SectionMetrics>,
    pub removed_sections: Vec<RemovedSection>,
}

impl PreprocessResult {
    /// 중간 산출물(JSON) 로드
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 중간 산출물(JSON) 저장
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 제거된 섹션 ID 목록 (청커 제외 목록으로 사용)
    pub fn removed_block_ids(&self) -> HashSet<String> {
        self.removed_sections
            .iter()
            .map(|r| r.block_id.clone())
            .collect()
    }
}

// ============================================================================
// DocumentPreprocessor
// ============================================================================

/// 문서 전처리기
#[derive(Debug, Clone, Default)]
pub struct DocumentPreprocessor {
    options: PreprocessOptions,
}

impl DocumentPreprocessor {
    pub fn new(options: PreprocessOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// 아티팩트 전처리
    ///
    /// 원문이 없으면 섹션 텍스트를 결합해 사용합니다. 둘 다 없으면
    /// 빈 텍스트와 0 통계를 반환합니다 (에러 아님).
    ///
    /// # Arguments
    /// * `artifact` - 인제스트 아티팩트
    /// * `options` - 이번 호출에만 적용할 설정 (없으면 생성 시 설정)
    pub fn preprocess(
        &self,
        artifact: &IngestArtifact,
        options: Option<&PreprocessOptions>,
    ) -> PreprocessResult {
        let opts = options.unwrap_or(&self.options);

        let raw_text = artifact.full_text();
        let (cleaned_text, paragraphs) = clean_text(&raw_text);
        let stats_raw = TextStats::of(&raw_text);
        let stats_clean = TextStats::of(&cleaned_text);

        let (deep_clean_text, deep_clean_paragraphs, removed_sections) = if opts.enable_deep_clean
        {
            deep_clean(artifact, opts)
        } else {
            (cleaned_text.clone(), paragraphs.clone(), Vec::new())
        };
        let stats_deep_clean = TextStats::of(&deep_clean_text);

        let section_metrics: Vec<SectionMetrics> = artifact
            .sections
            .iter()
            .map(|section| SectionMetrics {
                block_id: section.block_id.clone(),
                title: section.title.clone(),
                section_type: section.section_type().map(str::to_string),
                page_span: section.page_span,
                chars: section.text.chars().count(),
                words: word_count(&section.text),
            })
            .collect();

        tracing::debug!(
            doc_id = %artifact.header.doc_id,
            raw_words = stats_raw.words,
            clean_words = stats_clean.words,
            deep_words = stats_deep_clean.words,
            removed = removed_sections.len(),
            "Preprocessed document"
        );

        PreprocessResult {
            cleaned_text,
            deep_clean_text,
            paragraphs,
            deep_clean_paragraphs,
            stats_raw,
            stats_clean,
            stats_deep_clean,
            section_metrics,
            removed_sections,
        }
    }
}

// ============================================================================
// Deep Clean
// ============================================================================

fn deep_clean(
    artifact: &IngestArtifact,
    opts: &PreprocessOptions,
) -> (String, Vec<String>, Vec<RemovedSection>) {
    let removal_types: HashSet<String> = opts.normalized_remove_types().into_iter().collect();
    let mut retained: Vec<&Section> = Vec::new();
    let mut removed: Vec<RemovedSection> = Vec::new();

    for section in &artifact.sections {
        let section_type = section.section_type().unwrap_or_default().to_lowercase();
        if !section_type.is_empty() && removal_types.contains(&section_type) {
            tracing::debug!(
                block_id = %section.block_id,
                reason = %format!("section_type:{}", section_type),
                "Removed section"
            );
            removed.push(RemovedSection {
                block_id: section.block_id.clone(),
                title: section.title.clone(),
                reason: format!("section_type:{}", section_type),
                section_type: Some(section_type),
            });
            continue;
        }
        retained.push(section);
    }

    let combined = if retained.is_empty() {
        artifact.raw_text.clone()
    } else {
        retained
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let (mut text, _) = clean_text(&combined);
    if opts.strip_author_metadata {
        text = strip_authors(&text, &artifact.authors());
    }
    let paragraphs = text::paragraphs(&text);

    (text, paragraphs, removed)
}

fn strip_authors(text: &str, authors: &[String]) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut cleaned = text.to_string();
    for author in authors {
        cleaned = remove_token_occurrence(&cleaned, author.trim());
    }
    cleaned.trim().to_string()
}

fn lenient_page_span<'de, D>(deserializer: D) -> std::result::Result<Option<PageSpan>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(page_span_from_value(&value))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn section(id: &str, section_type: &str, text: &str) -> Section {
        let mut metadata = serde_json::Map::new();
        if !section_type.is_empty() {
            metadata.insert("section_type".into(), json!(section_type));
        }
        Section {
            block_id: id.to_string(),
            title: id.to_uppercase(),
            level: 1,
            text: text.to_string(),
            metadata,
            ..Default::default()
        }
    }

    fn sample_artifact() -> IngestArtifact {
        let mut artifact = IngestArtifact::default();
        artifact.header.doc_id = "paper".into();
        artifact
            .header
            .extra
            .insert("authors".into(), json!(["Jane Doe"]));
        artifact.sections = vec![
            section("front", "front_matter", "Journal of Things\nVol 3"),
            section("intro", "body", "Jane Doe\n\nThe trans-\nport layer   moves data."),
            section("refs", "References", "[1] Someone. 2020."),
        ];
        artifact.raw_text = artifact
            .sections
            .iter()
            .map(|s| s.text.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        artifact
    }

    #[test]
    fn test_normalized_remove_types() {
        let opts = PreprocessOptions {
            remove_section_types: vec!["Appendix".into(), "".into(), "appendix".into(), "REFS".into()],
            ..Default::default()
        };
        assert_eq!(opts.normalized_remove_types(), vec!["appendix", "refs"]);
    }

    #[test]
    fn test_options_from_json_defaults() {
        let opts: PreprocessOptions =
            serde_json::from_str(r#"{"strip_author_metadata": false}"#).unwrap();
        assert!(opts.enable_deep_clean);
        assert!(!opts.strip_author_metadata);
        assert_eq!(opts.remove_section_types.len(), 5);
    }

    #[test]
    fn test_deep_clean_removes_sections() {
        let result = DocumentPreprocessor::default().preprocess(&sample_artifact(), None);

        let reasons: Vec<&str> = result
            .removed_sections
            .iter()
            .map(|r| r.reason.as_str())
            .collect();
        assert_eq!(reasons, vec!["section_type:front_matter", "section_type:references"]);
        assert_eq!(result.removed_sections[1].section_type.as_deref(), Some("references"));

        assert_eq!(result.deep_clean_text, "The trans port layer moves data.");
        assert_eq!(result.deep_clean_paragraphs.len(), 1);
        assert!(!result.deep_clean_text.contains("Someone"));
        assert!(result.cleaned_text.contains("Someone"));
    }

    #[test]
    fn test_deep_clean_disabled() {
        let result = DocumentPreprocessor::new(PreprocessOptions::clean_only())
            .preprocess(&sample_artifact(), None);
        assert!(result.removed_sections.is_empty());
        assert_eq!(result.deep_clean_text, result.cleaned_text);
        assert_eq!(result.stats_deep_clean, result.stats_clean);
    }

    #[test]
    fn test_author_kept_when_stripping_disabled() {
        let opts = PreprocessOptions {
            strip_author_metadata: false,
            ..Default::default()
        };
        let result = DocumentPreprocessor::default().preprocess(&sample_artifact(), Some(&opts));
        assert!(result.deep_clean_text.starts_with("Jane Doe"));
    }

    #[test]
    fn test_section_metrics_order() {
        let result = DocumentPreprocessor::default().preprocess(&sample_artifact(), None);
        let ids: Vec<&str> = result
            .section_metrics
            .iter()
            .map(|m| m.block_id.as_str())
            .collect();
        assert_eq!(ids, vec!["front", "intro", "refs"]);
        assert_eq!(result.section_metrics[2].section_type.as_deref(), Some("References"));
        assert_eq!(result.section_metrics[0].words, 5);
    }

    #[test]
    fn test_empty_artifact_yields_empty_result() {
        let result = DocumentPreprocessor::default().preprocess(&IngestArtifact::default(), None);
        assert!(result.cleaned_text.is_empty());
        assert!(result.deep_clean_text.is_empty());
        assert_eq!(result.stats_raw, TextStats::default());
        assert_eq!(result.stats_deep_clean, TextStats::default());
    }

    #[test]
    fn test_raw_text_falls_back_to_sections() {
        let mut artifact = sample_artifact();
        artifact.raw_text.clear();
        let result = DocumentPreprocessor::new(PreprocessOptions::clean_only())
            .preprocess(&artifact, None);
        assert!(result.cleaned_text.starts_with("Journal of Things Vol 3"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preprocess").join("paper.json");

        let result = DocumentPreprocessor::default().preprocess(&sample_artifact(), None);
        result.save(&path).unwrap();

        let loaded = PreprocessResult::load(&path).unwrap();
        assert_eq!(loaded, result);
        assert!(loaded.removed_block_ids().contains("refs"));
    }
}
