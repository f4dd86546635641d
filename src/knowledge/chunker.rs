//! Section Chunking Module
//!
//! 섹션 단위 슬라이딩 윈도우 분할을 제공합니다.
//! 같은 아티팩트/전처리 결과/run id 에 대해 항상 같은 청크 ID, 텍스트, 메타데이터를 만듭니다.
//!
//! 토큰 = 공백으로 구분된 단어 (언어학적 토큰이 아님)

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artifact::{IngestArtifact, PageSpan, Section};
use crate::preprocess::PreprocessResult;

use super::store::ChunkRecord;

// ============================================================================
// Chunker Options
// ============================================================================

/// 청킹 설정 (단위: 단어)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerOptions {
    /// 윈도우 크기
    pub target_tokens: usize,
    /// 윈도우 간 중첩 (최대 target/2)
    pub overlap_tokens: usize,
    /// 윈도우 최소 길이 (target 하한 + 꼬리 병합 기준)
    pub min_tokens: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            target_tokens: 450,
            overlap_tokens: 60,
            min_tokens: 120,
        }
    }
}

impl ChunkerOptions {
    /// 짧은 청크 설정 (정밀 검색용)
    pub fn for_dense() -> Self {
        Self {
            target_tokens: 256,
            overlap_tokens: 32,
            min_tokens: 64,
        }
    }

    /// 긴 청크 설정 (문맥 보존용)
    pub fn for_wide() -> Self {
        Self {
            target_tokens: 800,
            overlap_tokens: 100,
            min_tokens: 200,
        }
    }

    /// 실제 적용되는 (target, overlap, step)
    fn window(&self) -> (usize, usize, usize) {
        let target = self.target_tokens.max(self.min_tokens);
        let overlap = self.overlap_tokens.min(target / 2);
        let step = (target - overlap).max(self.min_tokens);
        (target, overlap, step)
    }
}

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub source_file: String,
    pub project_id: String,
    pub run_id: String,
    pub section_block_id: String,
    pub section_title: String,
    pub section_type: Option<String>,
    pub page_span: Option<PageSpan>,
    /// 섹션 내 순번 (1-based)
    pub chunk_index_within_section: usize,
    pub start_word: usize,
    pub end_word: usize,
    /// 최종 텍스트 단어 수 (꼬리 병합 시 target 초과 가능)
    pub token_estimate: usize,
    /// 섹션 토큰 스트림 기준 문자 범위
    pub char_span: (usize, usize),
}

/// 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub project_id: String,
    pub run_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// 저장용 레코드로 변환
    pub fn to_record(&self) -> ChunkRecord {
        let metadata = match serde_json::to_value(&self.metadata) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        ChunkRecord {
            chunk_id: self.chunk_id.clone(),
            doc_id: self.doc_id.clone(),
            text: self.text.clone(),
            metadata,
        }
    }
}

/// 섹션 하나의 윈도우
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionWindow {
    pub text: String,
    pub start_word: usize,
    pub end_word: usize,
    pub token_estimate: usize,
    pub char_span: (usize, usize),
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 아티팩트를 청크로 분할
    ///
    /// # Arguments
    /// * `artifact` - 인제스트 아티팩트
    /// * `preprocess` - 전처리 결과 (섹션 순서 제공)
    /// * `project_id`, `run_id` - 메타데이터에 기록
    /// * `excluded_sections` - 제외할 섹션 ID
    fn chunkify(
        &self,
        artifact: &IngestArtifact,
        preprocess: &PreprocessResult,
        project_id: &str,
        run_id: &str,
        excluded_sections: &HashSet<String>,
    ) -> Vec<Chunk>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SectionChunker
// ============================================================================

/// 섹션 인식 청커
///
/// 섹션 순서는 전처리 결과의 `section_metrics` 순서를 따르고,
/// 청크 번호는 섹션이 아니라 문서 전체에서 증가합니다.
#[derive(Debug, Clone, Default)]
pub struct SectionChunker {
    options: ChunkerOptions,
}

impl SectionChunker {
    pub fn new(options: ChunkerOptions) -> Self {
        Self { options }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkerOptions::default())
    }

    pub fn options(&self) -> &ChunkerOptions {
        &self.options
    }

    /// 섹션 텍스트를 윈도우로 분할
    ///
    /// 마지막 윈도우가 `min_tokens` 보다 짧고 앞 청크가 있으면 새 청크 대신
    /// 앞 청크 뒤에 공백 하나로 이어 붙입니다.
    pub fn split_section(&self, text: &str) -> Vec<SectionWindow> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let (target, overlap, step) = self.options.window();
        let total = tokens.len();
        let mut windows: Vec<SectionWindow> = Vec::new();
        let mut start = 0;

        while start < total {
            let end = total.min(start + target);
            if end == start {
                break;
            }
            let joined = tokens[start..end].join(" ");

            if end - start < self.options.min_tokens {
                if let Some(last) = windows.last_mut() {
                    last.text.push(' ');
                    last.text.push_str(&joined);
                    last.end_word = end;
                    last.token_estimate = last.text.split_whitespace().count();
                    last.char_span.1 += joined.chars().count() + 1;
                    break;
                }
            }

            let char_start = char_offset(&tokens, start);
            windows.push(SectionWindow {
                char_span: (char_start, char_start + joined.chars().count()),
                token_estimate: end - start,
                text: joined,
                start_word: start,
                end_word: end,
            });

            if end >= total {
                break;
            }
            start = end.saturating_sub(overlap).max(start + step);
        }

        windows
    }
}

impl Chunker for SectionChunker {
    fn chunkify(
        &self,
        artifact: &IngestArtifact,
        preprocess: &PreprocessResult,
        project_id: &str,
        run_id: &str,
        excluded_sections: &HashSet<String>,
    ) -> Vec<Chunk> {
        let header = &artifact.header;
        let source_file = source_stem(&header.source_path)
            .unwrap_or_else(|| header.doc_id.clone());
        let base = if !header.doc_id.is_empty() && header.doc_id != source_file {
            format!("{}__{}", source_file, header.doc_id)
        } else {
            source_file.clone()
        };

        let lookup: HashMap<&str, &Section> = artifact
            .sections
            .iter()
            .map(|s| (s.block_id.as_str(), s))
            .collect();

        let mut chunks: Vec<Chunk> = Vec::new();

        for metric in &preprocess.section_metrics {
            if excluded_sections.contains(&metric.block_id) {
                continue;
            }
            let Some(section) = lookup.get(metric.block_id.as_str()) else {
                continue;
            };
            if section.text.trim().is_empty() {
                continue;
            }

            for (idx, window) in self.split_section(&section.text).into_iter().enumerate() {
                let chunk_id = format!("{}-chunk-{:04}", base, chunks.len() + 1);
                let metadata = ChunkMetadata {
                    doc_id: header.doc_id.clone(),
                    source_file: source_file.clone(),
                    project_id: project_id.to_string(),
                    run_id: run_id.to_string(),
                    section_block_id: section.block_id.clone(),
                    section_title: section.title.clone(),
                    section_type: section.section_type().map(str::to_string),
                    page_span: section.page_span,
                    chunk_index_within_section: idx + 1,
                    start_word: window.start_word,
                    end_word: window.end_word,
                    token_estimate: window.token_estimate,
                    char_span: window.char_span,
                };
                chunks.push(Chunk {
                    chunk_id,
                    doc_id: header.doc_id.clone(),
                    project_id: project_id.to_string(),
                    run_id: run_id.to_string(),
                    text: window.text,
                    metadata,
                });
            }
        }

        tracing::info!(
            doc_id = %header.doc_id,
            chunks = chunks.len(),
            chunker = self.name(),
            "Chunked document"
        );

        chunks
    }

    fn name(&self) -> &'static str {
        "SectionChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `tokens[..start]` 를 공백으로 이은 뒤의 시작 문자 위치
#[inline]
fn char_offset(tokens: &[&str], start: usize) -> usize {
    if start == 0 {
        return 0;
    }
    tokens[..start].iter().map(|t| t.chars().count()).sum::<usize>() + start
}

fn source_stem(source_path: &str) -> Option<String> {
    Path::new(source_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SectionChunker::with_defaults())
}

/// 섹션 청커 생성 (설정 지정)
pub fn section_chunker(options: ChunkerOptions) -> Box<dyn Chunker> {
    Box::new(SectionChunker::new(options))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::DocumentPreprocessor;
    use serde_json::json;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    fn artifact_with(sections: Vec<(&str, String)>) -> IngestArtifact {
        let mut artifact = IngestArtifact::default();
        artifact.header.doc_id = "doc-1".into();
        artifact.header.source_path = "/data/papers/attention.pdf".into();
        artifact.sections = sections
            .into_iter()
            .map(|(id, text)| {
                let mut metadata = Map::new();
                metadata.insert("section_type".into(), json!("body"));
                Section {
                    block_id: id.to_string(),
                    title: format!("Title {}", id),
                    level: 1,
                    text,
                    page_span: Some((1, 2)),
                    metadata,
                    ..Default::default()
                }
            })
            .collect();
        artifact
    }

    fn run(artifact: &IngestArtifact, excluded: &HashSet<String>) -> Vec<Chunk> {
        let preprocess = DocumentPreprocessor::default().preprocess(artifact, None);
        SectionChunker::with_defaults().chunkify(artifact, &preprocess, "proj", "run-1", excluded)
    }

    #[test]
    fn test_thousand_words_three_windows() {
        let chunker = SectionChunker::with_defaults();
        let windows = chunker.split_section(&words(1000));

        let spans: Vec<(usize, usize)> = windows.iter().map(|w| (w.start_word, w.end_word)).collect();
        assert_eq!(spans, vec![(0, 450), (390, 840), (780, 1000)]);
        assert_eq!(windows[2].token_estimate, 220);
    }

    #[test]
    fn test_tail_merge() {
        let chunker = SectionChunker::with_defaults();
        let windows = chunker.split_section(&words(500));

        // [0,450) 다음 윈도우 [390,500) 은 110 단어 < 120 → 병합
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_word, 500);
        assert_eq!(windows[0].token_estimate, 450 + 110);
        assert!(windows[0].text.ends_with("w499"));

        let expected_end = words(450).chars().count() + 1 + words(500)[words(390).len() + 1..].chars().count();
        assert_eq!(windows[0].char_span, (0, expected_end));
    }

    #[test]
    fn test_short_section_single_window() {
        let chunker = SectionChunker::with_defaults();
        let windows = chunker.split_section(&words(30));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].token_estimate, 30);
    }

    #[test]
    fn test_whitespace_section_yields_nothing() {
        let chunker = SectionChunker::with_defaults();
        assert!(chunker.split_section("  \n\t  ").is_empty());

        let artifact = artifact_with(vec![("blank", "   \n  ".to_string())]);
        assert!(run(&artifact, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_overlap_capped_at_half_target() {
        let chunker = SectionChunker::new(ChunkerOptions {
            target_tokens: 100,
            overlap_tokens: 90,
            min_tokens: 10,
        });
        let windows = chunker.split_section(&words(250));
        let starts: Vec<usize> = windows.iter().map(|w| w.start_word).collect();
        assert_eq!(starts, vec![0, 50, 100, 150]);
    }

    #[test]
    fn test_target_lifted_to_min() {
        let chunker = SectionChunker::new(ChunkerOptions {
            target_tokens: 10,
            overlap_tokens: 0,
            min_tokens: 40,
        });
        let windows = chunker.split_section(&words(100));
        assert_eq!(windows[0].end_word, 40);
    }

    #[test]
    fn test_zero_target_yields_nothing() {
        let chunker = SectionChunker::new(ChunkerOptions {
            target_tokens: 0,
            overlap_tokens: 0,
            min_tokens: 0,
        });
        assert!(chunker.split_section("alpha beta gamma").is_empty());
    }

    #[test]
    fn test_windows_cover_every_word() {
        let options = ChunkerOptions::default();
        let chunker = SectionChunker::new(options);
        for total in [1, 119, 120, 450, 451, 839, 1000, 2345] {
            let windows = chunker.split_section(&words(total));
            assert_eq!(windows[0].start_word, 0);
            assert_eq!(windows.last().unwrap().end_word, total);
            for pair in windows.windows(2) {
                assert!(pair[1].start_word > pair[0].start_word);
                assert!(pair[1].start_word <= pair[0].end_word);
                assert!(pair[0].end_word - pair[1].start_word <= options.overlap_tokens);
            }
        }
    }

    #[test]
    fn test_char_span_matches_token_stream() {
        let chunker = SectionChunker::with_defaults();
        let text = words(1000);
        for window in chunker.split_section(&text) {
            let slice: String = text
                .chars()
                .skip(window.char_span.0)
                .take(window.char_span.1 - window.char_span.0)
                .collect();
            assert_eq!(slice, window.text);
        }
    }

    #[test]
    fn test_chunk_ids_global_sequence() {
        let artifact = artifact_with(vec![
            ("s1", words(500)),
            ("s2", words(1000)),
        ]);
        let chunks = run(&artifact, &HashSet::new());

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "attention__doc-1-chunk-0001",
                "attention__doc-1-chunk-0002",
                "attention__doc-1-chunk-0003",
                "attention__doc-1-chunk-0004",
            ]
        );
        assert_eq!(chunks[1].metadata.chunk_index_within_section, 1);
        assert_eq!(chunks[3].metadata.chunk_index_within_section, 3);
        assert_eq!(chunks[1].metadata.section_block_id, "s2");
        assert_eq!(chunks[0].metadata.source_file, "attention");
        assert_eq!(chunks[0].metadata.page_span, Some((1, 2)));
        assert_eq!(chunks[0].metadata.section_type.as_deref(), Some("body"));
    }

    #[test]
    fn test_chunk_id_without_doc_suffix() {
        let mut artifact = artifact_with(vec![("s1", words(10))]);
        artifact.header.doc_id = "attention".into();
        let chunks = run(&artifact, &HashSet::new());
        assert_eq!(chunks[0].chunk_id, "attention-chunk-0001");

        artifact.header.source_path.clear();
        let chunks = run(&artifact, &HashSet::new());
        assert_eq!(chunks[0].chunk_id, "attention-chunk-0001");
    }

    #[test]
    fn test_excluded_sections() {
        let artifact = artifact_with(vec![("s1", words(50)), ("s2", words(50))]);
        let excluded: HashSet<String> = ["s1".to_string()].into_iter().collect();
        let chunks = run(&artifact, &excluded);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.section_block_id, "s2");
        assert!(chunks[0].chunk_id.ends_with("-chunk-0001"));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let artifact = artifact_with(vec![("s1", words(700)), ("s2", words(333))]);
        let first = run(&artifact, &HashSet::new());
        let second = run(&artifact, &HashSet::new());
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_to_record() {
        let artifact = artifact_with(vec![("s1", words(20))]);
        let chunks = run(&artifact, &HashSet::new());
        let record = chunks[0].to_record();

        assert_eq!(record.chunk_id, chunks[0].chunk_id);
        assert_eq!(record.metadata["run_id"], json!("run-1"));
        assert_eq!(record.metadata["char_span"], json!([0, chunks[0].text.len()]));
    }

    #[test]
    fn test_options_presets() {
        assert_eq!(ChunkerOptions::default().target_tokens, 450);
        assert_eq!(ChunkerOptions::for_dense().min_tokens, 64);
        assert_eq!(ChunkerOptions::for_wide().overlap_tokens, 100);
        assert_eq!(default_chunker().name(), "SectionChunker");
    }
}
