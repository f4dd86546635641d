//! Artifact 모듈 - 인제스트 결과 문서 모델
//!
//! 외부 인제스터(PDF 파서 등)가 만든 문서 헤더, 섹션 목록, 원문 텍스트를 표현합니다.
//! 저장 형식은 JSONL 이며 한 줄이 하나의 아티팩트입니다.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// 페이지 범위 (시작, 끝)
pub type PageSpan = (i64, i64);

// ============================================================================
// Types
// ============================================================================

/// 문서 헤더
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentHeader {
    #[serde(deserialize_with = "null_as_default")]
    pub doc_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub doc_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source_path: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ingest_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content_hash: String,
    pub language: Option<String>,
    pub page_count: Option<i64>,
    /// 저자 등 추가 메타데이터
    #[serde(deserialize_with = "null_as_default")]
    pub extra: Map<String, Value>,
}

/// 문서 섹션 (청킹 단위의 부모 컨텍스트)
///
/// 인제스터가 만든 뒤로는 변경되지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Section {
    #[serde(deserialize_with = "null_as_default")]
    pub block_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub level: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    pub parent_id: Option<String>,
    #[serde(deserialize_with = "lenient_page_span")]
    pub page_span: Option<PageSpan>,
    /// `section_type` 태그 포함
    #[serde(deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
}

impl Section {
    /// 섹션 타입 태그 (`section_type`, 비어 있으면 `type`)
    ///
    /// 먼저 선택된 값이 문자열이 아니면 `None` 입니다.
    pub fn section_type(&self) -> Option<&str> {
        ["section_type", "type"]
            .iter()
            .filter_map(|key| self.metadata.get(*key))
            .find(|value| is_present(value))
            .and_then(Value::as_str)
    }
}

/// null, false, 0, 빈 문자열/배열/객체가 아닌 값
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// 인제스트 아티팩트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestArtifact {
    pub header: DocumentHeader,
    #[serde(deserialize_with = "null_as_default")]
    pub sections: Vec<Section>,
    #[serde(deserialize_with = "null_as_default")]
    pub assets: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub references: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub raw_text: String,
    #[serde(deserialize_with = "null_as_default")]
    pub manifests: Map<String, Value>,
}

impl IngestArtifact {
    /// JSON 값에서 아티팩트 복원
    pub fn from_json_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// 헤더 메타데이터의 저자 목록
    ///
    /// `extra.authors` (문자열 또는 배열), 없으면 `extra.author` 를 읽습니다.
    pub fn authors(&self) -> Vec<String> {
        let value = ["authors", "author"]
            .iter()
            .filter_map(|key| self.header.extra.get(*key))
            .find(|v| is_truthy(v));

        match value {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 원문 텍스트 (없으면 섹션 텍스트 결합)
    pub fn full_text(&self) -> String {
        if self.raw_text.is_empty() {
            flatten_sections(&self.sections)
        } else {
            self.raw_text.clone()
        }
    }
}

// ============================================================================
// JSONL I/O
// ============================================================================

/// JSONL 파일의 첫 번째 아티팩트 로드
///
/// # Arguments
/// * `path` - 아티팩트 JSONL 경로
///
/// # Returns
/// 첫 번째 비어있지 않은 줄의 아티팩트 (없으면 `MissingInput`)
pub fn load_artifact_jsonl(path: &Path) -> Result<IngestArtifact> {
    let file = fs::File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        return Ok(serde_json::from_str(line)?);
    }
    Err(Error::MissingInput(format!(
        "No artifact payload found in {}",
        path.display()
    )))
}

/// 아티팩트를 JSONL 파일 끝에 한 줄로 추가
pub fn save_artifact_jsonl(artifact: &IngestArtifact, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(artifact)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// 비어있지 않은 섹션 텍스트를 빈 줄로 결합
pub fn flatten_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Serde Helpers
// ============================================================================

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 2개 정수 배열이 아니면 None
fn lenient_page_span<'de, D>(deserializer: D) -> std::result::Result<Option<PageSpan>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(page_span_from_value(&value))
}

pub(crate) fn page_span_from_value(value: &Value) -> Option<PageSpan> {
    let items = value.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let start = as_int(&items[0])?;
    let end = as_int(&items[1])?;
    Some((start, end))
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_lenient_deserialize() {
        let artifact = IngestArtifact::from_json_value(json!({
            "header": {"doc_id": "paper", "language": null},
            "sections": [
                {"block_id": "s1", "title": null, "text": "Body", "page_span": [1, 2]},
                {"block_id": "s2", "text": "More", "page_span": [1]},
                {"block_id": "s3", "text": null, "page_span": "x"}
            ]
        }))
        .unwrap();

        assert_eq!(artifact.header.doc_id, "paper");
        assert_eq!(artifact.sections.len(), 3);
        assert_eq!(artifact.sections[0].page_span, Some((1, 2)));
        assert_eq!(artifact.sections[1].page_span, None);
        assert_eq!(artifact.sections[2].text, "");
        assert_eq!(artifact.sections[0].title, "");
    }

    #[test]
    fn test_section_type_fallback() {
        let mut section = Section::default();
        assert_eq!(section.section_type(), None);

        section.metadata.insert("type".into(), json!("references"));
        assert_eq!(section.section_type(), Some("references"));

        section.metadata.insert("section_type".into(), json!("body"));
        assert_eq!(section.section_type(), Some("body"));

        section.metadata.insert("section_type".into(), json!(""));
        assert_eq!(section.section_type(), Some("references"));

        section.metadata.insert("section_type".into(), json!(null));
        assert_eq!(section.section_type(), Some("references"));

        section.metadata.insert("section_type".into(), json!(3));
        assert_eq!(section.section_type(), None);
    }

    #[test]
    fn test_authors() {
        let mut artifact = IngestArtifact::default();
        assert!(artifact.authors().is_empty());

        artifact.header.extra.insert("author".into(), json!("Ada Lovelace"));
        assert_eq!(artifact.authors(), vec!["Ada Lovelace"]);

        artifact
            .header
            .extra
            .insert("authors".into(), json!(["Alan Turing", "Grace Hopper"]));
        assert_eq!(artifact.authors(), vec!["Alan Turing", "Grace Hopper"]);
    }

    #[test]
    fn test_flatten_sections() {
        let sections = vec![
            Section { text: "  first ".into(), ..Default::default() },
            Section { text: "   ".into(), ..Default::default() },
            Section { text: "second".into(), ..Default::default() },
        ];
        assert_eq!(flatten_sections(&sections), "first\n\nsecond");
    }

    #[test]
    fn test_jsonl_roundtrip_first_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("artifact.jsonl");

        let mut first = IngestArtifact::default();
        first.header.doc_id = "first".into();
        let mut second = IngestArtifact::default();
        second.header.doc_id = "second".into();

        save_artifact_jsonl(&first, &path).unwrap();
        save_artifact_jsonl(&second, &path).unwrap();

        let loaded = load_artifact_jsonl(&path).unwrap();
        assert_eq!(loaded.header.doc_id, "first");
    }

    #[test]
    fn test_load_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jsonl");
        fs::write(&path, "\n\n").unwrap();

        let err = load_artifact_jsonl(&path).unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
