//! Vector Backend - 벡터 저장소 트레이트 및 유틸리티
//!
//! 컬렉션 단위로 벡터를 저장/삭제/검색하는 공통 인터페이스입니다.
//! LanceDB(영구)와 메모리(임시) 구현이 있습니다.

use anyhow::Result;
use serde_json::{Map, Value};

/// 거리 메트릭 (모든 백엔드 공통)
pub const DISTANCE_METRIC: &str = "cosine";

// ============================================================================
// Types
// ============================================================================

/// 벡터 레코드 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// 청크 ID (컬렉션 내 키)
    pub chunk_id: String,
    /// 문서 ID (교체 삭제 기준)
    pub doc_id: String,
    /// 청크 텍스트
    pub text: String,
    /// 정리된 메타데이터 (스칼라 값만)
    pub metadata: Map<String, Value>,
    /// 임베딩 벡터
    pub vector: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    /// 코사인 거리 (0 = 동일 방향)
    pub distance: f32,
}

// ============================================================================
// VectorBackend Trait
// ============================================================================

/// 벡터 백엔드 트레이트 (동기)
///
/// 컬렉션은 (provider, model) 프로필마다 하나입니다.
pub trait VectorBackend: Send + Sync {
    /// 백엔드 이름
    fn name(&self) -> &'static str;

    /// 컬렉션 존재 여부
    fn has_collection(&self, collection: &str) -> Result<bool>;

    /// 문서의 벡터 전체 삭제 (삭제된 개수)
    ///
    /// 컬렉션이 없으면 0 을 반환합니다.
    fn delete_document(&self, collection: &str, doc_id: &str) -> Result<usize>;

    /// chunk_id 기준 upsert (없으면 컬렉션 생성)
    fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize>;

    /// 코사인 거리 기준 최근접 검색
    fn query(&self, collection: &str, embedding: &[f32], limit: usize) -> Result<Vec<VectorMatch>>;

    /// 컬렉션 벡터 개수 (없으면 0)
    fn count(&self, collection: &str) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// # Arguments
/// * `a` - 첫 번째 벡터
/// * `b` - 두 번째 벡터
///
/// # Returns
/// 코사인 유사도 (-1.0 ~ 1.0), 길이가 다르거나 영벡터면 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 메타데이터 정리
///
/// 스칼라(문자열, 숫자, 불리언, null)는 유지하고 배열은 `", "` 로 결합,
/// 객체는 JSON 문자열로 바꿉니다.
pub fn sanitize_metadata(meta: &Map<String, Value>) -> Map<String, Value> {
    meta.iter()
        .map(|(key, value)| {
            let cleaned = match value {
                Value::Array(items) => Value::String(
                    items
                        .iter()
                        .map(scalar_to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Value::Object(_) => Value::String(value.to_string()),
                scalar => scalar.clone(),
            };
            (key.clone(), cleaned)
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_sanitize_metadata() {
        let meta = json!({
            "title": "Intro",
            "index": 3,
            "score": 0.5,
            "flag": true,
            "missing": null,
            "page_span": [1, 2],
            "tags": ["a", "b"],
            "nested": {"k": "v"}
        });
        let cleaned = sanitize_metadata(meta.as_object().unwrap());

        assert_eq!(cleaned["title"], "Intro");
        assert_eq!(cleaned["index"], 3);
        assert_eq!(cleaned["flag"], true);
        assert!(cleaned["missing"].is_null());
        assert_eq!(cleaned["page_span"], "1, 2");
        assert_eq!(cleaned["tags"], "a, b");
        assert_eq!(cleaned["nested"], r#"{"k":"v"}"#);
    }
}
