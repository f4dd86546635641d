//! 하이브리드 검색 - 벡터 + 키워드 순위 기반 통합
//!
//! 벡터 결과를 원래 점수로 시드하고, 키워드 결과의 순위에 따라
//! `(1 - (r-1)/n) × 0.3` 만큼 가산합니다. 모든 결과 목록은
//! (점수 내림차순, chunk_id 오름차순) 으로 정렬됩니다.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 키워드 1위 결과의 최대 가산치
pub const LEXICAL_BOOST: f64 = 0.3;

// ============================================================================
// Types
// ============================================================================

/// 결과 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    /// 벡터 검색
    Vector,
    /// 단어 빈도 검색
    Lexical,
    /// BM25 검색
    Bm25,
    /// 통합 결과
    Hybrid,
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HitSource::Vector => "vector",
            HitSource::Lexical => "lexical",
            HitSource::Bm25 => "bm25",
            HitSource::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// 검색 결과 (쿼리마다 생성, 저장하지 않음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    /// 섹션 라벨 (section_type 또는 section_title)
    pub section: String,
    pub score: f64,
    pub source: HitSource,
    pub metadata: Map<String, Value>,
}

impl RetrievalHit {
    /// (점수 내림차순, chunk_id 오름차순)
    pub fn ranked_cmp(a: &RetrievalHit, b: &RetrievalHit) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    }

    pub fn sort_ranked(hits: &mut [RetrievalHit]) {
        hits.sort_by(Self::ranked_cmp);
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// 벡터 + 키워드 결과 통합
///
/// 한쪽이 비어있으면 다른 쪽을 그대로(출처 태그 포함) 반환합니다.
/// 잘라내지 않으므로 호출자가 `top_k` 를 적용합니다.
///
/// # Arguments
/// * `vector_hits` - 벡터 검색 결과
/// * `lexical_hits` - 키워드 검색 결과 (순위 순서)
///
/// # Returns
/// (점수 내림차순, chunk_id 오름차순) 정렬된 통합 결과
pub fn hybrid_fuse(vector_hits: &[RetrievalHit], lexical_hits: &[RetrievalHit]) -> Vec<RetrievalHit> {
    if vector_hits.is_empty() {
        return lexical_hits.to_vec();
    }
    if lexical_hits.is_empty() {
        return vector_hits.to_vec();
    }

    let mut fused: Vec<RetrievalHit> = Vec::with_capacity(vector_hits.len() + lexical_hits.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for hit in vector_hits {
        match positions.get(&hit.chunk_id) {
            Some(&pos) => fused[pos] = tagged(hit.clone(), HitSource::Vector),
            None => {
                positions.insert(hit.chunk_id.clone(), fused.len());
                fused.push(tagged(hit.clone(), HitSource::Vector));
            }
        }
    }

    let total = lexical_hits.len() as f64;
    for (idx, hit) in lexical_hits.iter().enumerate() {
        let boost = rank_boost(idx + 1, total);
        match positions.get(&hit.chunk_id) {
            Some(&pos) => {
                let entry = &mut fused[pos];
                entry.score += boost;
                entry.source = HitSource::Hybrid;
            }
            None => {
                positions.insert(hit.chunk_id.clone(), fused.len());
                let mut entry = tagged(hit.clone(), HitSource::Hybrid);
                entry.score = boost;
                fused.push(entry);
            }
        }
    }

    RetrievalHit::sort_ranked(&mut fused);
    fused
}

/// 1-based 순위 `rank` / 전체 `total` 의 가산치
#[inline]
pub fn rank_boost(rank: usize, total: f64) -> f64 {
    let weight = 1.0 - (rank as f64 - 1.0) / total;
    weight * LEXICAL_BOOST
}

/// 섹션 라벨 (section_type, 없으면 section_title)
pub(crate) fn section_label(metadata: &Map<String, Value>) -> String {
    ["section_type", "section_title"]
        .iter()
        .filter_map(|key| metadata.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Null | Value::String(_) | Value::Bool(false) => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_default()
}

fn tagged(mut hit: RetrievalHit, source: HitSource) -> RetrievalHit {
    hit.source = source;
    hit
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, score: f64, source: HitSource) -> RetrievalHit {
        RetrievalHit {
            chunk_id: chunk_id.to_string(),
            doc_id: "doc".to_string(),
            text: format!("text {}", chunk_id),
            section: String::new(),
            score,
            source,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_source_display_and_serde() {
        assert_eq!(HitSource::Bm25.to_string(), "bm25");
        assert_eq!(serde_json::to_string(&HitSource::Hybrid).unwrap(), "\"hybrid\"");
    }

    #[test]
    fn test_rank_boost() {
        assert!((rank_boost(1, 4.0) - 0.3).abs() < 1e-12);
        assert!((rank_boost(4, 4.0) - 0.075).abs() < 1e-12);
        assert!(rank_boost(100, 100.0) > 0.0);
    }

    #[test]
    fn test_lexical_only_passthrough() {
        let lexical = vec![hit("b", 3.0, HitSource::Lexical), hit("a", 1.0, HitSource::Lexical)];
        let fused = hybrid_fuse(&[], &lexical);
        assert_eq!(fused, lexical);
        assert!(fused.iter().all(|h| h.source == HitSource::Lexical));
    }

    #[test]
    fn test_vector_only_passthrough() {
        let vector = vec![hit("z", 0.9, HitSource::Vector)];
        assert_eq!(hybrid_fuse(&vector, &[]), vector);
        assert!(hybrid_fuse(&[], &[]).is_empty());
    }

    #[test]
    fn test_fusion_scores() {
        let vector = vec![hit("v1", 0.8, HitSource::Vector), hit("both", 0.5, HitSource::Vector)];
        let lexical = vec![hit("both", 7.0, HitSource::Lexical), hit("lex", 2.0, HitSource::Lexical)];

        let fused = hybrid_fuse(&vector, &lexical);
        let by_id: HashMap<&str, &RetrievalHit> =
            fused.iter().map(|h| (h.chunk_id.as_str(), h)).collect();

        // rank 1 of 2 → 0.3, rank 2 of 2 → 0.15
        assert!((by_id["both"].score - 0.8).abs() < 1e-9);
        assert_eq!(by_id["both"].source, HitSource::Hybrid);
        assert!((by_id["lex"].score - 0.15).abs() < 1e-9);
        assert_eq!(by_id["lex"].source, HitSource::Hybrid);
        assert_eq!(by_id["v1"].source, HitSource::Vector);

        let ids: Vec<&str> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["both", "v1", "lex"]);
    }

    #[test]
    fn test_fusion_tie_break_by_chunk_id() {
        let vector = vec![hit("b", 0.5, HitSource::Vector), hit("a", 0.5, HitSource::Vector)];
        let lexical = vec![hit("c", 1.0, HitSource::Lexical)];
        let fused = hybrid_fuse(&vector, &lexical);
        let ids: Vec<&str> = fused.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fusion_does_not_truncate() {
        let vector: Vec<RetrievalHit> =
            (0..20).map(|i| hit(&format!("v{:02}", i), 0.5, HitSource::Vector)).collect();
        let lexical: Vec<RetrievalHit> =
            (0..20).map(|i| hit(&format!("l{:02}", i), 1.0, HitSource::Lexical)).collect();
        assert_eq!(hybrid_fuse(&vector, &lexical).len(), 40);
    }
}
