//! 키워드 검색 - 단어 빈도 + BM25
//!
//! 두 검색 모두 청크 저장소의 레코드 전체를 순회합니다.
//! 토큰은 ASCII 영숫자 연속열을 소문자로 바꾼 것입니다.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::hybrid::{section_label, HitSource, RetrievalHit};
use super::store::ChunkRecord;
use crate::error::{Error, Result};

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-zA-Z]+").expect("valid token regex"));

// ============================================================================
// Types
// ============================================================================

/// BM25 백엔드가 없을 때의 동작
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bm25Policy {
    /// 설정 오류로 실패
    #[default]
    Require,
    /// 경고 후 단어 빈도 검색으로 대체
    FallbackLexical,
}

/// BM25 점수 계산기
///
/// `corpus` 의 각 문서에 대해 `query` 점수를 같은 순서로 반환합니다.
pub trait Bm25Backend: Send + Sync {
    /// 백엔드 이름
    fn name(&self) -> &'static str;

    /// 문서별 점수 (corpus 와 같은 길이)
    fn score(&self, corpus: &[Vec<String>], query: &[String]) -> anyhow::Result<Vec<f64>>;
}

/// Okapi BM25 (음수 idf 는 평균 idf × epsilon 으로 대체)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OkapiBm25 {
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
}

impl Default for OkapiBm25 {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl OkapiBm25 {
    pub fn new() -> Self {
        Self::default()
    }

    fn idf_table(&self, corpus: &[Vec<String>]) -> HashMap<String, f64> {
        let total = corpus.len() as f64;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in corpus {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let mut idf: HashMap<String, f64> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative: Vec<String> = Vec::new();
        for (term, freq) in doc_freq {
            let n = freq as f64;
            let value = (total - n + 0.5).ln() - (n + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.to_string());
            }
            idf.insert(term.to_string(), value);
        }

        if !idf.is_empty() {
            let floor = self.epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }
        idf
    }
}

impl Bm25Backend for OkapiBm25 {
    fn name(&self) -> &'static str {
        "okapi"
    }

    fn score(&self, corpus: &[Vec<String>], query: &[String]) -> anyhow::Result<Vec<f64>> {
        if corpus.is_empty() {
            return Ok(vec![]);
        }

        let idf = self.idf_table(corpus);
        let total_len: usize = corpus.iter().map(Vec::len).sum();
        let avgdl = total_len as f64 / corpus.len() as f64;

        let scores = corpus
            .iter()
            .map(|doc| {
                let dl = doc.len() as f64;
                let norm = self.k1 * (1.0 - self.b + self.b * dl / avgdl);
                query
                    .iter()
                    .map(|term| {
                        let weight = idf.get(term).copied().unwrap_or(0.0);
                        let freq = doc.iter().filter(|t| *t == term).count() as f64;
                        weight * (freq * (self.k1 + 1.0) / (freq + norm))
                    })
                    .sum()
            })
            .collect();
        Ok(scores)
    }
}

// ============================================================================
// Search
// ============================================================================

/// ASCII 영숫자 토큰 (소문자)
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// 단어 빈도 검색
///
/// 점수는 쿼리 토큰이 청크 텍스트(소문자)에 부분 문자열로 나타나는 횟수의 합입니다.
/// 점수가 0 인 청크는 제외합니다.
///
/// # Arguments
/// * `chunks` - 검색 대상 청크
/// * `query` - 검색어
/// * `top_k` - 최대 결과 수
pub fn lexical_search(chunks: &[ChunkRecord], query: &str, top_k: usize) -> Vec<RetrievalHit> {
    let terms = tokenize(&query.to_lowercase());
    if terms.is_empty() {
        return vec![];
    }

    let mut hits: Vec<RetrievalHit> = chunks
        .iter()
        .filter_map(|chunk| {
            let haystack = chunk.text.to_lowercase();
            let score: usize = terms
                .iter()
                .map(|term| haystack.matches(term.as_str()).count())
                .sum();
            (score > 0).then(|| to_hit(chunk, score as f64, HitSource::Lexical))
        })
        .collect();

    RetrievalHit::sort_ranked(&mut hits);
    hits.truncate(top_k);
    hits
}

/// BM25 검색
///
/// 토큰이 없는 청크는 코퍼스에서 빠지고, 나머지는 점수가 0 이어도 순위에 포함됩니다.
///
/// # Arguments
/// * `chunks` - 검색 대상 청크
/// * `query` - 검색어
/// * `top_k` - 최대 결과 수
/// * `backend` - 점수 계산기 (없으면 `policy` 에 따름)
/// * `policy` - 백엔드 부재 시 동작
pub fn bm25_search(
    chunks: &[ChunkRecord],
    query: &str,
    top_k: usize,
    backend: Option<&dyn Bm25Backend>,
    policy: Bm25Policy,
) -> Result<Vec<RetrievalHit>> {
    let Some(backend) = backend else {
        return match policy {
            Bm25Policy::Require => Err(Error::BackendUnavailable(
                "BM25 ranking backend is not configured".to_string(),
            )),
            Bm25Policy::FallbackLexical => {
                tracing::warn!("BM25 backend missing, falling back to lexical search");
                Ok(lexical_search(chunks, query, top_k))
            }
        };
    };

    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Ok(vec![]);
    }

    let (docs, corpus): (Vec<&ChunkRecord>, Vec<Vec<String>>) = chunks
        .iter()
        .map(|chunk| (chunk, tokenize(&chunk.text)))
        .filter(|(_, tokens)| !tokens.is_empty())
        .unzip();
    if corpus.is_empty() {
        return Ok(vec![]);
    }

    let scores = backend.score(&corpus, &query_tokens)?;
    if scores.len() != docs.len() {
        return Err(Error::Backend(anyhow::anyhow!(
            "BM25 backend '{}' returned {} scores for {} documents",
            backend.name(),
            scores.len(),
            docs.len()
        )));
    }

    let mut hits: Vec<RetrievalHit> = docs
        .into_iter()
        .zip(scores)
        .map(|(chunk, score)| to_hit(chunk, score, HitSource::Bm25))
        .collect();

    RetrievalHit::sort_ranked(&mut hits);
    hits.truncate(top_k);
    tracing::debug!(backend = backend.name(), hits = hits.len(), "BM25 search complete");
    Ok(hits)
}

fn to_hit(chunk: &ChunkRecord, score: f64, source: HitSource) -> RetrievalHit {
    RetrievalHit {
        chunk_id: chunk.chunk_id.clone(),
        doc_id: chunk.doc_id.clone(),
        text: chunk.text.clone(),
        section: section_label(&chunk.metadata),
        score,
        source,
        metadata: chunk.metadata.clone(),
    }
}

// ============================================================================
// Tests
// ============================================================================
