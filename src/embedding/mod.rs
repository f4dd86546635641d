//! 임베딩 모듈 - 프로바이더 트레이트 및 임베딩 파일 I/O
//!
//! 벡터 계산은 외부 프로바이더가 담당합니다. 이 모듈은 청크를 작업으로 바꾸고
//! 결과를 JSONL 로 저장/로드합니다. 배치와 재시도는 프로바이더 책임입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let jobs = build_embedding_jobs(&chunks);
//! let results = provider.embed(&jobs)?;
//! write_embedding_file(&path, &results)?;
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::knowledge::chunker::Chunk;
use crate::knowledge::store::ChunkRecord;

// ============================================================================
// Types
// ============================================================================

/// 임베딩 작업 (청크 하나)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// 임베딩 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 작업마다 결과 하나를 반환합니다. 배치 크기와 재시도 정책은 구현체가 정합니다.
pub trait EmbeddingProvider: Send + Sync {
    /// 작업 목록 임베딩
    fn embed(&self, jobs: &[EmbeddingJob]) -> anyhow::Result<Vec<EmbeddingResult>>;

    /// 프로바이더 이름 (예: "openai", "local")
    fn provider_name(&self) -> &str;

    /// 모델 이름
    fn model_name(&self) -> &str;
}

// ============================================================================
// Jobs
// ============================================================================

/// 청크 → 임베딩 작업
pub fn build_embedding_jobs(chunks: &[Chunk]) -> Vec<EmbeddingJob> {
    chunks
        .iter()
        .map(|chunk| {
            let record = chunk.to_record();
            EmbeddingJob {
                chunk_id: record.chunk_id,
                text: record.text,
                metadata: record.metadata,
            }
        })
        .collect()
}

/// 작업 목록에서 청크 조회 테이블 생성
///
/// 문서 ID 는 메타데이터 `doc_id`, 없으면 `source_doc` 입니다.
pub fn chunk_lookup_from_jobs(jobs: &[EmbeddingJob]) -> HashMap<String, ChunkRecord> {
    jobs.iter()
        .map(|job| {
            let doc_id = ["doc_id", "source_doc"]
                .iter()
                .find_map(|key| match job.metadata.get(*key) {
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            let record = ChunkRecord {
                chunk_id: job.chunk_id.clone(),
                doc_id,
                text: job.text.clone(),
                metadata: job.metadata.clone(),
            };
            (job.chunk_id.clone(), record)
        })
        .collect()
}

// ============================================================================
// Embedding Files
// ============================================================================

/// 임베딩 결과를 JSONL 로 저장 (기존 파일 교체)
pub fn write_embedding_file(path: &Path, results: &[EmbeddingResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(fs::File::create(path)?);
    for result in results {
        serde_json::to_writer(&mut writer, result)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    tracing::info!(path = %path.display(), vectors = results.len(), "Wrote embedding file");
    Ok(())
}

/// 임베딩 파일에서 (chunk_id, vector) 로드
///
/// UTF-8 이 아니거나 파싱 불가한 라인, chunk_id 가 없거나 vector 가 배열이 아닌
/// 라인은 건너뜁니다.
pub fn load_embedding_vectors(path: &Path) -> Result<Vec<(String, Vec<f32>)>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut pairs = Vec::new();

    for (line_no, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let Ok(line) = std::str::from_utf8(&raw) else {
            tracing::debug!(path = %path.display(), line = line_no + 1, "Skipping non UTF-8 embedding line");
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_embedding_line(trimmed) {
            Some(pair) => pairs.push(pair),
            None => tracing::debug!(path = %path.display(), line = line_no + 1, "Skipping malformed embedding line"),
        }
    }
    Ok(pairs)
}

fn parse_embedding_line(line: &str) -> Option<(String, Vec<f32>)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let chunk_id = value.get("chunk_id")?.as_str()?;
    if chunk_id.is_empty() {
        return None;
    }
    let vector = value
        .get("vector")?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect::<Option<Vec<f32>>>()?;
    Some((chunk_id.to_string(), vector))
}

// ============================================================================
// Tests
// ============================================================================
