//! 파이프라인 단계 상태
//!
//! 각 단계는 `idle → running → {success | error | cancelled}` 로 움직입니다.
//! `error` 는 해당 실행에만 종료 상태이며 같은 객체로 다시 실행할 수 있습니다.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::artifact::IngestArtifact;
use crate::embedding::EmbeddingResult;
use crate::knowledge::chunker::Chunk;
use crate::preprocess::{PreprocessResult, RemovedSection, TextStats};

/// 작업 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
    Cancelled,
}

/// 단계 공통 상태
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub message: String,
    pub error: Option<String>,
}

impl JobState {
    /// 실행 시작 (이전 에러 제거)
    pub fn as_running(&mut self, message: Option<&str>) -> &mut Self {
        self.status = JobStatus::Running;
        if let Some(message) = message {
            self.message = message.to_string();
        }
        self.error = None;
        self
    }

    pub fn as_success(&mut self, message: Option<&str>) -> &mut Self {
        self.status = JobStatus::Success;
        if let Some(message) = message {
            self.message = message.to_string();
        }
        self.error = None;
        self
    }

    /// 실패 (메시지와 에러 모두 기록)
    pub fn as_error(&mut self, error: &str) -> &mut Self {
        self.status = JobStatus::Error;
        self.error = Some(error.to_string());
        self.message = error.to_string();
        self
    }

    pub fn as_cancelled(&mut self, message: Option<&str>) -> &mut Self {
        self.status = JobStatus::Cancelled;
        if let Some(message) = message {
            self.message = message.to_string();
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// 디스크의 인제스트 아티팩트 참조
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub project_id: String,
    pub doc_id: String,
    pub workflow: String,
    pub source_path: PathBuf,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestState {
    pub job: JobState,
    pub handle: Option<ArtifactHandle>,
    pub artifact: Option<IngestArtifact>,
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessState {
    pub job: JobState,
    pub artifact: Option<ArtifactHandle>,
    pub result: Option<PreprocessResult>,
    pub stats_raw: TextStats,
    pub stats_clean: TextStats,
    pub stats_deep: TextStats,
    pub removal_log: Vec<RemovedSection>,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkState {
    pub job: JobState,
    pub artifact: Option<ArtifactHandle>,
    pub chunks: Vec<Chunk>,
    pub run_id: Option<String>,
    pub file_path: Option<PathBuf>,
}

impl ChunkState {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingState {
    pub job: JobState,
    pub artifact: Option<ArtifactHandle>,
    pub provider: String,
    pub model: String,
    pub results: Vec<EmbeddingResult>,
    pub file_path: Option<PathBuf>,
}

impl EmbeddingState {
    pub fn vector_count(&self) -> usize {
        self.results.len()
    }
}

/// 전체 파이프라인 상태
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub ingest: IngestState,
    pub preprocess: PreprocessState,
    pub chunking: ChunkState,
    pub embeddings: EmbeddingState,
}

impl PipelineState {
    /// 모든 단계를 idle 로
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Tests
// ============================================================================
