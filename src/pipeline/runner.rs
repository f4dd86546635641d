//! Pipeline Runner - ingest → preprocess → chunk → embed
//!
//! 각 단계는 상위 입력이 없으면 작업 없이 바로 `error` 로 전이합니다.
//! 산출물 저장(`persist_*`)은 단계 성공 후 별도로 호출합니다.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::artifact::{load_artifact_jsonl, IngestArtifact};
use crate::embedding::{build_embedding_jobs, write_embedding_file, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::knowledge::chunker::{default_chunker, Chunk, Chunker};
use crate::knowledge::index::collection_name;
use crate::knowledge::store::{write_chunk_file, ProjectPaths};
use crate::preprocess::{DocumentPreprocessor, PreprocessOptions};

use super::state::{
    ArtifactHandle, ChunkState, EmbeddingState, IngestState, PipelineState, PreprocessState,
};

/// 사전 추출된 아티팩트 JSONL 워크플로우
pub const ARTIFACT_JSONL_WORKFLOW: &str = "artifact_jsonl";

// ============================================================================
// Ingestor Trait
// ============================================================================

/// 인제스터 트레이트
///
/// 원본 파일을 `IngestArtifact` 로 변환합니다. PDF 등 바이너리 파싱은 외부 구현체 몫입니다.
pub trait Ingestor: Send + Sync {
    /// 워크플로우 이름 (등록 키)
    fn workflow(&self) -> &str;

    /// 원본 파일 인제스트
    fn ingest(&self, source_path: &Path) -> anyhow::Result<IngestArtifact>;
}

/// 아티팩트 JSONL 인제스터
///
/// 헤더에 content_hash 가 없으면 파일의 SHA-256 을 기록합니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactFileIngestor;

impl Ingestor for ArtifactFileIngestor {
    fn workflow(&self) -> &str {
        ARTIFACT_JSONL_WORKFLOW
    }

    fn ingest(&self, source_path: &Path) -> anyhow::Result<IngestArtifact> {
        let mut artifact = load_artifact_jsonl(source_path)?;
        if artifact.header.content_hash.is_empty() {
            artifact.header.content_hash = sha256_file(source_path)?;
        }
        Ok(artifact)
    }
}

/// 파일 SHA-256 (hex)
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

// ============================================================================
// PipelineRunner
// ============================================================================

/// 파이프라인 실행기
pub struct PipelineRunner {
    state: PipelineState,
    ingestors: HashMap<String, Box<dyn Ingestor>>,
    preprocessor: DocumentPreprocessor,
    chunker: Box<dyn Chunker>,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner {
    /// 아티팩트 JSONL 인제스터 + 기본 전처리기/청커
    pub fn new() -> Self {
        let mut runner = Self {
            state: PipelineState::default(),
            ingestors: HashMap::new(),
            preprocessor: DocumentPreprocessor::default(),
            chunker: default_chunker(),
        };
        runner.register_ingestor(Box::new(ArtifactFileIngestor));
        runner
    }

    pub fn with_preprocessor(mut self, preprocessor: DocumentPreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// 인제스터 등록 (같은 워크플로우는 교체)
    pub fn register_ingestor(&mut self, ingestor: Box<dyn Ingestor>) {
        self.ingestors.insert(ingestor.workflow().to_string(), ingestor);
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    fn handle(&self) -> Option<ArtifactHandle> {
        self.state.ingest.handle.clone()
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    /// 인제스트
    ///
    /// # Arguments
    /// * `workflow` - 등록된 인제스터 이름
    /// * `content_hash` - 알고 있는 원본 해시 (없으면 아티팩트 헤더 값)
    pub fn ingest(
        &mut self,
        project_id: &str,
        workflow: &str,
        source_path: &Path,
        content_hash: Option<&str>,
    ) -> &IngestState {
        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let state = &mut self.state.ingest;
        state.job.as_running(Some(&format!("Ingesting {}", file_name)));
        state.artifact = None;
        state.handle = Some(ArtifactHandle {
            project_id: project_id.to_string(),
            doc_id: String::new(),
            workflow: workflow.to_string(),
            source_path: source_path.to_path_buf(),
            content_hash: content_hash.map(str::to_string),
        });
        tracing::debug!(workflow, source = %source_path.display(), "Ingest started");

        let outcome = match self.ingestors.get(workflow) {
            Some(ingestor) => ingestor
                .ingest(source_path)
                .map_err(|e| format!("Ingest failed: {:#}", e)),
            None => Err(format!("No ingestor available for workflow '{}'", workflow)),
        };

        let state = &mut self.state.ingest;
        match outcome {
            Ok(artifact) => {
                let doc_id = artifact.header.doc_id.clone();
                if let Some(handle) = state.handle.as_mut() {
                    handle.doc_id = doc_id.clone();
                    if handle.content_hash.is_none() && !artifact.header.content_hash.is_empty() {
                        handle.content_hash = Some(artifact.header.content_hash.clone());
                    }
                }
                state.artifact = Some(artifact);
                let label = if doc_id.is_empty() { file_name } else { doc_id };
                state.job.as_success(Some(&format!("Ingested {}", label)));
                tracing::debug!(doc_id = %label, "Ingest complete");
            }
            Err(message) => {
                tracing::warn!("{}", message);
                state.job.as_error(&message);
            }
        }
        &self.state.ingest
    }

    /// 전처리
    ///
    /// # Arguments
    /// * `options` - 이번 실행에만 적용할 설정
    pub fn preprocess(&mut self, options: Option<&PreprocessOptions>) -> &PreprocessState {
        let handle = self.handle();
        let state = &mut self.state.preprocess;
        state.artifact = handle;
        state.result = None;
        state.job.as_running(Some("Preprocessing artifact"));
        tracing::debug!("Preprocess started");

        let Some(artifact) = self.state.ingest.artifact.as_ref() else {
            let state = &mut self.state.preprocess;
            state.job.as_error("No artifact available for preprocessing.");
            tracing::warn!("Preprocess failed: no artifact");
            return &self.state.preprocess;
        };

        let result = self.preprocessor.preprocess(artifact, options);
        let state = &mut self.state.preprocess;
        state.stats_raw = result.stats_raw;
        state.stats_clean = result.stats_clean;
        state.stats_deep = result.stats_deep_clean;
        state.removal_log = result.removed_sections.clone();
        state.result = Some(result);
        state.job.as_success(Some("Preprocessing complete"));
        tracing::debug!(removed = state.removal_log.len(), "Preprocess complete");
        &self.state.preprocess
    }

    /// 청킹
    ///
    /// # Arguments
    /// * `run_id` - 실행 ID (없으면 UUID v4)
    /// * `excluded_sections` - 제외할 섹션 block_id
    pub fn chunkify(&mut self, run_id: Option<&str>, excluded_sections: &HashSet<String>) -> &ChunkState {
        let handle = self.handle();
        let run_id = run_id
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let state = &mut self.state.chunking;
        state.artifact = handle.clone();
        state.chunks.clear();
        state.file_path = None;
        state.job.as_running(Some("Chunking document"));
        tracing::debug!(run_id = %run_id, "Chunking started");

        let (Some(artifact), Some(preprocess)) = (
            self.state.ingest.artifact.as_ref(),
            self.state.preprocess.result.as_ref(),
        ) else {
            self.state
                .chunking
                .job
                .as_error("Artifact/preprocess result missing; cannot chunk.");
            tracing::warn!("Chunking failed: missing upstream input");
            return &self.state.chunking;
        };

        let project_id = handle.map(|h| h.project_id).unwrap_or_default();
        let chunks = self
            .chunker
            .chunkify(artifact, preprocess, &project_id, &run_id, excluded_sections);

        let state = &mut self.state.chunking;
        let message = format!("Generated {} chunks", chunks.len());
        state.chunks = chunks;
        state.run_id = Some(run_id);
        state.job.as_success(Some(&message));
        tracing::debug!(chunker = self.chunker.name(), chunks = state.chunk_count(), "Chunking complete");
        &self.state.chunking
    }

    /// 임베딩
    ///
    /// # Arguments
    /// * `provider` - 임베딩 프로바이더
    /// * `chunks` - 임베딩할 청크 (없으면 청킹 단계 결과)
    pub fn embed(&mut self, provider: &dyn EmbeddingProvider, chunks: Option<&[Chunk]>) -> &EmbeddingState {
        let handle = self.handle();
        let state = &mut self.state.embeddings;
        state.artifact = handle;
        state.results.clear();
        state.file_path = None;
        state
            .job
            .as_running(Some(&format!("Embedding chunks via {}", provider.provider_name())));
        tracing::debug!(provider = provider.provider_name(), "Embedding started");

        let chunk_list: &[Chunk] = chunks.unwrap_or(&self.state.chunking.chunks);
        if chunk_list.is_empty() {
            self.state.embeddings.job.as_error("No chunks to embed.");
            tracing::warn!("Embedding failed: no chunks");
            return &self.state.embeddings;
        }

        let jobs = build_embedding_jobs(chunk_list);
        let outcome = provider.embed(&jobs);

        let state = &mut self.state.embeddings;
        match outcome {
            Ok(results) => {
                let message = format!("Embedded {} chunks", results.len());
                state.results = results;
                state.provider = provider.provider_name().to_string();
                state.model = provider.model_name().to_string();
                state.job.as_success(Some(&message));
                tracing::debug!(vectors = state.vector_count(), "Embedding complete");
            }
            Err(e) => {
                let message = format!("Embedding failed: {:#}", e);
                tracing::warn!("{}", message);
                state.job.as_error(&message);
            }
        }
        &self.state.embeddings
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// 전처리 결과 저장 (`preprocess/<doc_id>.json`)
    pub fn persist_preprocess(&mut self, paths: &ProjectPaths) -> Result<PathBuf> {
        let (project_id, doc_id) = self.document_ids()?;
        let result = self
            .state
            .preprocess
            .result
            .as_ref()
            .ok_or_else(|| Error::MissingInput("No preprocess result to persist.".to_string()))?;

        let path = paths.preprocess_dir(&project_id).join(format!("{}.json", doc_id));
        result.save(&path)?;
        self.state.preprocess.file_path = Some(path.clone());
        Ok(path)
    }

    /// 청크 저장 (`chunks/<doc_id>.jsonl`)
    pub fn persist_chunks(&mut self, paths: &ProjectPaths) -> Result<PathBuf> {
        let (project_id, doc_id) = self.document_ids()?;
        let state = &self.state.chunking;
        if !state.job.is_success() || state.chunks.is_empty() {
            return Err(Error::MissingInput("No chunks to persist.".to_string()));
        }

        let path = write_chunk_file(&paths.chunks_dir(&project_id), &doc_id, &state.chunks)?;
        self.state.chunking.file_path = Some(path.clone());
        Ok(path)
    }

    /// 임베딩 저장 (`embeddings/<collection>/<doc_id>.jsonl`)
    pub fn persist_embeddings(&mut self, paths: &ProjectPaths) -> Result<PathBuf> {
        let (project_id, doc_id) = self.document_ids()?;
        let state = &self.state.embeddings;
        if !state.job.is_success() || state.results.is_empty() {
            return Err(Error::MissingInput("No embeddings to persist.".to_string()));
        }

        let path = paths
            .embeddings_dir(&project_id)
            .join(collection_name(&state.provider, &state.model))
            .join(format!("{}.jsonl", doc_id));
        write_embedding_file(&path, &state.results)?;
        self.state.embeddings.file_path = Some(path.clone());
        Ok(path)
    }

    fn document_ids(&self) -> Result<(String, String)> {
        let handle = self
            .state
            .ingest
            .handle
            .as_ref()
            .filter(|h| !h.doc_id.is_empty())
            .ok_or_else(|| Error::MissingInput("No ingested document.".to_string()))?;
        Ok((handle.project_id.clone(), handle.doc_id.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
