//! Pipeline 모듈 - 단계별 실행과 상태 추적
//!
//! ingest → preprocess → chunk → embed 를 동기적으로 실행하고
//! 단계마다 `JobState` 를 남깁니다.

pub mod runner;
pub mod state;

pub use runner::{sha256_file, ArtifactFileIngestor, Ingestor, PipelineRunner, ARTIFACT_JSONL_WORKFLOW};
pub use state::{
    ArtifactHandle, ChunkState, EmbeddingState, IngestState, JobState, JobStatus, PipelineState,
    PreprocessState,
};
