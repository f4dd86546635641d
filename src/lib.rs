//! ragx-core - 문서 세그멘테이션 + 하이브리드 검색 코어
//!
//! 인제스트된 문서를 정리하고 청크로 나눈 뒤, 임베딩을 벡터 인덱스에 저장하고
//! 벡터 / 키워드 / BM25 / 하이브리드 검색을 제공하는 로컬 라이브러리입니다.

pub mod artifact;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod pipeline;
pub mod preprocess;

// Re-exports
pub use artifact::{load_artifact_jsonl, save_artifact_jsonl, DocumentHeader, IngestArtifact, Section};
pub use embedding::{EmbeddingJob, EmbeddingProvider, EmbeddingResult};
pub use error::{Error, Result};
pub use knowledge::{
    Chunk, ChunkRecord, ChunkStore, Chunker, ChunkerOptions, HitSource, ProjectPaths,
    RetrievalController, RetrievalHit, SearchRequest, SearchStrategy, SectionChunker, VectorIndex,
};
pub use pipeline::{JobStatus, PipelineRunner};
pub use preprocess::{DocumentPreprocessor, PreprocessOptions, PreprocessResult};
