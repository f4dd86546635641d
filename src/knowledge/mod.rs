//! Knowledge 모듈 - 청킹, 청크 저장소, 벡터 인덱스, 검색
//!
//! - Chunker: 섹션 단위 슬라이딩 윈도우 분할
//! - ChunkStore: 프로젝트별 청크 JSONL 로더
//! - VectorIndex: (provider, model) 컬렉션 단위 벡터 저장 (LanceDB / 메모리)
//! - Search: 단어 빈도, BM25 (Okapi / SQLite FTS5), 하이브리드 통합
//! - RetrievalController: 캐시, 매니페스트 기반 재구축, 검색 진입점

pub mod chunker;
pub mod fts;
pub mod hybrid;
pub mod index;
pub mod lance;
pub mod memory;
pub mod retrieval;
pub mod search;
pub mod store;
pub mod vector;

// Re-exports
pub use chunker::{
    default_chunker, section_chunker, Chunk, ChunkMetadata, Chunker, ChunkerOptions,
    SectionChunker, SectionWindow,
};
pub use fts::Fts5Bm25;
pub use hybrid::{hybrid_fuse, rank_boost, HitSource, RetrievalHit, LEXICAL_BOOST};
pub use index::{collection_name, VectorIndex, VectorStoreConfig};
pub use lance::LanceBackend;
pub use memory::MemoryBackend;
pub use retrieval::{
    BackendOpener, ManifestEntry, ManifestReader, RetrievalConfig, RetrievalController,
    SearchRequest, SearchStrategy,
};
pub use search::{bm25_search, lexical_search, tokenize, Bm25Backend, Bm25Policy, OkapiBm25};
pub use store::{default_projects_root, write_chunk_file, ChunkRecord, ChunkStore, ProjectPaths};
pub use vector::{cosine_similarity, sanitize_metadata, VectorBackend, VectorMatch, VectorRecord};
