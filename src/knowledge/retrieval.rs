//! Retrieval Controller - 청크/벡터 저장소 캐시, 재구축, 검색 진입점
//!
//! 프로젝트별로 `ChunkStore`, `VectorIndex`, 벡터 프로필을 캐시합니다.
//! 매니페스트에 기록된 임베딩 파일로 벡터 인덱스를 다시 채우고,
//! 네 가지 검색 전략(vector, lexical, bm25, hybrid)을 하나의 요청 타입으로 노출합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::embedding::{load_embedding_vectors, EmbeddingResult};
use crate::error::{Error, Result};

use super::hybrid::{hybrid_fuse, RetrievalHit};
use super::index::{VectorIndex, VectorStoreConfig};
use super::lance::LanceBackend;
use super::fts::Fts5Bm25;
use super::search::{bm25_search, lexical_search, Bm25Backend, Bm25Policy};
use super::store::{ChunkRecord, ChunkStore, ProjectPaths};
use super::vector::VectorBackend;

/// 매니페스트에서 임베딩 완료를 나타내는 상태
pub const EMBEDDINGS_STATUS: &str = "embeddings";

/// `vector_store/` 아래 LanceDB 데이터 디렉토리
pub const LANCE_DIR: &str = "lance";

/// 벡터 백엔드 생성기 (`vector_store/lance` 경로를 받음)
pub type BackendOpener = Arc<dyn Fn(&Path) -> anyhow::Result<Arc<dyn VectorBackend>> + Send + Sync>;

// ============================================================================
// Types
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// BM25 백엔드 부재 시 동작
    pub bm25_policy: Bm25Policy,
    /// 매니페스트에 provider 가 없을 때
    pub default_provider: String,
    /// 매니페스트에 model 이 없을 때
    pub default_model: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_policy: Bm25Policy::Require,
            default_provider: "openai".to_string(),
            default_model: "text-embedding-3-large".to_string(),
        }
    }
}

/// 매니페스트 항목 (읽기 전용)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestEntry {
    pub doc_id: String,
    pub status: String,
    pub file_path: Option<PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// 프로젝트 매니페스트 조회
pub trait ManifestReader: Send + Sync {
    fn entries(&self, project_id: &str) -> anyhow::Result<Vec<ManifestEntry>>;
}

/// 검색 전략
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    #[default]
    Vector,
    Lexical,
    Bm25,
    Hybrid,
}

/// 검색 요청
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    /// 쿼리 임베딩 (vector, hybrid 에 필요)
    pub embedding: Option<Vec<f32>>,
    pub strategy: SearchStrategy,
    pub top_k: usize,
    /// 없으면 저장된 프로필, 그다음 기본값
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, strategy: SearchStrategy, top_k: usize) -> Self {
        Self {
            query: query.into(),
            embedding: None,
            strategy,
            top_k,
            provider: None,
            model: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_profile(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }
}

// ============================================================================
// RetrievalController
// ============================================================================

/// 검색 컨트롤러
pub struct RetrievalController {
    paths: ProjectPaths,
    config: RetrievalConfig,
    opener: Option<BackendOpener>,
    bm25: Option<Arc<dyn Bm25Backend>>,
    manifest_reader: Option<Arc<dyn ManifestReader>>,
    chunk_stores: Mutex<HashMap<String, Arc<ChunkStore>>>,
    vector_indexes: Mutex<HashMap<String, Arc<VectorIndex>>>,
    profiles: Mutex<HashMap<String, VectorStoreConfig>>,
}

impl RetrievalController {
    /// LanceDB 벡터 백엔드 + SQLite FTS5 BM25 로 생성
    ///
    /// Okapi 점수가 필요하면 `with_bm25_backend` 로 `OkapiBm25` 를 넘깁니다.
    pub fn new(paths: ProjectPaths, config: RetrievalConfig) -> Self {
        let opener: BackendOpener = Arc::new(|path: &Path| {
            let backend: Arc<dyn VectorBackend> = Arc::new(LanceBackend::open(path)?);
            Ok(backend)
        });
        Self {
            paths,
            config,
            opener: Some(opener),
            bm25: Some(Arc::new(Fts5Bm25::new())),
            manifest_reader: None,
            chunk_stores: Mutex::new(HashMap::new()),
            vector_indexes: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// 벡터 백엔드 생성기 교체 (None 이면 벡터 기능 비활성)
    pub fn with_backend_opener(mut self, opener: Option<BackendOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// 모든 프로젝트가 같은 백엔드를 공유
    pub fn with_shared_backend(self, backend: Arc<dyn VectorBackend>) -> Self {
        let opener: BackendOpener = Arc::new(move |_: &Path| Ok(Arc::clone(&backend)));
        self.with_backend_opener(Some(opener))
    }

    pub fn with_bm25_backend(mut self, bm25: Option<Arc<dyn Bm25Backend>>) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn with_manifest_reader(mut self, reader: Arc<dyn ManifestReader>) -> Self {
        self.manifest_reader = Some(reader);
        self
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Caches
    // ------------------------------------------------------------------

    /// 프로젝트 청크 저장소 (캐시)
    pub fn chunk_store_for(&self, project_id: &str) -> Result<Arc<ChunkStore>> {
        require_project(project_id)?;
        let mut stores = self
            .chunk_stores
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let store = stores
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(ChunkStore::new(&self.paths, project_id)));
        Ok(Arc::clone(store))
    }

    pub fn clear_chunk_cache(&self, project_id: &str) -> Result<()> {
        self.chunk_stores
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .remove(project_id);
        Ok(())
    }

    /// 프로젝트 벡터 인덱스 (캐시)
    ///
    /// 백엔드 생성기가 없으면 백엔드 없는 인덱스를 반환하고,
    /// 조회/쓰기 시 `BackendUnavailable` 이 됩니다.
    pub fn vector_index_for(&self, project_id: &str) -> Result<Arc<VectorIndex>> {
        require_project(project_id)?;
        let mut indexes = self
            .vector_indexes
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        if let Some(index) = indexes.get(project_id) {
            return Ok(Arc::clone(index));
        }

        let store_path = self.paths.vector_store_dir(project_id);
        let backend = match &self.opener {
            Some(open) => Some(open(&store_path.join(LANCE_DIR))?),
            None => None,
        };
        let index = Arc::new(VectorIndex::new(project_id, store_path, backend));
        indexes.insert(project_id.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// 벡터 인덱스 + 프로필 캐시 제거
    pub fn clear_vector_cache(&self, project_id: &str) -> Result<()> {
        self.profiles
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .remove(project_id);
        self.vector_indexes
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .remove(project_id);
        Ok(())
    }

    /// 프로젝트의 모든 캐시 제거
    pub fn invalidate(&self, project_id: &str) -> Result<()> {
        self.clear_chunk_cache(project_id)?;
        self.clear_vector_cache(project_id)
    }

    fn cached_profile(&self, project_id: &str) -> Result<Option<VectorStoreConfig>> {
        let profiles = self
            .profiles
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(profiles.get(project_id).cloned())
    }

    fn remember_profile(&self, config: &VectorStoreConfig) -> Result<()> {
        self.profiles
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .insert(config.project_id.clone(), config.clone());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// 사이드카 프로필 로드 (있으면 캐시)
    pub fn load_vector_config(&self, project_id: &str) -> Result<Option<VectorStoreConfig>> {
        let config = self.vector_index_for(project_id)?.load_profile();
        if let Some(config) = &config {
            self.remember_profile(config)?;
        }
        Ok(config)
    }

    /// 요청한 (provider, model) 프로필 확보
    ///
    /// 캐시 → 사이드카 → 재구축 순으로 시도하고, 재구축이 실패하면 None.
    pub fn ensure_vector_profile(
        &self,
        project_id: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Option<VectorStoreConfig>> {
        let provider = provider.filter(|p| !p.is_empty());
        let model = model.filter(|m| !m.is_empty());
        let matches = |config: &VectorStoreConfig| {
            provider.map_or(true, |p| config.provider == p) && model.map_or(true, |m| config.model == m)
        };

        if let Some(cached) = self.cached_profile(project_id)? {
            if matches(&cached) {
                return Ok(Some(cached));
            }
        }

        let index = self.vector_index_for(project_id)?;
        if let Some(stored) = index.load_profile() {
            if matches(&stored) {
                self.remember_profile(&stored)?;
                return Ok(Some(stored));
            }
        }

        if let Err(e) = self.rebuild_vector_store(project_id, provider, model, None) {
            tracing::debug!(project_id, "Vector profile rebuild failed: {}", e);
            return Ok(None);
        }

        let stored = index.load_profile();
        if let Some(config) = &stored {
            self.remember_profile(config)?;
        }
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// 매니페스트의 임베딩 파일로 벡터 인덱스 재구축
    ///
    /// # Arguments
    /// * `provider`, `model` - 지정 시 해당 프로필 항목만
    /// * `entries` - 없으면 매니페스트 리더에서 읽음
    ///
    /// # Returns
    /// 마지막으로 저장된 프로필
    pub fn rebuild_vector_store(
        &self,
        project_id: &str,
        provider: Option<&str>,
        model: Option<&str>,
        entries: Option<&[ManifestEntry]>,
    ) -> Result<VectorStoreConfig> {
        let loaded;
        let entries = match entries {
            Some(entries) => entries,
            None => {
                loaded = self.load_manifest_entries(project_id)?;
                loaded.as_slice()
            }
        };

        let provider = provider.filter(|p| !p.is_empty());
        let model = model.filter(|m| !m.is_empty());
        let selected: Vec<&ManifestEntry> = entries
            .iter()
            .filter(|e| e.status == EMBEDDINGS_STATUS)
            .filter(|e| e.file_path.as_ref().is_some_and(|p| !p.as_os_str().is_empty()))
            .filter(|e| provider.map_or(true, |p| e.provider.as_deref().unwrap_or("") == p))
            .filter(|e| model.map_or(true, |m| e.model.as_deref().unwrap_or("") == m))
            .collect();
        if selected.is_empty() {
            return Err(Error::NoEmbeddingFiles);
        }

        let lookup = self.chunk_store_for(project_id)?.by_id();
        let index = self.vector_index_for(project_id)?;

        let mut last_config: Option<VectorStoreConfig> = None;
        for entry in selected {
            let Some(file_path) = entry.file_path.as_deref() else {
                continue;
            };
            let entry_provider = non_empty_or(entry.provider.as_deref(), &self.config.default_provider);
            let entry_model = non_empty_or(entry.model.as_deref(), &self.config.default_model);

            if !file_path.exists() {
                tracing::warn!(doc_id = %entry.doc_id, path = %file_path.display(), "Embedding file missing, skipping");
                continue;
            }
            let embeddings = load_embedding_vectors(file_path)?;
            if embeddings.is_empty() {
                tracing::warn!(doc_id = %entry.doc_id, path = %file_path.display(), "Embedding file empty, skipping");
                continue;
            }

            let extra = profile_metadata(entry_provider, entry_model);
            match index.upsert_document(
                entry_provider,
                entry_model,
                &entry.doc_id,
                &lookup,
                &embeddings,
                Some(&extra),
            ) {
                Ok(config) => last_config = Some(config),
                Err(Error::NothingToUpsert { doc_id }) => {
                    tracing::warn!(doc_id = %doc_id, "No embeddings matched stored chunks, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        let config = last_config.ok_or(Error::NoVectorsLoaded)?;
        self.remember_profile(&config)?;
        tracing::info!(
            project_id,
            provider = %config.provider,
            model = %config.model,
            "Vector store rebuilt"
        );
        Ok(config)
    }

    /// 방금 끝난 임베딩 결과를 바로 반영
    ///
    /// `chunk_lookup` 이 없으면 청크 저장소에서 찾습니다.
    pub fn upsert_embeddings(
        &self,
        project_id: &str,
        provider: &str,
        model: &str,
        doc_id: &str,
        results: &[EmbeddingResult],
        chunk_lookup: Option<&HashMap<String, ChunkRecord>>,
    ) -> Result<VectorStoreConfig> {
        let stored;
        let lookup = match chunk_lookup {
            Some(lookup) => lookup,
            None => {
                stored = self.chunk_store_for(project_id)?.by_id();
                &stored
            }
        };

        let embeddings: Vec<(String, Vec<f32>)> = results
            .iter()
            .map(|r| (r.chunk_id.clone(), r.vector.clone()))
            .collect();
        let extra = profile_metadata(provider, model);
        let config = self.vector_index_for(project_id)?.upsert_document(
            provider,
            model,
            doc_id,
            lookup,
            &embeddings,
            Some(&extra),
        )?;
        self.remember_profile(&config)?;
        Ok(config)
    }

    /// 문서 벡터 삭제 (best-effort)
    ///
    /// 백엔드를 열 수 없으면 아무것도 하지 않고 0 을 반환합니다.
    pub fn delete_document_vectors(
        &self,
        project_id: &str,
        provider: &str,
        model: &str,
        doc_id: &str,
    ) -> Result<usize> {
        require_project(project_id)?;
        match self.vector_index_for(project_id) {
            Ok(index) => Ok(index.delete_document(provider, model, doc_id)),
            Err(e) => {
                tracing::debug!(project_id, doc_id, "Vector backend unavailable, skipping delete: {}", e);
                Ok(0)
            }
        }
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// 검색 실행
    ///
    /// hybrid 는 벡터 top-k 와 단어 빈도 top-k 를 통합한 뒤 top-k 로 자릅니다.
    pub fn search(&self, project_id: &str, request: &SearchRequest) -> Result<Vec<RetrievalHit>> {
        let top_k = request.top_k;
        let hits = match request.strategy {
            SearchStrategy::Lexical => {
                let store = self.chunk_store_for(project_id)?;
                lexical_search(store.all(), &request.query, top_k)
            }
            SearchStrategy::Bm25 => {
                let store = self.chunk_store_for(project_id)?;
                bm25_search(
                    store.all(),
                    &request.query,
                    top_k,
                    self.bm25.as_deref(),
                    self.config.bm25_policy,
                )?
            }
            SearchStrategy::Vector => self.vector_search(project_id, request)?,
            SearchStrategy::Hybrid => {
                let vector_hits = self.vector_search(project_id, request)?;
                let store = self.chunk_store_for(project_id)?;
                let lexical_hits = lexical_search(store.all(), &request.query, top_k);
                let mut fused = hybrid_fuse(&vector_hits, &lexical_hits);
                fused.truncate(top_k);
                fused
            }
        };

        tracing::debug!(
            project_id,
            strategy = ?request.strategy,
            hits = hits.len(),
            "Search complete"
        );
        Ok(hits)
    }

    fn vector_search(&self, project_id: &str, request: &SearchRequest) -> Result<Vec<RetrievalHit>> {
        let embedding = request.embedding.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!("{:?} search requires a query embedding", request.strategy))
        })?;

        let (provider, model) = self.resolve_profile(project_id, request)?;
        self.vector_index_for(project_id)?
            .query(&provider, &model, embedding, request.top_k)
    }

    /// 요청 → 캐시/사이드카 프로필 → 기본값 순으로 (provider, model) 결정
    fn resolve_profile(&self, project_id: &str, request: &SearchRequest) -> Result<(String, String)> {
        let requested_provider = request.provider.as_deref().filter(|p| !p.is_empty());
        let requested_model = request.model.as_deref().filter(|m| !m.is_empty());
        if let (Some(provider), Some(model)) = (requested_provider, requested_model) {
            return Ok((provider.to_string(), model.to_string()));
        }

        let profile = match self.cached_profile(project_id)? {
            Some(cached) => Some(cached),
            None => self.load_vector_config(project_id)?,
        };
        let provider = requested_provider
            .map(str::to_string)
            .or_else(|| profile.as_ref().map(|p| p.provider.clone()))
            .unwrap_or_else(|| self.config.default_provider.clone());
        let model = requested_model
            .map(str::to_string)
            .or_else(|| profile.as_ref().map(|p| p.model.clone()))
            .unwrap_or_else(|| self.config.default_model.clone());
        Ok((provider, model))
    }

    fn load_manifest_entries(&self, project_id: &str) -> Result<Vec<ManifestEntry>> {
        let reader = self.manifest_reader.as_ref().ok_or_else(|| {
            Error::Unsupported("Manifest reader unavailable; cannot rebuild vector store.".to_string())
        })?;
        Ok(reader.entries(project_id)?)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn require_project(project_id: &str) -> Result<()> {
    if project_id.is_empty() {
        return Err(Error::InvalidInput("missing project id".to_string()));
    }
    Ok(())
}

fn non_empty_or<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(fallback)
}

fn profile_metadata(provider: &str, model: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("provider".into(), Value::String(provider.to_string()));
    extra.insert("model".into(), Value::String(model.to_string()));
    extra
}

// ============================================================================
// Tests
// ============================================================================
