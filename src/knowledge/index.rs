//! Vector Index - 프로젝트별 벡터 저장소 관리자
//!
//! (provider, model) 프로필마다 컬렉션 하나를 두고, 문서 단위 교체(삭제 후 삽입)와
//! `vector_config.json` 사이드카 프로필을 관리합니다.
//!
//! 삭제와 삽입은 원자적이지 않으므로 같은 (project, provider, model) 에 대한
//! 재빌드는 호출자가 직렬화해야 합니다.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::hybrid::{section_label, HitSource, RetrievalHit};
use super::store::ChunkRecord;
use super::vector::{sanitize_metadata, VectorBackend, VectorRecord, DISTANCE_METRIC};

/// 사이드카 파일 이름
pub const CONFIG_NAME: &str = "vector_config.json";
/// 컬렉션 이름 접두사
pub const COLLECTION_PREFIX: &str = "rag_chunks";

static SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-zA-Z_-]+").expect("valid slug regex"));

// ============================================================================
// Types
// ============================================================================

/// 벡터 저장소 프로필
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorStoreConfig {
    pub project_id: String,
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub collection: String,
    pub distance: String,
    pub path: PathBuf,
    /// RFC 3339 UTC (초 단위)
    pub last_updated: Option<String>,
}

/// 사이드카 파일 형식 (로드 시 누락 필드 허용)
#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    provider: Option<String>,
    model: Option<String>,
    dimension: Option<usize>,
    collection: Option<String>,
    distance: Option<String>,
    last_updated: Option<String>,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 프로젝트 벡터 인덱스
pub struct VectorIndex {
    project_id: String,
    store_path: PathBuf,
    backend: Option<Arc<dyn VectorBackend>>,
}

impl VectorIndex {
    /// # Arguments
    /// * `project_id` - 프로젝트 ID
    /// * `store_path` - `<project>/vector_store`
    /// * `backend` - 벡터 백엔드 (없으면 조회/쓰기 시 `BackendUnavailable`)
    pub fn new(
        project_id: &str,
        store_path: PathBuf,
        backend: Option<Arc<dyn VectorBackend>>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            store_path,
            backend,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn config_path(&self) -> PathBuf {
        self.store_path.join(CONFIG_NAME)
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    fn require_backend(&self) -> Result<&Arc<dyn VectorBackend>> {
        self.backend.as_ref().ok_or_else(|| {
            Error::BackendUnavailable(format!(
                "no vector backend configured for project '{}'",
                self.project_id
            ))
        })
    }

    // ------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------

    /// 사이드카 프로필 로드
    ///
    /// 파일이 없거나 provider/model/dimension/collection 중 하나라도 빠지면 None.
    pub fn load_profile(&self) -> Option<VectorStoreConfig> {
        let content = fs::read_to_string(self.config_path()).ok()?;
        let file: ProfileFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!("Ignoring unreadable vector profile {:?}: {}", self.config_path(), e);
                return None;
            }
        };

        Some(VectorStoreConfig {
            project_id: self.project_id.clone(),
            provider: file.provider?,
            model: file.model?,
            dimension: file.dimension?,
            collection: file.collection?,
            distance: file.distance.unwrap_or_else(|| DISTANCE_METRIC.to_string()),
            path: self.store_path.clone(),
            last_updated: file.last_updated,
        })
    }

    /// 사이드카 프로필 저장 (덮어쓰기)
    pub fn save_profile(&self, config: &VectorStoreConfig) -> Result<()> {
        fs::create_dir_all(&self.store_path)?;
        let file = ProfileFile {
            provider: Some(config.provider.clone()),
            model: Some(config.model.clone()),
            dimension: Some(config.dimension),
            collection: Some(config.collection.clone()),
            distance: Some(config.distance.clone()),
            last_updated: config.last_updated.clone(),
        };
        fs::write(self.config_path(), serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// 문서 벡터 교체
    ///
    /// 청크 조회에 성공하고 벡터가 비어있지 않은 항목만 받아들입니다.
    /// 기존 문서 벡터는 항상 먼저 삭제되며, 받아들인 항목이 없으면 삭제 후
    /// `NothingToUpsert` 를 반환합니다 (프로필은 갱신하지 않음).
    ///
    /// # Arguments
    /// * `chunk_lookup` - chunk_id → 청크 레코드
    /// * `embeddings` - (chunk_id, vector) 목록
    /// * `extra_metadata` - 모든 벡터에 추가할 메타데이터 (키 충돌 시 우선)
    ///
    /// # Returns
    /// 새로 저장된 프로필
    pub fn upsert_document(
        &self,
        provider: &str,
        model: &str,
        doc_id: &str,
        chunk_lookup: &HashMap<String, ChunkRecord>,
        embeddings: &[(String, Vec<f32>)],
        extra_metadata: Option<&Map<String, Value>>,
    ) -> Result<VectorStoreConfig> {
        let backend = self.require_backend()?;
        let collection = collection_name(provider, model);
        let extra = extra_metadata.map(sanitize_metadata);

        let mut records: Vec<VectorRecord> = Vec::new();
        for (chunk_id, vector) in embeddings {
            let Some(chunk) = chunk_lookup.get(chunk_id) else {
                continue;
            };
            if vector.is_empty() {
                continue;
            }

            let mut metadata = sanitize_metadata(&chunk.metadata);
            metadata.insert("doc_id".into(), Value::String(doc_id.to_string()));
            metadata.insert("chunk_id".into(), Value::String(chunk.chunk_id.clone()));
            if let Some(extra) = &extra {
                metadata.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            records.push(VectorRecord {
                chunk_id: chunk.chunk_id.clone(),
                doc_id: doc_id.to_string(),
                text: chunk.text.clone(),
                metadata,
                vector: vector.clone(),
            });
        }

        let Some(first) = records.first() else {
            let removed = backend.delete_document(&collection, doc_id)?;
            tracing::debug!(doc_id, collection = %collection, removed, "No vectors accepted");
            return Err(Error::NothingToUpsert {
                doc_id: doc_id.to_string(),
            });
        };
        let dimension = first.vector.len();
        if records.iter().any(|r| r.vector.len() != dimension) {
            return Err(Error::InvalidInput(format!(
                "inconsistent vector dimensions for doc_id '{}'",
                doc_id
            )));
        }

        let removed = backend.delete_document(&collection, doc_id)?;
        let inserted = backend.upsert(&collection, &records)?;

        tracing::info!(
            doc_id,
            collection = %collection,
            removed,
            inserted,
            backend = backend.name(),
            "Upserted document vectors"
        );

        let config = VectorStoreConfig {
            project_id: self.project_id.clone(),
            provider: provider.to_string(),
            model: model.to_string(),
            dimension,
            collection,
            distance: DISTANCE_METRIC.to_string(),
            path: self.store_path.clone(),
            last_updated: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        };
        self.save_profile(&config)?;
        Ok(config)
    }

    /// 문서 벡터 삭제 (best-effort)
    ///
    /// 백엔드나 컬렉션이 없으면 아무것도 하지 않습니다.
    pub fn delete_document(&self, provider: &str, model: &str, doc_id: &str) -> usize {
        if doc_id.is_empty() || provider.is_empty() || model.is_empty() {
            return 0;
        }
        let Some(backend) = &self.backend else {
            return 0;
        };

        let collection = collection_name(provider, model);
        match backend.delete_document(&collection, doc_id) {
            Ok(removed) => {
                tracing::debug!(doc_id, collection = %collection, removed, "Deleted document vectors");
                removed
            }
            Err(e) => {
                tracing::warn!("Failed to delete vectors for {} in {}: {:#}", doc_id, collection, e);
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// 벡터 검색
    ///
    /// # Returns
    /// `score = 1 - distance`, (-score, chunk_id) 정렬, 최대 `top_k` 개
    pub fn query(
        &self,
        provider: &str,
        model: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let backend = self.require_backend()?;
        let collection = collection_name(provider, model);
        if !backend.has_collection(&collection)? {
            return Err(Error::NotInitialized { collection });
        }

        let matches = backend.query(&collection, embedding, top_k)?;
        let mut hits: Vec<RetrievalHit> = matches
            .into_iter()
            .filter(|m| !m.chunk_id.is_empty())
            .map(|m| RetrievalHit {
                section: section_label(&m.metadata),
                score: 1.0 - f64::from(m.distance),
                source: HitSource::Vector,
                chunk_id: m.chunk_id,
                doc_id: m.doc_id,
                text: m.text,
                metadata: m.metadata,
            })
            .collect();

        RetrievalHit::sort_ranked(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    /// 프로필 벡터 개수 (컬렉션이 없으면 0)
    pub fn count(&self, provider: &str, model: &str) -> Result<usize> {
        let backend = self.require_backend()?;
        Ok(backend.count(&collection_name(provider, model))?)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// (provider, model) 컬렉션 이름
///
/// `rag_chunks-` + `{provider}-{model}` 의 영숫자/`_`/`-` 외 문자열을 `-` 로 바꾸고 소문자화
pub fn collection_name(provider: &str, model: &str) -> String {
    let raw = format!("{}-{}", provider, model);
    let slug = SLUG_CHARS.replace_all(&raw, "-").to_lowercase();
    format!("{}-{}", COLLECTION_PREFIX, slug)
}

// ============================================================================
// Tests
// ============================================================================
