//! In-memory Vector Backend
//!
//! 테스트와 임시 세션용. 컬렉션별 `Vec` 을 `RwLock` 으로 감싸고
//! 전체 벡터에 대해 코사인 거리를 계산합니다.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use super::vector::{cosine_similarity, VectorBackend, VectorMatch, VectorRecord};

/// 메모리 벡터 백엔드
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn has_collection(&self, collection: &str) -> Result<bool> {
        let collections = self
            .collections
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(collections.contains_key(collection))
    }

    fn delete_document(&self, collection: &str, doc_id: &str) -> Result<usize> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| r.doc_id != doc_id);
        Ok(before - records.len())
    }

    fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let stored = collections.entry(collection.to_string()).or_default();

        for record in records {
            match stored.iter_mut().find(|r| r.chunk_id == record.chunk_id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(records.len())
    }

    fn query(&self, collection: &str, embedding: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let Some(records) = collections.get(collection) else {
            return Ok(vec![]);
        };

        let mut matches: Vec<VectorMatch> = records
            .iter()
            .map(|r| VectorMatch {
                chunk_id: r.chunk_id.clone(),
                doc_id: r.doc_id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: 1.0 - cosine_similarity(embedding, &r.vector),
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let collections = self
            .collections
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(collections.get(collection).map_or(0, Vec::len))
    }
}

// ============================================================================
// Tests
// ============================================================================
