//! LanceDB Vector Backend - 영구 벡터 저장소
//!
//! 컬렉션 하나 = LanceDB 테이블 하나. 엔진의 공개 API 가 동기이므로
//! 전용 tokio 런타임을 소유하고 `block_on` 으로 호출합니다.
//! (다른 tokio 런타임 안에서 호출하면 안 됩니다)
//!
//! ref: https://lancedb.github.io/lancedb/

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;
use serde_json::{Map, Value};
use tokio::runtime::Runtime;

use super::vector::{VectorBackend, VectorMatch, VectorRecord};

// ============================================================================
// LanceBackend
// ============================================================================

/// LanceDB 벡터 백엔드
pub struct LanceBackend {
    runtime: Runtime,
    db: Connection,
}

impl LanceBackend {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - LanceDB 디렉토리 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).context("Failed to create LanceDB directory")?;

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?
            .to_string();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("Failed to build LanceDB runtime")?;

        let db = runtime
            .block_on(lancedb::connect(&path_str).execute())
            .context("Failed to connect to LanceDB")?;

        tracing::debug!("LanceDB opened at {:?}", path);
        Ok(Self { runtime, db })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("doc_id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(records: &[VectorRecord]) -> Result<RecordBatch> {
        let first = records
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty records"))?;
        let dimension = first.vector.len();
        if records.iter().any(|r| r.vector.len() != dimension) {
            anyhow::bail!("Inconsistent vector dimensions in batch");
        }
        let dimension = i32::try_from(dimension).context("Vector dimension too large")?;

        let chunk_ids: Vec<&str> = records.iter().map(|r| r.chunk_id.as_str()).collect();
        let doc_ids: Vec<&str> = records.iter().map(|r| r.doc_id.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let metadata: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to encode metadata")?;

        let flat: Vec<f32> = records.iter().flat_map(|r| r.vector.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create vector array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(doc_ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(vectors),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self, collection: &str) -> Result<Option<Table>> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        if !names.iter().any(|n| n == collection) {
            return Ok(None);
        }
        let table = self
            .db
            .open_table(collection)
            .execute()
            .await
            .context("Failed to open table")?;
        Ok(Some(table))
    }

    fn batch_to_matches(batch: &RecordBatch, matches: &mut Vec<VectorMatch>) -> Result<()> {
        let chunk_ids = string_column(batch, "chunk_id")?;
        let doc_ids = string_column(batch, "doc_id")?;
        let texts = string_column(batch, "text")?;
        let metadata = string_column(batch, "metadata")?;

        // _distance 컬럼 (LanceDB가 자동 추가)
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

        for i in 0..batch.num_rows() {
            let meta: Map<String, Value> =
                serde_json::from_str(metadata.value(i)).unwrap_or_default();
            matches.push(VectorMatch {
                chunk_id: chunk_ids.value(i).to_string(),
                doc_id: doc_ids.value(i).to_string(),
                text: texts.value(i).to_string(),
                metadata: meta,
                distance: distances.value(i),
            });
        }
        Ok(())
    }
}

impl VectorBackend for LanceBackend {
    fn name(&self) -> &'static str {
        "lancedb"
    }

    fn has_collection(&self, collection: &str) -> Result<bool> {
        self.block_on(async { Ok(self.open_table(collection).await?.is_some()) })
    }

    fn delete_document(&self, collection: &str, doc_id: &str) -> Result<usize> {
        self.block_on(async {
            let Some(table) = self.open_table(collection).await? else {
                return Ok(0);
            };

            let filter = format!("doc_id = '{}'", escape_literal(doc_id));
            let before = table
                .count_rows(Some(filter.clone()))
                .await
                .context("Failed to count rows for doc_id")?;
            if before == 0 {
                return Ok(0);
            }
            table
                .delete(&filter)
                .await
                .context("Failed to delete vectors")?;
            Ok(before)
        })
    }

    fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = Self::records_to_batch(records)?;
        let schema = batch.schema();

        self.block_on(async {
            match self.open_table(collection).await? {
                Some(table) => {
                    // 같은 chunk_id 는 덮어쓰기
                    let ids = records
                        .iter()
                        .map(|r| format!("'{}'", escape_literal(&r.chunk_id)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    table
                        .delete(&format!("chunk_id IN ({})", ids))
                        .await
                        .context("Failed to replace existing vectors")?;

                    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
                    table
                        .add(batches)
                        .execute()
                        .await
                        .context("Failed to add vectors to table")?;
                }
                None => {
                    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
                    self.db
                        .create_table(collection, batches)
                        .execute()
                        .await
                        .context("Failed to create table")?;
                }
            }
            Ok(records.len())
        })
    }

    fn query(&self, collection: &str, embedding: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
        self.block_on(async {
            let Some(table) = self.open_table(collection).await? else {
                return Ok(vec![]);
            };

            let stream = table
                .vector_search(embedding.to_vec())
                .context("Failed to create vector search")?
                .distance_type(DistanceType::Cosine)
                .limit(limit)
                .execute()
                .await
                .context("Failed to execute vector search")?;
            let batches: Vec<RecordBatch> = stream.try_collect().await?;

            let mut matches = Vec::new();
            for batch in &batches {
                Self::batch_to_matches(batch, &mut matches)?;
            }
            Ok(matches)
        })
    }

    fn count(&self, collection: &str) -> Result<usize> {
        self.block_on(async {
            match self.open_table(collection).await? {
                Some(table) => table.count_rows(None).await.context("Failed to count rows"),
                None => Ok(0),
            }
        })
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// SQL 문자열 리터럴 이스케이프 (`'` → `''`)
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

// ============================================================================
// Tests
// ============================================================================
