//! Chunk Store - 프로젝트별 청크 JSONL 저장소
//!
//! 프로젝트 디렉토리 구조:
//! ```text
//! <projects_root>/<project_id>/
//!   chunks/<doc_id>.jsonl        청크 레코드 (한 줄 = 한 청크)
//!   embeddings/                  임베딩 JSONL
//!   preprocess/                  전처리 중간 산출물
//!   vector_store/                벡터 인덱스 + vector_config.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::error::{Error, Result};

use super::chunker::Chunk;

/// 프로젝트 루트를 지정하는 환경 변수
pub const PROJECTS_ROOT_ENV: &str = "RAG_PROJECTS_ROOT";

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 프로젝트 루트 (<data_local_dir>/ragx/projects)
pub fn default_projects_root() -> PathBuf {
    if let Some(root) = std::env::var_os(PROJECTS_ROOT_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(root);
    }
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ragx")
        .join("projects")
}

/// 프로젝트 디렉토리 레이아웃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// 루트 지정
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `RAG_PROJECTS_ROOT` 또는 기본 데이터 디렉토리
    pub fn from_env() -> Self {
        Self::new(default_projects_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    pub fn chunks_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("chunks")
    }

    pub fn embeddings_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("embeddings")
    }

    pub fn preprocess_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("preprocess")
    }

    pub fn vector_store_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("vector_store")
    }
}

impl Default for ProjectPaths {
    fn default() -> Self {
        Self::from_env()
    }
}

// ============================================================================
// Types
// ============================================================================

/// 저장된 청크 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    #[serde(default)]
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// 로드된 청크 + ID 인덱스
#[derive(Debug, Default)]
struct LoadedChunks {
    records: Vec<ChunkRecord>,
    index: HashMap<String, usize>,
}

// ============================================================================
// ChunkStore
// ============================================================================

/// 청크 저장소 (지연 로딩 + 메모이즈)
///
/// 첫 조회 때 `chunks/*.jsonl` 을 한 번만 읽습니다. 파일이 바뀌면
/// 소유자가 새 인스턴스로 교체해야 합니다.
#[derive(Debug)]
pub struct ChunkStore {
    project_id: String,
    base_path: PathBuf,
    loaded: OnceLock<LoadedChunks>,
}

impl ChunkStore {
    /// 프로젝트 청크 저장소 생성 (아직 읽지 않음)
    pub fn new(paths: &ProjectPaths, project_id: &str) -> Self {
        Self::with_dir(project_id, paths.chunks_dir(project_id))
    }

    pub fn with_dir(project_id: &str, base_path: PathBuf) -> Self {
        Self {
            project_id: project_id.to_string(),
            base_path,
            loaded: OnceLock::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 전체 청크 (파일명 정렬 순서)
    pub fn all(&self) -> &[ChunkRecord] {
        &self.load().records
    }

    /// chunk_id 로 조회
    pub fn get(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        let loaded = self.load();
        loaded.index.get(chunk_id).map(|&i| &loaded.records[i])
    }

    /// chunk_id → 레코드 맵
    pub fn by_id(&self) -> HashMap<String, ChunkRecord> {
        let loaded = self.load();
        loaded
            .index
            .iter()
            .map(|(id, &i)| (id.clone(), loaded.records[i].clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.all().is_empty()
    }

    fn load(&self) -> &LoadedChunks {
        self.loaded.get_or_init(|| {
            let records = load_chunk_dir(&self.base_path);
            let index = records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.chunk_id.clone(), i))
                .collect();
            tracing::debug!(
                project_id = %self.project_id,
                chunks = records.len(),
                "Loaded chunk store"
            );
            LoadedChunks { records, index }
        })
    }
}

// ============================================================================
// JSONL I/O
// ============================================================================

/// 청크 디렉토리 로드 (없으면 빈 목록)
fn load_chunk_dir(dir: &Path) -> Vec<ChunkRecord> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    let mut records = Vec::new();
    for file in files {
        if let Err(e) = load_chunk_file(&file, &mut records) {
            tracing::warn!("Failed to read chunk file {:?}: {}", file, e);
        }
    }
    records
}

fn load_chunk_file(path: &Path, records: &mut Vec<ChunkRecord>) -> Result<()> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let reader = BufReader::new(fs::File::open(path)?);

    for (line_no, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let Ok(line) = std::str::from_utf8(&raw) else {
            tracing::debug!("Skipping non UTF-8 chunk line {} in {:?}", line_no + 1, path);
            continue;
        };
        let payload = line.trim();
        if payload.is_empty() {
            continue;
        }
        match parse_chunk_line(payload, &stem) {
            Some(record) => records.push(record),
            None => tracing::debug!("Skipping malformed chunk line {} in {:?}", line_no + 1, path),
        }
    }
    Ok(())
}

fn parse_chunk_line(payload: &str, stem: &str) -> Option<ChunkRecord> {
    let data: Value = serde_json::from_str(payload).ok()?;
    let data = data.as_object()?;

    let mut metadata = data
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    metadata
        .entry("doc_id")
        .or_insert_with(|| Value::String(stem.to_string()));

    let doc_id = match metadata.get("doc_id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => stem.to_string(),
    };

    Some(ChunkRecord {
        chunk_id: value_to_string(data.get("chunk_id")),
        doc_id,
        text: value_to_string(data.get("text")),
        metadata,
    })
}

fn value_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// 문서 청크 파일 쓰기 (`<dir>/<doc_id>.jsonl`, 기존 파일 교체)
///
/// # Returns
/// 작성된 파일 경로
pub fn write_chunk_file(dir: &Path, doc_id: &str, chunks: &[Chunk]) -> Result<PathBuf> {
    if doc_id.is_empty() {
        return Err(Error::InvalidInput("doc_id must not be empty".to_string()));
    }
    fs::create_dir_all(dir)?;

    let path = dir.join(format!("{}.jsonl", doc_id));
    let mut writer = BufWriter::new(fs::File::create(&path)?);
    for chunk in chunks {
        let record = chunk.to_record();
        let line = serde_json::json!({
            "chunk_id": record.chunk_id,
            "text": record.text,
            "metadata": record.metadata,
        });
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} chunks for {} to {:?}", chunks.len(), doc_id, path);
    Ok(path)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::ChunkMetadata;
    use tempfile::TempDir;

    fn create_test_paths() -> (TempDir, ProjectPaths) {
        let dir = TempDir::new().unwrap();
        let paths = ProjectPaths::new(dir.path());
        (dir, paths)
    }

    fn chunk(id: &str, doc_id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            doc_id: doc_id.to_string(),
            project_id: "proj".to_string(),
            run_id: "run".to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                doc_id: doc_id.to_string(),
                source_file: doc_id.to_string(),
                project_id: "proj".to_string(),
                run_id: "run".to_string(),
                section_block_id: "s1".to_string(),
                section_title: "Intro".to_string(),
                section_type: Some("body".to_string()),
                page_span: None,
                chunk_index_within_section: 1,
                start_word: 0,
                end_word: 2,
                token_estimate: 2,
                char_span: (0, text.len()),
            },
        }
    }

    #[test]
    fn test_project_layout() {
        let paths = ProjectPaths::new("/tmp/projects");
        assert_eq!(paths.chunks_dir("p1"), PathBuf::from("/tmp/projects/p1/chunks"));
        assert_eq!(
            paths.vector_store_dir("p1"),
            PathBuf::from("/tmp/projects/p1/vector_store")
        );
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let (_dir, paths) = create_test_paths();
        let store = ChunkStore::new(&paths, "nothing-here");
        assert!(store.is_empty());
        assert!(store.by_id().is_empty());
    }

    #[test]
    fn test_write_and_load() {
        let (_dir, paths) = create_test_paths();
        let chunks_dir = paths.chunks_dir("proj");

        write_chunk_file(&chunks_dir, "b-doc", &[chunk("b-1", "b-doc", "beta text")]).unwrap();
        write_chunk_file(
            &chunks_dir,
            "a-doc",
            &[chunk("a-1", "a-doc", "alpha one"), chunk("a-2", "a-doc", "alpha two")],
        )
        .unwrap();

        let store = ChunkStore::new(&paths, "proj");
        let ids: Vec<&str> = store.all().iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "a-2", "b-1"]);
        assert_eq!(store.get("b-1").unwrap().text, "beta text");
        assert_eq!(store.by_id().len(), 3);
        assert_eq!(store.get("a-2").unwrap().metadata["section_title"], "Intro");
    }

    #[test]
    fn test_rewrite_replaces_file() {
        let (_dir, paths) = create_test_paths();
        let chunks_dir = paths.chunks_dir("proj");

        write_chunk_file(&chunks_dir, "doc", &[chunk("c-1", "doc", "old"), chunk("c-2", "doc", "old")])
            .unwrap();
        write_chunk_file(&chunks_dir, "doc", &[chunk("c-1", "doc", "new")]).unwrap();

        let store = ChunkStore::new(&paths, "proj");
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].text, "new");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let (_dir, paths) = create_test_paths();
        let chunks_dir = paths.chunks_dir("proj");
        fs::create_dir_all(&chunks_dir).unwrap();
        fs::write(
            chunks_dir.join("paper.jsonl"),
            "{\"chunk_id\": \"p-1\", \"text\": \"ok\"}\n\nnot json\n[1,2]\n{\"chunk_id\": \"p-2\", \"text\": \"fine\", \"metadata\": {\"doc_id\": \"other\"}}\n",
        )
        .unwrap();
        fs::write(chunks_dir.join("notes.txt"), "ignored").unwrap();

        let store = ChunkStore::new(&paths, "proj");
        assert_eq!(store.len(), 2);
        // doc_id 기본값은 파일명
        assert_eq!(store.get("p-1").unwrap().doc_id, "paper");
        assert_eq!(store.get("p-1").unwrap().metadata["doc_id"], "paper");
        assert_eq!(store.get("p-2").unwrap().doc_id, "other");
    }

    #[test]
    fn test_invalid_utf8_line_skipped() {
        let (_dir, paths) = create_test_paths();
        let chunks_dir = paths.chunks_dir("proj");
        fs::create_dir_all(&chunks_dir).unwrap();

        let mut bytes = b"{\"chunk_id\": \"p-1\", \"text\": \"ok\"}\n".to_vec();
        bytes.extend_from_slice(b"{\"chunk_id\": \"p-x\", \"text\": \"\xff\xfe\"}\n");
        bytes.extend_from_slice(b"{\"chunk_id\": \"p-2\", \"text\": \"fine\"}\n");
        fs::write(chunks_dir.join("paper.jsonl"), bytes).unwrap();

        let store = ChunkStore::new(&paths, "proj");
        let ids: Vec<&str> = store.all().iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
    }

    #[test]
    fn test_store_is_memoized() {
        let (_dir, paths) = create_test_paths();
        let chunks_dir = paths.chunks_dir("proj");
        write_chunk_file(&chunks_dir, "doc", &[chunk("c-1", "doc", "first")]).unwrap();

        let store = ChunkStore::new(&paths, "proj");
        assert_eq!(store.len(), 1);

        write_chunk_file(&chunks_dir, "doc2", &[chunk("d-1", "doc2", "second")]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(ChunkStore::new(&paths, "proj").len(), 2);
    }

    #[test]
    fn test_write_rejects_empty_doc_id() {
        let (_dir, paths) = create_test_paths();
        let err = write_chunk_file(&paths.chunks_dir("proj"), "", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
