//! SQLite FTS5 BM25 백엔드
//!
//! 호출마다 메모리 FTS5 테이블을 만들고 `bm25()` 로 점수를 매깁니다.
//! source: https://www.sqlite.org/fts5.html#the_bm25_function

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::search::Bm25Backend;

/// FTS5 기반 BM25 점수 계산기
///
/// SQLite 의 `bm25()` 는 낮을수록 관련도가 높으므로 부호를 뒤집어 반환합니다.
/// 매칭되지 않은 문서는 0 점입니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fts5Bm25;

impl Fts5Bm25 {
    pub fn new() -> Self {
        Self
    }
}

impl Bm25Backend for Fts5Bm25 {
    fn name(&self) -> &'static str {
        "fts5"
    }

    fn score(&self, corpus: &[Vec<String>], query: &[String]) -> Result<Vec<f64>> {
        let mut scores = vec![0.0; corpus.len()];
        let match_expr = fts5_match_expr(query);
        if corpus.is_empty() || match_expr.is_empty() {
            return Ok(scores);
        }

        let mut conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        conn.execute("CREATE VIRTUAL TABLE corpus_fts USING fts5(body)", [])
            .context("FTS5 not available")?;

        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare("INSERT INTO corpus_fts(rowid, body) VALUES (?1, ?2)")?;
            for (idx, tokens) in corpus.iter().enumerate() {
                insert.execute(params![idx as i64 + 1, tokens.join(" ")])?;
            }
        }
        tx.commit()?;

        let mut stmt = conn.prepare(
            "SELECT rowid, bm25(corpus_fts) FROM corpus_fts WHERE corpus_fts MATCH ?1",
        )?;
        let rows = stmt.query_map(params![match_expr], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        for row in rows {
            let (rowid, rank) = row?;
            if let Some(slot) = usize::try_from(rowid - 1).ok().and_then(|i| scores.get_mut(i)) {
                *slot = -rank;
            }
        }
        Ok(scores)
    }
}

/// 쿼리 토큰 → FTS5 OR 표현식
///
/// 영숫자 이외 문자는 제거하고 각 토큰을 큰따옴표로 감쌉니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn fts5_match_expr(query: &[String]) -> String {
    query
        .iter()
        .map(|term| term.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::search::{bm25_search, Bm25Policy};
    use crate::knowledge::store::ChunkRecord;
    use serde_json::Map;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_match_expr() {
        assert_eq!(fts5_match_expr(&tokens("hello world")), "\"hello\" OR \"world\"");
        assert_eq!(fts5_match_expr(&tokens("a:b \"")), "\"ab\"");
        assert_eq!(fts5_match_expr(&[]), "");
    }

    #[test]
    fn test_scores_follow_relevance() {
        let corpus = vec![
            tokens("rust memory safety"),
            tokens("python scripting"),
            tokens("rust rust ownership borrow"),
        ];
        let scores = Fts5Bm25::new().score(&corpus, &tokens("rust")).unwrap();

        assert_eq!(scores.len(), 3);
        assert_eq!(scores[1], 0.0);
        assert!(scores[0] > 0.0);
        assert!(scores[2] > 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let backend = Fts5Bm25::new();
        assert!(backend.score(&[], &tokens("x")).unwrap().is_empty());
        assert_eq!(backend.score(&[tokens("a b")], &[]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_bm25_search_with_fts5() {
        let chunks: Vec<ChunkRecord> = [("c1", "cats and dogs"), ("c2", "only dogs here"), ("c3", "birds")]
            .iter()
            .map(|(id, text)| ChunkRecord {
                chunk_id: id.to_string(),
                doc_id: "doc".to_string(),
                text: text.to_string(),
                metadata: Map::new(),
            })
            .collect();

        let backend = Fts5Bm25::new();
        let hits = bm25_search(&chunks, "cats", 3, Some(&backend), Bm25Policy::Require).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[1].score, 0.0);
    }
}
