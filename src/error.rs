//! Error 타입 - 세그멘테이션/검색 엔진 공통 에러
//!
//! 입력 누락, 미지원 설정, 백엔드 부재, 데이터 에러를 구분합니다.
//! 백엔드 어댑터 내부는 `anyhow` 로 작성되고 매니저 계층에서 `Error::Backend` 로 감쌉니다.

/// 크레이트 공통 Result
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 상위 단계 입력 없음 (아티팩트, 전처리 결과, 청크)
    #[error("{0}")]
    MissingInput(String),

    /// 지원하지 않는 설정 (알 수 없는 워크플로우 등)
    #[error("{0}")]
    Unsupported(String),

    #[error("No embedding files recorded in manifest.")]
    NoEmbeddingFiles,

    /// 랭킹/벡터 백엔드가 런타임에 없음 (데이터 에러가 아님)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Vector store not initialized for the selected provider/model ({collection}).")]
    NotInitialized { collection: String },

    #[error("No embeddings available to sync with vector store (doc_id={doc_id}).")]
    NothingToUpsert { doc_id: String },

    #[error("Selected embedding model has no vectors to load.")]
    NoVectorsLoaded,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// 사용자 설정 문제인지 여부 (설치/설정 안내 대상)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Unsupported(_) | Error::NoEmbeddingFiles | Error::BackendUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::NotInitialized {
            collection: "rag_chunks-openai-x".to_string(),
        };
        assert!(err.to_string().starts_with("Vector store not initialized"));
        assert_eq!(
            Error::NoEmbeddingFiles.to_string(),
            "No embedding files recorded in manifest."
        );
    }

    #[test]
    fn test_is_configuration() {
        assert!(Error::BackendUnavailable("bm25".into()).is_configuration());
        assert!(Error::NoEmbeddingFiles.is_configuration());
        assert!(!Error::NoVectorsLoaded.is_configuration());
        assert!(!Error::MissingInput("x".into()).is_configuration());
    }
}
