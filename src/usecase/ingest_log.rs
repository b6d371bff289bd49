use std::sync::Arc;

use crate::domain::entity::{LogEntry, LogEntryError};
use crate::domain::repository::LogEntryRepository;

/// IngestError はブローカーから受け取ったメッセージの取り込みエラー。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] LogEntryError),

    #[error("failed to persist log event: {0:#}")]
    Persist(anyhow::Error),
}

impl IngestError {
    /// 再試行しても成功しない失敗か。
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// IngestLogUseCase はメッセージを復元して永続化する。ack の判断は呼び出し側が行う。
pub struct IngestLogUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl IngestLogUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, payload: &[u8]) -> Result<LogEntry, IngestError> {
        let mut entry = LogEntry::from_wire(payload)?;
        // 採番はストアの責務
        entry.id = None;
        entry.created_at = None;
        self.repo.create(&entry).await.map_err(IngestError::Persist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::LogLevel;
    use crate::domain::repository::log_entry_repository::MockLogEntryRepository;

    #[tokio::test]
    async fn test_ingest_persists_decoded_entry() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_create()
            .withf(|e| e.message == "boot" && e.id.is_none() && e.created_at.is_none())
            .times(1)
            .returning(|e| {
                let mut saved = e.clone();
                saved.id = Some(1);
                saved.created_at = Some(chrono::Utc::now());
                Ok(saved)
            });

        let uc = IngestLogUseCase::new(Arc::new(mock));
        let payload = br#"{"id":77,"level":"info","message":"boot","createdAt":"2020-01-01T00:00:00Z","timestamp":"2024-01-01T00:00:00Z"}"#;
        let saved = uc.execute(payload).await.unwrap();
        assert_eq!(saved.id, Some(1));
        assert_eq!(saved.level, LogLevel::Info);
    }

    #[tokio::test]
    async fn test_ingest_decode_error_skips_store() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_create().never();

        let uc = IngestLogUseCase::new(Arc::new(mock));
        let err = uc.execute(b"not json").await.unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_ingest_persist_error() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_create()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let uc = IngestLogUseCase::new(Arc::new(mock));
        let err = uc
            .execute(br#"{"level":"warn","message":"x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Persist(_)));
        assert!(!err.is_permanent());
        assert!(err.to_string().contains("connection reset"));
    }
}
