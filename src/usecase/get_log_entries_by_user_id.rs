use std::sync::Arc;

use crate::domain::entity::LogEntry;
use crate::domain::repository::LogEntryRepository;

/// GetLogEntriesByUserIdUseCase はユーザーのログイベントを新しい順で返す。
pub struct GetLogEntriesByUserIdUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl GetLogEntriesByUserIdUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, user_id: i64) -> anyhow::Result<Vec<LogEntry>> {
        self.repo.find_by_user_id(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::log_entry_repository::MockLogEntryRepository;

    #[tokio::test]
    async fn test_by_user_id_empty() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_find_by_user_id()
            .withf(|id| *id == 42)
            .returning(|_| Ok(vec![]));

        let uc = GetLogEntriesByUserIdUseCase::new(Arc::new(mock));
        assert!(uc.execute(42).await.unwrap().is_empty());
    }
}
