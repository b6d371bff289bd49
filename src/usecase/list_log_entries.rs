use std::sync::Arc;

use crate::domain::entity::LogEntry;
use crate::domain::repository::LogEntryRepository;

/// ListLogEntriesUseCase はログイベントの一覧取得（新しい順、ページ単位）を担う。
pub struct ListLogEntriesUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl ListLogEntriesUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, page: u32, limit: u32) -> anyhow::Result<Vec<LogEntry>> {
        self.repo.find_page(page.max(1), limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::LogLevel;
    use crate::domain::repository::log_entry_repository::MockLogEntryRepository;

    #[tokio::test]
    async fn test_list_passes_paging() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_find_page()
            .withf(|page, limit| *page == 2 && *limit == 10)
            .returning(|_, _| Ok(vec![LogEntry::new(LogLevel::Info, "x")]));

        let uc = ListLogEntriesUseCase::new(Arc::new(mock));
        assert_eq!(uc.execute(2, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_clamps_page_zero() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_find_page()
            .withf(|page, _| *page == 1)
            .returning(|_, _| Ok(vec![]));

        let uc = ListLogEntriesUseCase::new(Arc::new(mock));
        assert!(uc.execute(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_propagates_error() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_find_page()
            .returning(|_, _| Err(anyhow::anyhow!("db error")));

        let uc = ListLogEntriesUseCase::new(Arc::new(mock));
        assert!(uc.execute(1, 10).await.is_err());
    }
}
