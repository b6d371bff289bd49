use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::entity::LogEntry;
use crate::domain::repository::LogEntryRepository;

/// GetLogEntriesByDateRangeUseCase は timestamp が期間内のログイベントを古い順で返す。
pub struct GetLogEntriesByDateRangeUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl GetLogEntriesByDateRangeUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    /// start > end はエラー。
    pub async fn execute(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<LogEntry>> {
        if start > end {
            anyhow::bail!("invalid date range: start {} is after end {}", start, end);
        }
        self.repo.find_by_date_range(start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::log_entry_repository::MockLogEntryRepository;
    use chrono::Duration;

    #[tokio::test]
    async fn test_by_date_range() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_find_by_date_range()
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let uc = GetLogEntriesByDateRangeUseCase::new(Arc::new(mock));
        let now = Utc::now();
        assert!(uc.execute(now - Duration::days(1), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_reversed_range_rejected() {
        let mut mock = MockLogEntryRepository::new();
        mock.expect_find_by_date_range().never();

        let uc = GetLogEntriesByDateRangeUseCase::new(Arc::new(mock));
        let now = Utc::now();
        let err = uc.execute(now, now - Duration::days(1)).await.unwrap_err();
        assert!(err.to_string().contains("invalid date range"));
    }
}
