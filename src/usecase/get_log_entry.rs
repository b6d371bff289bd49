use std::sync::Arc;

use crate::domain::entity::LogEntry;
use crate::domain::repository::LogEntryRepository;

/// GetLogEntryUseCase は id によるログイベントの取得を担う。
pub struct GetLogEntryUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl GetLogEntryUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, id: i64) -> anyhow::Result<Option<LogEntry>> {
        self.repo.find_by_id(id).await
    }
}
