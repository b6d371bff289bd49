use std::sync::Arc;

use crate::domain::entity::LogEntry;
use crate::domain::repository::LogEntryRepository;

/// GetLogEntriesByRequestIdUseCase は 1 リクエストに紐づくログイベントを古い順で返す。
pub struct GetLogEntriesByRequestIdUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl GetLogEntriesByRequestIdUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, request_id: &str) -> anyhow::Result<Vec<LogEntry>> {
        self.repo.find_by_request_id(request_id).await
    }
}
