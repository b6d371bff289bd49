use std::sync::Arc;

use crate::domain::repository::LogEntryRepository;

/// DeleteLogEntryUseCase はログイベントの削除を担う。取り込み経路とは独立した管理操作。
pub struct DeleteLogEntryUseCase {
    repo: Arc<dyn LogEntryRepository>,
}

impl DeleteLogEntryUseCase {
    pub fn new(repo: Arc<dyn LogEntryRepository>) -> Self {
        Self { repo }
    }

    /// 存在しない id でも成功扱い。
    pub async fn execute(&self, id: i64) -> anyhow::Result<()> {
        self.repo.remove(Some(id)).await?;
        tracing::info!(id, "log entry removed");
        Ok(())
    }
}
