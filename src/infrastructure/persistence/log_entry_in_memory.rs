use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::entity::LogEntry;
use crate::domain::repository::log_entry_repository::{page_offset, LogEntryRepository};

/// InMemoryLogEntryRepository は DB 未設定時（dev モード・テスト）のリポジトリ実装。
pub struct InMemoryLogEntryRepository {
    inner: RwLock<Store>,
}

#[derive(Default)]
struct Store {
    next_id: i64,
    entries: Vec<LogEntry>,
}

impl InMemoryLogEntryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Store {
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

impl Default for InMemoryLogEntryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(entries: &mut [LogEntry]) {
    entries.sort_by_key(|e| Reverse((e.created_at, e.id)));
}

fn oldest_first(entries: &mut [LogEntry]) {
    entries.sort_by_key(|e| (e.timestamp, e.id));
}

#[async_trait]
impl LogEntryRepository for InMemoryLogEntryRepository {
    async fn create(&self, entry: &LogEntry) -> anyhow::Result<LogEntry> {
        let mut store = self.inner.write().await;
        let mut persisted = entry.clone();
        persisted.id = Some(store.next_id);
        persisted.created_at = Some(Utc::now());
        store.next_id += 1;
        store.entries.push(persisted.clone());
        Ok(persisted)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<LogEntry>> {
        let store = self.inner.read().await;
        Ok(store.entries.iter().find(|e| e.id == Some(id)).cloned())
    }

    async fn find_by_request_id(&self, request_id: &str) -> anyhow::Result<Vec<LogEntry>> {
        let store = self.inner.read().await;
        let mut found: Vec<LogEntry> = store
            .entries
            .iter()
            .filter(|e| e.request_id.as_deref() == Some(request_id))
            .cloned()
            .collect();
        oldest_first(&mut found);
        Ok(found)
    }

    async fn find_by_user_id(&self, user_id: i64) -> anyhow::Result<Vec<LogEntry>> {
        let store = self.inner.read().await;
        let mut found: Vec<LogEntry> = store
            .entries
            .iter()
            .filter(|e| e.user_id == Some(user_id))
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<LogEntry>> {
        let store = self.inner.read().await;
        let mut found: Vec<LogEntry> = store
            .entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        oldest_first(&mut found);
        Ok(found)
    }

    async fn find_page(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<LogEntry>> {
        let store = self.inner.read().await;
        let mut all = store.entries.clone();
        newest_first(&mut all);
        let offset = usize::try_from(page_offset(page, page_size))?;
        Ok(all
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect())
    }

    async fn remove(&self, id: Option<i64>) -> anyhow::Result<()> {
        let Some(id) = id else {
            return Ok(());
        };
        let mut store = self.inner.write().await;
        store.entries.retain(|e| e.id != Some(id));
        Ok(())
    }
}
