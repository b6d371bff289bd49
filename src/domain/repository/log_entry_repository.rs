use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entity::LogEntry;

/// LogEntryRepository はログイベント永続化のためのリポジトリトレイト。
///
/// 実装はストアごとに 1 つ。起動時に設定から選択され、呼び出し側で分岐しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogEntryRepository: Send + Sync {
    /// ログイベントを保存し、採番済みの id と created_at を持つエンティティを返す。
    /// 渡された id / created_at は無視する。
    async fn create(&self, entry: &LogEntry) -> anyhow::Result<LogEntry>;

    /// id でログイベントを検索する。
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<LogEntry>>;

    /// リクエスト ID に一致するログイベントを古い順（timestamp, id）で返す。
    async fn find_by_request_id(&self, request_id: &str) -> anyhow::Result<Vec<LogEntry>>;

    /// ユーザー ID に一致するログイベントを新しい順（created_at, id）で返す。
    async fn find_by_user_id(&self, user_id: i64) -> anyhow::Result<Vec<LogEntry>>;

    /// timestamp が [start, end] に含まれるログイベントを古い順で返す。
    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<LogEntry>>;

    /// ページ単位でログイベントを新しい順に返す。page は 1 始まり。
    async fn find_page(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<LogEntry>>;

    /// ログイベントを削除する。id が未設定または存在しない場合は何もしない。
    async fn remove(&self, id: Option<i64>) -> anyhow::Result<()>;
}

/// 1 始まりのページ番号からオフセットを計算する。
pub fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.max(1) - 1) * u64::from(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(1, 10), 0);
        assert_eq!(page_offset(2, 10), 10);
        assert_eq!(page_offset(0, 10), 0);
        assert_eq!(page_offset(3, 25), 50);
    }
}
