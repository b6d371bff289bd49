use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::entity::{LogEntry, LogLevel};
use crate::domain::repository::log_entry_repository::{page_offset, LogEntryRepository};

const SELECT_COLUMNS: &str = r#"id, level, message, context, method, url, user_agent, ip, user_id,
    status_code, response_time_ms, request_id, metadata, "timestamp", created_at"#;

/// LogEntryPostgresRepository は PostgreSQL 実装のログイベントリポジトリ。
pub struct LogEntryPostgresRepository {
    pool: PgPool,
}

impl LogEntryPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogEntryRepository for LogEntryPostgresRepository {
    async fn create(&self, entry: &LogEntry) -> anyhow::Result<LogEntry> {
        let sql = format!(
            r#"
            INSERT INTO log_entry
                (level, message, context, method, url, user_agent, ip, user_id,
                 status_code, response_time_ms, request_id, metadata, "timestamp")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, LogEntryRow>(&sql)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(&entry.context)
            .bind(&entry.method)
            .bind(&entry.url)
            .bind(&entry.user_agent)
            .bind(&entry.ip)
            .bind(entry.user_id)
            .bind(entry.status_code)
            .bind(entry.response_time_ms)
            .bind(&entry.request_id)
            .bind(entry.metadata.clone().map(serde_json::Value::Object))
            .bind(entry.timestamp)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<LogEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM log_entry WHERE id = $1");
        let row = sqlx::query_as::<_, LogEntryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn find_by_request_id(&self, request_id: &str) -> anyhow::Result<Vec<LogEntry>> {
        let sql = format!(
            r#"SELECT {SELECT_COLUMNS} FROM log_entry WHERE request_id = $1 ORDER BY "timestamp" ASC, id ASC"#
        );
        let rows = sqlx::query_as::<_, LogEntryRow>(&sql)
            .bind(request_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_by_user_id(&self, user_id: i64) -> anyhow::Result<Vec<LogEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM log_entry WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, LogEntryRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<LogEntry>> {
        let sql = format!(
            r#"SELECT {SELECT_COLUMNS} FROM log_entry
               WHERE "timestamp" BETWEEN $1 AND $2
               ORDER BY "timestamp" ASC, id ASC"#
        );
        let rows = sqlx::query_as::<_, LogEntryRow>(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_page(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<LogEntry>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM log_entry ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, LogEntryRow>(&sql)
            .bind(i64::from(page_size))
            .bind(i64::try_from(page_offset(page, page_size))?)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn remove(&self, id: Option<i64>) -> anyhow::Result<()> {
        let Some(id) = id else {
            return Ok(());
        };
        sqlx::query("DELETE FROM log_entry WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// LogEntryRow は DB 行からのマッピング用。
#[derive(sqlx::FromRow)]
struct LogEntryRow {
    id: i64,
    level: String,
    message: String,
    context: Option<String>,
    method: Option<String>,
    url: Option<String>,
    user_agent: Option<String>,
    ip: Option<String>,
    user_id: Option<i64>,
    status_code: Option<i32>,
    response_time_ms: Option<i64>,
    request_id: Option<String>,
    metadata: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogEntryRow> for LogEntry {
    type Error = anyhow::Error;

    fn try_from(row: LogEntryRow) -> anyhow::Result<Self> {
        let metadata = match row.metadata {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Object(map)) => Some(map),
            Some(other) => anyhow::bail!("log_entry {} has non-object metadata: {}", row.id, other),
        };

        Ok(LogEntry {
            id: Some(row.id),
            level: LogLevel::from_str_value(&row.level)?,
            message: row.message,
            context: row.context,
            method: row.method,
            url: row.url,
            user_agent: row.user_agent,
            ip: row.ip,
            user_id: row.user_id,
            status_code: row.status_code,
            response_time_ms: row.response_time_ms,
            request_id: row.request_id,
            metadata,
            timestamp: row.timestamp,
            created_at: Some(row.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row(level: &str, metadata: Option<serde_json::Value>) -> LogEntryRow {
        LogEntryRow {
            id: 3,
            level: level.to_string(),
            message: "GET /healthz - 200 (1ms)".to_string(),
            context: Some("API_REQUEST".to_string()),
            method: Some("GET".to_string()),
            url: Some("/healthz".to_string()),
            user_agent: None,
            ip: Some("unknown".to_string()),
            user_id: None,
            status_code: Some(200),
            response_time_ms: Some(1),
            request_id: Some("r1".to_string()),
            metadata,
            timestamp: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let entry: LogEntry = make_row("info", Some(serde_json::json!({"k": "v"})))
            .try_into()
            .unwrap();
        assert_eq!(entry.id, Some(3));
        assert_eq!(entry.level, LogLevel::Info);
        assert!(entry.created_at.is_some());
        assert_eq!(entry.metadata.unwrap()["k"], "v");
    }

    #[test]
    fn test_row_conversion_null_metadata() {
        let entry: LogEntry = make_row("warn", Some(serde_json::Value::Null))
            .try_into()
            .unwrap();
        assert!(entry.metadata.is_none());
    }

    #[test]
    fn test_row_conversion_rejects_unknown_level() {
        let result: anyhow::Result<LogEntry> = make_row("trace", None).try_into();
        assert!(result.is_err());
    }

    #[test]
    fn test_row_conversion_rejects_array_metadata() {
        let result: anyhow::Result<LogEntry> =
            make_row("info", Some(serde_json::json!([1, 2]))).try_into();
        assert!(result.is_err());
    }
}
