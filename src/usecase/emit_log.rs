use std::sync::Arc;

use crate::domain::entity::{LogEntry, LogLevel};
use crate::infrastructure::rabbitmq::LogEventPublisher;

/// HTTP リクエスト由来のイベントに付ける context。
pub const API_REQUEST_CONTEXT: &str = "API_REQUEST";

/// EmitLogInput はアプリケーションコードが発行するログイベント。
#[derive(Debug, Clone)]
pub struct EmitLogInput {
    pub level: LogLevel,
    pub message: String,
    pub context: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub request_id: Option<String>,
    pub user_id: Option<i64>,
}

impl EmitLogInput {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            context: None,
            metadata: None,
            request_id: None,
            user_id: None,
        }
    }
}

/// ApiRequestLog は 1 回の HTTP リクエスト/レスポンスの計測値。
#[derive(Debug, Clone)]
pub struct ApiRequestLog {
    pub method: String,
    pub url: String,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub user_id: Option<i64>,
    pub request_id: Option<String>,
}

impl ApiRequestLog {
    /// "{method} {url} - {status} ({ms}ms)" 形式のメッセージ。
    pub fn message(&self) -> String {
        format!(
            "{} {} - {} ({}ms)",
            self.method, self.url, self.status_code, self.response_time_ms
        )
    }
}

/// EmitLogUseCase はログイベントを組み立ててブローカーへ渡す。
///
/// 発行の成否は bool で返し、呼び出し側にエラーを伝播しない。
pub struct EmitLogUseCase {
    publisher: Arc<dyn LogEventPublisher>,
}

impl EmitLogUseCase {
    pub fn new(publisher: Arc<dyn LogEventPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn execute(&self, input: EmitLogInput) -> bool {
        let mut entry = LogEntry::new(input.level, input.message)
            .with_request_id(input.request_id.unwrap_or_else(generate_request_id));
        entry.context = input.context;
        entry.metadata = input.metadata;
        entry.user_id = input.user_id;
        self.publish(&entry).await
    }

    pub async fn log_error(
        &self,
        message: impl Into<String>,
        context: Option<&str>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        request_id: Option<&str>,
    ) -> bool {
        self.log(LogLevel::Error, message.into(), context, metadata, request_id)
            .await
    }

    pub async fn log_warn(
        &self,
        message: impl Into<String>,
        context: Option<&str>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        request_id: Option<&str>,
    ) -> bool {
        self.log(LogLevel::Warn, message.into(), context, metadata, request_id)
            .await
    }

    pub async fn log_info(
        &self,
        message: impl Into<String>,
        context: Option<&str>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        request_id: Option<&str>,
    ) -> bool {
        self.log(LogLevel::Info, message.into(), context, metadata, request_id)
            .await
    }

    pub async fn log_debug(
        &self,
        message: impl Into<String>,
        context: Option<&str>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        request_id: Option<&str>,
    ) -> bool {
        self.log(LogLevel::Debug, message.into(), context, metadata, request_id)
            .await
    }

    /// HTTP リクエストの計測値を発行する。レベルはステータスコードで決まる。
    pub async fn log_api_request(&self, request: ApiRequestLog) -> bool {
        let message = request.message();
        let entry = LogEntry::new(LogLevel::for_status(request.status_code), message)
            .with_context(API_REQUEST_CONTEXT)
            .with_http(
                request.method,
                request.url,
                i32::from(request.status_code),
                request.response_time_ms,
            )
            .with_client(request.user_agent, request.ip)
            .with_request_id(request.request_id.unwrap_or_else(generate_request_id));
        let entry = match request.user_id {
            Some(user_id) => entry.with_user_id(user_id),
            None => entry,
        };
        self.publish(&entry).await
    }

    pub fn is_healthy(&self) -> bool {
        self.publisher.is_healthy()
    }

    async fn log(
        &self,
        level: LogLevel,
        message: String,
        context: Option<&str>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        request_id: Option<&str>,
    ) -> bool {
        self.execute(EmitLogInput {
            level,
            message,
            context: context.map(str::to_string),
            metadata,
            request_id: request_id.map(str::to_string),
            user_id: None,
        })
        .await
    }

    async fn publish(&self, entry: &LogEntry) -> bool {
        let published = self.publisher.publish(entry).await;
        if !published {
            tracing::warn!(
                level = %entry.level,
                request_id = ?entry.request_id,
                "log event was not handed to the broker"
            );
        }
        published
    }
}

fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
