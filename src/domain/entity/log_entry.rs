use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// LogEntryError はログイベントの構築・変換エラー。
#[derive(Debug, thiserror::Error)]
pub enum LogEntryError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to encode log entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode log entry: {0}")]
    Decode(#[source] serde_json::Error),
}

/// LogLevel はログレベル。error / warn / info / debug の閉じた集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, LogEntryError> {
        match s {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(LogEntryError::InvalidLevel(other.to_string())),
        }
    }

    /// HTTP ステータスコードからログレベルを決定する。
    /// 5xx は error、4xx は warn、それ以外は info。
    pub fn for_status(status_code: u16) -> Self {
        if status_code >= 500 {
            Self::Error
        } else if status_code >= 400 {
            Self::Warn
        } else {
            Self::Info
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = LogEntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_value(s)
    }
}

/// LogEntry はログイベントエンティティ。ブローカー上の転送単位であり、保存単位でもある。
///
/// `id` と `created_at` はストアが採番する。呼び出し側が指定した値は `create` 時に無視される。
/// `timestamp` はイベント発生時刻で、未指定なら生成時刻になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    #[serde(default, alias = "responseTime", skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default = "default_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

impl LogEntry {
    /// 新しい LogEntry を作成する。timestamp は現在時刻。
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: None,
            level,
            message: message.into(),
            context: None,
            method: None,
            url: None,
            user_agent: None,
            ip: None,
            user_id: None,
            status_code: None,
            response_time_ms: None,
            request_id: None,
            metadata: None,
            timestamp: Utc::now(),
            created_at: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// HTTP リクエスト由来のフィールドを設定する。
    pub fn with_http(
        mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        status_code: i32,
        response_time_ms: i64,
    ) -> Self {
        self.method = Some(method.into());
        self.url = Some(url.into());
        self.status_code = Some(status_code);
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn with_client(mut self, user_agent: Option<String>, ip: Option<String>) -> Self {
        self.user_agent = user_agent;
        self.ip = ip;
        self
    }

    /// 永続化済み（ストア採番済み）かどうか。
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// ブローカーへ送る JSON ペイロードにシリアライズする。timestamp は RFC 3339 (UTC)。
    pub fn to_wire(&self) -> Result<Vec<u8>, LogEntryError> {
        serde_json::to_vec(self).map_err(LogEntryError::Encode)
    }

    /// ブローカーから受け取った JSON ペイロードを復元する。
    pub fn from_wire(payload: &[u8]) -> Result<Self, LogEntryError> {
        serde_json::from_slice(payload).map_err(LogEntryError::Decode)
    }
}
