use serde::Deserialize;

use crate::infrastructure::database::{DatabaseConfig, StoreKind};
use crate::infrastructure::rabbitmq::RabbitMqConfig;
use crate::infrastructure::telemetry::TelemetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("validation error: {0}")]
    Validation(String),
}

/// Config はアプリケーション全体の設定。
///
/// YAML ファイル → 環境変数 → validate の順に確定する。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rabbitmq: RabbitMqConfig,
    /// 未設定ならインメモリストアを使う。
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// AppConfig はアプリケーション設定。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_name() -> String {
    "k1s0-logging-server".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            environment: default_environment(),
        }
    }
}

/// ServerConfig は HTTP サーバー設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 一覧取得の limit の上限。
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    /// YAML を読み込む。ファイルが存在しなければデフォルト値から始める。
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// プロセス環境変数で上書きする。
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// lookup で取得した環境変数で上書きする。空文字列は未設定として扱う。
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.telemetry.level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.telemetry.format = v;
        }

        let mq = &mut self.rabbitmq;
        if let Some(v) = get("RABBITMQ_HOST") {
            mq.host = v;
        }
        if let Some(v) = get("RABBITMQ_PORT") {
            mq.port = parse_env("RABBITMQ_PORT", &v)?;
        }
        if let Some(v) = get("RABBITMQ_USERNAME") {
            mq.username = v;
        }
        if let Some(v) = get("RABBITMQ_PASSWORD") {
            mq.password = v;
        }
        if let Some(v) = get("RABBITMQ_VHOST") {
            mq.vhost = v;
        }
        if let Some(v) = get("RABBITMQ_LOGGING_QUEUE") {
            mq.queue = v;
        }
        if let Some(v) = get("RABBITMQ_LOGGING_EXCHANGE") {
            mq.exchange = v;
        }
        if let Some(v) = get("RABBITMQ_LOGGING_ROUTING_KEY") {
            mq.routing_key = v;
        }
        if let Some(v) = get("RABBITMQ_LOGGING_MAX_RETRIES") {
            mq.max_retries = Some(parse_env("RABBITMQ_LOGGING_MAX_RETRIES", &v)?);
        }

        const DB_KEYS: &[&str] = &[
            "LOGGING_DATABASE_URL",
            "LOGGING_DATABASE_TYPE",
            "LOGGING_DATABASE_HOST",
            "LOGGING_DATABASE_PORT",
            "LOGGING_DATABASE_USERNAME",
            "LOGGING_DATABASE_PASSWORD",
            "LOGGING_DATABASE_NAME",
            "LOGGING_DATABASE_MAX_CONNECTIONS",
            "LOGGING_DATABASE_SYNCHRONIZE",
            "LOGGING_DATABASE_SSL_ENABLED",
            "LOGGING_DATABASE_REJECT_UNAUTHORIZED",
            "LOGGING_DATABASE_CA",
            "LOGGING_DATABASE_KEY",
            "LOGGING_DATABASE_CERT",
        ];
        if self.database.is_none() && DB_KEYS.iter().any(|k| get(k).is_some()) {
            self.database = Some(DatabaseConfig::default());
        }
        let Some(db) = self.database.as_mut() else {
            return Ok(());
        };

        if let Some(v) = get("LOGGING_DATABASE_URL") {
            db.url = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_TYPE") {
            db.kind = StoreKind::from_str_value(&v)?;
        }
        if let Some(v) = get("LOGGING_DATABASE_HOST") {
            db.host = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_PORT") {
            db.port = parse_env("LOGGING_DATABASE_PORT", &v)?;
        }
        if let Some(v) = get("LOGGING_DATABASE_USERNAME") {
            db.user = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_PASSWORD") {
            db.password = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_NAME") {
            db.name = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_MAX_CONNECTIONS") {
            db.max_connections = parse_env("LOGGING_DATABASE_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = get("LOGGING_DATABASE_SYNCHRONIZE") {
            db.synchronize = parse_bool("LOGGING_DATABASE_SYNCHRONIZE", &v)?;
        }
        if let Some(v) = get("LOGGING_DATABASE_SSL_ENABLED") {
            db.ssl.enabled = parse_bool("LOGGING_DATABASE_SSL_ENABLED", &v)?;
        }
        if let Some(v) = get("LOGGING_DATABASE_REJECT_UNAUTHORIZED") {
            db.ssl.reject_unauthorized = parse_bool("LOGGING_DATABASE_REJECT_UNAUTHORIZED", &v)?;
        }
        if let Some(v) = get("LOGGING_DATABASE_CA") {
            db.ssl.ca = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_KEY") {
            db.ssl.key = Some(v);
        }
        if let Some(v) = get("LOGGING_DATABASE_CERT") {
            db.ssl.cert = Some(v);
        }

        Ok(())
    }

    /// 設定値のバリデーション。失敗は起動エラーになる。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be > 0".into()));
        }
        if self.server.max_page_size == 0 {
            return Err(ConfigError::Validation(
                "server.max_page_size must be > 0".into(),
            ));
        }
        let mq = &self.rabbitmq;
        if mq.host.is_empty() {
            return Err(ConfigError::Validation("rabbitmq.host is required".into()));
        }
        if mq.port == 0 {
            return Err(ConfigError::Validation("rabbitmq.port must be > 0".into()));
        }
        for (key, value) in [
            ("rabbitmq.exchange", &mq.exchange),
            ("rabbitmq.queue", &mq.queue),
            ("rabbitmq.routing_key", &mq.routing_key),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Validation(format!("{key} is required")));
            }
        }
        if let Some(ref db) = self.database {
            db.validate()?;
        }
        Ok(())
    }

    /// 使用するストアの種類。database 未設定ならメモリ。
    pub fn store_kind(&self) -> StoreKind {
        self.database
            .as_ref()
            .map_or(StoreKind::Memory, |db| db.kind)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
