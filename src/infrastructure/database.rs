use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use super::config::ConfigError;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// StoreKind はログイベントの保存先の種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// リレーショナルストア（PostgreSQL）。
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,
    /// ドキュメントストア。このビルドでは未対応で、起動時に拒否する。
    #[serde(alias = "mongo")]
    Mongodb,
    /// プロセス内メモリ（dev モード・テスト）。
    Memory,
}

impl StoreKind {
    pub fn from_str_value(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mongodb" | "mongo" => Ok(Self::Mongodb),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

/// DatabaseSslConfig は DB 接続の TLS 設定。CA・鍵・証明書は PEM 文字列。
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSslConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
}

fn default_reject_unauthorized() -> bool {
    true
}

impl Default for DatabaseSslConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reject_unauthorized: default_reject_unauthorized(),
            ca: None,
            key: None,
            cert: None,
        }
    }
}

/// DatabaseConfig はログストアの接続設定。url があれば個別項目より優先する。
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, rename = "type")]
    pub kind: StoreKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// true の場合、起動時にマイグレーションを適用する。
    #[serde(default)]
    pub synchronize: bool,
    #[serde(default)]
    pub ssl: DatabaseSslConfig,
}

fn default_db_port() -> u16 {
    5433
}

fn default_max_connections() -> u32 {
    100
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            url: None,
            host: None,
            port: default_db_port(),
            name: None,
            user: None,
            password: None,
            max_connections: default_max_connections(),
            synchronize: false,
            ssl: DatabaseSslConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// url が無い場合は host / name / user / password が必須。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be >= 1".into(),
            ));
        }
        if self.kind != StoreKind::Postgres || self.url.is_some() {
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("host", &self.host),
            ("name", &self.name),
            ("user", &self.user),
            ("password", &self.password),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
        .map(|(k, _)| k)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(format!(
                "database.url or database.{} is required",
                missing.join(", database.")
            )))
        }
    }

    /// PostgreSQL の接続オプションを構築する。
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let mut options = if let Some(ref url) = self.url {
            url.parse::<PgConnectOptions>()
                .map_err(|e| ConfigError::Validation(format!("invalid database.url: {e}")))?
        } else {
            let mut options = PgConnectOptions::new().port(self.port);
            if let Some(ref host) = self.host {
                options = options.host(host);
            }
            if let Some(ref user) = self.user {
                options = options.username(user);
            }
            if let Some(ref password) = self.password {
                options = options.password(password);
            }
            if let Some(ref name) = self.name {
                options = options.database(name);
            }
            options
        };

        if self.ssl.enabled {
            options = options.ssl_mode(if self.ssl.reject_unauthorized {
                PgSslMode::VerifyFull
            } else {
                PgSslMode::Require
            });
            if let Some(ref ca) = self.ssl.ca {
                options = options.ssl_root_cert_from_pem(ca.as_bytes().to_vec());
            }
            if let Some(ref cert) = self.ssl.cert {
                options = options.ssl_client_cert_from_pem(cert.as_bytes());
            }
            if let Some(ref key) = self.ssl.key {
                options = options.ssl_client_key_from_pem(key.as_bytes());
            }
        }

        Ok(options)
    }
}

/// コネクションプールを作成し、synchronize が有効ならマイグレーションを適用する。
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(config.connect_options()?)
        .await?;
    tracing::info!(
        max_connections = config.max_connections,
        ssl = config.ssl.enabled,
        "database connection pool established"
    );

    if config.synchronize {
        MIGRATOR.run(&pool).await?;
        tracing::info!("database migrations applied");
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_config() -> DatabaseConfig {
        DatabaseConfig {
            host: Some("localhost".to_string()),
            name: Some("logging".to_string()),
            user: Some("app".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_database_config_defaults() {
        let config: DatabaseConfig = serde_yaml::from_str("url: postgres://localhost/logs").unwrap();
        assert_eq!(config.kind, StoreKind::Postgres);
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 100);
        assert!(!config.synchronize);
        assert!(!config.ssl.enabled);
        assert!(config.ssl.reject_unauthorized);
    }

    #[test]
    fn test_database_config_type() {
        let config: DatabaseConfig = serde_yaml::from_str("type: mongodb").unwrap();
        assert_eq!(config.kind, StoreKind::Mongodb);
        assert_eq!(
            StoreKind::from_str_value("PostgreSQL").unwrap(),
            StoreKind::Postgres
        );
        assert!(StoreKind::from_str_value("sqlite").is_err());
    }

    #[test]
    fn test_validate_requires_fields_without_url() {
        assert!(field_config().validate().is_ok());

        let config = DatabaseConfig {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("database.name"));
        assert!(err.contains("database.password"));
        assert!(!err.contains("database.host"));
    }

    #[test]
    fn test_validate_url_only() {
        let config = DatabaseConfig {
            url: Some("postgres://app:secret@db:5432/logging".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.connect_options().is_ok());
    }

    #[test]
    fn test_validate_max_connections() {
        let config = DatabaseConfig {
            max_connections: 0,
            ..field_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_options_from_fields() {
        let options = field_config().connect_options().unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("logging"));
        assert_eq!(options.get_username(), "app");
    }

    #[test]
    fn test_connect_options_ssl_modes() {
        let mut config = field_config();
        config.ssl.enabled = true;
        assert!(matches!(
            config.connect_options().unwrap().get_ssl_mode(),
            PgSslMode::VerifyFull
        ));

        config.ssl.reject_unauthorized = false;
        assert!(matches!(
            config.connect_options().unwrap().get_ssl_mode(),
            PgSslMode::Require
        ));
    }

    #[test]
    fn test_invalid_url() {
        let config = DatabaseConfig {
            url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(config.connect_options().is_err());
    }
}
