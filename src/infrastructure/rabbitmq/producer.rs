use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use super::topology::BrokerTopology;
use super::{MessagingError, RabbitMqConfig};
use crate::domain::entity::LogEntry;
use crate::infrastructure::metrics::Metrics;

/// AMQP の persistent 配送モード。
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// LogEventPublisher はログイベントをブローカーへ渡すトレイト。
///
/// publish はクライアントへの引き渡しまでしか待たない。永続化や publisher confirm は待たない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogEventPublisher: Send + Sync {
    /// ログイベントを発行する。接続が無い・失敗した場合は false を返し、エラーは返さない。
    async fn publish(&self, entry: &LogEntry) -> bool;

    /// 接続とチャネルの両方が開いているか。
    fn is_healthy(&self) -> bool;
}

/// ログメッセージの AMQP プロパティを組み立てる。timestamp は発行時刻（unix 秒）。
pub(crate) fn message_properties(headers: Option<FieldTable>) -> BasicProperties {
    let published_at = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let props = BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_content_type(ShortString::from("application/json"))
        .with_timestamp(published_at);
    match headers {
        Some(h) => props.with_headers(h),
        None => props,
    }
}

/// RabbitMqLogProducer は lapin を使った RabbitMQ プロデューサー。
pub struct RabbitMqLogProducer {
    connection: Connection,
    channel: Channel,
    topology: BrokerTopology,
    metrics: Option<Arc<Metrics>>,
}

impl RabbitMqLogProducer {
    /// ブローカーへ接続し、チャネルを開いてトポロジを宣言する。失敗は起動エラーとして扱う。
    pub async fn connect(config: &RabbitMqConfig) -> Result<Self, MessagingError> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(MessagingError::Connection)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(MessagingError::Connection)?;

        let topology = BrokerTopology::from_config(config);
        topology.declare(&channel).await?;

        tracing::info!(
            uri = %config.redacted_uri(),
            exchange = %topology.exchange,
            routing_key = %topology.routing_key,
            "rabbitmq log producer connected"
        );

        Ok(Self {
            connection,
            channel,
            topology,
            metrics: None,
        })
    }

    /// メトリクスを設定する。
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn try_publish(&self, entry: &LogEntry) -> Result<(), MessagingError> {
        if !self.is_healthy() {
            return Err(MessagingError::NotConnected);
        }
        let payload = entry.to_wire()?;
        // confirm は待たない
        let _confirm = self
            .channel
            .basic_publish(
                &self.topology.exchange,
                &self.topology.routing_key,
                BasicPublishOptions::default(),
                &payload,
                message_properties(None),
            )
            .await
            .map_err(MessagingError::Publish)?;
        Ok(())
    }

    /// チャネル、接続の順に閉じる。失敗はログに残すだけで返さない。
    pub async fn shutdown(&self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::warn!(error = %e, "failed to close producer channel");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::warn!(error = %e, "failed to close producer connection");
        }
        tracing::info!("rabbitmq log producer closed");
    }
}

#[async_trait]
impl LogEventPublisher for RabbitMqLogProducer {
    async fn publish(&self, entry: &LogEntry) -> bool {
        let result = self.try_publish(entry).await;
        if let Some(ref m) = self.metrics {
            m.record_log_event_published(result.is_ok());
        }
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    exchange = %self.topology.exchange,
                    request_id = ?entry.request_id,
                    "failed to publish log event"
                );
                false
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::LogLevel;

    #[test]
    fn test_message_properties() {
        let props = message_properties(None);
        assert_eq!(*props.delivery_mode(), Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(
            props.content_type().as_ref().map(|s| s.as_str()),
            Some("application/json")
        );
        assert!(props.timestamp().unwrap_or_default() > 0);
        assert!(props.headers().is_none());
    }

    #[test]
    fn test_message_properties_with_headers() {
        let props = message_properties(Some(FieldTable::default()));
        assert!(props.headers().is_some());
    }

    #[tokio::test]
    async fn test_mock_publisher() {
        let mut mock = MockLogEventPublisher::new();
        mock.expect_publish().returning(|_| true);
        mock.expect_is_healthy().returning(|| true);

        let entry = LogEntry::new(LogLevel::Info, "boot");
        assert!(mock.publish(&entry).await);
        assert!(mock.is_healthy());
    }

    #[tokio::test]
    async fn test_mock_publisher_unavailable() {
        let mut mock = MockLogEventPublisher::new();
        mock.expect_publish().returning(|_| false);
        mock.expect_is_healthy().returning(|| false);

        let entry = LogEntry::new(LogLevel::Error, "broker down");
        assert!(!mock.publish(&entry).await);
        assert!(!mock.is_healthy());
    }
}
