use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};

use super::producer::message_properties;
use super::retry::{dead_letter_headers, retry_count, retry_headers, DeliveryProcessor, Disposition};
use super::topology::BrokerTopology;
use super::{BrokerHealth, MessagingError, RabbitMqConfig};
use crate::infrastructure::metrics::Metrics;

/// 同時に未 ack で受け取るメッセージ数。1 件ずつ直列に処理する。
pub const PREFETCH_COUNT: u16 = 1;

/// RabbitMqLogConsumer はロギング用キューを購読し、ログイベントを永続化する。
///
/// プロデューサーとは別の接続を持つ。ack は永続化の成功後にだけ行う。
pub struct RabbitMqLogConsumer {
    connection: Connection,
    channel: Channel,
    topology: BrokerTopology,
    processor: Arc<DeliveryProcessor>,
    metrics: Option<Arc<Metrics>>,
}

impl RabbitMqLogConsumer {
    /// ブローカーへ接続し、トポロジ宣言と prefetch 設定を行う。
    pub async fn connect(
        config: &RabbitMqConfig,
        processor: Arc<DeliveryProcessor>,
    ) -> Result<Self, MessagingError> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(MessagingError::Connection)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(MessagingError::Connection)?;

        let topology = BrokerTopology::from_config(config);
        topology.declare(&channel).await?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(MessagingError::Connection)?;

        tracing::info!(
            uri = %config.redacted_uri(),
            queue = %topology.queue,
            prefetch = PREFETCH_COUNT,
            retry_policy = ?processor.policy(),
            "rabbitmq log consumer connected"
        );

        Ok(Self {
            connection,
            channel,
            topology,
            processor,
            metrics: None,
        })
    }

    /// メトリクスを設定する。
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// キューの購読を開始し、ストリームが終わるまで配送を処理し続ける。
    pub async fn run(&self) -> Result<(), MessagingError> {
        let consumer_tag = format!("k1s0-logging-server-{}", uuid::Uuid::new_v4());
        let mut deliveries = self
            .channel
            .basic_consume(
                &self.topology.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(MessagingError::Consume)?;

        tracing::info!(
            queue = %self.topology.queue,
            consumer_tag = %consumer_tag,
            "log consumer subscribed"
        );

        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(error = %e, "log consumer delivery stream failed");
                    return Err(MessagingError::Consume(e));
                }
            };

            let attempts = retry_count(delivery.properties.headers().as_ref());
            let disposition = self.processor.process(&delivery.data, attempts).await;
            if let Some(ref m) = self.metrics {
                m.record_log_event_consumed(disposition.outcome());
            }
            let settlement = ChannelSettlement {
                channel: &self.channel,
                routing_key: &self.topology.routing_key,
                delivery: &delivery,
            };
            if let Err(e) = settle(&settlement, &self.topology, attempts, &disposition).await {
                // 応答できなかった配送はチャネル切断時にブローカーが再配送する
                tracing::error!(
                    error = %e,
                    delivery_tag = delivery.delivery_tag,
                    "failed to settle delivery"
                );
            }
        }

        tracing::info!(queue = %self.topology.queue, "log consumer stream ended");
        Ok(())
    }

    /// チャネル、接続の順に閉じる。失敗はログに残すだけで返さない。
    pub async fn shutdown(&self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::warn!(error = %e, "failed to close consumer channel");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::warn!(error = %e, "failed to close consumer connection");
        }
        tracing::info!("rabbitmq log consumer closed");
    }
}

impl BrokerHealth for RabbitMqLogConsumer {
    /// 接続とチャネルの両方が開いているか。
    fn is_healthy(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// Settlement は受け取った 1 件の配送に対するブローカー操作。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait Settlement: Send + Sync {
    async fn ack(&self) -> Result<(), MessagingError>;

    async fn requeue(&self) -> Result<(), MessagingError>;

    /// 同じペイロードを指定ヘッダー付きで exchange へ発行し、confirm を待つ。
    async fn republish(&self, exchange: &str, headers: FieldTable) -> Result<(), MessagingError>;
}

struct ChannelSettlement<'a> {
    channel: &'a Channel,
    routing_key: &'a str,
    delivery: &'a Delivery,
}

#[async_trait]
impl Settlement for ChannelSettlement<'_> {
    async fn ack(&self) -> Result<(), MessagingError> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(MessagingError::Consume)
    }

    async fn requeue(&self) -> Result<(), MessagingError> {
        self.delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map_err(MessagingError::Consume)
    }

    async fn republish(&self, exchange: &str, headers: FieldTable) -> Result<(), MessagingError> {
        self.channel
            .basic_publish(
                exchange,
                self.routing_key,
                BasicPublishOptions::default(),
                &self.delivery.data,
                message_properties(Some(headers)),
            )
            .await
            .map_err(MessagingError::Publish)?
            .await
            .map_err(MessagingError::Publish)?;
        Ok(())
    }
}

/// 処理結果に従って配送を確定させる。
pub(crate) async fn settle(
    settlement: &dyn Settlement,
    topology: &BrokerTopology,
    attempts: u32,
    disposition: &Disposition,
) -> Result<(), MessagingError> {
    match disposition {
        Disposition::Ack => settlement.ack().await,
        Disposition::Requeue => settlement.requeue().await,
        Disposition::Retry { attempt } => {
            let republished = settlement
                .republish(&topology.exchange, retry_headers(*attempt))
                .await;
            ack_if_republished(settlement, republished).await
        }
        Disposition::DeadLetter { reason } => {
            let Some((dlx, _)) = &topology.dead_letter else {
                return settlement.requeue().await;
            };
            let republished = settlement
                .republish(dlx, dead_letter_headers(attempts, reason))
                .await;
            if republished.is_ok() {
                tracing::warn!(
                    dead_letter_exchange = %dlx,
                    reason = %reason,
                    "log event moved to dead-letter queue"
                );
            }
            ack_if_republished(settlement, republished).await
        }
    }
}

/// 再発行できた場合だけ元メッセージを ack し、できなければ requeue する。
async fn ack_if_republished(
    settlement: &dyn Settlement,
    republished: Result<(), MessagingError>,
) -> Result<(), MessagingError> {
    match republished {
        Ok(()) => settlement.ack().await,
        Err(e) => {
            tracing::warn!(error = %e, "republish failed, requeueing original delivery");
            settlement.requeue().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::rabbitmq::retry::DEATH_REASON_HEADER;
    use lapin::types::AMQPValue;

    fn bounded_topology() -> BrokerTopology {
        BrokerTopology::from_config(&RabbitMqConfig {
            max_retries: Some(3),
            ..Default::default()
        })
    }

    fn death_reason(headers: &FieldTable) -> Option<String> {
        headers
            .inner()
            .iter()
            .find(|(k, _)| k.as_str() == DEATH_REASON_HEADER)
            .and_then(|(_, v)| match v {
                AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
                _ => None,
            })
    }

    #[tokio::test]
    async fn test_settle_ack_and_requeue() {
        let topology = bounded_topology();

        let mut acked = MockSettlement::new();
        acked.expect_ack().times(1).returning(|| Ok(()));
        acked.expect_requeue().never();
        acked.expect_republish().never();
        settle(&acked, &topology, 0, &Disposition::Ack).await.unwrap();

        let mut requeued = MockSettlement::new();
        requeued.expect_requeue().times(1).returning(|| Ok(()));
        requeued.expect_ack().never();
        settle(&requeued, &topology, 0, &Disposition::Requeue)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settle_retry_republishes_then_acks() {
        let topology = bounded_topology();
        let exchange = topology.exchange.clone();

        let mut mock = MockSettlement::new();
        mock.expect_republish()
            .withf(move |ex, headers| ex == exchange && retry_count(Some(headers)) == 2)
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_ack().times(1).returning(|| Ok(()));
        mock.expect_requeue().never();

        settle(&mock, &topology, 1, &Disposition::Retry { attempt: 2 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settle_dead_letter_goes_to_dlx_with_reason() {
        let topology = bounded_topology();
        let dlx = topology.dead_letter.clone().unwrap().0;
        assert_eq!(dlx, "logging_exchange.dlx");

        let mut mock = MockSettlement::new();
        mock.expect_republish()
            .withf(move |ex, headers| {
                ex == dlx
                    && retry_count(Some(headers)) == 3
                    && death_reason(headers).as_deref() == Some("retries exhausted")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_ack().times(1).returning(|| Ok(()));
        mock.expect_requeue().never();

        let disposition = Disposition::DeadLetter {
            reason: "retries exhausted".to_string(),
        };
        settle(&mock, &topology, 3, &disposition).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_dead_letter_without_dlx_requeues() {
        let topology = BrokerTopology::from_config(&RabbitMqConfig::default());
        assert!(topology.dead_letter.is_none());

        let mut mock = MockSettlement::new();
        mock.expect_republish().never();
        mock.expect_ack().never();
        mock.expect_requeue().times(1).returning(|| Ok(()));

        let disposition = Disposition::DeadLetter {
            reason: "undecodable".to_string(),
        };
        settle(&mock, &topology, 0, &disposition).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_failed_republish_requeues_original() {
        let topology = bounded_topology();

        let mut mock = MockSettlement::new();
        mock.expect_republish()
            .times(1)
            .returning(|_, _| Err(MessagingError::NotConnected));
        mock.expect_ack().never();
        mock.expect_requeue().times(1).returning(|| Ok(()));

        settle(&mock, &topology, 0, &Disposition::Retry { attempt: 1 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settle_propagates_ack_error() {
        let topology = bounded_topology();

        let mut mock = MockSettlement::new();
        mock.expect_ack()
            .times(1)
            .returning(|| Err(MessagingError::NotConnected));

        let result = settle(&mock, &topology, 0, &Disposition::Ack).await;
        assert!(matches!(result, Err(MessagingError::NotConnected)));
    }
}
