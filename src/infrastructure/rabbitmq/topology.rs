use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};

use super::{MessagingError, RabbitMqConfig};

/// Declaration はブローカーに対する宣言 1 件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    /// durable な direct exchange。
    Exchange(String),
    /// durable な queue。
    Queue(String),
    Binding {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

/// BrokerTopology はプロデューサーとコンシューマーが共有するロギング用トポロジ。
///
/// 同一パラメータでの再宣言はブローカー側で no-op になるため、接続ごとに `declare` してよい。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    /// (dead-letter exchange, dead-letter queue)。再試行上限が設定されている場合のみ。
    pub dead_letter: Option<(String, String)>,
}

impl BrokerTopology {
    pub fn from_config(config: &RabbitMqConfig) -> Self {
        let dead_letter = config
            .max_retries
            .map(|_| (config.dead_letter_exchange(), config.dead_letter_queue()));
        Self {
            exchange: config.exchange.clone(),
            queue: config.queue.clone(),
            routing_key: config.routing_key.clone(),
            dead_letter,
        }
    }

    /// 宣言順に並べた宣言の一覧。exchange と queue が binding より先に来る。
    pub fn declarations(&self) -> Vec<Declaration> {
        let mut plan = vec![
            Declaration::Exchange(self.exchange.clone()),
            Declaration::Queue(self.queue.clone()),
            Declaration::Binding {
                queue: self.queue.clone(),
                exchange: self.exchange.clone(),
                routing_key: self.routing_key.clone(),
            },
        ];
        if let Some((dlx, dlq)) = &self.dead_letter {
            plan.push(Declaration::Exchange(dlx.clone()));
            plan.push(Declaration::Queue(dlq.clone()));
            plan.push(Declaration::Binding {
                queue: dlq.clone(),
                exchange: dlx.clone(),
                routing_key: self.routing_key.clone(),
            });
        }
        plan
    }

    /// チャネル上でトポロジを宣言する。
    pub async fn declare(&self, channel: &Channel) -> Result<(), MessagingError> {
        for declaration in self.declarations() {
            match &declaration {
                Declaration::Exchange(name) => {
                    channel
                        .exchange_declare(
                            name,
                            ExchangeKind::Direct,
                            ExchangeDeclareOptions {
                                durable: true,
                                ..ExchangeDeclareOptions::default()
                            },
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|source| MessagingError::Topology {
                            entity: format!("exchange {name}"),
                            source,
                        })?;
                }
                Declaration::Queue(name) => {
                    channel
                        .queue_declare(
                            name,
                            QueueDeclareOptions {
                                durable: true,
                                ..QueueDeclareOptions::default()
                            },
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|source| MessagingError::Topology {
                            entity: format!("queue {name}"),
                            source,
                        })?;
                }
                Declaration::Binding {
                    queue,
                    exchange,
                    routing_key,
                } => {
                    channel
                        .queue_bind(
                            queue,
                            exchange,
                            routing_key,
                            QueueBindOptions::default(),
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|source| MessagingError::Topology {
                            entity: format!("binding {queue} <- {exchange} ({routing_key})"),
                            source,
                        })?;
                }
            }
            tracing::debug!(declaration = ?declaration, "broker topology declared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let topology = BrokerTopology::from_config(&RabbitMqConfig::default());
        assert_eq!(
            topology.declarations(),
            vec![
                Declaration::Exchange("logging_exchange".to_string()),
                Declaration::Queue("logging_queue".to_string()),
                Declaration::Binding {
                    queue: "logging_queue".to_string(),
                    exchange: "logging_exchange".to_string(),
                    routing_key: "logging".to_string(),
                },
            ]
        );
        assert!(topology.dead_letter.is_none());
    }

    #[test]
    fn test_topology_with_dead_letter() {
        let config = RabbitMqConfig {
            max_retries: Some(3),
            ..Default::default()
        };
        let plan = BrokerTopology::from_config(&config).declarations();
        assert_eq!(plan.len(), 6);
        assert_eq!(
            plan[5],
            Declaration::Binding {
                queue: "logging_queue.dlq".to_string(),
                exchange: "logging_exchange.dlx".to_string(),
                routing_key: "logging".to_string(),
            }
        );
    }

    #[test]
    fn test_producer_and_consumer_share_topology() {
        let config = RabbitMqConfig {
            exchange: "audit".to_string(),
            ..Default::default()
        };
        assert_eq!(
            BrokerTopology::from_config(&config),
            BrokerTopology::from_config(&config.clone())
        );
    }
}
