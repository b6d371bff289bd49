use std::sync::Arc;

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

use crate::usecase::ingest_log::{IngestError, IngestLogUseCase};

/// 再試行回数を運ぶヘッダー名。
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
/// dead-letter へ送った理由を運ぶヘッダー名。
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// RetryPolicy は取り込み失敗時の再試行方針。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// nack + requeue を無制限に繰り返す。
    #[default]
    Unbounded,
    /// max_retries 回まで再発行し、それ以降は dead-letter queue へ送る。
    Bounded { max_retries: u32 },
}

impl RetryPolicy {
    pub fn from_max_retries(max_retries: Option<u32>) -> Self {
        match max_retries {
            Some(max_retries) => Self::Bounded { max_retries },
            None => Self::Unbounded,
        }
    }

    /// retry_count 回目の配送で失敗した場合の扱いを決める。
    pub fn on_failure(&self, retry_count: u32, error: &IngestError) -> Disposition {
        match *self {
            Self::Unbounded => Disposition::Requeue,
            Self::Bounded { .. } if error.is_permanent() => Disposition::DeadLetter {
                reason: error.to_string(),
            },
            Self::Bounded { max_retries } if retry_count < max_retries => Disposition::Retry {
                attempt: retry_count + 1,
            },
            Self::Bounded { .. } => Disposition::DeadLetter {
                reason: error.to_string(),
            },
        }
    }
}

/// Disposition は配送 1 件の処理結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// 永続化済み。ack する。
    Ack,
    /// nack(requeue=true)。
    Requeue,
    /// x-retry-count=attempt で再発行してから元メッセージを ack する。
    Retry { attempt: u32 },
    /// dead-letter exchange へ発行してから元メッセージを ack する。
    DeadLetter { reason: String },
}

impl Disposition {
    /// メトリクスのラベル値。
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "persisted",
            Self::Requeue => "requeued",
            Self::Retry { .. } => "retried",
            Self::DeadLetter { .. } => "dead_lettered",
        }
    }
}

/// DeliveryProcessor は配送されたペイロードを取り込み、ブローカーへの応答を決める。
pub struct DeliveryProcessor {
    ingest: Arc<IngestLogUseCase>,
    policy: RetryPolicy,
}

impl DeliveryProcessor {
    pub fn new(ingest: Arc<IngestLogUseCase>, policy: RetryPolicy) -> Self {
        Self { ingest, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn process(&self, payload: &[u8], retry_count: u32) -> Disposition {
        match self.ingest.execute(payload).await {
            Ok(entry) => {
                tracing::debug!(
                    id = ?entry.id,
                    level = %entry.level,
                    request_id = ?entry.request_id,
                    "log event persisted"
                );
                Disposition::Ack
            }
            Err(e) => {
                let disposition = self.policy.on_failure(retry_count, &e);
                tracing::warn!(
                    error = %e,
                    retry_count,
                    outcome = disposition.outcome(),
                    "failed to ingest log event"
                );
                disposition
            }
        }
    }
}

/// ヘッダーから再試行回数を読む。ヘッダーが無い、または整数でなければ 0。
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    let Some(headers) = headers else {
        return 0;
    };
    headers
        .inner()
        .iter()
        .find(|(k, _)| k.as_str() == RETRY_COUNT_HEADER)
        .and_then(|(_, v)| match v {
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongUInt(n) => Some(*n),
            AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
            AMQPValue::ShortShortInt(n) => u32::try_from(*n).ok(),
            AMQPValue::ShortShortUInt(n) => Some(u32::from(*n)),
            _ => None,
        })
        .unwrap_or(0)
}

/// 再発行用ヘッダー。
pub fn retry_headers(attempt: u32) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(i64::from(attempt)),
    );
    headers
}

/// dead-letter 用ヘッダー。
pub fn dead_letter_headers(retry_count: u32, reason: &str) -> FieldTable {
    let mut headers = retry_headers(retry_count);
    headers.insert(
        ShortString::from(DEATH_REASON_HEADER),
        AMQPValue::LongString(LongString::from(reason.to_string())),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::LogEntryError;

    fn decode_error() -> IngestError {
        let err = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        IngestError::Decode(LogEntryError::Decode(err))
    }

    fn persist_error() -> IngestError {
        IngestError::Persist(anyhow::anyhow!("db down"))
    }

    #[test]
    fn test_unbounded_always_requeues() {
        let policy = RetryPolicy::from_max_retries(None);
        assert_eq!(policy.on_failure(0, &persist_error()), Disposition::Requeue);
        assert_eq!(policy.on_failure(1000, &decode_error()), Disposition::Requeue);
    }

    #[test]
    fn test_bounded_retries_then_dead_letters() {
        let policy = RetryPolicy::from_max_retries(Some(2));
        assert_eq!(
            policy.on_failure(0, &persist_error()),
            Disposition::Retry { attempt: 1 }
        );
        assert_eq!(
            policy.on_failure(1, &persist_error()),
            Disposition::Retry { attempt: 2 }
        );
        assert!(matches!(
            policy.on_failure(2, &persist_error()),
            Disposition::DeadLetter { reason } if reason.contains("db down")
        ));
    }

    #[test]
    fn test_bounded_dead_letters_undecodable_immediately() {
        let policy = RetryPolicy::Bounded { max_retries: 5 };
        assert!(matches!(
            policy.on_failure(0, &decode_error()),
            Disposition::DeadLetter { .. }
        ));
    }

    #[test]
    fn test_bounded_zero_retries() {
        let policy = RetryPolicy::Bounded { max_retries: 0 };
        assert!(matches!(
            policy.on_failure(0, &persist_error()),
            Disposition::DeadLetter { .. }
        ));
    }

    #[test]
    fn test_retry_count_header() {
        assert_eq!(retry_count(None), 0);
        assert_eq!(retry_count(Some(&FieldTable::default())), 0);
        assert_eq!(retry_count(Some(&retry_headers(3))), 3);

        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(RETRY_COUNT_HEADER),
            AMQPValue::ShortUInt(4),
        );
        assert_eq!(retry_count(Some(&headers)), 4);

        let mut negative = FieldTable::default();
        negative.insert(
            ShortString::from(RETRY_COUNT_HEADER),
            AMQPValue::LongLongInt(-1),
        );
        assert_eq!(retry_count(Some(&negative)), 0);
    }

    #[test]
    fn test_dead_letter_headers() {
        let headers = dead_letter_headers(2, "db down");
        assert_eq!(retry_count(Some(&headers)), 2);
        let reason = headers
            .inner()
            .iter()
            .find(|(k, _)| k.as_str() == DEATH_REASON_HEADER)
            .map(|(_, v)| v.clone());
        assert_eq!(
            reason,
            Some(AMQPValue::LongString(LongString::from("db down".to_string())))
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Disposition::Ack.outcome(), "persisted");
        assert_eq!(Disposition::Requeue.outcome(), "requeued");
        assert_eq!(Disposition::Retry { attempt: 1 }.outcome(), "retried");
    }
}
