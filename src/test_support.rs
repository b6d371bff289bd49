//! テスト用の部品。ブローカーを使わずにパイプライン全体を組み立てる。

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapter::handler::AppState;
use crate::domain::entity::{LogEntry, LogLevel};
use crate::domain::repository::LogEntryRepository;
use crate::infrastructure::metrics::Metrics;
use crate::infrastructure::persistence::InMemoryLogEntryRepository;
use crate::infrastructure::rabbitmq::{
    BrokerHealth, DeliveryProcessor, Disposition, LogEventPublisher, RetryPolicy,
};
use crate::usecase::{
    DeleteLogEntryUseCase, EmitLogUseCase, GetLogEntriesByDateRangeUseCase,
    GetLogEntriesByRequestIdUseCase, GetLogEntriesByUserIdUseCase, GetLogEntryUseCase,
    IngestLogUseCase, ListLogEntriesUseCase,
};

#[derive(Debug, Clone)]
struct QueuedMessage {
    payload: Vec<u8>,
    retry_count: u32,
}

/// DrainReport は drain 1 回分の処理件数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub persisted: usize,
    pub requeued: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// InMemoryLogBroker はキュー 1 本だけのブローカー代替。
///
/// 発行されたイベントを FIFO で保持し、drain で DeliveryProcessor に配送する。
pub struct InMemoryLogBroker {
    queue: Mutex<VecDeque<QueuedMessage>>,
    dead_letters: Mutex<Vec<(Vec<u8>, String)>>,
    healthy: AtomicBool,
}

impl InMemoryLogBroker {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            dead_letters: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
        }
    }

    /// false にすると publish が失敗し、is_healthy も false を返す。
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// 任意のペイロードをそのまま積む。壊れたメッセージの再現に使う。
    pub fn enqueue_raw(&self, payload: impl Into<Vec<u8>>) {
        self.lock_queue().push_back(QueuedMessage {
            payload: payload.into(),
            retry_count: 0,
        });
    }

    pub fn queued_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// キュー上のイベントを復元して返す。復元できないペイロードは除く。
    pub fn queued_entries(&self) -> Vec<LogEntry> {
        self.lock_queue()
            .iter()
            .filter_map(|m| LogEntry::from_wire(&m.payload).ok())
            .collect()
    }

    /// dead-letter された (ペイロード, 理由)。
    pub fn dead_letters(&self) -> Vec<(Vec<u8>, String)> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 最大 max_deliveries 件を配送し、Disposition どおりにキューを更新する。
    pub async fn drain(&self, processor: &DeliveryProcessor, max_deliveries: usize) -> DrainReport {
        let mut report = DrainReport::default();
        for _ in 0..max_deliveries {
            let next = self.lock_queue().pop_front();
            let Some(message) = next else {
                break;
            };

            match processor
                .process(&message.payload, message.retry_count)
                .await
            {
                Disposition::Ack => report.persisted += 1,
                Disposition::Requeue => {
                    report.requeued += 1;
                    self.lock_queue().push_front(message);
                }
                Disposition::Retry { attempt } => {
                    report.retried += 1;
                    self.lock_queue().push_back(QueuedMessage {
                        payload: message.payload,
                        retry_count: attempt,
                    });
                }
                Disposition::DeadLetter { reason } => {
                    report.dead_lettered += 1;
                    self.dead_letters
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((message.payload, reason));
                }
            }
        }
        report
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryLogBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogEventPublisher for InMemoryLogBroker {
    async fn publish(&self, entry: &LogEntry) -> bool {
        if !self.is_healthy() {
            return false;
        }
        match entry.to_wire() {
            Ok(payload) => {
                self.lock_queue().push_back(QueuedMessage {
                    payload,
                    retry_count: 0,
                });
                true
            }
            Err(_) => false,
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// StaticHealth は固定値を返す BrokerHealth。
pub struct StaticHealth(pub bool);

impl BrokerHealth for StaticHealth {
    fn is_healthy(&self) -> bool {
        self.0
    }
}

/// FlakyRepository はメッセージごとに最初の create を失敗させる。
pub struct FlakyRepository {
    inner: Arc<InMemoryLogEntryRepository>,
    failed_once: Mutex<HashSet<String>>,
}

impl FlakyRepository {
    pub fn new(inner: Arc<InMemoryLogEntryRepository>) -> Self {
        Self {
            inner,
            failed_once: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl LogEntryRepository for FlakyRepository {
    async fn create(&self, entry: &LogEntry) -> anyhow::Result<LogEntry> {
        let first_attempt = self
            .failed_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.message.clone());
        if first_attempt {
            anyhow::bail!("store unavailable");
        }
        self.inner.create(entry).await
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<LogEntry>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_request_id(&self, request_id: &str) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_by_request_id(request_id).await
    }

    async fn find_by_user_id(&self, user_id: i64) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_by_user_id(user_id).await
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_by_date_range(start, end).await
    }

    async fn find_page(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_page(page, page_size).await
    }

    async fn remove(&self, id: Option<i64>) -> anyhow::Result<()> {
        self.inner.remove(id).await
    }
}

/// SlowRepository は create のたびに delay だけ待つ。
pub struct SlowRepository {
    inner: Arc<InMemoryLogEntryRepository>,
    delay: Duration,
}

impl SlowRepository {
    pub fn new(inner: Arc<InMemoryLogEntryRepository>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl LogEntryRepository for SlowRepository {
    async fn create(&self, entry: &LogEntry) -> anyhow::Result<LogEntry> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(entry).await
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<LogEntry>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_request_id(&self, request_id: &str) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_by_request_id(request_id).await
    }

    async fn find_by_user_id(&self, user_id: i64) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_by_user_id(user_id).await
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_by_date_range(start, end).await
    }

    async fn find_page(&self, page: u32, page_size: u32) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.find_page(page, page_size).await
    }

    async fn remove(&self, id: Option<i64>) -> anyhow::Result<()> {
        self.inner.remove(id).await
    }
}

/// TestHarness はインメモリのブローカーとストアで AppState を組み立てる。
pub struct TestHarness {
    pub state: AppState,
    /// 参照用の素のストア。
    pub repo: Arc<InMemoryLogEntryRepository>,
    /// ユースケースと取り込みが使うストア。
    pub store: Arc<dyn LogEntryRepository>,
    pub broker: Arc<InMemoryLogBroker>,
}

impl TestHarness {
    pub fn new() -> Self {
        let repo = Arc::new(InMemoryLogEntryRepository::new());
        Self::with_store(repo.clone(), repo)
    }

    pub fn with_store(
        repo: Arc<InMemoryLogEntryRepository>,
        store: Arc<dyn LogEntryRepository>,
    ) -> Self {
        let broker = Arc::new(InMemoryLogBroker::new());
        let metrics = Metrics::new("k1s0-logging-server-test")
            .map(Arc::new)
            .unwrap_or_else(|e| panic!("failed to build test metrics: {e}"));

        let state = AppState {
            emit_log_uc: Arc::new(EmitLogUseCase::new(broker.clone())),
            list_log_entries_uc: Arc::new(ListLogEntriesUseCase::new(store.clone())),
            get_by_request_id_uc: Arc::new(GetLogEntriesByRequestIdUseCase::new(store.clone())),
            get_by_user_id_uc: Arc::new(GetLogEntriesByUserIdUseCase::new(store.clone())),
            get_by_date_range_uc: Arc::new(GetLogEntriesByDateRangeUseCase::new(store.clone())),
            get_log_entry_uc: Arc::new(GetLogEntryUseCase::new(store.clone())),
            delete_log_entry_uc: Arc::new(DeleteLogEntryUseCase::new(store.clone())),
            metrics,
            consumer_health: Arc::new(StaticHealth(true)),
            max_page_size: 100,
        };

        Self {
            state,
            repo,
            store,
            broker,
        }
    }

    /// ハーネスのストアに書き込む DeliveryProcessor。
    pub fn processor(&self, policy: RetryPolicy) -> DeliveryProcessor {
        DeliveryProcessor::new(Arc::new(IngestLogUseCase::new(self.store.clone())), policy)
    }

    /// `entry-{i}` を count 件、直接ストアに書き込む。
    pub async fn seed(&self, count: usize) {
        for i in 0..count {
            let entry = LogEntry::new(LogLevel::Info, format!("entry-{i}"));
            if let Err(e) = self.repo.create(&entry).await {
                panic!("failed to seed entry-{i}: {e}");
            }
        }
    }

    /// ブローカーに min 件以上積まれるまで最大 1 秒待つ。
    pub async fn wait_for_queued(&self, min: usize) -> Vec<LogEntry> {
        for _ in 0..100 {
            let entries = self.broker.queued_entries();
            if entries.len() >= min {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.broker.queued_entries()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
