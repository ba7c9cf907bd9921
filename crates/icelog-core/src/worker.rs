//! Per-partition worker.
//!
//! One worker task per assigned partition. The worker exclusively owns its
//! staging buffer, drains a bounded inbox of transformed records, and flushes
//! to Iceberg when a size, count, time, or force trigger fires. Offsets are
//! reported to the coordinator only after a commit succeeds, which is what
//! keeps Kafka offset commits strictly behind Iceberg durability.
//!
//! Recovery must run before the first insert: a crashed predecessor may have
//! written rows whose Kafka offsets were never committed back to the group,
//! and the max-offset query plus consumer seek is the only dedupe step.

use crate::config::{IcebergConfig, PartitionConfig};
use crate::error::{Error, Result, StagingError};
use crate::iceberg::IcebergClient;
use crate::kafka::RetryConfig;
use crate::metrics::AppenderMetrics;
use crate::staging::StagingStore;
use crate::transform::LogRecord;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a worker sleeps between trigger evaluations when idle.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often force-flush waiters re-check for completion.
const FLUSH_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Inbox envelope: transformed records plus the highest offset they cover.
#[derive(Debug)]
pub struct PartitionMessage {
    pub records: Vec<LogRecord>,
    pub max_offset: i64,
}

/// Invoked once per successful Iceberg commit with the committed offset.
pub type OffsetCommitCallback = Arc<dyn Fn(i32, i64) + Send + Sync>;

/// State shared between a worker task and its handle.
struct WorkerState {
    buffer_bytes: AtomicUsize,
    buffer_records: AtomicUsize,
    pending_offset: AtomicI64,
    committed_offset: AtomicI64,
    running: AtomicBool,
    halted: AtomicBool,
    stop_requested: AtomicBool,
    flush_requested: AtomicBool,
    wake: Notify,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            buffer_bytes: AtomicUsize::new(0),
            buffer_records: AtomicUsize::new(0),
            pending_offset: AtomicI64::new(-1),
            committed_offset: AtomicI64::new(-1),
            running: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            flush_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }
}

/// Worker task for a single Kafka partition.
pub struct PartitionWorker {
    partition: i32,
    topic: String,
    staging: StagingStore,
    iceberg: Arc<IcebergClient>,
    inbox: mpsc::Receiver<PartitionMessage>,
    state: Arc<WorkerState>,
    callback: OffsetCommitCallback,
    metrics: Arc<AppenderMetrics>,
    retry: RetryConfig,
    size_threshold_bytes: usize,
    max_records: usize,
    time_threshold: Duration,
    exit_on_fatal: bool,
    last_flush: Instant,
    last_attempt: Instant,
}

impl PartitionWorker {
    /// Create a worker and its coordinator-side handle.
    pub fn new(
        partition: i32,
        topic: &str,
        partition_cfg: &PartitionConfig,
        iceberg_cfg: &IcebergConfig,
        iceberg: Arc<IcebergClient>,
        metrics: Arc<AppenderMetrics>,
        callback: OffsetCommitCallback,
    ) -> (Self, WorkerHandle) {
        let (sender, inbox) = mpsc::channel(partition_cfg.queue_depth);
        let state = Arc::new(WorkerState::new());

        let worker = Self {
            partition,
            topic: topic.to_string(),
            staging: StagingStore::new(partition),
            iceberg,
            inbox,
            state: state.clone(),
            callback,
            metrics,
            retry: RetryConfig::new(
                Duration::from_millis(iceberg_cfg.retry_base_ms),
                Duration::from_millis(iceberg_cfg.retry_max_ms),
                iceberg_cfg.commit_retries,
            ),
            size_threshold_bytes: partition_cfg.buffer_size_mb * 1024 * 1024,
            max_records: partition_cfg.max_buffer_records,
            time_threshold: Duration::from_secs(partition_cfg.buffer_time_secs),
            exit_on_fatal: iceberg_cfg.exit_on_fatal_commit,
            last_flush: Instant::now(),
            last_attempt: Instant::now(),
        };

        let handle = WorkerHandle {
            partition,
            sender,
            state,
            join: None,
        };

        (worker, handle)
    }

    /// Query Iceberg for the highest committed offset on this partition and
    /// seed the worker's committed offset from it.
    ///
    /// Must complete before [`PartitionWorker::start`]; the coordinator
    /// seeks the consumer to `recovered + 1` so already-persisted records
    /// are never re-delivered.
    pub async fn recover_max_offset(&mut self) -> Result<Option<i64>> {
        let recovered = self.iceberg.max_offset(&self.topic, self.partition).await?;

        match recovered {
            Some(max_offset) => {
                self.state
                    .committed_offset
                    .store(max_offset, Ordering::Release);
                info!(
                    partition = self.partition,
                    max_offset, "Recovered committed offset from Iceberg"
                );
            }
            None => {
                self.state.committed_offset.store(-1, Ordering::Release);
                info!(
                    partition = self.partition,
                    "No previous data found, starting fresh"
                );
            }
        }

        Ok(recovered)
    }

    /// Spawn the worker loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        self.state.running.store(true, Ordering::Release);
        info!(partition = self.partition, "Partition worker started");

        loop {
            if self.state.stop_requested.load(Ordering::Acquire) {
                break;
            }

            if self.state.halted.load(Ordering::Acquire) {
                // Halted after a failed flush: stop draining the inbox so
                // backpressure reaches the poll loop, keep retrying the
                // stuck buffer on the time trigger.
                tokio::select! {
                    _ = self.state.wake.notified() => {}
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            } else {
                tokio::select! {
                    msg = self.inbox.recv() => match msg {
                        Some(msg) => self.process_message(msg),
                        None => {
                            self.state.stop_requested.store(true, Ordering::Release);
                        }
                    },
                    _ = self.state.wake.notified() => {}
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }

            let force = self.state.flush_requested.load(Ordering::Acquire);
            if force {
                self.drain_inbox();
            }

            if self.should_flush(force) && !self.staging.is_empty() {
                debug!(
                    partition = self.partition,
                    records = self.staging.len(),
                    bytes = self.staging.estimated_bytes(),
                    "Flush triggered"
                );
                self.flush_with_retry().await;
            }

            if force {
                self.state.flush_requested.store(false, Ordering::Release);
            }
        }

        // Final flush so a graceful stop leaves no acknowledged records
        // behind in staging
        self.drain_inbox();
        if !self.staging.is_empty() {
            info!(
                partition = self.partition,
                records = self.staging.len(),
                "Final flush on shutdown"
            );
            self.flush_with_retry().await;
        }

        self.state.running.store(false, Ordering::Release);
        info!(partition = self.partition, "Partition worker stopped");
    }

    fn process_message(&mut self, msg: PartitionMessage) {
        if msg.records.is_empty() {
            return;
        }

        self.staging.insert(msg.records);

        if msg.max_offset > self.state.pending_offset.load(Ordering::Acquire) {
            self.state
                .pending_offset
                .store(msg.max_offset, Ordering::Release);
        }

        self.state
            .buffer_bytes
            .store(self.staging.estimated_bytes(), Ordering::Release);
        self.state
            .buffer_records
            .store(self.staging.len(), Ordering::Release);
    }

    fn drain_inbox(&mut self) {
        while let Ok(msg) = self.inbox.try_recv() {
            self.process_message(msg);
        }
    }

    fn should_flush(&self, force: bool) -> bool {
        if force {
            return true;
        }

        if self.state.halted.load(Ordering::Acquire) {
            // Halted retries are paced by the time trigger alone
            return self.last_attempt.elapsed() >= self.time_threshold;
        }

        if self.staging.estimated_bytes() >= self.size_threshold_bytes {
            return true;
        }

        if self.staging.len() >= self.max_records {
            return true;
        }

        !self.staging.is_empty() && self.last_flush.elapsed() >= self.time_threshold
    }

    /// Commit the staged batch, retrying retryable failures with
    /// exponential backoff. Returns true when the buffer reached Iceberg.
    async fn flush_with_retry(&mut self) -> bool {
        self.last_attempt = Instant::now();

        let batch = match self.staging.to_record_batch() {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    partition = self.partition,
                    error = %e,
                    "Failed to build staging batch"
                );
                self.fail_commit();
                return false;
            }
        };

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.calculate_delay(attempt - 1);
                warn!(
                    partition = self.partition,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying Iceberg commit"
                );
                tokio::time::sleep(delay).await;
            }

            match self.iceberg.commit(&batch).await {
                Ok(snapshot_id) => {
                    let committed = self.state.pending_offset.load(Ordering::Acquire);

                    self.staging.truncate();
                    self.state.buffer_bytes.store(0, Ordering::Release);
                    self.state.buffer_records.store(0, Ordering::Release);
                    self.state
                        .committed_offset
                        .store(committed, Ordering::Release);
                    self.state.halted.store(false, Ordering::Release);
                    self.last_flush = Instant::now();
                    self.metrics.record_flush(batch.num_rows());

                    info!(
                        partition = self.partition,
                        rows = batch.num_rows(),
                        committed_offset = committed,
                        snapshot_id,
                        "Flush committed"
                    );

                    if committed >= 0 {
                        (self.callback)(self.partition, committed);
                    }
                    return true;
                }
                Err(Error::Iceberg(e)) if e.is_retryable() => {
                    self.metrics.record_commit_conflict();
                    warn!(
                        partition = self.partition,
                        attempt = attempt + 1,
                        error = %e,
                        "Retryable commit failure"
                    );
                }
                Err(e) => {
                    error!(
                        partition = self.partition,
                        error = %e,
                        "Fatal commit failure"
                    );
                    self.fail_commit();
                    return false;
                }
            }
        }

        error!(
            partition = self.partition,
            attempts = self.retry.max_attempts,
            "Commit retries exhausted"
        );
        self.fail_commit();
        false
    }

    fn fail_commit(&mut self) {
        self.metrics.record_commit_failure();
        if self.exit_on_fatal {
            self.state.stop_requested.store(true, Ordering::Release);
        } else {
            // Staging keeps the rows; the partition halts until a later
            // retry succeeds
            self.state.halted.store(true, Ordering::Release);
        }
    }
}

/// Coordinator-side handle to a running worker.
pub struct WorkerHandle {
    partition: i32,
    sender: mpsc::Sender<PartitionMessage>,
    state: Arc<WorkerState>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Attach the spawned task so `wait_for_stop` can join it.
    pub fn set_join(&mut self, join: JoinHandle<()>) {
        self.join = Some(join);
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Clone of the inbox sender, for enqueueing outside any lock.
    pub fn sender(&self) -> mpsc::Sender<PartitionMessage> {
        self.sender.clone()
    }

    /// Enqueue a message, blocking when the inbox is full.
    pub async fn enqueue(&self, msg: PartitionMessage) -> Result<()> {
        self.sender.send(msg).await.map_err(|_| {
            Error::Staging(StagingError::WorkerUnavailable {
                partition: self.partition,
            })
        })
    }

    /// Request a graceful stop.
    pub fn signal_stop(&self) {
        self.state.stop_requested.store(true, Ordering::Release);
        self.state.wake.notify_one();
    }

    /// Wait for the worker to stop. Returns false on timeout, in which case
    /// the task is aborted best-effort.
    pub async fn wait_for_stop(&mut self, timeout: Duration) -> bool {
        let Some(mut join) = self.join.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut join).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    partition = self.partition,
                    "Timeout waiting for worker to stop"
                );
                join.abort();
                false
            }
        }
    }

    /// Lock-free view for fan-out operations.
    pub fn probe(&self) -> WorkerProbe {
        WorkerProbe {
            partition: self.partition,
            state: self.state.clone(),
        }
    }

    /// Trigger a flush and wait for it to complete.
    pub async fn force_flush(&self, timeout: Duration) -> bool {
        self.probe().force_flush(timeout).await
    }

    pub fn buffer_size(&self) -> usize {
        self.state.buffer_bytes.load(Ordering::Acquire)
    }

    pub fn buffer_record_count(&self) -> usize {
        self.state.buffer_records.load(Ordering::Acquire)
    }

    pub fn last_committed_offset(&self) -> i64 {
        self.state.committed_offset.load(Ordering::Acquire)
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }
}

/// Cloneable view of a worker's shared state.
#[derive(Clone)]
pub struct WorkerProbe {
    partition: i32,
    state: Arc<WorkerState>,
}

impl WorkerProbe {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn buffer_size(&self) -> usize {
        self.state.buffer_bytes.load(Ordering::Acquire)
    }

    pub fn buffer_record_count(&self) -> usize {
        self.state.buffer_records.load(Ordering::Acquire)
    }

    pub fn last_committed_offset(&self) -> i64 {
        self.state.committed_offset.load(Ordering::Acquire)
    }

    /// Set the force-flush flag, wake the worker, and wait until the flush
    /// request is consumed. Success means the buffer drained.
    pub async fn force_flush(&self, timeout: Duration) -> bool {
        if !self.state.running.load(Ordering::Acquire) {
            return self.buffer_record_count() == 0;
        }

        self.state.flush_requested.store(true, Ordering::Release);
        self.state.wake.notify_one();

        let deadline = Instant::now() + timeout;
        while self.state.flush_requested.load(Ordering::Acquire)
            && self.state.running.load(Ordering::Acquire)
        {
            if Instant::now() >= deadline {
                warn!(partition = self.partition, "Force flush timed out");
                return false;
            }
            tokio::time::sleep(FLUSH_WAIT_INTERVAL).await;
        }

        self.buffer_record_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::IcebergError;
    use crate::iceberg::catalog::{AppendCommit, Catalog, MemoryCatalog};
    use crate::iceberg::rest;
    use chrono::Utc;
    use object_store::memory::InMemory;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU32;

    /// Catalog that fails the next N commits with a conflict.
    struct FlakyCatalog {
        inner: MemoryCatalog,
        conflicts_remaining: AtomicU32,
    }

    impl FlakyCatalog {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryCatalog::new(),
                conflicts_remaining: AtomicU32::new(conflicts),
            }
        }
    }

    #[async_trait::async_trait]
    impl Catalog for FlakyCatalog {
        async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
            self.inner.ensure_namespace(namespace).await
        }

        async fn table_exists(&self, namespace: &str, table: &str) -> Result<bool> {
            self.inner.table_exists(namespace, table).await
        }

        async fn create_table(
            &self,
            namespace: &str,
            table: &str,
            schema: rest::Schema,
        ) -> Result<()> {
            self.inner.create_table(namespace, table, schema).await
        }

        async fn load_metadata(
            &self,
            namespace: &str,
            table: &str,
        ) -> Result<rest::TableMetadata> {
            self.inner.load_metadata(namespace, table).await
        }

        async fn commit_append(
            &self,
            namespace: &str,
            table: &str,
            commit: AppendCommit,
        ) -> Result<i64> {
            let remaining = self.conflicts_remaining.load(Ordering::Acquire);
            if remaining > 0 {
                self.conflicts_remaining
                    .store(remaining - 1, Ordering::Release);
                return Err(Error::Iceberg(IcebergError::CommitConflict {
                    expected: commit.expected_snapshot_id,
                }));
            }
            self.inner.commit_append(namespace, table, commit).await
        }
    }

    fn iceberg_cfg(retries: u32) -> IcebergConfig {
        IcebergConfig {
            catalog_uri: "memory://".into(),
            namespace: "default".into(),
            table_name: "logs".into(),
            commit_retries: retries,
            retry_base_ms: 5,
            retry_max_ms: 50,
            exit_on_fatal_commit: false,
        }
    }

    fn partition_cfg() -> PartitionConfig {
        PartitionConfig {
            buffer_size_mb: 50,
            buffer_time_secs: 3600,
            max_buffer_records: 100_000,
            queue_depth: 16,
        }
    }

    async fn client_with(catalog: Arc<dyn Catalog>) -> Arc<IcebergClient> {
        Arc::new(
            IcebergClient::builder(iceberg_cfg(5), StorageConfig::default())
                .with_catalog(catalog)
                .with_object_store(Arc::new(InMemory::new()))
                .build()
                .await
                .unwrap(),
        )
    }

    fn record(offset: i64) -> LogRecord {
        LogRecord {
            kafka_topic: "t".to_string(),
            kafka_partition: 0,
            kafka_offset: offset,
            timestamp: Utc::now(),
            severity: "INFO".to_string(),
            body: format!("m-{}", offset),
            trace_id: String::new(),
            span_id: String::new(),
            service_name: "svc".to_string(),
            deployment_environment: String::new(),
            host_name: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    fn spawn_worker(
        partition_cfg: PartitionConfig,
        iceberg_cfg: IcebergConfig,
        iceberg: Arc<IcebergClient>,
    ) -> (WorkerHandle, Arc<Mutex<Vec<(i32, i64)>>>) {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let committed_cb = committed.clone();
        let callback: OffsetCommitCallback =
            Arc::new(move |partition, offset| committed_cb.lock().push((partition, offset)));

        let (worker, mut handle) = PartitionWorker::new(
            0,
            "t",
            &partition_cfg,
            &iceberg_cfg,
            iceberg,
            Arc::new(AppenderMetrics::new()),
            callback,
        );
        handle.set_join(worker.start());
        (handle, committed)
    }

    #[tokio::test]
    async fn test_force_flush_commits_and_reports_offset() {
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(5), iceberg.clone());

        handle
            .enqueue(PartitionMessage {
                records: vec![record(10), record(11), record(12)],
                max_offset: 12,
            })
            .await
            .unwrap();

        assert!(handle.force_flush(Duration::from_secs(5)).await);
        assert_eq!(handle.buffer_record_count(), 0);
        assert_eq!(handle.last_committed_offset(), 12);
        assert_eq!(committed.lock().as_slice(), &[(0, 12)]);
        assert_eq!(iceberg.max_offset("t", 0).await.unwrap(), Some(12));

        handle.signal_stop();
        assert!(handle.wait_for_stop(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_size_trigger_fires() {
        let mut cfg = partition_cfg();
        cfg.buffer_size_mb = 0; // any record exceeds the threshold
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut handle, committed) = spawn_worker(cfg, iceberg_cfg(5), iceberg);

        handle
            .enqueue(PartitionMessage {
                records: vec![record(1)],
                max_offset: 1,
            })
            .await
            .unwrap();

        // No force flush: the size trigger alone must commit
        let deadline = Instant::now() + Duration::from_secs(5);
        while committed.lock().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(committed.lock().as_slice(), &[(0, 1)]);

        handle.signal_stop();
        assert!(handle.wait_for_stop(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_record_count_trigger_fires() {
        let mut cfg = partition_cfg();
        cfg.max_buffer_records = 3;
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut handle, committed) = spawn_worker(cfg, iceberg_cfg(5), iceberg);

        handle
            .enqueue(PartitionMessage {
                records: vec![record(1), record(2), record(3)],
                max_offset: 3,
            })
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while committed.lock().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(committed.lock().as_slice(), &[(0, 3)]);

        handle.signal_stop();
        handle.wait_for_stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_commit_conflict_retries_then_succeeds() {
        let iceberg = client_with(Arc::new(FlakyCatalog::new(2))).await;
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(3), iceberg.clone());

        handle
            .enqueue(PartitionMessage {
                records: vec![record(7)],
                max_offset: 7,
            })
            .await
            .unwrap();

        assert!(handle.force_flush(Duration::from_secs(5)).await);
        // Exactly one row and one committed-offset report despite two conflicts
        assert_eq!(committed.lock().as_slice(), &[(0, 7)]);
        assert_eq!(iceberg.max_offset("t", 0).await.unwrap(), Some(7));

        handle.signal_stop();
        handle.wait_for_stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_retries_exhausted_halts_and_keeps_buffer() {
        let iceberg = client_with(Arc::new(FlakyCatalog::new(u32::MAX))).await;
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(2), iceberg);

        handle
            .enqueue(PartitionMessage {
                records: vec![record(5)],
                max_offset: 5,
            })
            .await
            .unwrap();

        // The flush fails after 2 attempts; the buffer survives
        assert!(!handle.force_flush(Duration::from_secs(5)).await);
        assert!(handle.is_halted());
        assert_eq!(handle.buffer_record_count(), 1);
        assert!(committed.lock().is_empty());
        assert_eq!(handle.last_committed_offset(), -1);

        handle.signal_stop();
        handle.wait_for_stop(Duration::from_secs(10)).await;
    }

    #[tokio::test]
    async fn test_halted_worker_recovers_on_later_flush() {
        let catalog = Arc::new(FlakyCatalog::new(2));
        let iceberg = client_with(catalog).await;
        // One attempt per flush: first two flushes fail, third succeeds
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(1), iceberg);

        handle
            .enqueue(PartitionMessage {
                records: vec![record(9)],
                max_offset: 9,
            })
            .await
            .unwrap();

        assert!(!handle.force_flush(Duration::from_secs(5)).await);
        assert!(handle.is_halted());
        assert!(!handle.force_flush(Duration::from_secs(5)).await);

        // Conflicts exhausted: this one lands
        assert!(handle.force_flush(Duration::from_secs(5)).await);
        assert!(!handle.is_halted());
        assert_eq!(committed.lock().as_slice(), &[(0, 9)]);

        handle.signal_stop();
        handle.wait_for_stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_stop_performs_final_flush() {
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(5), iceberg.clone());

        handle
            .enqueue(PartitionMessage {
                records: vec![record(100), record(101)],
                max_offset: 101,
            })
            .await
            .unwrap();

        handle.signal_stop();
        assert!(handle.wait_for_stop(Duration::from_secs(5)).await);

        assert_eq!(committed.lock().as_slice(), &[(0, 101)]);
        assert_eq!(iceberg.max_offset("t", 0).await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn test_stop_with_empty_buffer_is_prompt() {
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(5), iceberg);

        // Give the task a moment to enter its wait
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        handle.signal_stop();
        assert!(handle.wait_for_stop(Duration::from_secs(5)).await);
        // The stop wakeup must not wait out the full poll interval
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(committed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_recover_max_offset_seeds_committed() {
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;

        // Seed the table through the normal commit path
        {
            let (mut handle, _) = spawn_worker(partition_cfg(), iceberg_cfg(5), iceberg.clone());
            handle
                .enqueue(PartitionMessage {
                    records: vec![record(42)],
                    max_offset: 42,
                })
                .await
                .unwrap();
            assert!(handle.force_flush(Duration::from_secs(5)).await);
            handle.signal_stop();
            handle.wait_for_stop(Duration::from_secs(5)).await;
        }

        // A fresh worker on the same partition recovers the offset
        let (mut worker, _handle) = PartitionWorker::new(
            0,
            "t",
            &partition_cfg(),
            &iceberg_cfg(5),
            iceberg,
            Arc::new(AppenderMetrics::new()),
            Arc::new(|_, _| {}),
        );
        let recovered = worker.recover_max_offset().await.unwrap();
        assert_eq!(recovered, Some(42));
        assert_eq!(worker.state.committed_offset.load(Ordering::Acquire), 42);
    }

    #[tokio::test]
    async fn test_recover_fresh_partition() {
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut worker, _handle) = PartitionWorker::new(
            3,
            "t",
            &partition_cfg(),
            &iceberg_cfg(5),
            iceberg,
            Arc::new(AppenderMetrics::new()),
            Arc::new(|_, _| {}),
        );
        assert_eq!(worker.recover_max_offset().await.unwrap(), None);
        assert_eq!(worker.state.committed_offset.load(Ordering::Acquire), -1);
    }

    #[tokio::test]
    async fn test_force_flush_on_empty_buffer_succeeds() {
        let iceberg = client_with(Arc::new(MemoryCatalog::new())).await;
        let (mut handle, committed) = spawn_worker(partition_cfg(), iceberg_cfg(5), iceberg);

        assert!(handle.force_flush(Duration::from_secs(5)).await);
        assert!(committed.lock().is_empty());

        handle.signal_stop();
        handle.wait_for_stop(Duration::from_secs(5)).await;
    }
}
