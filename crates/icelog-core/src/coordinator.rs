//! Partition coordinator.
//!
//! Owns the shared Iceberg client and the consumer, reacts to partition
//! assignment and revocation, routes polled messages to per-partition
//! workers, and commits Kafka offsets once workers report Iceberg
//! durability. Offset commits always lag Iceberg commits, never lead them.

use crate::config::Config;
use crate::dlq::DeadLetterQueue;
use crate::envelope;
use crate::error::{Error, Result, StagingError};
use crate::health::HealthCheck;
use crate::iceberg::{IcebergClient, IcebergClientBuilder};
use crate::kafka::{
    ConsumedMessage, KafkaLogConsumerBuilder, LogConsumer, RebalanceEvent,
};
use crate::metrics::AppenderMetrics;
use crate::transform;
use crate::worker::{OffsetCommitCallback, PartitionMessage, PartitionWorker, WorkerHandle, WorkerProbe};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll timeout per loop iteration.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed poll before the next attempt.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on one worker's force flush, including its commit retries.
const FORCE_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`PartitionCoordinator`].
pub struct PartitionCoordinatorBuilder {
    config: Config,
    consumer: Option<Arc<dyn LogConsumer>>,
    iceberg: Option<Arc<IcebergClient>>,
}

impl PartitionCoordinatorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            consumer: None,
            iceberg: None,
        }
    }

    /// Use a pre-built consumer.
    pub fn with_consumer(mut self, consumer: Arc<dyn LogConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Use a pre-built Iceberg client.
    pub fn with_iceberg(mut self, iceberg: Arc<IcebergClient>) -> Self {
        self.iceberg = Some(iceberg);
        self
    }

    /// Validate configuration, attach the catalog, create the table when
    /// missing, and subscribe the consumer.
    pub async fn build(self) -> Result<Arc<PartitionCoordinator>> {
        self.config.validate()?;

        let health = Arc::new(HealthCheck::new());
        health.register_component("kafka");
        health.register_component("iceberg");
        health.register_component("dlq");

        let iceberg = match self.iceberg {
            Some(iceberg) => iceberg,
            None => Arc::new(
                IcebergClientBuilder::new(
                    self.config.iceberg.clone(),
                    self.config.storage.clone(),
                )
                .build()
                .await?,
            ),
        };
        health.mark_healthy("iceberg");
        // Readiness means the catalog attach and table creation succeeded
        health.mark_ready();

        let consumer: Arc<dyn LogConsumer> = match self.consumer {
            Some(consumer) => consumer,
            None => Arc::new(KafkaLogConsumerBuilder::new(self.config.kafka.clone()).build()?),
        };
        health.mark_healthy("kafka");

        let dlq = match self.config.dlq.path.as_deref() {
            Some(path) => match DeadLetterQueue::open(path) {
                Ok(dlq) => {
                    health.mark_healthy("dlq");
                    Some(Arc::new(dlq))
                }
                Err(e) => {
                    // A broken DLQ must not take the appender down
                    warn!(error = %e, "Failed to open dead letter queue, disabling it");
                    health.mark_degraded("dlq", &e.to_string());
                    None
                }
            },
            None => None,
        };

        info!(
            table = %iceberg.full_table_name(),
            topic = %self.config.kafka.topic,
            buffer_size_mb = self.config.partition.buffer_size_mb,
            buffer_time_secs = self.config.partition.buffer_time_secs,
            commit_retries = self.config.iceberg.commit_retries,
            "Partition coordinator initialized"
        );

        Ok(Arc::new(PartitionCoordinator {
            config: self.config,
            iceberg,
            consumer,
            dlq,
            workers: RwLock::new(HashMap::new()),
            pending_commits: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(AppenderMetrics::new()),
            health,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }))
    }
}

/// Routes messages to partition workers and commits offsets after Iceberg.
pub struct PartitionCoordinator {
    config: Config,
    iceberg: Arc<IcebergClient>,
    consumer: Arc<dyn LogConsumer>,
    dlq: Option<Arc<DeadLetterQueue>>,
    // Assignment/revocation and routing share this map; never held across await
    workers: RwLock<HashMap<i32, WorkerHandle>>,
    // Per-partition max offsets awaiting a Kafka commit
    pending_commits: Arc<Mutex<HashMap<i32, i64>>>,
    metrics: Arc<AppenderMetrics>,
    health: Arc<HealthCheck>,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl PartitionCoordinator {
    /// Create a builder.
    pub fn builder(config: Config) -> PartitionCoordinatorBuilder {
        PartitionCoordinatorBuilder::new(config)
    }

    /// Run the poll loop until [`PartitionCoordinator::stop`] is called.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Coordinator is already running");
            return Ok(());
        }

        info!("Partition coordinator started");

        while !self.stop_requested.load(Ordering::Acquire) {
            self.drain_rebalance_events().await;

            match self.consumer.poll(POLL_TIMEOUT).await {
                Ok(Some(msg)) => {
                    if let Err(e) = self.handle_message(msg).await {
                        warn!(error = %e, "Failed to route message");
                    }
                    self.health.mark_healthy("kafka");
                }
                Ok(None) => {}
                Err(e) => {
                    self.health.mark_degraded("kafka", &e.to_string());
                    warn!(error = %e, "Poll failed");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }

            self.commit_pending_offsets().await;
        }

        info!("Stopping partition coordinator");
        self.shutdown_workers().await;
        self.commit_pending_offsets().await;
        self.consumer.close();
        self.running.store(false, Ordering::Release);
        info!("Partition coordinator stopped");

        Ok(())
    }

    /// Request the poll loop to stop; `run` tears down workers and commits
    /// pending offsets before returning.
    pub fn stop(&self) {
        info!("Coordinator stop requested");
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether the poll loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flush every worker's buffer to Iceberg, then commit pending offsets.
    /// Returns true iff every worker drained.
    pub async fn force_flush_all(&self) -> bool {
        let probes: Vec<WorkerProbe> =
            self.workers.read().values().map(WorkerHandle::probe).collect();

        let mut all_success = true;
        for probe in probes {
            if !probe.force_flush(FORCE_FLUSH_TIMEOUT).await {
                warn!(partition = probe.partition(), "Force flush failed");
                all_success = false;
            }
        }

        self.commit_pending_offsets().await;
        all_success
    }

    /// Sum of estimated buffered bytes across workers.
    pub fn total_buffer_size(&self) -> usize {
        self.workers.read().values().map(WorkerHandle::buffer_size).sum()
    }

    /// Sum of buffered record counts across workers.
    pub fn total_buffer_record_count(&self) -> usize {
        self.workers
            .read()
            .values()
            .map(WorkerHandle::buffer_record_count)
            .sum()
    }

    /// Process metrics.
    pub fn metrics(&self) -> &Arc<AppenderMetrics> {
        &self.metrics
    }

    /// Component health.
    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    async fn drain_rebalance_events(&self) {
        for event in self.consumer.take_rebalance_events() {
            match event {
                RebalanceEvent::Assigned(partitions) => {
                    for partition in partitions {
                        if let Err(e) = self.create_worker(partition).await {
                            warn!(partition, error = %e, "Failed to create worker");
                        }
                    }
                }
                RebalanceEvent::Revoked(partitions) => {
                    // Commit what we know before the partitions move away
                    self.commit_pending_offsets().await;
                    for partition in partitions {
                        self.destroy_worker(partition).await;
                    }
                }
            }
        }
    }

    async fn handle_message(&self, msg: ConsumedMessage) -> Result<()> {
        self.metrics.record_message();

        let request = match envelope::decode_envelope(&msg.payload)
            .and_then(|env| envelope::decode_logs_request(&env))
        {
            Ok(request) => request,
            Err(e) => {
                self.metrics.record_parse_failure();
                warn!(
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %e,
                    "Unparseable message"
                );

                if let Some(ref dlq) = self.dlq {
                    if let Err(write_err) = dlq.write(&msg.payload, &e.to_string()) {
                        warn!(error = %write_err, "Failed to write dead letter entry");
                    }
                }

                // Advance past the poison message so the group does not stall
                self.record_offset(msg.partition, msg.offset);
                return Ok(());
            }
        };

        let records = transform::transform(&request, &msg.topic, msg.partition, msg.offset);
        if records.is_empty() {
            return Ok(());
        }
        self.metrics.record_records(records.len());

        let target = {
            let workers = self.workers.read();
            workers
                .get(&msg.partition)
                .map(|handle| (handle.sender(), handle.last_committed_offset()))
        };

        let (sender, committed_offset) = match target {
            Some(target) => target,
            None => {
                // The assignment callback raced the poll; create on demand
                warn!(
                    partition = msg.partition,
                    "No worker for partition, creating one now"
                );
                self.create_worker(msg.partition).await?;

                let workers = self.workers.read();
                let handle = workers.get(&msg.partition).ok_or(Error::Staging(
                    StagingError::WorkerUnavailable {
                        partition: msg.partition,
                    },
                ))?;
                (handle.sender(), handle.last_committed_offset())
            }
        };

        if msg.offset <= committed_offset {
            debug!(
                partition = msg.partition,
                offset = msg.offset,
                committed_offset,
                "Skipping already-persisted record"
            );
            return Ok(());
        }

        // Blocks when the inbox is full; backpressure stalls the poll loop
        // instead of dropping records
        sender
            .send(PartitionMessage {
                records,
                max_offset: msg.offset,
            })
            .await
            .map_err(|_| {
                Error::Staging(StagingError::WorkerUnavailable {
                    partition: msg.partition,
                })
            })?;

        Ok(())
    }

    /// Create and start a worker for a newly assigned partition.
    ///
    /// Recovery runs before the worker starts and before any insert: the
    /// consumer is seeked past the highest offset already in Iceberg, so
    /// re-delivered records never reach staging.
    async fn create_worker(&self, partition: i32) -> Result<()> {
        if self.workers.read().contains_key(&partition) {
            debug!(partition, "Worker already exists");
            return Ok(());
        }

        let pending = self.pending_commits.clone();
        let callback: OffsetCommitCallback = Arc::new(move |p, offset| {
            let mut pending = pending.lock();
            let entry = pending.entry(p).or_insert(offset);
            if offset > *entry {
                *entry = offset;
            }
        });

        let (mut worker, mut handle) = PartitionWorker::new(
            partition,
            &self.config.kafka.topic,
            &self.config.partition,
            &self.config.iceberg,
            self.iceberg.clone(),
            self.metrics.clone(),
            callback,
        );

        let recovered = worker.recover_max_offset().await?;
        if let Some(max_offset) = recovered {
            self.consumer.seek(partition, max_offset + 1)?;
        }

        handle.set_join(worker.start());
        self.workers.write().insert(partition, handle);

        info!(partition, "Created partition worker");
        Ok(())
    }

    async fn destroy_worker(&self, partition: i32) {
        let handle = self.workers.write().remove(&partition);
        let Some(mut handle) = handle else {
            return;
        };

        handle.signal_stop();
        let timeout = Duration::from_secs(self.config.rebalance.timeout_secs);
        if !handle.wait_for_stop(timeout).await {
            warn!(partition, "Worker did not stop cleanly");
        }

        info!(partition, "Destroyed partition worker");
    }

    async fn shutdown_workers(&self) {
        let partitions: Vec<i32> = self.workers.read().keys().copied().collect();

        {
            let workers = self.workers.read();
            for handle in workers.values() {
                handle.signal_stop();
            }
        }

        for partition in partitions {
            self.destroy_worker(partition).await;
        }
    }

    /// Record a per-partition offset for the next Kafka commit, keeping the
    /// max when one is already pending.
    fn record_offset(&self, partition: i32, offset: i64) {
        let mut pending = self.pending_commits.lock();
        let entry = pending.entry(partition).or_insert(offset);
        if offset > *entry {
            *entry = offset;
        }
    }

    /// Commit coalesced offsets to Kafka. Entries are cleared only on
    /// success; failures stay pending for the next pass or the revocation
    /// path. Correctness never depends on this commit landing.
    async fn commit_pending_offsets(&self) {
        let to_commit: Vec<(i32, i64)> = {
            let pending = self.pending_commits.lock();
            if pending.is_empty() {
                return;
            }
            pending.iter().map(|(&p, &o)| (p, o)).collect()
        };

        match self.consumer.commit(&to_commit).await {
            Ok(()) => {
                let mut pending = self.pending_commits.lock();
                for (partition, offset) in &to_commit {
                    // A worker may have reported a newer offset meanwhile
                    if pending.get(partition) == Some(offset) {
                        pending.remove(partition);
                    }
                }
                self.metrics.record_offset_commit(to_commit.len());
                debug!(offsets = ?to_commit, "Committed log offsets");
            }
            Err(e) => {
                warn!(error = %e, "Log offset commit failed");
            }
        }
    }
}
