//! Kafka consumer adapter.
//!
//! Manual offset commits only: the coordinator commits an offset to Kafka
//! strictly after the records up to it are durable in Iceberg. Rebalance
//! callbacks fire on the poll thread inside librdkafka; the context queues
//! them and the coordinator drains the queue at the top of each poll cycle.

use crate::config::{KafkaConfig, OffsetReset};
use crate::error::{Error, KafkaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A message pulled off the log.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message payload
    pub payload: Vec<u8>,
}

/// Partition ownership change reported by the group coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions gained
    Assigned(Vec<i32>),
    /// Partitions lost
    Revoked(Vec<i32>),
}

/// Narrow consumer contract used by the coordinator.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Poll for the next message; `None` on timeout.
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>>;

    /// Drain queued rebalance events.
    fn take_rebalance_events(&self) -> Vec<RebalanceEvent>;

    /// Position a partition at the given offset for the next read.
    fn seek(&self, partition: i32, offset: i64) -> Result<()>;

    /// Commit offsets. `offsets` holds the last *stored* offset per
    /// partition; the committed value is `offset + 1`, the next offset to
    /// read (Kafka convention).
    async fn commit(&self, offsets: &[(i32, i64)]) -> Result<()>;

    /// Unsubscribe and shut down.
    fn close(&self);
}

/// Exponential backoff configuration for retried operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Maximum number of attempts
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with custom bounds.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Backoff delay before retry `attempt` (0-based): full exponential
    /// `min(base * 2^attempt, max)` plus 0-50% jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20)).min(max_ms);

        // Jitter without an RNG: clock nanos are noisy enough here
        let jitter_range = delay_ms / 2;
        let jitter = if jitter_range > 0 {
            (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range + 1)
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }
}

/// Consumer context that queues rebalance events for the poll loop.
pub struct RebalanceContext {
    events: Arc<Mutex<VecDeque<RebalanceEvent>>>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        debug!(?rebalance, "Pre rebalance");
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = partitions_of(tpl);
                info!(?partitions, "Partitions assigned");
                if !partitions.is_empty() {
                    self.events
                        .lock()
                        .push_back(RebalanceEvent::Assigned(partitions));
                }
            }
            Rebalance::Revoke(tpl) => {
                let partitions = partitions_of(tpl);
                info!(?partitions, "Partitions revoked");
                if !partitions.is_empty() {
                    self.events
                        .lock()
                        .push_back(RebalanceEvent::Revoked(partitions));
                }
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "Rebalance error");
            }
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<i32> {
    let mut partitions: Vec<i32> = tpl.elements().iter().map(|e| e.partition()).collect();
    partitions.sort_unstable();
    partitions.dedup();
    partitions
}

/// Builder for the rdkafka-backed consumer.
pub struct KafkaLogConsumerBuilder {
    config: KafkaConfig,
}

impl KafkaLogConsumerBuilder {
    /// Create a builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Build the consumer and subscribe to the configured topic.
    pub fn build(self) -> Result<KafkaLogConsumer> {
        let events = Arc::new(Mutex::new(VecDeque::new()));

        let consumer: StreamConsumer<RebalanceContext> = ClientConfig::new()
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("group.id", &self.config.consumer_group)
            // Manual commits only: offsets follow Iceberg durability
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                match self.config.auto_offset_reset {
                    OffsetReset::Earliest => "earliest",
                    OffsetReset::Latest => "latest",
                },
            )
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            // Must exceed the worst-case flush latency or the group evicts us
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky")
            .create_with_context(RebalanceContext {
                events: events.clone(),
            })
            .map_err(|e| {
                Error::Kafka(KafkaError::ConnectionFailed {
                    broker: self.config.brokers.join(","),
                    message: e.to_string(),
                })
            })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            brokers = %self.config.brokers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(KafkaLogConsumer {
            consumer,
            topic: self.config.topic,
            events,
        })
    }
}

/// rdkafka-backed consumer.
pub struct KafkaLogConsumer {
    consumer: StreamConsumer<RebalanceContext>,
    topic: String,
    events: Arc<Mutex<VecDeque<RebalanceEvent>>>,
}

impl KafkaLogConsumer {
    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        tokio::pin!(stream);

        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(msg))) => Ok(Some(ConsumedMessage {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                payload: msg.payload().unwrap_or_default().to_vec(),
            })),
            Ok(Some(Err(e))) => Err(Error::Kafka(KafkaError::ConsumerGroup(e.to_string()))),
            Ok(None) => Err(Error::Kafka(KafkaError::ConsumerClosed)),
            Err(_) => Ok(None), // Timeout
        }
    }

    fn take_rebalance_events(&self) -> Vec<RebalanceEvent> {
        self.events.lock().drain(..).collect()
    }

    fn seek(&self, partition: i32, offset: i64) -> Result<()> {
        self.consumer
            .seek(
                &self.topic,
                partition,
                Offset::Offset(offset),
                Duration::from_secs(5),
            )
            .map_err(|e| {
                Error::Kafka(KafkaError::Seek {
                    partition,
                    message: e.to_string(),
                })
            })?;

        debug!(partition, offset, "Consumer seek");
        Ok(())
    }

    async fn commit(&self, offsets: &[(i32, i64)]) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in offsets {
            // Committed offset is the next offset to read
            tpl.add_partition_offset(&self.topic, *partition, Offset::Offset(offset + 1))
                .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;
        }

        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Sync)
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(?offsets, "Offsets committed");
        Ok(())
    }

    fn close(&self) {
        self.consumer.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_delay_exponential_floor() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(5), 5);

        // Jittered delay lands in [base * 2^n, base * 2^n * 1.5]
        for (attempt, floor_ms) in [(0u32, 100u64), (1, 200), (2, 400), (3, 800)] {
            let delay = config.calculate_delay(attempt);
            assert!(delay >= Duration::from_millis(floor_ms), "attempt {}", attempt);
            assert!(
                delay <= Duration::from_millis(floor_ms + floor_ms / 2),
                "attempt {}",
                attempt
            );
        }
    }

    #[test]
    fn test_calculate_delay_caps_at_max() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(1), 10);

        for attempt in [10u32, 20, 60] {
            let delay = config.calculate_delay(attempt);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_default_retry_config_matches_commit_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_rebalance_event_queue_order() {
        let events = Arc::new(Mutex::new(VecDeque::new()));
        events
            .lock()
            .push_back(RebalanceEvent::Assigned(vec![0, 1]));
        events.lock().push_back(RebalanceEvent::Revoked(vec![1]));

        let drained: Vec<RebalanceEvent> = events.lock().drain(..).collect();
        assert_eq!(
            drained,
            vec![
                RebalanceEvent::Assigned(vec![0, 1]),
                RebalanceEvent::Revoked(vec![1]),
            ]
        );
    }

    #[test]
    fn test_partitions_of_sorts_and_dedups() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("t", 2);
        tpl.add_partition("t", 0);
        tpl.add_partition("t", 2);
        assert_eq!(partitions_of(&tpl), vec![0, 2]);
    }
}
