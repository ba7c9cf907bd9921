//! Kafka consumption: the narrow consumer contract used by the coordinator
//! and its rdkafka implementation.

pub mod consumer;

pub use consumer::{
    ConsumedMessage, KafkaLogConsumer, KafkaLogConsumerBuilder, LogConsumer, RebalanceEvent,
    RetryConfig,
};
