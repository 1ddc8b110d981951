use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kafka_rest_client::{ConsumerInstance, KafkaRestClient};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Topic carrying raw page captures, keyed by URL.
pub const TOPIC_RAW_CAPTURE: &str = "raw-capture-stream";
/// Topic carrying validated, deduplicated opportunities, keyed by content_id.
pub const TOPIC_ENRICHED: &str = "enriched-opportunity-stream";

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub topic: String,
    pub key: Option<String>,
    pub value: serde_json::Value,
}

/// Durable, partitioned, at-least-once log connecting pipeline stages.
/// Values are UTF-8 JSON; keys drive partition affinity.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Pull the next available message, waiting at most `timeout`.
    /// `Ok(None)` means "no more data right now"; `Err` is a real error.
    async fn poll(&self, timeout: Duration) -> Result<Option<StreamMessage>>;

    /// Bound publish latency: force any buffered records out.
    async fn flush(&self) -> Result<()>;

    /// Release consumer/producer handles. Called once on orderly stop.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// --- Kafka REST proxy transport ---

/// Transport backed by a Kafka REST proxy. The consumer instance is created
/// and subscribed lazily on the first poll; fetches return many records at
/// once, so polls drain a local buffer between fetches.
pub struct KafkaRestTransport {
    client: KafkaRestClient,
    group: String,
    topics: Vec<String>,
    consumer: Mutex<Option<ConsumerInstance>>,
    buffer: Mutex<VecDeque<StreamMessage>>,
}

impl KafkaRestTransport {
    pub fn new(base_url: &str, group: &str) -> Self {
        Self {
            client: KafkaRestClient::new(base_url),
            group: group.to_string(),
            topics: Vec::new(),
            consumer: Mutex::new(None),
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Topics this transport consumes from. A producer-only transport
    /// subscribes to nothing and always polls `Ok(None)`.
    pub fn with_subscription(mut self, topics: &[&str]) -> Self {
        self.topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    async fn ensure_consumer(&self) -> Result<ConsumerInstance> {
        let mut guard = self.consumer.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let name = format!("{}-{}", self.group, uuid::Uuid::new_v4());
        let instance = self
            .client
            .create_consumer(&self.group, &name)
            .await
            .context("Failed to create consumer instance")?;

        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.client
            .subscribe(&instance, &topics)
            .await
            .context("Failed to subscribe consumer")?;

        info!(
            group = self.group.as_str(),
            instance = instance.instance_id.as_str(),
            ?topics,
            "Consumer instance ready"
        );
        *guard = Some(instance.clone());
        Ok(instance)
    }
}

#[async_trait]
impl StreamTransport for KafkaRestTransport {
    async fn publish(&self, topic: &str, key: &str, value: &serde_json::Value) -> Result<()> {
        self.client
            .produce(topic, Some(key), value)
            .await
            .with_context(|| format!("Publish to {topic} failed"))
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<StreamMessage>> {
        if self.topics.is_empty() {
            return Ok(None);
        }

        {
            let mut buffer = self.buffer.lock().await;
            if let Some(msg) = buffer.pop_front() {
                return Ok(Some(msg));
            }
        }

        let consumer = self.ensure_consumer().await?;
        let records = self
            .client
            .fetch_records(&consumer, timeout)
            .await
            .context("Record fetch failed")?;

        if records.is_empty() {
            return Ok(None);
        }
        debug!(count = records.len(), "Fetched records");

        let mut buffer = self.buffer.lock().await;
        for record in records {
            buffer.push_back(StreamMessage {
                topic: record.topic,
                key: record.key.and_then(|k| k.as_str().map(str::to_string)),
                value: record.value,
            });
        }
        Ok(buffer.pop_front())
    }

    async fn flush(&self) -> Result<()> {
        // REST proxy produce requests are acknowledged synchronously; there
        // is no client-side buffer to drain.
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.consumer.lock().await;
        if let Some(instance) = guard.take() {
            self.client
                .delete_consumer(&instance)
                .await
                .context("Failed to delete consumer instance")?;
            info!(instance = instance.instance_id.as_str(), "Consumer instance released");
        }
        Ok(())
    }
}
