pub mod error;

pub use error::{KafkaRestError, Result};

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

const JSON_V2: &str = "application/vnd.kafka.json.v2+json";
const KAFKA_V2: &str = "application/vnd.kafka.v2+json";

/// Client for a Kafka REST proxy: keyed JSON produce plus consumer-instance
/// based pull consumption.
pub struct KafkaRestClient {
    client: reqwest::Client,
    base_url: String,
}

/// A server-side consumer instance. Polling and deletion go through its
/// `base_uri`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerInstance {
    pub instance_id: String,
    pub base_uri: String,
}

/// One consumed record. `key` and `value` are raw JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerRecord {
    pub topic: String,
    pub key: Option<serde_json::Value>,
    pub value: serde_json::Value,
    pub partition: i32,
    pub offset: i64,
}

impl KafkaRestClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Produce one keyed JSON record to a topic. The key drives partition
    /// affinity on the broker side.
    pub async fn produce(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &serde_json::Value,
    ) -> Result<()> {
        let endpoint = format!("{}/topics/{}", self.base_url, topic);
        let body = serde_json::json!({
            "records": [{ "key": key, "value": value }]
        });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", JSON_V2)
            .json(&body)
            .send()
            .await?;

        check_status(resp).await?;
        debug!(topic, "Produced record");
        Ok(())
    }

    /// Create a named consumer instance in a group. JSON format, earliest
    /// offset reset, auto-commit on fetch.
    pub async fn create_consumer(&self, group: &str, name: &str) -> Result<ConsumerInstance> {
        let endpoint = format!("{}/consumers/{}", self.base_url, group);
        let body = serde_json::json!({
            "name": name,
            "format": "json",
            "auto.offset.reset": "earliest",
            "auto.commit.enable": "true",
        });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", KAFKA_V2)
            .json(&body)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Subscribe a consumer instance to a set of topics.
    pub async fn subscribe(&self, consumer: &ConsumerInstance, topics: &[&str]) -> Result<()> {
        let endpoint = format!("{}/subscription", consumer.base_uri);
        let body = serde_json::json!({ "topics": topics });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", KAFKA_V2)
            .json(&body)
            .send()
            .await?;

        check_status(resp).await?;
        Ok(())
    }

    /// Fetch available records, waiting at most `timeout` server-side.
    /// An empty vec means "no more data right now", not an error.
    pub async fn fetch_records(
        &self,
        consumer: &ConsumerInstance,
        timeout: Duration,
    ) -> Result<Vec<ConsumerRecord>> {
        let endpoint = format!(
            "{}/records?timeout={}",
            consumer.base_uri,
            timeout.as_millis()
        );

        let resp = self
            .client
            .get(&endpoint)
            .header("Accept", JSON_V2)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Destroy a consumer instance, releasing its group slot.
    pub async fn delete_consumer(&self, consumer: &ConsumerInstance) -> Result<()> {
        let resp = self
            .client
            .delete(&consumer.base_uri)
            .header("Content-Type", KAFKA_V2)
            .send()
            .await?;

        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(KafkaRestError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}
