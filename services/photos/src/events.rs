use crate::config::KafkaConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Object-created event for the staging bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub detail: IngestionDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionDetail {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
}

impl IngestionEvent {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            detail: IngestionDetail {
                bucket: BucketRef { name: bucket.into() },
                object: ObjectRef { key: key.into() },
            },
        }
    }

    pub fn bucket(&self) -> &str {
        &self.detail.bucket.name
    }

    pub fn key(&self) -> &str {
        &self.detail.object.key
    }
}

/// Emitted when the image processor gives up on an ingestion event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub reason: String,
    /// Uploader, when it could be read from the staged object
    pub email: Option<String>,
    pub object_key: String,
    /// Whether re-driving the event may succeed
    pub retryable: bool,
}

/// Consumer-facing side of the failure notifier
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn publish(&self, event: &FailureEvent) -> Result<()>;
}

/// Publishes failure events to a Kafka topic
pub struct KafkaFailureSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaFailureSink {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", config.delivery_timeout_ms.to_string())
            .set("acks", "all");

        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let producer: FutureProducer = client_config
            .create()
            .context("Failed to create Kafka producer")?;

        info!(topic = %config.failure_topic, "Failure event producer initialized");

        Ok(Self {
            producer,
            topic: config.failure_topic.clone(),
            timeout: config.delivery_timeout(),
        })
    }
}

#[async_trait]
impl FailureSink for KafkaFailureSink {
    #[instrument(skip(self, event), fields(object_key = %event.object_key))]
    async fn publish(&self, event: &FailureEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).context("Failed to serialize failure event")?;

        let record = FutureRecord::to(&self.topic)
            .key(&event.object_key)
            .payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| e)
            .context("Failed to publish failure event")?;

        debug!(partition, offset, "Failure event delivered");
        Ok(())
    }
}
