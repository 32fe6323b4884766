use crate::config::KafkaConfig;
use crate::events::IngestionEvent;
use crate::processor::{ImageProcessor, ProcessingOutcome};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const REDELIVERY_BACKOFF: Duration = Duration::from_secs(5);
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka consumer feeding staged-object events to the image processor.
///
/// Events are handled strictly one at a time; the offset is committed once
/// an event has been processed or turned into a published failure event.
/// An event whose failure could not be published is redelivered.
pub struct IngestionConsumer {
    consumer: StreamConsumer,
    processor: Arc<ImageProcessor>,
}

impl IngestionConsumer {
    pub fn new(config: &KafkaConfig, processor: Arc<ImageProcessor>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

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

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.ingestion_topic])
            .context("Failed to subscribe to ingestion topic")?;

        info!(
            topic = %config.ingestion_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            processor,
        })
    }

    /// Consume until the stream ends or `shutdown` fires
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting ingestion consumer");

        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Ingestion consumer cancelled");
                    break;
                }
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match message_result {
                Ok(message) => {
                    if !self.process_message(&message).await {
                        self.redeliver(&message).await;
                        continue;
                    }

                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        warn!(error = %e, "Failed to commit offset");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("photos.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Rewind the partition to `message` so it is fetched again
    async fn redeliver(&self, message: &BorrowedMessage<'_>) {
        warn!(
            partition = message.partition(),
            offset = message.offset(),
            "Failure event not published, scheduling redelivery"
        );
        tokio::time::sleep(REDELIVERY_BACKOFF).await;

        if let Err(e) = self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            SEEK_TIMEOUT,
        ) {
            error!(error = %e, "Failed to seek back for redelivery");
        }
    }

    /// Returns false when the event must be delivered again
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> bool {
        let event = match decode(message.payload()) {
            Ok(event) => event,
            Err(e) => {
                // nothing to report on without a bucket and key
                error!(error = %e, "Dropping malformed ingestion event");
                metrics::counter!("photos.ingestion.malformed").increment(1);
                return true;
            }
        };

        debug!(bucket = %event.bucket(), key = %event.key(), "Received ingestion event");

        let outcome = self.processor.handle(&event).await;
        match &outcome {
            ProcessingOutcome::Processed(record) => {
                debug!(photo_id = %record.id, "Ingestion event handled");
            }
            ProcessingOutcome::Failed(failure) => {
                debug!(reason = %failure.reason, "Ingestion event converted to failure event");
            }
            ProcessingOutcome::Unreported(failure) => {
                debug!(reason = %failure.reason, "Ingestion event left uncommitted");
            }
        }
        outcome.is_settled()
    }
}

fn decode(payload: Option<&[u8]>) -> Result<IngestionEvent> {
    let payload = payload.context("Message has no payload")?;
    serde_json::from_slice(payload).context("Failed to deserialize ingestion event")
}
