//! Ingestion pipeline: staged upload → watermarked photo in the primary bucket.

use crate::error::{PhotoError, PhotoResult};
use crate::events::{FailureEvent, FailureSink, IngestionEvent};
use crate::metadata_store::PhotoRepository;
use crate::model::{photo_id_for, LifecycleState, PhotoRecord, RecycleBin};
use crate::notifier::{Notification, NotificationDispatcher};
use crate::object_store::ObjectStore;
use crate::watermark::{apply_watermark, watermark_lines, SourceFormat};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Object metadata keys set at upload time
pub const META_EMAIL: &str = "email";
pub const META_FIRST_NAME: &str = "firstname";
pub const META_LAST_NAME: &str = "lastname";

/// Settings the processor needs from configuration
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub primary_bucket: String,
    pub access_url_ttl: Duration,
    pub recycle_bin: RecycleBin,
    pub success_message: String,
}

/// Outcome of handling one ingestion event
#[derive(Debug)]
pub enum ProcessingOutcome {
    Processed(PhotoRecord),
    /// The pipeline aborted; the failure event was handed to the failure sink
    Failed(FailureEvent),
    /// The pipeline aborted and the failure event could not be published
    Unreported(FailureEvent),
}

impl ProcessingOutcome {
    /// Whether the event is finished with and its offset may be committed
    pub fn is_settled(&self) -> bool {
        !matches!(self, ProcessingOutcome::Unreported(_))
    }
}

/// Uploader identity carried on the staged object
#[derive(Debug, Clone)]
struct Uploader {
    email: String,
    given_name: String,
    family_name: String,
}

impl Uploader {
    fn from_metadata(metadata: &HashMap<String, String>) -> PhotoResult<Self> {
        let field = |name: &str| {
            metadata
                .get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    PhotoError::Validation(format!("Object metadata is missing '{name}'"))
                })
        };

        Ok(Self {
            email: field(META_EMAIL)?,
            given_name: field(META_FIRST_NAME)?,
            family_name: field(META_LAST_NAME)?,
        })
    }
}

/// Processes one ingestion event at a time.
///
/// Steps run strictly in order: read, validate, watermark, write to the
/// primary bucket, presign, persist, notify, delete the staged copy. A
/// failure before the record is persisted emits a failure event and leaves
/// the staged object in place.
pub struct ImageProcessor {
    objects: Arc<dyn ObjectStore>,
    photos: Arc<dyn PhotoRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    failures: Arc<dyn FailureSink>,
    settings: ProcessorSettings,
}

impl ImageProcessor {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        photos: Arc<dyn PhotoRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        failures: Arc<dyn FailureSink>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            objects,
            photos,
            dispatcher,
            failures,
            settings,
        }
    }

    /// Handle an ingestion event, converting any pipeline error into a
    /// failure event. Never retries.
    #[instrument(skip(self, event), fields(bucket = %event.bucket(), key = %event.key()))]
    pub async fn handle(&self, event: &IngestionEvent) -> ProcessingOutcome {
        let started = Instant::now();
        let mut owner = None;

        match self.run(event, &mut owner).await {
            Ok(record) => {
                metrics::counter!("photos.ingestion.processed").increment(1);
                metrics::histogram!("photos.ingestion.duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                ProcessingOutcome::Processed(record)
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "Image processing failed");
                metrics::counter!("photos.ingestion.failed").increment(1);

                let failure = FailureEvent {
                    reason: e.to_string(),
                    email: owner,
                    object_key: event.key().to_string(),
                    retryable: e.is_retryable(),
                };
                if let Err(publish_err) = self.failures.publish(&failure).await {
                    error!(error = %publish_err, "Failed to publish failure event");
                    metrics::counter!("photos.ingestion.unreported").increment(1);
                    return ProcessingOutcome::Unreported(failure);
                }
                ProcessingOutcome::Failed(failure)
            }
        }
    }

    async fn run(
        &self,
        event: &IngestionEvent,
        owner: &mut Option<String>,
    ) -> PhotoResult<PhotoRecord> {
        let (bucket, key) = (event.bucket(), event.key());

        let staged = self
            .objects
            .get(bucket, key)
            .await?
            .ok_or_else(|| PhotoError::Processing(format!("Staged object not found: {key}")))?;

        let uploader = Uploader::from_metadata(&staged.metadata)?;
        *owner = Some(uploader.email.clone());

        let photo_id = photo_id_for(bucket, key, staged.e_tag.as_deref());
        if let Some(existing) = self.photos.get(photo_id).await? {
            info!(photo_id = %existing.id, state = %existing.state, "Upload already processed");
            self.discard_staged(bucket, key).await;
            return Ok(existing);
        }

        if self.settings.recycle_bin.is_reserved(key) {
            return Err(PhotoError::Validation(format!(
                "Object key lies under the reserved recycle prefix: {key}"
            )));
        }

        let format = SourceFormat::from_key(key)?;

        let lines = watermark_lines(
            &uploader.given_name,
            &uploader.family_name,
            Utc::now().date_naive(),
        );
        let data = staged.bytes.clone();
        let watermarked = tokio::task::spawn_blocking(move || apply_watermark(&data, format, &lines))
            .await
            .map_err(|e| PhotoError::Processing(format!("Watermark task failed: {e}")))??;

        info!(
            width = watermarked.width,
            height = watermarked.height,
            size_bytes = watermarked.bytes.len(),
            "Watermark applied"
        );

        let primary = &self.settings.primary_bucket;
        self.objects
            .put(
                primary,
                key,
                watermarked.bytes,
                watermarked.content_type,
                &staged.metadata,
            )
            .await?;

        let access_url = self
            .objects
            .presign_get(primary, key, self.settings.access_url_ttl)
            .await?;

        let now = Utc::now();
        let record = PhotoRecord {
            id: photo_id,
            owner: uploader.email.clone(),
            object_key: key.to_string(),
            state: LifecycleState::Active,
            uploaded_at: now,
            access_url,
            access_url_generated_at: Some(now),
        };

        let record = if self.photos.insert(&record).await? {
            record
        } else {
            // a concurrent delivery of the same upload stored it first
            self.photos.get(record.id).await?.unwrap_or(record)
        };

        let notification = Notification {
            message: self.settings.success_message.clone(),
        };
        let report = self.dispatcher.notify(&uploader.email, &notification).await;

        self.discard_staged(bucket, key).await;

        info!(
            photo_id = %record.id,
            owner = %record.owner,
            delivered = report.delivered,
            gone = report.gone,
            "Image processed"
        );

        Ok(record)
    }

    async fn discard_staged(&self, bucket: &str, key: &str) {
        if let Err(e) = self.objects.delete(bucket, key).await {
            warn!(error = %e, "Failed to delete staged object");
        }
    }
}
