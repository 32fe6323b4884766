//! Photo lifecycle: listing with cached access URLs, share links, and the
//! active → recycled → deleted state machine.

use crate::error::{PhotoError, PhotoResult};
use crate::metadata_store::{PhotoRepository, Transition};
use crate::model::{
    ImageContent, LifecycleState, ListedPhoto, OwnershipFilter, PhotoRecord, RecycleBin,
};
use crate::object_store::ObjectStore;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub primary_bucket: String,
    pub access_url_ttl: Duration,
    pub share_url_ttl: Duration,
    pub recycle_bin: RecycleBin,
}

/// Short-lived link handed out for sharing
#[derive(Debug, Clone, PartialEq)]
pub struct ShareUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct PhotoLifecycleService {
    photos: Arc<dyn PhotoRepository>,
    objects: Arc<dyn ObjectStore>,
    settings: LifecycleSettings,
}

impl PhotoLifecycleService {
    pub fn new(
        photos: Arc<dyn PhotoRepository>,
        objects: Arc<dyn ObjectStore>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            photos,
            objects,
            settings,
        }
    }

    /// Active photos owned by (or not owned by) `identity`
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: OwnershipFilter,
        identity: &str,
    ) -> PhotoResult<Vec<ListedPhoto>> {
        let records = match filter {
            OwnershipFilter::Own => {
                self.photos
                    .list_by_owner(identity, LifecycleState::Active)
                    .await?
            }
            OwnershipFilter::Others => {
                self.photos
                    .list_not_owned_by(identity, LifecycleState::Active)
                    .await?
            }
        };

        self.load_all(records).await
    }

    /// Recycled photos owned by `identity`
    #[instrument(skip(self))]
    pub async fn list_recycled(&self, identity: &str) -> PhotoResult<Vec<ListedPhoto>> {
        let records = self
            .photos
            .list_by_owner(identity, LifecycleState::Recycled)
            .await?;

        self.load_all(records).await
    }

    #[instrument(skip(self))]
    pub async fn generate_share_url(&self, id: Uuid, identity: &str) -> PhotoResult<ShareUrl> {
        let record = self.find(id).await?;

        if record.state == LifecycleState::Recycled {
            return Err(PhotoError::Processing(
                "Photo is in the recycle bin and cannot be shared".to_string(),
            ));
        }
        ensure_owner(&record, identity)?;

        let ttl = self.settings.share_url_ttl;
        let url = self
            .objects
            .presign_get(&self.settings.primary_bucket, &record.object_key, ttl)
            .await?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| PhotoError::Processing(format!("Invalid share URL lifetime: {e}")))?;

        metrics::counter!("photos.share_urls.generated").increment(1);

        Ok(ShareUrl { url, expires_at })
    }

    #[instrument(skip(self))]
    pub async fn move_to_recycle_bin(&self, id: Uuid, identity: &str) -> PhotoResult<PhotoRecord> {
        let record = self.find(id).await?;
        ensure_owner(&record, identity)?;

        if record.state != LifecycleState::Active {
            return Err(conflict("Photo is already in the recycle bin"));
        }

        let destination = self
            .settings
            .recycle_bin
            .recycled_key(&record.owner, &record.object_key);

        self.relocate(
            &record,
            destination,
            LifecycleState::Active,
            LifecycleState::Recycled,
            "Photo is already in the recycle bin",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn restore_from_recycle_bin(
        &self,
        id: Uuid,
        identity: &str,
    ) -> PhotoResult<PhotoRecord> {
        let record = self.find(id).await?;
        ensure_owner(&record, identity)?;

        if record.state != LifecycleState::Recycled {
            return Err(conflict("Photo is already restored"));
        }

        let destination = self
            .settings
            .recycle_bin
            .restored_key(&record.owner, &record.object_key)
            .ok_or_else(|| {
                PhotoError::Processing(format!(
                    "Recycled object key is outside the recycle bin: {}",
                    record.object_key
                ))
            })?;

        self.relocate(
            &record,
            destination,
            LifecycleState::Recycled,
            LifecycleState::Active,
            "Photo is already restored",
        )
        .await
    }

    /// Remove a recycled photo's record and object. The two deletes are not
    /// rolled back if the second one fails.
    #[instrument(skip(self))]
    pub async fn permanently_delete(&self, id: Uuid, identity: &str) -> PhotoResult<()> {
        let record = self.find(id).await?;
        ensure_owner(&record, identity)?;

        if record.state != LifecycleState::Recycled {
            return Err(conflict(
                "Only photos in the recycle bin can be permanently deleted",
            ));
        }

        let deleted = self
            .photos
            .delete_if_recycled(id)
            .await?
            .ok_or_else(|| conflict("Photo was restored or deleted concurrently"))?;

        self.objects
            .delete(&self.settings.primary_bucket, &deleted.object_key)
            .await?;

        metrics::counter!("photos.lifecycle.deleted").increment(1);
        info!(object_key = %deleted.object_key, "Photo permanently deleted");

        Ok(())
    }

    /// Readiness of the metadata store
    pub async fn check_ready(&self) -> PhotoResult<()> {
        self.photos.ping().await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> PhotoResult<PhotoRecord> {
        self.photos
            .get(id)
            .await?
            .ok_or_else(|| PhotoError::NotFound(format!("Photo not found: {id}")))
    }

    /// Copy, presign, conditionally write, then drop the source. A lost
    /// race leaves the copy in place and touches nothing else.
    async fn relocate(
        &self,
        record: &PhotoRecord,
        destination: String,
        from: LifecycleState,
        to: LifecycleState,
        conflict_message: &str,
    ) -> PhotoResult<PhotoRecord> {
        let bucket = &self.settings.primary_bucket;

        let access_url = match self.stage_copy(&record.object_key, &destination).await {
            Ok(url) => url,
            Err(e) => {
                // the winner of a concurrent move may already have removed our source
                if self.left_state(record.id, from).await? {
                    metrics::counter!("photos.lifecycle.conflicts").increment(1);
                    return Err(conflict(conflict_message));
                }
                return Err(e);
            }
        };

        let transition = Transition {
            from,
            to,
            object_key: destination,
            access_url,
            access_url_generated_at: Utc::now(),
        };

        let Some(updated) = self.photos.transition(record.id, &transition).await? else {
            metrics::counter!("photos.lifecycle.conflicts").increment(1);
            return Err(conflict(conflict_message));
        };

        if let Err(e) = self.objects.delete(bucket, &record.object_key).await {
            warn!(
                object_key = %record.object_key,
                error = %e,
                "Failed to delete relocated source object"
            );
        }

        metrics::counter!("photos.lifecycle.transitions", "to" => to.as_str()).increment(1);
        info!(
            from = %from,
            to = %to,
            object_key = %updated.object_key,
            "Photo relocated"
        );

        Ok(updated)
    }

    async fn stage_copy(&self, source: &str, destination: &str) -> PhotoResult<String> {
        let bucket = &self.settings.primary_bucket;

        self.objects
            .copy(bucket, source, bucket, destination)
            .await?;

        let url = self
            .objects
            .presign_get(bucket, destination, self.settings.access_url_ttl)
            .await?;
        Ok(url)
    }

    /// True when the record is gone or no longer in `state`
    async fn left_state(&self, id: Uuid, state: LifecycleState) -> PhotoResult<bool> {
        let current = self.photos.get(id).await?;
        Ok(current.map_or(true, |record| record.state != state))
    }

    async fn load_all(&self, records: Vec<PhotoRecord>) -> PhotoResult<Vec<ListedPhoto>> {
        let workers = records.len().max(1);

        stream::iter(records)
            .map(|record| self.load(record))
            .buffered(workers)
            .try_collect()
            .await
    }

    async fn load(&self, record: PhotoRecord) -> PhotoResult<ListedPhoto> {
        let record = self.refresh_if_stale(record).await?;

        let content = match self
            .objects
            .get(&self.settings.primary_bucket, &record.object_key)
            .await
        {
            Ok(Some(object)) => ImageContent::Loaded(object.bytes),
            Ok(None) => ImageContent::Unavailable("Object not found".to_string()),
            Err(e) => {
                warn!(photo_id = %record.id, error = %e, "Failed to fetch photo bytes");
                ImageContent::Unavailable(format!("{e:#}"))
            }
        };

        Ok(ListedPhoto { record, content })
    }

    async fn refresh_if_stale(&self, mut record: PhotoRecord) -> PhotoResult<PhotoRecord> {
        let now = Utc::now();
        if !record.access_url_is_stale(now, self.settings.access_url_ttl) {
            return Ok(record);
        }

        let url = self
            .objects
            .presign_get(
                &self.settings.primary_bucket,
                &record.object_key,
                self.settings.access_url_ttl,
            )
            .await?;
        self.photos.refresh_access_url(record.id, &url, now).await?;

        metrics::counter!("photos.access_urls.refreshed").increment(1);
        debug!(photo_id = %record.id, "Access URL refreshed");

        record.access_url = url;
        record.access_url_generated_at = Some(now);
        Ok(record)
    }
}

fn ensure_owner(record: &PhotoRecord, identity: &str) -> PhotoResult<()> {
    if record.owner == identity {
        Ok(())
    } else {
        Err(PhotoError::Unauthorized(
            "You are not the owner of this photo".to_string(),
        ))
    }
}

fn conflict(message: &str) -> PhotoError {
    PhotoError::StateConflict(message.to_string())
}
