//! In-memory stand-ins for the external collaborators.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use photo_service::{
    missing_copy_source, FailureEvent, FailureSink, ImageProcessor, LifecycleSettings, LifecycleState,
    NotificationDispatcher, ObjectStore, PhotoLifecycleService, PhotoRecord, PhotoRepository,
    ProcessorSettings, PushEndpoint, PushOutcome, RecycleBin, SessionRegistry, StoredObject,
    Transition,
};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const STAGING: &str = "photos-staging";
pub const PRIMARY: &str = "photos-primary";
pub const ACCESS_TTL: Duration = Duration::from_secs(24 * 3600);
pub const SHARE_TTL: Duration = Duration::from_secs(3 * 3600);

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    unreadable: Mutex<HashSet<(String, String)>>,
    writes: AtomicUsize,
    presigned: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn seed(&self, bucket: &str, key: &str, bytes: Vec<u8>, metadata: &[(&str, &str)]) {
        let object = StoredObject {
            bytes: Bytes::from(bytes),
            content_type: None,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            e_tag: Some(format!("\"{}\"", Uuid::new_v4().simple())),
        };
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), object);
    }

    pub fn seed_object(&self, bucket: &str, key: &str, object: StoredObject) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), object);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object(bucket, key).is_some()
    }

    /// Make reads and copies of one object fail
    pub fn make_unreadable(&self, bucket: &str, key: &str) {
        self.unreadable
            .lock()
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Puts, copies and deletes performed so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let id = (bucket.to_string(), key.to_string());
        if self.unreadable.lock().contains(&id) {
            return Err(anyhow!("read timed out for {bucket}/{key}"));
        }
        Ok(self.objects.lock().get(&id).cloned())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let object = StoredObject {
            bytes,
            content_type: Some(content_type.to_string()),
            metadata: metadata.clone(),
            e_tag: Some(format!("\"{}\"", Uuid::new_v4().simple())),
        };
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let id = (src_bucket.to_string(), src_key.to_string());
        if self.unreadable.lock().contains(&id) {
            return Err(anyhow!("copy timed out for {src_bucket}/{src_key}"));
        }
        let mut objects = self.objects.lock();
        let source = objects
            .get(&id)
            .cloned()
            .ok_or_else(|| missing_copy_source(src_bucket, src_key))?;
        objects.insert((dst_bucket.to_string(), dst_key.to_string()), source);
        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        let n = self.presigned.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://{bucket}.test/{key}?expires={}&sig={n}",
            ttl.as_secs()
        ))
    }
}

/// Wraps a repository and answers the first `get` with a pinned snapshot,
/// as if the record was read just before another caller changed it
pub struct StaleReadRepository {
    inner: Arc<MemoryPhotoRepository>,
    snapshot: Mutex<Option<PhotoRecord>>,
}

impl StaleReadRepository {
    pub fn new(inner: Arc<MemoryPhotoRepository>, snapshot: PhotoRecord) -> Self {
        Self {
            inner,
            snapshot: Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl PhotoRepository for StaleReadRepository {
    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        let pinned = self.snapshot.lock().take();
        match pinned {
            Some(record) if record.id == id => Ok(Some(record)),
            _ => self.inner.get(id).await,
        }
    }

    async fn insert(&self, record: &PhotoRecord) -> Result<bool> {
        self.inner.insert(record).await
    }

    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Option<PhotoRecord>> {
        self.inner.transition(id, transition).await
    }

    async fn refresh_access_url(
        &self,
        id: Uuid,
        access_url: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.refresh_access_url(id, access_url, generated_at).await
    }

    async fn delete_if_recycled(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        self.inner.delete_if_recycled(id).await
    }

    async fn list_by_owner(&self, owner: &str, state: LifecycleState) -> Result<Vec<PhotoRecord>> {
        self.inner.list_by_owner(owner, state).await
    }

    async fn list_not_owned_by(
        &self,
        owner: &str,
        state: LifecycleState,
    ) -> Result<Vec<PhotoRecord>> {
        self.inner.list_not_owned_by(owner, state).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Photo records with the same conditional-write semantics as the SQL store
#[derive(Default)]
pub struct MemoryPhotoRepository {
    records: Mutex<HashMap<Uuid, PhotoRecord>>,
}

impl MemoryPhotoRepository {
    pub fn seed(&self, record: PhotoRecord) {
        self.records.lock().insert(record.id, record);
    }

    pub fn record(&self, id: Uuid) -> Option<PhotoRecord> {
        self.records.lock().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<PhotoRecord> {
        self.records.lock().values().cloned().collect()
    }
}

#[async_trait]
impl PhotoRepository for MemoryPhotoRepository {
    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        Ok(self.record(id))
    }

    async fn insert(&self, record: &PhotoRecord) -> Result<bool> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        records.insert(record.id, record.clone());
        Ok(true)
    }

    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Option<PhotoRecord>> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.state != transition.from {
            return Ok(None);
        }
        record.state = transition.to;
        record.object_key = transition.object_key.clone();
        record.access_url = transition.access_url.clone();
        record.access_url_generated_at = Some(transition.access_url_generated_at);
        Ok(Some(record.clone()))
    }

    async fn refresh_access_url(
        &self,
        id: Uuid,
        access_url: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.access_url = access_url.to_string();
            record.access_url_generated_at = Some(generated_at);
        }
        Ok(())
    }

    async fn delete_if_recycled(&self, id: Uuid) -> Result<Option<PhotoRecord>> {
        let mut records = self.records.lock();
        let recycled = records
            .get(&id)
            .map(|r| r.state == LifecycleState::Recycled)
            .unwrap_or(false);
        if recycled {
            Ok(records.remove(&id))
        } else {
            Ok(None)
        }
    }

    async fn list_by_owner(&self, owner: &str, state: LifecycleState) -> Result<Vec<PhotoRecord>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|r| r.owner == owner && r.state == state)
            .collect())
    }

    async fn list_not_owned_by(
        &self,
        owner: &str,
        state: LifecycleState,
    ) -> Result<Vec<PhotoRecord>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|r| r.owner != owner && r.state == state)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionRegistry {
    sessions: Mutex<Vec<(String, String)>>,
}

impl MemorySessionRegistry {
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn put(&self, session_id: &str, owner: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|(id, _)| id != session_id);
        sessions.push((session_id.to_string(), owner.to_string()));
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().retain(|(id, _)| id != session_id);
        Ok(())
    }

    async fn query_by_owner(&self, owner: &str) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .lock()
            .iter()
            .filter(|(_, o)| o == owner)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// Push endpoint that records every attempt
#[derive(Default)]
pub struct RecordingPushEndpoint {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    gone: Mutex<HashSet<String>>,
}

impl RecordingPushEndpoint {
    pub fn mark_gone(&self, session_id: &str) {
        self.gone.lock().insert(session_id.to_string());
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PushEndpoint for RecordingPushEndpoint {
    async fn send(&self, session_id: &str, payload: Vec<u8>) -> Result<PushOutcome> {
        self.sent.lock().push((session_id.to_string(), payload));
        if self.gone.lock().contains(session_id) {
            Ok(PushOutcome::Gone)
        } else {
            Ok(PushOutcome::Delivered)
        }
    }
}

#[derive(Default)]
pub struct RecordingFailureSink {
    events: Mutex<Vec<FailureEvent>>,
    unavailable: AtomicBool,
}

impl RecordingFailureSink {
    pub fn events(&self) -> Vec<FailureEvent> {
        self.events.lock().clone()
    }

    /// Make every publish fail
    pub fn make_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FailureSink for RecordingFailureSink {
    async fn publish(&self, event: &FailureEvent) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("broker unreachable"));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Every fake wired into a processor and a lifecycle service
pub struct Harness {
    pub objects: Arc<MemoryObjectStore>,
    pub photos: Arc<MemoryPhotoRepository>,
    pub sessions: Arc<MemorySessionRegistry>,
    pub push: Arc<RecordingPushEndpoint>,
    pub failures: Arc<RecordingFailureSink>,
    pub processor: ImageProcessor,
    pub lifecycle: Arc<PhotoLifecycleService>,
}

impl Harness {
    pub fn new() -> Self {
        let objects = Arc::new(MemoryObjectStore::default());
        let photos = Arc::new(MemoryPhotoRepository::default());
        let sessions = Arc::new(MemorySessionRegistry::default());
        let push = Arc::new(RecordingPushEndpoint::default());
        let failures = Arc::new(RecordingFailureSink::default());
        let recycle_bin = RecycleBin::new("recycled");

        let dispatcher = Arc::new(NotificationDispatcher::new(
            sessions.clone(),
            push.clone(),
            true,
        ));

        let processor = ImageProcessor::new(
            objects.clone(),
            photos.clone(),
            dispatcher,
            failures.clone(),
            ProcessorSettings {
                primary_bucket: PRIMARY.to_string(),
                access_url_ttl: ACCESS_TTL,
                recycle_bin,
                success_message: "Image processed successfully".to_string(),
            },
        );

        let lifecycle = Arc::new(PhotoLifecycleService::new(
            photos.clone(),
            objects.clone(),
            lifecycle_settings(),
        ));

        Self {
            objects,
            photos,
            sessions,
            push,
            failures,
            processor,
            lifecycle,
        }
    }

    /// A second lifecycle service over the same objects but another repository
    pub fn lifecycle_with(&self, photos: Arc<dyn PhotoRepository>) -> PhotoLifecycleService {
        PhotoLifecycleService::new(photos, self.objects.clone(), lifecycle_settings())
    }

    /// Store an active photo in the primary bucket and return its record
    pub fn active_photo(&self, owner: &str, key: &str, generated_at: DateTime<Utc>) -> PhotoRecord {
        self.objects.seed(PRIMARY, key, b"watermarked".to_vec(), &[]);
        let record = PhotoRecord {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            object_key: key.to_string(),
            state: LifecycleState::Active,
            uploaded_at: generated_at,
            access_url: format!("https://{PRIMARY}.test/{key}?cached"),
            access_url_generated_at: Some(generated_at),
        };
        self.photos.seed(record.clone());
        record
    }
}

fn lifecycle_settings() -> LifecycleSettings {
    LifecycleSettings {
        primary_bucket: PRIMARY.to_string(),
        access_url_ttl: ACCESS_TTL,
        share_url_ttl: SHARE_TTL,
        recycle_bin: RecycleBin::new("recycled"),
    }
}

/// Encode a solid image of the given size
pub fn sample_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, format)
        .expect("encode sample image");
    out.into_inner()
}

pub fn uploader_metadata() -> [(&'static str, &'static str); 3] {
    [("email", "a@b.com"), ("firstname", "A"), ("lastname", "B")]
}
