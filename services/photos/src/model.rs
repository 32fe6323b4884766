use crate::error::PhotoError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Recycled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Recycled => "recycled",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleState::Active),
            "recycled" => Ok(LifecycleState::Recycled),
            other => Err(format!("unknown lifecycle state: {other}")),
        }
    }
}

/// A processed photo as persisted in the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: Uuid,
    /// Stable user identifier (the uploader's email)
    pub owner: String,
    /// Current location in the primary bucket
    pub object_key: String,
    pub state: LifecycleState,
    pub uploaded_at: DateTime<Utc>,
    /// Cached, time-boxed URL for `object_key`
    pub access_url: String,
    /// `None` when the stored timestamp is missing or unreadable
    pub access_url_generated_at: Option<DateTime<Utc>>,
}

impl PhotoRecord {
    /// Whether the cached access URL must be regenerated before serving it.
    pub fn access_url_is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Some(generated_at) = self.access_url_generated_at else {
            return true;
        };
        let ttl = chrono::Duration::seconds(ttl.as_secs().min(i64::MAX as u64 / 1000) as i64);
        now.signed_duration_since(generated_at) > ttl
    }
}

/// Deterministic photo id for a staged object.
///
/// Redelivery of the same ingestion event maps to the same id, so record
/// creation can be made create-if-absent.
pub fn photo_id_for(bucket: &str, key: &str, version_tag: Option<&str>) -> Uuid {
    let name = format!("{}/{}#{}", bucket, key, version_tag.unwrap_or_default());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

/// Which photos a listing should return relative to the requester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipFilter {
    Own,
    Others,
}

impl FromStr for OwnershipFilter {
    type Err = PhotoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "own" | "own-photo" => Ok(OwnershipFilter::Own),
            "others" | "others-photo" => Ok(OwnershipFilter::Others),
            other => Err(PhotoError::Validation(format!(
                "Invalid ownership type: {other}"
            ))),
        }
    }
}

/// Key layout of the per-owner recycle bin inside the primary bucket.
///
/// A recycled object lives at `{prefix}/{owner}/{original_key}`.
#[derive(Debug, Clone)]
pub struct RecycleBin {
    prefix: String,
}

impl RecycleBin {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix }
    }

    fn owner_prefix(&self, owner: &str) -> String {
        format!("{}/{}/", self.prefix, owner)
    }

    /// Location of `key` once `owner` has recycled it
    pub fn recycled_key(&self, owner: &str, key: &str) -> String {
        format!("{}{}", self.owner_prefix(owner), key)
    }

    /// Original location of a recycled key, or `None` if the key is not
    /// inside `owner`'s recycle bin
    pub fn restored_key(&self, owner: &str, recycled_key: &str) -> Option<String> {
        recycled_key
            .strip_prefix(&self.owner_prefix(owner))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    }

    /// Whether a key falls anywhere under the reserved recycle prefix
    pub fn is_reserved(&self, key: &str) -> bool {
        key.strip_prefix(&self.prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    }
}

/// Image bytes attached to a listed photo
#[derive(Debug, Clone, PartialEq)]
pub enum ImageContent {
    Loaded(Bytes),
    /// The fetch failed; the photo is still listed
    Unavailable(String),
}

/// A listing entry: the (possibly URL-refreshed) record plus its bytes
#[derive(Debug, Clone)]
pub struct ListedPhoto {
    pub record: PhotoRecord,
    pub content: ImageContent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(generated_at: Option<DateTime<Utc>>) -> PhotoRecord {
        PhotoRecord {
            id: Uuid::new_v4(),
            owner: "a@b.com".to_string(),
            object_key: "abc.png".to_string(),
            state: LifecycleState::Active,
            uploaded_at: Utc::now(),
            access_url: "https://primary/abc.png".to_string(),
            access_url_generated_at: generated_at,
        }
    }

    #[test]
    fn test_access_url_staleness() {
        let now = Utc::now();
        let ttl = Duration::from_secs(24 * 3600);

        assert!(record(Some(now - chrono::Duration::hours(25))).access_url_is_stale(now, ttl));
        assert!(!record(Some(now - chrono::Duration::hours(1))).access_url_is_stale(now, ttl));
        assert!(record(None).access_url_is_stale(now, ttl));
    }

    #[test]
    fn test_recycle_bin_keys() {
        let bin = RecycleBin::new("recycled/");

        let recycled = bin.recycled_key("a@b.com", "trips/abc.png");
        assert_eq!(recycled, "recycled/a@b.com/trips/abc.png");
        assert_eq!(
            bin.restored_key("a@b.com", &recycled).as_deref(),
            Some("trips/abc.png")
        );
        assert_eq!(bin.restored_key("c@d.com", &recycled), None);
        assert!(bin.is_reserved(&recycled));
        assert!(!bin.is_reserved("recycled-photos/abc.png"));
        assert!(!bin.is_reserved("abc.png"));
    }

    #[test]
    fn test_ownership_filter_parsing() {
        assert_eq!("own".parse::<OwnershipFilter>().unwrap(), OwnershipFilter::Own);
        assert_eq!(
            "Others-Photo".parse::<OwnershipFilter>().unwrap(),
            OwnershipFilter::Others
        );
        assert!(matches!(
            "everyone".parse::<OwnershipFilter>(),
            Err(PhotoError::Validation(_))
        ));
    }

    #[test]
    fn test_photo_id_is_deterministic() {
        let a = photo_id_for("staging", "abc.png", Some("\"etag-1\""));
        let b = photo_id_for("staging", "abc.png", Some("\"etag-1\""));
        let c = photo_id_for("staging", "abc.png", Some("\"etag-2\""));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_lifecycle_state_round_trip() {
        for state in [LifecycleState::Active, LifecycleState::Recycled] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
        assert!("deleted".parse::<LifecycleState>().is_err());
    }
}
