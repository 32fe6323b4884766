//! Photo Service
//!
//! Ingests user-uploaded photos, watermarks them asynchronously and manages
//! their lifecycle (active → recycled → permanently deleted), while pushing
//! live upload notifications to the uploader's connected clients.
//!
//! ## Features
//!
//! - **Ingestion pipeline**: object-created events for the staging bucket are
//!   consumed from Kafka; each staged image is watermarked, written to the
//!   primary bucket, recorded in PostgreSQL and announced to the uploader
//! - **Failure events**: a failed ingestion is published to a failure topic
//!   and the staged object is kept for re-driving
//! - **Lifecycle state machine**: recycle, restore and permanent delete guarded
//!   by conditional writes, so concurrent requests have exactly one winner
//! - **Access URL cache**: presigned URLs are stored with the record and only
//!   regenerated when older than their lifetime
//! - **Push sessions**: websocket clients register a session per connection;
//!   notifications are best effort
//!
//! ## Architecture
//!
//! ```text
//!  Kafka (ingestion)        S3 staging           S3 primary
//! ┌──────────────┐        ┌────────────┐       ┌──────────────┐
//! │ object       │        │ {key}      │──────▶│ {key}        │
//! │ created      │        └────────────┘       │ recycled/    │
//! └──────────────┘              │              │   {owner}/   │
//!        │                      │              └──────────────┘
//!        ▼                      ▼                     ▲
//! ┌──────────────┐        ┌────────────┐              │
//! │ Ingestion    │───────▶│ Image      │──────────────┤
//! │ Consumer     │        │ Processor  │              │
//! └──────────────┘        └────────────┘              │
//!                           │   │    │                │
//!            failure topic ◀┘   │    ▼                │
//!                               │  ┌────────────┐   ┌──────────────┐
//!                               │  │ Notifier   │   │ Lifecycle    │
//!                               │  └────────────┘   │ Service      │
//!                               ▼        │          └──────────────┘
//!                        ┌────────────┐  ▼                 ▲
//!                        │ PostgreSQL │ websocket      HTTP API
//!                        └────────────┘ sessions
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod kafka_consumer;
pub mod lifecycle;
pub mod metadata_store;
pub mod model;
pub mod notifier;
pub mod object_store;
pub mod processor;
pub mod push_gateway;
pub mod sessions;
pub mod watermark;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{PhotoError, PhotoResult};
pub use events::{FailureEvent, FailureSink, IngestionEvent, KafkaFailureSink};
pub use kafka_consumer::IngestionConsumer;
pub use lifecycle::{LifecycleSettings, PhotoLifecycleService, ShareUrl};
pub use metadata_store::{PgPhotoRepository, PhotoRepository, Transition};
pub use model::{
    ImageContent, LifecycleState, ListedPhoto, OwnershipFilter, PhotoRecord, RecycleBin,
};
pub use notifier::{DispatchReport, Notification, NotificationDispatcher, PushEndpoint, PushOutcome};
pub use object_store::{missing_copy_source, ObjectStore, S3ObjectStore, StoredObject};
pub use processor::{ImageProcessor, ProcessingOutcome, ProcessorSettings};
pub use push_gateway::PushHub;
pub use sessions::{PgSessionRegistry, SessionRegistry};
