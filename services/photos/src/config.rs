use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the photo service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload notification configuration
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Kafka configuration for ingestion events and failure events
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying object-created ingestion events for the staging bucket
    #[serde(default = "default_ingestion_topic")]
    pub ingestion_topic: String,
    /// Topic the failure notifier consumes
    #[serde(default = "default_failure_topic")]
    pub failure_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
    /// Failure event delivery timeout in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding processed (served) photos
    pub primary_bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Lifetime of the cached listing URL in seconds
    #[serde(default = "default_access_url_ttl_secs")]
    pub access_url_ttl_secs: u64,
    /// Lifetime of a share link in seconds
    #[serde(default = "default_share_url_ttl_secs")]
    pub share_url_ttl_secs: u64,
    /// Top-level prefix of the per-owner recycle bin
    #[serde(default = "default_recycle_prefix")]
    pub recycle_prefix: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Upload notification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Remove a session record when a push reports the session is gone.
    /// Only safe with a single replica: the hub sees local sockets only.
    #[serde(default)]
    pub prune_stale_sessions: bool,
    /// Message pushed to the uploader once processing succeeded
    #[serde(default = "default_success_message")]
    pub success_message: String,
}

/// API configuration for the photo endpoints and push sessions
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "photo-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "photo-service".to_string()
}

fn default_ingestion_topic() -> String {
    "photos.staging.object-created".to_string()
}

fn default_failure_topic() -> String {
    "photos.processing.failed".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_access_url_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_share_url_ttl_secs() -> u64 {
    3 * 60 * 60
}

fn default_recycle_prefix() -> String {
    "recycled".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_success_message() -> String {
    "Image processed successfully".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "photo-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/photos").required(false))
            .add_source(config::File::with_name("/etc/photos/photos").required(false))
            // PHOTOS__S3__PRIMARY_BUCKET -> s3.primary_bucket
            .add_source(
                config::Environment::with_prefix("PHOTOS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl S3Config {
    /// Lifetime of the cached listing URL
    pub fn access_url_ttl(&self) -> Duration {
        Duration::from_secs(self.access_url_ttl_secs)
    }

    /// Lifetime of a share link
    pub fn share_url_ttl(&self) -> Duration {
        Duration::from_secs(self.share_url_ttl_secs)
    }
}

impl KafkaConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            prune_stale_sessions: false,
            success_message: default_success_message(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
