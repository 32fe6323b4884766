use crate::config::ApiConfig;
use crate::error::PhotoError;
use crate::lifecycle::{PhotoLifecycleService, ShareUrl};
use crate::model::{ImageContent, LifecycleState, ListedPhoto, OwnershipFilter, PhotoRecord};
use crate::push_gateway::{self, PushHub};
use crate::sessions::SessionRegistry;
use anyhow::{Context, Result};
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Header carrying the authenticated caller's email
pub const IDENTITY_HEADER: &str = "x-user-email";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<PhotoLifecycleService>,
    pub push_hub: Arc<PushHub>,
    pub sessions: Arc<dyn SessionRegistry>,
}

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn new(message: &str, data: T) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            data,
        })
    }
}

/// Photo record in API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub id: Uuid,
    pub owner: String,
    pub object_key: String,
    pub state: LifecycleState,
    pub uploaded_at: DateTime<Utc>,
    pub access_url: String,
    pub access_url_generated_at: Option<DateTime<Utc>>,
}

impl From<PhotoRecord> for PhotoResponse {
    fn from(r: PhotoRecord) -> Self {
        Self {
            id: r.id,
            owner: r.owner,
            object_key: r.object_key,
            state: r.state,
            uploaded_at: r.uploaded_at,
            access_url: r.access_url,
            access_url_generated_at: r.access_url_generated_at,
        }
    }
}

/// Listing entry: record plus base64 image bytes, or why they are missing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedPhotoResponse {
    #[serde(flatten)]
    pub photo: PhotoResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

impl From<ListedPhoto> for ListedPhotoResponse {
    fn from(listed: ListedPhoto) -> Self {
        let (image, fetch_error) = match listed.content {
            ImageContent::Loaded(bytes) => (Some(STANDARD.encode(&bytes)), None),
            ImageContent::Unavailable(reason) => (None, Some(reason)),
        };

        Self {
            photo: listed.record.into(),
            image,
            fetch_error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareUrlResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<ShareUrl> for ShareUrlResponse {
    fn from(s: ShareUrl) -> Self {
        Self {
            url: s.url,
            expires_at: s.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub ownership: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub timestamp: String,
}

/// Domain error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(PhotoError);

impl From<PhotoError> for ApiError {
    fn from(err: PhotoError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PhotoError::Validation(_) => StatusCode::BAD_REQUEST,
            PhotoError::Unauthorized(_) => StatusCode::FORBIDDEN,
            PhotoError::NotFound(_) => StatusCode::NOT_FOUND,
            PhotoError::StateConflict(_) => StatusCode::CONFLICT,
            PhotoError::Processing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PhotoError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

/// Caller identity taken from the identity header
#[derive(Debug, Clone)]
pub struct Requester(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Requester(value.to_string()))
            .ok_or_else(|| {
                ApiError(PhotoError::Unauthorized(
                    "Missing caller identity".to_string(),
                ))
            })
    }
}

/// Create the API router, including the push session route
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let gateway = push_gateway::routes(state.push_hub.clone(), state.sessions.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/photos", get(list_photos))
        .route("/api/v1/photos/recycle-bin", get(list_recycled))
        .route("/api/v1/photos/:photo_id", axum::routing::delete(delete_photo))
        .route("/api/v1/photos/:photo_id/share-url", get(share_url))
        .route("/api/v1/photos/:photo_id/recycle-bin", patch(move_to_recycle_bin))
        .route(
            "/api/v1/photos/:photo_id/recycle-bin/restore",
            patch(restore_from_recycle_bin),
        )
        .with_state(state)
        .merge(gateway)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.lifecycle.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip(state))]
async fn list_photos(
    State(state): State<AppState>,
    Requester(identity): Requester,
    Query(params): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<ListedPhotoResponse>>>, ApiError> {
    let filter: OwnershipFilter = params
        .ownership
        .as_deref()
        .ok_or_else(|| PhotoError::Validation("Query parameter 'ownership' is required".into()))?
        .parse()?;

    let photos = state.lifecycle.list(filter, &identity).await?;

    Ok(ApiResponse::new(
        "Photos retrieved successfully",
        photos.into_iter().map(Into::into).collect(),
    ))
}

#[instrument(skip(state))]
async fn list_recycled(
    State(state): State<AppState>,
    Requester(identity): Requester,
) -> Result<Json<ApiResponse<Vec<ListedPhotoResponse>>>, ApiError> {
    let photos = state.lifecycle.list_recycled(&identity).await?;

    Ok(ApiResponse::new(
        "Recycled photos retrieved successfully",
        photos.into_iter().map(Into::into).collect(),
    ))
}

#[instrument(skip(state))]
async fn share_url(
    State(state): State<AppState>,
    Requester(identity): Requester,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ShareUrlResponse>>, ApiError> {
    let share = state.lifecycle.generate_share_url(photo_id, &identity).await?;

    Ok(ApiResponse::new("Share URL generated successfully", share.into()))
}

#[instrument(skip(state))]
async fn move_to_recycle_bin(
    State(state): State<AppState>,
    Requester(identity): Requester,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PhotoResponse>>, ApiError> {
    let record = state
        .lifecycle
        .move_to_recycle_bin(photo_id, &identity)
        .await?;

    Ok(ApiResponse::new("Photo moved to recycle bin", record.into()))
}

#[instrument(skip(state))]
async fn restore_from_recycle_bin(
    State(state): State<AppState>,
    Requester(identity): Requester,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PhotoResponse>>, ApiError> {
    let record = state
        .lifecycle
        .restore_from_recycle_bin(photo_id, &identity)
        .await?;

    Ok(ApiResponse::new("Photo restored from recycle bin", record.into()))
}

#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    Requester(identity): Requester,
    Path(photo_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .lifecycle
        .permanently_delete(photo_id, &identity)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Serve the API until `shutdown` fires
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting photo API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
