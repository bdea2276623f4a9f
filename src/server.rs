//! HTTP surface consumed by the browser viewer.

use crate::{
    cache::ArtifactCache,
    channels::ChannelGroupRegistry,
    config::{ServerSettings, Settings},
    enums::{Encoding, VolumeKind},
    error::{Error, ErrorCategory, Result},
    pipeline::ProcessingPipeline,
    registry::{FileRegistry, RegistryError, VolumeRecord},
    wire::WireHeader,
};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub files: Arc<FileRegistry>,
    pub cache: Arc<ArtifactCache>,
    pub groups: Arc<ChannelGroupRegistry>,
}

impl AppState {
    pub fn open(settings: &Settings) -> Result<Self, RegistryError> {
        Self::with_pipeline(
            settings.storage.dir.clone(),
            settings.cache.max_bytes,
            ProcessingPipeline::default(),
        )
    }

    pub fn with_pipeline(
        storage_dir: impl Into<PathBuf>,
        cache_max_bytes: u64,
        pipeline: ProcessingPipeline,
    ) -> Result<Self, RegistryError> {
        let cache = Arc::new(ArtifactCache::new(pipeline, cache_max_bytes));
        let files = Arc::new(FileRegistry::open(storage_dir, cache.clone())?);
        let groups = Arc::new(ChannelGroupRegistry::new(files.clone()));

        Ok(Self {
            files,
            cache,
            groups,
        })
    }

    /// Store an upload and process it right away so the first request for
    /// it is served from the cache. A file that cannot be processed is
    /// removed again.
    pub fn ingest(
        &self,
        content: &[u8],
        filename: &str,
        kind: VolumeKind,
        base_volume_id: Option<String>,
    ) -> Result<VolumeRecord> {
        let file_id = match kind {
            VolumeKind::Volume => self.files.save(content, filename)?,
            VolumeKind::SegmentationMask => self.files.save_mask(content, filename, base_volume_id)?,
        };
        let record = self
            .files
            .get(&file_id)
            .ok_or_else(|| Error::Internal(format!("record {file_id} vanished after save")))?;

        if let Some(Err(err)) = self.files.artifact(&file_id, Encoding::Intensity) {
            warn!(%file_id, error = %err, "processing failed, discarding upload");
            if let Err(cleanup) = self.files.delete(&file_id) {
                error!(%file_id, error = %cleanup, "failed to discard upload");
            }
            return Err(err.into());
        }
        Ok(record)
    }

    /// Wire blob for `file_id`, from the cache when possible.
    pub fn artifact(&self, file_id: &str, encoding: Encoding, resource: &'static str) -> Result<Bytes> {
        let blob = self
            .files
            .artifact(file_id, encoding)
            .ok_or_else(|| Error::not_found(resource, file_id))?;
        Ok(blob?)
    }
}

pub fn router(state: AppState, settings: &ServerSettings) -> Router {
    let api = Router::new()
        .route("/volumetric/upload", post(upload_volume))
        .route("/volumetric/list", get(list_volumes))
        .route("/volumetric/:file_id", get(get_volume).delete(delete_volume))
        .route("/volumetric/:file_id/info", get(volume_info))
        .route("/segmentation/upload", post(upload_mask))
        .route("/segmentation/list", get(list_masks))
        .route("/segmentation/:mask_id", get(get_mask).delete(delete_mask))
        .route("/multi-channel/create", post(create_group))
        .route("/multi-channel/list", get(list_groups))
        .route("/multi-channel/:group_id", get(get_group).delete(delete_group));

    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(cors_layer(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| warn!(origin, "ignoring invalid CORS origin"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Upload(err) => err.status(),
            Error::Body(err) => err.status(),
            Error::Query(err) => err.status(),
            _ => match self.category() {
                ErrorCategory::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| Error::Internal(err.to_string()))?
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, Bytes)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_owned();
        let content = field.bytes().await?;
        return Ok((filename, content));
    }
    Err(Error::MissingField("file"))
}

fn blob_response(blob: Bytes, download_name: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
        ],
        blob,
    )
        .into_response()
}

/// `Json` whose rejections answer with the usual error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(Error))]
struct JsonBody<T>(T);

/// `Query` whose rejections answer with the usual error body.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
struct Query<T>(T);

#[derive(Debug, Default, Deserialize)]
struct EncodingQuery {
    #[serde(default)]
    encoding: Encoding,
}

#[derive(Debug, Default, Deserialize)]
struct MaskQuery {
    base_file_id: Option<String>,
}

async fn banner() -> Json<Value> {
    Json(json!({
        "message": "NeuroScan volumetric data server",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn upload_volume(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Value>> {
    let (filename, content) = read_upload(multipart).await?;
    let record =
        blocking(move || state.ingest(&content, &filename, VolumeKind::Volume, None)).await?;

    Ok(Json(json!({
        "file_id": record.file_id,
        "filename": record.filename,
        "size": record.size,
    })))
}

async fn list_volumes(State(state): State<AppState>) -> Json<Value> {
    let files = state.files.list();
    Json(json!({ "count": files.len(), "files": files }))
}

async fn get_volume(State(state): State<AppState>, Path(file_id): Path<String>) -> Result<Response> {
    let name = format!("{file_id}.bin");
    let blob = blocking(move || state.artifact(&file_id, Encoding::Intensity, "Volume")).await?;
    Ok(blob_response(blob, name))
}

async fn volume_info(State(state): State<AppState>, Path(file_id): Path<String>) -> Result<Json<Value>> {
    let id = file_id.clone();
    let blob = blocking(move || state.artifact(&id, Encoding::Intensity, "Volume")).await?;
    let header = WireHeader::decode(&blob).map_err(|err| Error::Internal(err.to_string()))?;

    Ok(Json(json!({
        "file_id": file_id,
        "width": header.width,
        "height": header.height,
        "depth": header.depth,
        "data_type": header.data_type.code(),
        "size": blob.len(),
    })))
}

async fn delete_volume(State(state): State<AppState>, Path(file_id): Path<String>) -> Result<Json<Value>> {
    delete_file(state, file_id, "Volume").await
}

async fn delete_file(state: AppState, file_id: String, resource: &'static str) -> Result<Json<Value>> {
    let id = file_id.clone();
    let deleted = blocking(move || Ok(state.files.delete(&id)?)).await?;
    if !deleted {
        return Err(Error::not_found(resource, file_id));
    }
    Ok(Json(json!({ "deleted": file_id })))
}

async fn upload_mask(
    State(state): State<AppState>,
    Query(query): Query<MaskQuery>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let (filename, content) = read_upload(multipart).await?;
    let record = blocking(move || {
        state.ingest(&content, &filename, VolumeKind::SegmentationMask, query.base_file_id)
    })
    .await?;

    Ok(Json(json!({
        "mask_id": record.file_id,
        "filename": record.filename,
        "base_file_id": record.base_volume_id,
    })))
}

async fn list_masks(State(state): State<AppState>) -> Json<Value> {
    let masks = state.files.list_kind(VolumeKind::SegmentationMask);
    Json(json!({ "count": masks.len(), "masks": masks }))
}

async fn get_mask(
    State(state): State<AppState>,
    Path(mask_id): Path<String>,
    Query(query): Query<EncodingQuery>,
) -> Result<Response> {
    let name = format!("mask_{mask_id}.bin");
    let blob = blocking(move || state.artifact(&mask_id, query.encoding, "Mask")).await?;
    Ok(blob_response(blob, name))
}

async fn delete_mask(State(state): State<AppState>, Path(mask_id): Path<String>) -> Result<Json<Value>> {
    delete_file(state, mask_id, "Mask").await
}

async fn create_group(
    State(state): State<AppState>,
    JsonBody(channels): JsonBody<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let group_id = state.groups.create(&channels)?;
    let channels = state.groups.get(&group_id).unwrap_or_default();

    Ok(Json(json!({ "group_id": group_id, "channels": channels })))
}

async fn list_groups(State(state): State<AppState>) -> Json<Value> {
    let groups = state.groups.list();
    Json(json!({ "count": groups.len(), "groups": groups }))
}

async fn get_group(State(state): State<AppState>, Path(group_id): Path<String>) -> Result<Json<Value>> {
    let channels = state
        .groups
        .get(&group_id)
        .ok_or_else(|| Error::not_found("Channel group", group_id.clone()))?;

    Ok(Json(json!({ "group_id": group_id, "channels": channels })))
}

async fn delete_group(State(state): State<AppState>, Path(group_id): Path<String>) -> Result<Json<Value>> {
    if !state.groups.delete(&group_id) {
        return Err(Error::not_found("Channel group", group_id));
    }
    Ok(Json(json!({ "deleted": group_id })))
}
