mod catalog;
mod error;
mod store;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use backswap_common::config::{ComposeConfig, Config};
use backswap_engine::{
    compose, ComposeError, CompositeRequest, ImageMeta, ImageSource, KeyColor, PipelineContext,
};
use futures_util::StreamExt;
use image::{ImageFormat, ImageReader};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use catalog::{Catalog, ImageRecord};
use error::ApiError;
use store::{generate_id, ImageStore};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    catalog: Arc<Catalog>,
    store: Arc<ImageStore>,
    pipeline: PipelineContext,
    /// One permit per composition allowed to stream concurrently.
    compose_slots: Arc<Semaphore>,
    max_concurrent: usize,
    queue_timeout: Duration,
}

impl AppState {
    fn new(catalog: Catalog, store: ImageStore, compose: &ComposeConfig) -> Self {
        Self {
            catalog: Arc::new(catalog),
            store: Arc::new(store),
            pipeline: PipelineContext {
                row_queue_depth: compose.row_queue_depth,
                chunk_queue_depth: compose.chunk_queue_depth,
                chunk_size: compose.chunk_size,
            },
            compose_slots: Arc::new(Semaphore::new(compose.max_concurrent)),
            max_concurrent: compose.max_concurrent,
            queue_timeout: Duration::from_millis(compose.queue_timeout_ms),
        }
    }

    /// Take a composition slot, waiting at most `queue_timeout`.
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        let slots = Arc::clone(&self.compose_slots);
        if self.queue_timeout.is_zero() {
            return slots
                .try_acquire_owned()
                .map_err(|_| ApiError::Busy(self.max_concurrent));
        }
        match tokio::time::timeout(self.queue_timeout, slots.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            _ => Err(ApiError::Busy(self.max_concurrent)),
        }
    }
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MergeQuery {
    front: Option<String>,
    back: Option<String>,
    color: Option<String>,
    threshold: Option<String>,
}

#[derive(Debug)]
struct MergeParams {
    front: String,
    back: String,
    keys: Vec<KeyColor>,
    threshold: f64,
}

fn required(value: Option<String>, name: &str) -> Result<String, ComposeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ComposeError::invalid_request(format!("missing query parameter {name:?}"))),
    }
}

fn parse_merge(q: MergeQuery) -> Result<MergeParams, ComposeError> {
    let front = required(q.front, "front")?;
    let back = required(q.back, "back")?;
    let keys = KeyColor::parse_list(&required(q.color, "color")?)?;
    let raw = required(q.threshold, "threshold")?;
    let threshold = raw
        .parse::<f64>()
        .map_err(|_| ComposeError::invalid_request(format!("threshold {raw:?} is not a number")))?;
    Ok(MergeParams {
        front,
        back,
        keys,
        threshold,
    })
}

/// Check an upload is a PNG or JPEG and read its size from the header.
fn inspect_upload(bytes: &[u8]) -> Result<(&'static str, u32, u32), ApiError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ApiError::Upload(e.to_string()))?;
    let format = match reader.format() {
        Some(ImageFormat::Png) => "png",
        Some(ImageFormat::Jpeg) => "jpeg",
        Some(other) => {
            return Err(ApiError::Upload(format!(
                "{other:?} images are not supported, use PNG or JPEG"
            )))
        }
        None => return Err(ApiError::Upload("not a recognised image".into())),
    };
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ApiError::Upload(format!("unreadable image header: {e}")))?;
    Ok((format, width, height))
}

/// Map a catalog id to an opened byte stream plus declared size.
fn resolve(catalog: &Catalog, store: &ImageStore, id: &str) -> Result<ImageSource, ApiError> {
    let record = catalog
        .get(id)?
        .ok_or_else(|| ComposeError::NotFound(id.to_string()))?;
    let file = store.open_file(&record.id)?;
    Ok(ImageSource::new(
        record.id,
        file,
        ImageMeta::new(record.width, record.height),
    ))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /upload: multipart field "image", PNG or JPEG
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Upload(e.to_string()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Upload(e.to_string()))?;
        upload = Some((original_name, data));
        break;
    }

    let (original_name, data) =
        upload.ok_or_else(|| ApiError::Upload("multipart field \"image\" is missing".into()))?;
    let (format, width, height) = inspect_upload(&data)?;

    let record = ImageRecord {
        id: generate_id(),
        original_name,
        size: data.len() as u64,
        width,
        height,
        format: format.to_string(),
        created_at: chrono::Utc::now().timestamp_millis(),
    };

    let st = Arc::clone(&state);
    let rec = record.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        st.store.put(&rec.id, &data)?;
        if let Err(e) = st.catalog.insert(&rec) {
            if let Err(cleanup) = st.store.remove(&rec.id) {
                warn!(id = %rec.id, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(e.into());
        }
        Ok(())
    })
    .await??;

    info!(id = %record.id, format, width, height, size = record.size, "image uploaded");
    Ok(Json(json!({ "id": record.id })))
}

/// GET /list: all uploaded images, newest first
async fn list_images(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ImageRecord>>, ApiError> {
    let catalog = Arc::clone(&state.catalog);
    let records = tokio::task::spawn_blocking(move || catalog.list()).await??;
    Ok(Json(records))
}

/// GET /image/:id: stored bytes as an attachment
async fn download_image(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let st = Arc::clone(&state);
    let (record, bytes) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let record = st
            .catalog
            .get(&id)?
            .ok_or_else(|| ApiError::NotFound(id.clone()))?;
        let bytes = st.store.read(&record.id)?;
        Ok((record, bytes))
    })
    .await??;

    let ext = if record.format == "png" { "png" } else { "jpg" };
    let headers = [
        (header::CONTENT_TYPE, record.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.{ext}\"", record.id),
        ),
    ];
    Ok((headers, bytes).into_response())
}

/// DELETE /image/:id
async fn delete_image(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let st = Arc::clone(&state);
    let target = id.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        if !st.catalog.delete(&target)? {
            return Err(ApiError::NotFound(target));
        }
        if !st.store.remove(&target)? {
            warn!(id = %target, "catalog entry had no stored file");
        }
        Ok(())
    })
    .await??;

    info!(id = %id, "image deleted");
    Ok(Json(json!({ "id": id })))
}

/// GET /merge?front=&back=&color=r,g,b[,r,g,b...]&threshold=: composited PNG stream
async fn merge(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MergeQuery>,
) -> Result<Response, ApiError> {
    let params = parse_merge(q)?;
    let permit = state.acquire_slot().await?;

    let catalog = Arc::clone(&state.catalog);
    let store = Arc::clone(&state.store);
    let (front_id, back_id) = (params.front.clone(), params.back.clone());
    let (front, back) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        Ok((
            resolve(&catalog, &store, &front_id)?,
            resolve(&catalog, &store, &back_id)?,
        ))
    })
    .await??;

    let request = CompositeRequest {
        front,
        back,
        keys: params.keys,
        threshold: params.threshold,
    };
    let composed = compose(&state.pipeline, request).await?;
    let content_type = composed.content_type();

    // The slot stays taken until the body is fully sent or dropped.
    let body = composed.into_stream().map(move |chunk| {
        let _slot = &permit;
        chunk
    });
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/list", get(list_images))
        .route("/image/:id", get(download_image).delete(delete_image))
        .route("/merge", get(merge))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let catalog = match Catalog::open(Path::new(&config.storage.catalog_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to open catalog {}: {e}", config.storage.catalog_path);
            std::process::exit(1);
        }
    };
    let store = match ImageStore::open(Path::new(&config.storage.image_dir)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open image dir {}: {e}", config.storage.image_dir);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(catalog, store, &config.compose));
    let app = router(state, config.server.max_upload_bytes);

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!(
        %addr,
        max_concurrent = config.compose.max_concurrent,
        queue_timeout_ms = config.compose.queue_timeout_ms,
        "backswap API server starting"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
