use crate::config::{Config, CorsOrigins};
use crate::engine::{OcrMethod, OcrRequest, RecognitionOptions, TextLine};
use crate::engines::Engines;
use crate::error::ApiError;
use crate::resolver::{OcrResolver, TierInfo};
use crate::store::{self, DocumentStore, ListQuery, NewDocument, ResolvedDocument};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Accepted upload extensions
pub const ALLOWED_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".pdf", ".bmp", ".tiff"];

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<OcrResolver>,
    pub store: Arc<dyn DocumentStore>,
    pub max_file_size: usize,
}

/// Payload of a processed document
#[derive(Serialize)]
pub struct OcrResult {
    pub document_id: Uuid,
    pub filename: String,
    pub extracted_text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_lines: Option<Vec<TextLine>>,
    pub ocr_method: OcrMethod,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct DocumentResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> DocumentResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub allowed_extensions: Vec<String>,
    pub max_file_size_bytes: usize,
    pub tiers: Vec<TierInfo>,
    pub store: String,
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    // Model download and loading block; keep them off the runtime threads
    let engines = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Engines::new(&config)).await??
    };
    let resolver = OcrResolver::new(engines.primary, engines.fallback, config.primary.timeout);
    let store = store::from_config(&config.store)?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        resolver: Arc::new(resolver),
        store,
        max_file_size: config.max_file_size,
    };

    let app = router(state).layer(cors_layer(&config.cors_origins));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Routes and middleware shared by the server and tests
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_file_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/ocr", post(handle_ocr))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/:id",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A wildcard allows any origin without credentials; a list allows credentials
pub fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                        None
                    }
                })
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(values))
                .allow_methods(AllowMethods::list([
                    Method::GET,
                    Method::POST,
                    Method::DELETE,
                    Method::OPTIONS,
                ]))
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// An upload that passed validation
struct Upload {
    filename: String,
    extension: String,
    content_type: String,
    data: Bytes,
}

/// Handle OCR requests
async fn handle_ocr(
    State(state): State<AppState>,
    Query(options): Query<RecognitionOptions>,
    multipart: Multipart,
) -> Result<Json<DocumentResponse<OcrResult>>, ApiError> {
    let start = Instant::now();
    let upload = read_upload(multipart, state.max_file_size).await?;

    tracing::info!(
        "Processing document: {} ({} bytes, {})",
        upload.filename,
        upload.data.len(),
        upload.content_type
    );

    let file_size = upload.data.len() as u64;
    let request = OcrRequest::new(upload.data, upload.content_type).with_options(options);
    let resolution = state.resolver.resolve(&request).await?;

    let document = state
        .store
        .create(NewDocument::from_resolution(
            &resolution,
            upload.filename,
            upload.extension,
            file_size,
        ))
        .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "Successfully processed document {} via {} in {}ms",
        document.id,
        document.ocr_method,
        processing_time_ms
    );

    let outcome = resolution.outcome;
    let text_lines = (!outcome.lines.is_empty()).then_some(outcome.lines);

    Ok(Json(DocumentResponse::ok(
        "Document processed successfully",
        OcrResult {
            document_id: document.id,
            filename: document.filename,
            extracted_text: document.extracted_text,
            confidence: document.confidence,
            text_lines,
            ocr_method: document.ocr_method,
            processing_time_ms,
            warnings: outcome.warnings,
            created_at: document.created_at,
        },
    )))
}

/// Parse the multipart form and validate the `file` field
async fn read_upload(mut multipart: Multipart, max_file_size: usize) -> Result<Upload, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Failed to parse multipart", max_file_size))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidRequest("Uploaded file has no filename".to_string()))?;
        let declared_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, "Failed to read file data", max_file_size))?;

        upload = Some((filename, declared_type, data));
    }

    let (filename, declared_type, data) = upload.ok_or(ApiError::MissingFile)?;

    let extension = file_extension(&filename);
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::UnsupportedFileType {
            extension,
            allowed: ALLOWED_EXTENSIONS.join(", "),
        });
    }
    if data.is_empty() {
        return Err(ApiError::EmptyFile);
    }
    if data.len() > max_file_size {
        return Err(ApiError::FileTooLarge {
            size: data.len(),
            max: max_file_size,
        });
    }

    let content_type = match declared_type {
        Some(mime) if mime != "application/octet-stream" => mime,
        _ => mime_for_extension(&extension).to_string(),
    };

    Ok(Upload {
        filename,
        extension,
        content_type,
        data,
    })
}

/// Body-limit rejections are size errors; anything else is a malformed form
fn multipart_error(err: MultipartError, context: &str, max_file_size: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::UploadTooLarge { max: max_file_size };
    }
    ApiError::InvalidRequest(format!("{}: {}", context, err))
}

/// Lowercase extension including the dot, empty when there is none
fn file_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".bmp" => "image/bmp",
        ".tiff" => "image/tiff",
        ".pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentResponse<Vec<ResolvedDocument>>>, ApiError> {
    let documents = state.store.list(query).await?;
    Ok(Json(DocumentResponse::ok(
        format!("Found {} documents", documents.len()),
        documents,
    )))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse<ResolvedDocument>>, ApiError> {
    let document = state.store.get(id).await?;
    Ok(Json(DocumentResponse::ok("Document found", document)))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse<()>>, ApiError> {
    state.store.delete(id).await?;
    tracing::info!("Deleted document {}", id);
    Ok(Json(DocumentResponse {
        success: true,
        message: format!("Document {} deleted", id),
        data: None,
    }))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        max_file_size_bytes: state.max_file_size,
        tiers: state.resolver.tiers(),
        store: state.store.kind().to_string(),
    })
}
