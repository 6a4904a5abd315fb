use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use document_ocr_server::engine::{
    OcrMethod, OcrOutcome, OcrRequest, RecognitionOptions, Recognizer, TextLine,
};
use document_ocr_server::error::RecognizerError;
use document_ocr_server::resolver::OcrResolver;
use document_ocr_server::server::{router, AppState};
use document_ocr_server::store::{DocumentStore, MemoryStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "----ocr-test-boundary";
const MAX_FILE_SIZE: usize = 1024;

/// Recognizer with a canned answer that records what it was asked
struct FakeRecognizer {
    method: OcrMethod,
    configured: bool,
    result: Result<OcrOutcome, RecognizerError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_options: Mutex<Option<RecognitionOptions>>,
}

impl FakeRecognizer {
    fn build(
        method: OcrMethod,
        configured: bool,
        result: Result<OcrOutcome, RecognizerError>,
        delay: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            method,
            configured,
            result,
            delay,
            calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        })
    }

    fn succeeding(outcome: OcrOutcome) -> Arc<Self> {
        Self::build(outcome.method, true, Ok(outcome), None)
    }

    fn failing(method: OcrMethod, error: RecognizerError) -> Arc<Self> {
        Self::build(method, true, Err(error), None)
    }

    fn unconfigured(method: OcrMethod) -> Arc<Self> {
        Self::build(method, false, Err(RecognizerError::NotConfigured), None)
    }

    fn hanging(method: OcrMethod) -> Arc<Self> {
        Self::build(
            method,
            true,
            Err(RecognizerError::Transport("unreachable".to_string())),
            Some(Duration::from_secs(3600)),
        )
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    fn method(&self) -> OcrMethod {
        self.method
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn attempt(&self, request: &OcrRequest) -> Result<OcrOutcome, RecognizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = Some(request.options.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
}

impl TestApp {
    fn new(primary: Arc<FakeRecognizer>, fallback: Arc<FakeRecognizer>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            resolver: Arc::new(OcrResolver::new(
                primary,
                fallback,
                Duration::from_millis(100),
            )),
            store: store.clone() as Arc<dyn DocumentStore>,
            max_file_size: MAX_FILE_SIZE,
        };

        Self {
            router: router(state),
            store,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn upload(&self, filename: &str, data: &[u8]) -> (StatusCode, Value) {
        self.send(upload_request("/ocr", filename, data)).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }
}

fn multipart_body(filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(uri: &str, filename: &str, data: &[u8]) -> Request<Body> {
    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(filename, data)))
        .unwrap()
}

fn invoice() -> Arc<FakeRecognizer> {
    FakeRecognizer::succeeding(OcrOutcome::from_text(
        OcrMethod::Primary,
        "INVOICE #123",
        0.95,
    ))
}

fn hello_world() -> Arc<FakeRecognizer> {
    FakeRecognizer::succeeding(OcrOutcome::from_lines(
        OcrMethod::Fallback,
        vec![TextLine::new("Hello", 0.9), TextLine::new("World", 0.8)],
    ))
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new(invoice(), hello_world());

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(!body["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_info_endpoint_reports_tiers() {
    let app = TestApp::new(
        FakeRecognizer::unconfigured(OcrMethod::Primary),
        hello_world(),
    );

    let (status, body) = app.get("/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_file_size_bytes"], MAX_FILE_SIZE);
    assert_eq!(body["store"], "memory");
    assert!(body["allowed_extensions"]
        .as_array()
        .unwrap()
        .contains(&Value::from(".pdf")));

    let tiers = body["tiers"].as_array().unwrap();
    assert_eq!(tiers.len(), 2);
    assert_eq!(tiers[0]["method"], "primary");
    assert_eq!(tiers[0]["configured"], false);
    assert_eq!(tiers[0]["timeout_ms"], 100);
    assert_eq!(tiers[1]["method"], "fallback");
    assert_eq!(tiers[1]["configured"], true);
}

#[tokio::test]
async fn test_primary_result_is_returned_and_persisted() {
    let fallback = hello_world();
    let app = TestApp::new(invoice(), fallback.clone());

    let (status, body) = app.upload("invoice.png", b"png-bytes").await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["extracted_text"], "INVOICE #123");
    assert_eq!(data["ocr_method"], "primary");
    assert!((data["confidence"].as_f64().unwrap() - 0.95).abs() < 1e-6);
    assert_eq!(data["filename"], "invoice.png");
    assert!(data.get("text_lines").is_none());
    assert_eq!(fallback.calls(), 0);

    let stored = app.store.list(Default::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id.to_string(), data["document_id"].as_str().unwrap());
    assert_eq!(stored[0].file_type, ".png");
    assert_eq!(stored[0].file_size, 9);
}

#[tokio::test]
async fn test_unconfigured_primary_uses_fallback_lines() {
    let primary = FakeRecognizer::unconfigured(OcrMethod::Primary);
    let app = TestApp::new(primary.clone(), hello_world());

    let (status, body) = app.upload("scan.jpg", b"jpeg-bytes").await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let data = &body["data"];
    assert_eq!(data["ocr_method"], "fallback");
    assert_eq!(data["extracted_text"], "Hello\nWorld");
    assert!((data["confidence"].as_f64().unwrap() - 0.85).abs() < 1e-6);
    assert_eq!(data["text_lines"].as_array().unwrap().len(), 2);
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn test_exhausted_tiers_return_422_without_persisting() {
    let primary = FakeRecognizer::hanging(OcrMethod::Primary);
    let fallback = FakeRecognizer::failing(
        OcrMethod::Fallback,
        RecognizerError::Engine("corrupt image data".to_string()),
    );
    let app = TestApp::new(primary.clone(), fallback.clone());

    let (status, body) = app.upload("broken.png", b"\x89PNG\x00garbage").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "OCR_FAILED");
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("primary"), "{}", message);
    assert!(message.contains("corrupt image data"), "{}", message);
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_query_options_reach_the_recognizer() {
    let primary = invoice();
    let app = TestApp::new(primary.clone(), hello_world());

    let (status, _) = app
        .send(upload_request(
            "/ocr?lang=fr&use_doc_unwarping=true&unknown=1",
            "page.tiff",
            b"tiff-bytes",
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    let options = primary.last_options.lock().clone().unwrap();
    assert_eq!(options.lang.as_deref(), Some("fr"));
    assert!(options.use_doc_unwarping);
    assert!(!options.use_textline_orientation);
}

#[tokio::test]
async fn test_unsupported_extension_is_rejected() {
    let primary = invoice();
    let app = TestApp::new(primary.clone(), hello_world());

    let (status, body) = app.upload("notes.txt", b"plain text").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNSUPPORTED_FILE_TYPE");
    assert!(body["message"].as_str().unwrap().contains(".txt"));
    assert_eq!(primary.calls(), 0);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_empty_file_is_rejected() {
    let app = TestApp::new(invoice(), hello_world());

    let (status, body) = app.upload("empty.pdf", b"").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EMPTY_FILE");
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let app = TestApp::new(invoice(), hello_world());

    let (status, body) = app.upload("big.png", &vec![0u8; MAX_FILE_SIZE + 1]).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_upload_past_body_limit_is_413() {
    let primary = invoice();
    let app = TestApp::new(primary.clone(), hello_world());

    let (status, body) = app
        .upload("huge.png", &vec![0u8; MAX_FILE_SIZE + 128 * 1024])
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{}", body);
    assert_eq!(body["code"], "FILE_TOO_LARGE");
    assert_eq!(primary.calls(), 0);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_missing_file_field_is_rejected() {
    let app = TestApp::new(invoice(), hello_world());

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::post("/ocr")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FILE");
}

#[tokio::test]
async fn test_document_lifecycle() {
    let app = TestApp::new(invoice(), hello_world());

    let (_, first) = app.upload("first.png", b"one").await;
    let (_, second) = app.upload("second.pdf", b"two").await;
    let first_id = first["data"]["document_id"].as_str().unwrap().to_string();
    let second_id = second["data"]["document_id"].as_str().unwrap().to_string();

    let (status, listed) = app.get("/documents?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let documents = listed["data"].as_array().unwrap();
    assert_eq!(documents.len(), 2);
    // Newest first
    assert_eq!(documents[0]["id"], second_id.as_str());
    assert_eq!(documents[1]["id"], first_id.as_str());

    let (status, paged) = app.get("/documents?limit=1&offset=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paged["data"][0]["id"], first_id.as_str());

    let (status, fetched) = app.get(&format!("/documents/{}", first_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["filename"], "first.png");
    assert_eq!(fetched["data"]["ocr_method"], "primary");

    let delete = Request::delete(format!("/documents/{}", first_id))
        .body(Body::empty())
        .unwrap();
    let (status, deleted) = app.send(delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);
    assert_eq!(app.store.len(), 1);

    let (status, missing) = app.get(&format!("/documents/{}", first_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_delete_unknown_document_is_404() {
    let app = TestApp::new(invoice(), hello_world());

    let request = Request::delete(format!("/documents/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
