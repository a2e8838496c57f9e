//! HTTP-level tests for the render API, driven through the axum router.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::Response;
use axum::routing::post;
use axum::{Router, extract::State};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use render_api::server::build_router;
use render_api::{
    ApiConfig, AppContext, BrowserLauncher, BrowserSession, DmsConfig, PdfError, PrintOptions,
};

/// Browser stand-in that returns a fixed PDF, or fails to launch.
struct FakeLauncher {
    fail: bool,
    printed_html: Arc<Mutex<Vec<String>>>,
}

struct FakeSession {
    html: String,
    printed_html: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch_session(&self) -> Result<Box<dyn BrowserSession>, PdfError> {
        if self.fail {
            return Err(PdfError::Launch("no browser".into()));
        }
        Ok(Box::new(FakeSession {
            html: String::new(),
            printed_html: self.printed_html.clone(),
        }))
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), PdfError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        self.html = std::fs::read_to_string(path).map_err(|e| PdfError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<(), PdfError> {
        Ok(())
    }

    async fn print_to_pdf(&mut self, _options: &PrintOptions) -> Result<Vec<u8>, PdfError> {
        self.printed_html.lock().unwrap().push(self.html.clone());
        Ok(b"%PDF-1.7 test".to_vec())
    }

    async fn close(&mut self) {}
}

struct TestApp {
    router: Router,
    temp: TempDir,
    printed_html: Arc<Mutex<Vec<String>>>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(configure: impl FnOnce(&mut ApiConfig)) -> Self {
        Self::build(false, configure)
    }

    fn build(fail_browser: bool, configure: impl FnOnce(&mut ApiConfig)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = ApiConfig {
            templates_dir: temp.path().join("templates"),
            ..ApiConfig::default()
        };
        configure(&mut config);

        let printed_html = Arc::new(Mutex::new(Vec::new()));
        let launcher = Arc::new(FakeLauncher {
            fail: fail_browser,
            printed_html: printed_html.clone(),
        });
        let ctx = Arc::new(AppContext::with_launcher(config, launcher).unwrap());

        Self {
            router: build_router(ctx),
            temp,
            printed_html,
        }
    }

    fn templates_dir(&self) -> std::path::PathBuf {
        self.temp.path().join("templates")
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }

    async fn post_raw(&self, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap();
        json_response(self.send(request).await).await
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        json_response(self.send(request).await).await
    }
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn json_response(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body_bytes(response).await;
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("response is not JSON ({}): {:?}", e, bytes));
    (status, value)
}

fn error_of(value: &Value) -> &str {
    value["error"].as_str().unwrap_or_default()
}

// --- health and routing ---

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dms_configured"], false);
    assert!(body["templates_dir"].as_str().unwrap().ends_with("templates"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_of(&body), "Not found");
}

#[tokio::test]
async fn test_wrong_method_is_rejected() {
    let app = TestApp::new();
    let request = Request::builder().uri("/render/html").body(Body::empty()).unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// --- preview rendering ---

#[tokio::test]
async fn test_render_html() {
    let app = TestApp::new();
    let (status, body) = app
        .post_json(
            "/render/html",
            json!({"template": "<h1>{{.title}}</h1><p>{{.missing}}</p>", "data": {"title": "Q3 & Q4"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["html"], "<h1>Q3 &amp; Q4</h1><p></p>");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_render_html_without_data() {
    let app = TestApp::new();
    let (status, body) = app
        .post_json("/render/html", json!({"template": "{{div 10 0}}"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["html"], "0");
}

#[tokio::test]
async fn test_render_html_escapes_script_unless_marked_safe() {
    let app = TestApp::new();
    let data = json!({"v": "<script>alert(1)</script>"});

    let (_, body) = app
        .post_json("/render/html", json!({"template": "{{.v}}", "data": data}))
        .await;
    assert_eq!(body["html"], "&lt;script&gt;alert(1)&lt;/script&gt;");

    let (_, body) = app
        .post_json("/render/html", json!({"template": "{{safeHTML .v}}", "data": data}))
        .await;
    assert_eq!(body["html"], "<script>alert(1)</script>");
}

#[tokio::test]
async fn test_render_html_keeps_data_uri_images() {
    let app = TestApp::new();
    let (_, body) = app
        .post_json(
            "/render/html",
            json!({"template": "<img src=\"{{.logo}}\">", "data": {"logo": "data:image/png;base64,AAAA"}}),
        )
        .await;
    assert_eq!(body["html"], "<img src=\"data:image/png;base64,AAAA\">");
}

#[tokio::test]
async fn test_render_html_request_errors() {
    let app = TestApp::new();

    let (status, body) = app.post_raw("/render/html", "{\"template\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("invalid json: "));

    let (status, body) = app
        .post_json("/render/html", json!({"template": "x", "extra": 1}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("invalid json: "));
    assert!(error_of(&body).contains("extra"));

    let (status, body) = app
        .post_json("/render/html", json!({"template": "x", "data": [1, 2]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("invalid json: "));

    let (status, body) = app.post_json("/render/html", json!({"data": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "template is required");
}

#[tokio::test]
async fn test_render_html_template_errors() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json("/render/html", json!({"template": "{{if .a}}never closed"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("template parse error: "));

    let (status, body) = app
        .post_json("/render/html", json!({"template": "{{add .a}}", "data": {"a": 1}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("template execute error: "));
    assert!(body.get("html").is_none());
}

// --- PDF rendering ---

#[tokio::test]
async fn test_render_pdf() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/render/pdf")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "template": "<p>{{.who}}</p>",
                "data": {"who": "<Ada>"},
                "filename": "Invoice 42",
                "wait_after_load": 1
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"invoice-42.pdf\""
    );
    assert_eq!(body_bytes(response).await.as_ref(), b"%PDF-1.7 test");
    assert_eq!(*app.printed_html.lock().unwrap(), vec!["<p>&lt;Ada&gt;</p>".to_string()]);
}

#[tokio::test]
async fn test_render_pdf_default_filename() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/render/pdf")
        .body(Body::from(json!({"template": "x", "wait_after_load": 1}).to_string()))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"document.pdf\""
    );
}

#[tokio::test]
async fn test_render_pdf_failures() {
    let app = TestApp::build(true, |_| {});

    let (status, body) = app.post_json("/render/pdf", json!({"template": "x"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        error_of(&body),
        "pdf generation error: failed to launch browser: no browser"
    );

    // Template problems are reported before any browser is involved.
    let (status, body) = app.post_json("/render/pdf", json!({"template": "{{end}}"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("template parse error: "));

    let (status, body) = app
        .post_json("/render/pdf", json!({"template": "x", "margin": 1}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("invalid json: "));
}

// --- template storage ---

#[tokio::test]
async fn test_save_and_list() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/templates/save",
            json!({"name": "Report", "template": "<p>v1</p>", "data": "{\"a\": 1}"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"filename": "report-v1.html", "version": 1}));

    let (_, body) = app
        .post_json("/templates/save", json!({"name": "Report", "template": "<p>v2</p>"}))
        .await;
    assert_eq!(body, json!({"filename": "report-v2.html", "version": 2}));

    let dir = app.templates_dir();
    assert_eq!(std::fs::read_to_string(dir.join("report-v2.html")).unwrap(), "<p>v2</p>");
    assert_eq!(std::fs::read_to_string(dir.join("report-v1.json")).unwrap(), "{\"a\": 1}");
    assert!(!dir.join("report-v2.json").exists());

    let (status, body) = app.get_json("/templates/list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"templates": [
            {"name": "report", "filename": "report-v2.html", "version": 2},
            {"name": "report", "filename": "report-v1.html", "version": 1},
        ]})
    );
}

#[tokio::test]
async fn test_list_without_directory() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/templates/list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"templates": []}));
}

#[tokio::test]
async fn test_save_validation() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json("/templates/save", json!({"template": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "name is required");

    let (status, body) = app.post_json("/templates/save", json!({"name": "a"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "template is required");

    let (status, body) = app
        .post_json("/templates/save", json!({"name": "!!!", "template": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "invalid name");

    let (status, body) = app
        .post_json("/templates/save", json!({"name": "a", "template": "x", "data": {"k": 1}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("invalid json: "));
}

#[tokio::test]
async fn test_save_storage_failure_is_500() {
    let app = TestApp::new();
    // A regular file where the templates directory should be.
    std::fs::write(app.templates_dir(), "not a directory").unwrap();

    let (status, body) = app
        .post_json("/templates/save", json!({"name": "a", "template": "x"}))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!error_of(&body).is_empty());
}

// --- DMS forwarding ---

#[derive(Default)]
struct Received {
    secret: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Start a stand-in DMS on a local port that answers with `status`.
async fn start_dms(status: StatusCode, reply: &'static str) -> (String, Arc<Mutex<Received>>) {
    let received = Arc::new(Mutex::new(Received::default()));

    async fn upload(
        State((received, status, reply)): State<(Arc<Mutex<Received>>, StatusCode, &'static str)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, &'static str) {
        let mut received = received.lock().unwrap();
        received.secret = headers
            .get("api-secret")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        received.content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        received.body = body.to_vec();
        (status, reply)
    }

    let app = Router::new()
        .route("/upload", post(upload))
        .with_state((received.clone(), status, reply));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/upload", addr), received)
}

fn with_dms(url: String) -> impl FnOnce(&mut ApiConfig) {
    move |config| {
        config.dms = Some(DmsConfig {
            api_url: url,
            api_secret: "top-secret".into(),
        });
    }
}

#[tokio::test]
async fn test_upload_dms_not_configured() {
    let app = TestApp::new();
    // Checked before the body is even parsed.
    let (status, body) = app.post_raw("/templates/upload-dms", "garbage").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(
        error_of(&body),
        "DMS not configured. Set DMS_API_URL and DMS_API_SECRET in .env"
    );
}

#[tokio::test]
async fn test_upload_dms_success() {
    let (url, received) = start_dms(StatusCode::CREATED, "{\"id\": 77}").await;
    let app = TestApp::with_config(with_dms(url));

    let (health_status, health) = app.get_json("/health").await;
    assert_eq!(health_status, StatusCode::OK);
    assert_eq!(health["dms_configured"], true);

    app.post_json("/templates/save", json!({"name": "Offer", "template": "<p>offer</p>"}))
        .await;

    let (status, body) = app
        .post_json(
            "/templates/upload-dms",
            json!({"filename": "offer-v1.html", "ref_id": "REF-9", "source_system": "ERP"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "message": "Template offer-v1.html uploaded successfully",
            "response": "{\"id\": 77}"
        })
    );

    let received = received.lock().unwrap();
    assert_eq!(received.secret.as_deref(), Some("top-secret"));
    assert!(
        received
            .content_type
            .as_deref()
            .unwrap_or_default()
            .starts_with("multipart/form-data")
    );
    let form = String::from_utf8_lossy(&received.body);
    assert!(form.contains("name=\"file\"; filename=\"offer-v1.html\""));
    assert!(form.contains("<p>offer</p>"));
    for (field, value) in [
        ("ref_id", "REF-9"),
        ("id_type", "template"),
        ("document_type", "html"),
        ("source_system", "ERP"),
        ("document_sequence", "1"),
    ] {
        assert!(
            form.contains(&format!("name=\"{}\"\r\n\r\n{}\r\n", field, value)),
            "missing field {}",
            field
        );
    }
}

#[tokio::test]
async fn test_upload_dms_upstream_error() {
    let (url, _) = start_dms(StatusCode::SERVICE_UNAVAILABLE, "maintenance").await;
    let app = TestApp::with_config(with_dms(url));
    app.post_json("/templates/save", json!({"name": "x", "template": "x"}))
        .await;

    let (status, body) = app
        .post_json(
            "/templates/upload-dms",
            json!({"filename": "x-v1.html", "ref_id": "1"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body,
        json!({
            "success": false,
            "error": "DMS returned status 503",
            "response": "maintenance"
        })
    );
}

#[tokio::test]
async fn test_upload_dms_validation() {
    let (url, received) = start_dms(StatusCode::OK, "ok").await;
    let app = TestApp::with_config(with_dms(url));

    let (status, body) = app
        .post_json("/templates/upload-dms", json!({"ref_id": "1"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "filename is required");

    let (status, body) = app
        .post_json("/templates/upload-dms", json!({"filename": "a-v1.html"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "ref_id is required");

    let (status, body) = app
        .post_json(
            "/templates/upload-dms",
            json!({"filename": "missing-v1.html", "ref_id": "1"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_of(&body).starts_with("failed to read template file: "));

    let (status, body) = app
        .post_json(
            "/templates/upload-dms",
            json!({"filename": "../../etc/passwd", "ref_id": "1"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    assert!(received.lock().unwrap().body.is_empty());
}

// --- CORS ---

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri("/render/html")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_cors_allows_configured_origins() {
    let app = TestApp::with_config(|config| {
        config.allowed_origins = vec!["http://localhost:5173".into()];
    });

    let response = app.send(preflight("http://localhost:5173")).await;
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
    let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .to_string();
    for method in ["GET", "POST", "OPTIONS"] {
        assert!(methods.contains(method), "{} not in {}", method, methods);
    }

    let response = app.send(preflight("http://evil.test")).await;
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn test_cors_on_simple_request() {
    let app = TestApp::with_config(|config| {
        config.allowed_origins = vec!["http://localhost:5173".into()];
    });
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
    assert!(response.headers().get(header::VARY).is_some());
}
