//! HTTP server setup and routing

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use render_template::{RenderContext, render_template};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::context::{AppContext, SharedContext};
use crate::dms::UploadMetadata;
use crate::error::{Error, Result};
use crate::storage::{TemplateInfo, normalize_name};

/// Filename used for PDF downloads when the request names none.
pub const DEFAULT_PDF_FILENAME: &str = "document.pdf";

/// Preview render request
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RenderRequest {
    #[serde(default)]
    template: String,
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Serialize)]
struct RenderResponse {
    html: String,
}

/// PDF render request
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PdfRequest {
    #[serde(default)]
    template: String,
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    filename: Option<String>,
    /// Milliseconds to wait after the page has loaded
    #[serde(default)]
    wait_after_load: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    template: String,
    /// Sample data as raw JSON text, stored next to the template
    #[serde(default)]
    data: Option<String>,
}

#[derive(Serialize)]
struct SaveResponse {
    filename: String,
    version: u32,
}

#[derive(Serialize)]
struct ListResponse {
    templates: Vec<TemplateInfo>,
}

#[derive(Deserialize)]
struct UploadRequest {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    ref_id: String,
    id_type: Option<String>,
    document_type: Option<String>,
    source_system: Option<String>,
    document_sequence: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    templates_dir: String,
    dms_configured: bool,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn status_for(err: &Error) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            warn!(error = %self, status = status.as_u16(), "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidJson(e.to_string()))
}

/// Render `template` against the sanitized request data.
fn render_request(
    template: &str,
    data: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<String> {
    if template.is_empty() {
        return Err(Error::validation("template is required"));
    }
    let context = RenderContext::from_json_object(data.unwrap_or_default()).sanitized();
    Ok(render_template(template, &context)?)
}

/// Download name for a rendered PDF.
pub fn pdf_filename(requested: Option<&str>) -> String {
    match requested.map(normalize_name) {
        Some(slug) if !slug.is_empty() => format!("{}.pdf", slug),
        _ => DEFAULT_PDF_FILENAME.to_string(),
    }
}

/// Health check endpoint
async fn health(State(ctx): State<SharedContext>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        templates_dir: ctx.config().templates_dir.display().to_string(),
        dms_configured: ctx.config().dms_configured(),
    })
}

/// Render a template to HTML for preview
async fn render_html(body: Bytes) -> Result<Json<RenderResponse>> {
    let request: RenderRequest = parse_body(&body)?;
    let html = render_request(&request.template, request.data)?;
    Ok(Json(RenderResponse { html }))
}

/// Render a template and print it to PDF
async fn render_pdf(State(ctx): State<SharedContext>, body: Bytes) -> Result<Response> {
    let request: PdfRequest = parse_body(&body)?;
    let html = render_request(&request.template, request.data)?;
    let pdf = ctx.pdf().render(&html, request.wait_after_load).await?;

    let filename = pdf_filename(request.filename.as_deref());
    info!(filename = %filename, bytes = pdf.len(), "Rendered PDF");

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        pdf,
    )
        .into_response())
}

/// Save a new version of a template
async fn save_template(State(ctx): State<SharedContext>, body: Bytes) -> Result<Json<SaveResponse>> {
    let request: SaveRequest = parse_body(&body)?;
    if request.name.is_empty() {
        return Err(Error::validation("name is required"));
    }
    if request.template.is_empty() {
        return Err(Error::validation("template is required"));
    }
    let slug = normalize_name(&request.name);
    if slug.is_empty() {
        return Err(Error::validation("invalid name"));
    }

    let saved = ctx
        .store()
        .save_next(&slug, &request.template, request.data.as_deref())?;
    Ok(Json(SaveResponse {
        filename: saved.filename,
        version: saved.version,
    }))
}

/// List stored templates
async fn list_templates(State(ctx): State<SharedContext>) -> Result<Json<ListResponse>> {
    let templates = ctx.store().list()?;
    Ok(Json(ListResponse { templates }))
}

/// Forward a stored template to the DMS
async fn upload_dms(State(ctx): State<SharedContext>, body: Bytes) -> Response {
    match forward_to_dms(&ctx, &body).await {
        Ok((filename, response)) => (
            StatusCode::OK,
            Json(UploadResponse {
                success: true,
                message: Some(format!("Template {} uploaded successfully", filename)),
                error: None,
                response: Some(response).filter(|r| !r.is_empty()),
            }),
        )
            .into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                warn!(error = %err, status = status.as_u16(), "DMS upload failed");
            }
            (
                status,
                Json(UploadResponse {
                    success: false,
                    message: None,
                    error: Some(err.to_string()),
                    response: err
                        .upstream_body()
                        .filter(|r| !r.is_empty())
                        .map(str::to_string),
                }),
            )
                .into_response()
        }
    }
}

async fn forward_to_dms(ctx: &AppContext, body: &[u8]) -> Result<(String, String)> {
    let client = ctx.dms().ok_or(Error::DmsNotConfigured)?;

    let request: UploadRequest = parse_body(body)?;
    if request.filename.is_empty() {
        return Err(Error::validation("filename is required"));
    }
    if request.ref_id.is_empty() {
        return Err(Error::validation("ref_id is required"));
    }

    let content = ctx.store().read(&request.filename)?;
    let metadata = UploadMetadata::with_defaults(
        request.filename.clone(),
        request.ref_id,
        request.id_type,
        request.document_type,
        request.source_system,
        request.document_sequence,
    );
    let response = client.upload(metadata, content).await?;
    Ok((request.filename, response))
}

/// 404 handler
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Not found".to_string(),
        }),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Build the axum router
pub fn build_router(ctx: SharedContext) -> Router {
    let cors = cors_layer(&ctx.config().allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/render/html", post(render_html))
        .route("/render/pdf", post(render_pdf))
        .route("/templates/save", post(save_template))
        .route("/templates/list", get(list_templates))
        .route("/templates/upload-dms", post(upload_dms))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Run the render server.
///
/// This function blocks until the server is shut down.
pub async fn run_server(config: ApiConfig) -> Result<()> {
    let addr = config.addr.clone();
    let ctx = Arc::new(AppContext::new(config)?);

    let router = build_router(ctx);

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "render-api listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    Ok(())
}
