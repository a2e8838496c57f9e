//! HTML to PDF conversion through a headless browser.
//!
//! Each render writes the HTML to a temporary file, opens it in a fresh
//! browser session, waits for the page to settle and prints it. Nothing is
//! shared between renders. The whole sequence runs under one deadline; when
//! it expires (or the caller drops the future) the session and the temporary
//! file are released.

pub mod browser;
pub mod chrome;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

pub use browser::{BrowserLauncher, BrowserSession, PrintOptions};
pub use chrome::ChromeLauncher;

/// Upper bound for one complete render, launch to last byte.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Settle time used when the request gives none (or a non-positive value).
pub const DEFAULT_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("failed to write temporary HTML file: {0}")]
    Materialize(#[source] io::Error),

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("print to PDF failed: {0}")]
    Print(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("render timed out after {}s", RENDER_TIMEOUT.as_secs())]
    Timeout,
}

/// Resolve the requested settle time in milliseconds.
pub fn effective_wait(wait_after_load: Option<i64>) -> Duration {
    match wait_after_load {
        Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
        _ => DEFAULT_WAIT,
    }
}

/// Converts HTML documents to PDF bytes.
#[derive(Clone)]
pub struct PdfRenderer {
    launcher: Arc<dyn BrowserLauncher>,
    timeout: Duration,
}

impl PdfRenderer {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            timeout: RENDER_TIMEOUT,
        }
    }

    pub async fn render(
        &self,
        html: &str,
        wait_after_load: Option<i64>,
    ) -> Result<Vec<u8>, PdfError> {
        let wait = effective_wait(wait_after_load);
        let file = materialize(html)?;
        let url = file_url(file.path());

        let result = match tokio::time::timeout(self.timeout, self.run(&url, wait)).await {
            Ok(result) => result,
            Err(_) => Err(PdfError::Timeout),
        };

        drop(file);
        result
    }

    async fn run(&self, url: &str, wait: Duration) -> Result<Vec<u8>, PdfError> {
        let started = tokio::time::Instant::now();
        let mut session = self.launcher.launch_session().await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Browser session started");

        let result = print_page(session.as_mut(), url, wait).await;
        session.close().await;

        if let Ok(pdf) = &result {
            debug!(
                bytes = pdf.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "PDF printed"
            );
        }
        result
    }
}

async fn print_page(
    session: &mut dyn BrowserSession,
    url: &str,
    wait: Duration,
) -> Result<Vec<u8>, PdfError> {
    session.navigate(url).await?;
    session.wait_ready().await?;
    tokio::time::sleep(wait).await;
    session.print_to_pdf(&PrintOptions::default()).await
}

fn materialize(html: &str) -> Result<NamedTempFile, PdfError> {
    let mut file = tempfile::Builder::new()
        .prefix("pdf-render-")
        .suffix(".html")
        .tempfile()
        .map_err(PdfError::Materialize)?;
    file.write_all(html.as_bytes())
        .and_then(|_| file.flush())
        .map_err(PdfError::Materialize)?;
    Ok(file)
}

fn file_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailAt, FakeLauncher};
    use super::*;

    fn fake_renderer(fail_at: FailAt) -> (PdfRenderer, Arc<FakeLauncher>) {
        let launcher = Arc::new(FakeLauncher::new(fail_at));
        (PdfRenderer::new(launcher.clone()), launcher)
    }

    #[test]
    fn test_effective_wait() {
        assert_eq!(effective_wait(None), DEFAULT_WAIT);
        assert_eq!(effective_wait(Some(0)), DEFAULT_WAIT);
        assert_eq!(effective_wait(Some(-5)), DEFAULT_WAIT);
        assert_eq!(effective_wait(Some(1200)), Duration::from_millis(1200));
    }

    #[test]
    fn test_file_url() {
        assert_eq!(
            file_url(Path::new("/tmp/pdf-render-1.html")),
            "file:///tmp/pdf-render-1.html"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_success_uses_default_wait() {
        let (renderer, launcher) = fake_renderer(FailAt::Nothing);
        let started = tokio::time::Instant::now();

        let pdf = renderer.render("<p>hi</p>", None).await.unwrap();

        assert_eq!(pdf, b"%PDF-1.4 fake");
        assert!(started.elapsed() >= DEFAULT_WAIT);
        assert_eq!(
            launcher.entries(),
            ["launch", "navigate", "wait_ready", "print", "close", "drop"]
        );
        let calls = launcher.calls.lock().unwrap();
        assert_eq!(calls.html_seen.as_deref(), Some("<p>hi</p>"));
        assert_eq!(calls.options_seen, Some(PrintOptions::default()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_honors_requested_wait() {
        let (renderer, _) = fake_renderer(FailAt::Nothing);
        let started = tokio::time::Instant::now();
        renderer.render("x", Some(2000)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_their_stage() {
        let (renderer, launcher) = fake_renderer(FailAt::Launch);
        let err = renderer.render("x", None).await.unwrap_err();
        assert!(matches!(err, PdfError::Launch(_)));
        assert_eq!(launcher.entries(), ["launch"]);

        let (renderer, launcher) = fake_renderer(FailAt::Navigate);
        let err = renderer.render("x", None).await.unwrap_err();
        assert!(matches!(err, PdfError::Navigation(_)));
        assert_eq!(launcher.entries(), ["launch", "navigate", "close", "drop"]);

        let (renderer, _) = fake_renderer(FailAt::WaitReady);
        let err = renderer.render("x", None).await.unwrap_err();
        assert!(matches!(err, PdfError::Navigation(_)));

        let (renderer, _) = fake_renderer(FailAt::Print);
        let err = renderer.render("x", None).await.unwrap_err();
        assert!(matches!(err, PdfError::Print(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_session() {
        let (renderer, launcher) = fake_renderer(FailAt::Hang);
        let err = renderer.render("x", None).await.unwrap_err();
        assert!(matches!(err, PdfError::Timeout));
        // The session is dropped without an orderly close.
        assert_eq!(launcher.entries(), ["launch", "navigate", "wait_ready", "drop"]);
    }

    #[tokio::test]
    async fn test_temporary_file_is_removed() {
        let (renderer, launcher) = fake_renderer(FailAt::Navigate);
        let _ = renderer.render("x", None).await;

        let calls = launcher.calls.lock().unwrap();
        assert_eq!(calls.html_seen.as_deref(), Some("x"));
        let path = calls.path_seen.clone().unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("pdf-render-"));
        assert!(path.extension().is_some_and(|ext| ext == "html"));
        assert!(!path.exists());
    }
}
