//! Browser capability interface.
//!
//! The PDF pipeline only needs a handful of browser operations, so they are
//! expressed as two small traits. [`ChromeLauncher`](super::chrome::ChromeLauncher)
//! implements them over the DevTools protocol; tests substitute a fake.

use async_trait::async_trait;
use serde::Serialize;

use super::PdfError;

/// Page settings passed to the browser's print-to-PDF call.
///
/// Serializes to the DevTools `Page.printToPDF` parameter names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOptions {
    pub print_background: bool,
    #[serde(rename = "preferCSSPageSize")]
    pub prefer_css_page_size: bool,
    /// Margins in inches
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            print_background: true,
            prefer_css_page_size: true,
            margin_top: 0.4,
            margin_bottom: 0.4,
            margin_left: 0.4,
            margin_right: 0.4,
        }
    }
}

/// Starts a fresh, isolated browser session for one render.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch_session(&self) -> Result<Box<dyn BrowserSession>, PdfError>;
}

/// A single browser page.
///
/// Dropping a session must release the browser even if [`close`](Self::close)
/// was never awaited.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` in the page.
    async fn navigate(&mut self, url: &str) -> Result<(), PdfError>;

    /// Wait until the loaded document reports it is ready.
    async fn wait_ready(&mut self) -> Result<(), PdfError>;

    async fn print_to_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, PdfError>;

    /// Shut the session down. Failures are logged, not returned.
    async fn close(&mut self);
}
