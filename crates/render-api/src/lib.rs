//! render-api: HTTP service for rendering HTML templates
//!
//! This crate provides:
//! - Preview rendering of templates against JSON data
//! - PDF rendering through a headless browser
//! - A versioned on-disk template store
//! - Forwarding of stored templates to a document management system

pub mod config;
pub mod context;
pub mod dms;
pub mod error;
pub mod pdf;
pub mod server;
pub mod storage;

pub use config::{ApiConfig, DmsConfig};
pub use context::{AppContext, SharedContext};
pub use error::{Error, ErrorKind, Result};
pub use pdf::{BrowserLauncher, BrowserSession, PdfError, PdfRenderer, PrintOptions};
pub use storage::{AllocationPolicy, TemplateInfo, TemplateStore, normalize_name};
