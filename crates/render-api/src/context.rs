//! Application context - state shared by all request handlers
//!
//! Everything here is built once at startup and only read afterwards.

use std::sync::Arc;

use crate::config::ApiConfig;
use crate::dms::DmsClient;
use crate::error::Result;
use crate::pdf::{BrowserLauncher, ChromeLauncher, PdfRenderer};
use crate::storage::TemplateStore;

pub struct AppContext {
    config: ApiConfig,
    store: TemplateStore,
    pdf: PdfRenderer,
    dms: Option<DmsClient>,
}

/// Shared handle passed to axum handlers.
pub type SharedContext = Arc<AppContext>;

impl AppContext {
    /// Build the context with the headless Chrome launcher.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let launcher = Arc::new(ChromeLauncher::new(config.chrome_path.clone()));
        Self::with_launcher(config, launcher)
    }

    /// Build the context with a custom browser launcher.
    pub fn with_launcher(config: ApiConfig, launcher: Arc<dyn BrowserLauncher>) -> Result<Self> {
        let store = TemplateStore::new(config.templates_dir.clone()).with_policy(config.allocation);
        let dms = config.dms.clone().map(DmsClient::new).transpose()?;

        Ok(Self {
            config,
            store,
            pdf: PdfRenderer::new(launcher),
            dms,
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn pdf(&self) -> &PdfRenderer {
        &self.pdf
    }

    /// The upload client, if the DMS is configured.
    pub fn dms(&self) -> Option<&DmsClient> {
        self.dms.as_ref()
    }
}
