//! Service configuration
//!
//! Built once at startup from command-line flags and environment variables
//! (after `.env` files are loaded) and shared read-only afterwards.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::storage::AllocationPolicy;

/// Credentials for the document management system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmsConfig {
    pub api_url: String,
    pub api_secret: String,
}

impl DmsConfig {
    /// Both values must be present and non-empty for uploads to be enabled.
    pub fn from_parts(api_url: Option<String>, api_secret: Option<String>) -> Option<Self> {
        let api_url = api_url.filter(|s| !s.trim().is_empty())?;
        let api_secret = api_secret.filter(|s| !s.is_empty())?;
        Some(Self {
            api_url,
            api_secret,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Directory holding saved templates
    pub templates_dir: PathBuf,

    /// Socket address to listen on
    pub addr: String,

    /// Origins allowed to make cross-origin requests. Empty disables CORS.
    pub allowed_origins: Vec<String>,

    /// Upload target; `None` when not configured
    pub dms: Option<DmsConfig>,

    /// Browser executable; `None` searches `PATH`
    pub chrome_path: Option<PathBuf>,

    /// Version allocation for concurrent saves
    pub allocation: AllocationPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("../templates"),
            addr: "0.0.0.0:8080".to_string(),
            allowed_origins: Vec::new(),
            dms: None,
            chrome_path: None,
            allocation: AllocationPolicy::Unsynchronized,
        }
    }
}

impl ApiConfig {
    pub fn dms_configured(&self) -> bool {
        self.dms.is_some()
    }

    /// Log the effective configuration.
    pub fn log_summary(&self) {
        info!(
            templates_dir = %self.templates_dir.display(),
            addr = %self.addr,
            allocation = ?self.allocation,
            "Configuration loaded"
        );
        info!(origins = ?self.allowed_origins, "Allowed CORS origins");
        match &self.dms {
            Some(dms) => info!(url = %dms.api_url, "DMS API configured"),
            None => info!("DMS API not configured (DMS_API_URL not set)"),
        }
    }
}

/// Accept `:8080` as shorthand for all interfaces.
pub fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load `.env` from the working directory, or failing that its parent, and
/// return the file that was loaded.
///
/// Variables already set in the environment are not overridden. Runs before
/// logging is set up, so the caller reports the outcome.
pub fn load_dotenv() -> Option<PathBuf> {
    load_dotenv_in(Path::new(""))
}

fn load_dotenv_in(dir: &Path) -> Option<PathBuf> {
    [dir.join(".env"), dir.join("../.env")]
        .into_iter()
        .find(|candidate| dotenvy::from_path(candidate).is_ok())
}
