//! render-api binary - template preview, PDF and storage server

use std::path::PathBuf;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use render_api::config::{self, ApiConfig, DmsConfig};
use render_api::{AllocationPolicy, server};

#[derive(Parser, Debug)]
#[command(name = "render-api")]
#[command(about = "Renders HTML templates to previews and PDFs and stores template versions")]
struct Args {
    /// Directory where saved templates are kept
    #[arg(long, env = "TEMPLATES_DIR", default_value = "../templates")]
    templates_dir: PathBuf,

    /// Address to listen on (":8080" binds all interfaces)
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// Comma-separated list of origins allowed to call the API from a browser
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "")]
    allowed_origins: String,

    /// Upload endpoint of the document management system
    #[arg(long, env = "DMS_API_URL")]
    dms_api_url: Option<String>,

    /// Shared secret sent to the document management system
    #[arg(long, env = "DMS_API_SECRET", hide_env_values = true)]
    dms_api_secret: Option<String>,

    /// Chrome or Chromium executable (searched on PATH when unset)
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Serialize concurrent saves of the same template name
    #[arg(long, env = "SERIALIZE_SAVES")]
    serialize_saves: bool,
}

impl Args {
    fn into_config(self) -> ApiConfig {
        ApiConfig {
            templates_dir: self.templates_dir,
            addr: config::normalize_addr(&self.addr),
            allowed_origins: config::parse_origins(&self.allowed_origins),
            dms: DmsConfig::from_parts(self.dms_api_url, self.dms_api_secret),
            chrome_path: self.chrome_path,
            allocation: if self.serialize_saves {
                AllocationPolicy::PerSlugLock
            } else {
                AllocationPolicy::Unsynchronized
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Environment files must be loaded before RUST_LOG and the clap env
    // fallbacks are read.
    let dotenv = config::load_dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "render_api=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    match &dotenv {
        Some(path) => debug!(path = %path.display(), "Loaded environment file"),
        None => debug!("No .env file found, using environment variables"),
    }

    let config = Args::parse().into_config();
    config.log_summary();

    server::run_server(config).await?;

    Ok(())
}
