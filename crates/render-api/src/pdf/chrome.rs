//! Headless Chrome/Chromium driven over the DevTools protocol.
//!
//! Every session spawns its own browser process with a throwaway profile,
//! connects to the DevTools WebSocket it announces on stderr and talks to a
//! single page target through a flattened session.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, Command};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::PdfError;
use super::browser::{BrowserLauncher, BrowserSession, PrintOptions};

/// Executable names tried, in order, when no explicit path is configured.
pub const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const DEVTOOLS_BANNER: &str = "DevTools listening on ";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Launches one headless browser process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
}

impl ChromeLauncher {
    /// Use `executable` if given, otherwise search `PATH` for a known browser.
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }

    pub fn resolve_executable(&self) -> Result<PathBuf, PdfError> {
        if let Some(path) = &self.executable {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(PdfError::Launch(format!(
                "browser executable not found: {}",
                path.display()
            )));
        }

        let search_path = std::env::var_os("PATH").unwrap_or_default();
        find_executable(std::env::split_paths(&search_path), BROWSER_CANDIDATES).ok_or_else(|| {
            PdfError::Launch(format!(
                "no browser found (tried {}); set CHROME_PATH",
                BROWSER_CANDIDATES.join(", ")
            ))
        })
    }
}

fn find_executable(
    dirs: impl Iterator<Item = PathBuf>,
    candidates: &[&str],
) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = dirs.collect();
    candidates.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch_session(&self) -> Result<Box<dyn BrowserSession>, PdfError> {
        let executable = self.resolve_executable()?;
        let profile = tempfile::Builder::new()
            .prefix("pdf-render-profile-")
            .tempdir()
            .map_err(|e| PdfError::Launch(format!("failed to create profile directory: {}", e)))?;

        let mut child = Command::new(&executable)
            .args([
                "--headless",
                "--disable-gpu",
                "--hide-scrollbars",
                "--mute-audio",
                "--no-first-run",
                "--no-default-browser-check",
                "--remote-debugging-port=0",
            ])
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PdfError::Launch(format!("failed to start {}: {}", executable.display(), e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PdfError::Launch("browser stderr is not captured".into()))?;
        let ws_url = read_devtools_url(stderr).await?;
        debug!(browser = %executable.display(), %ws_url, "Browser started");

        let (socket, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| PdfError::Launch(format!("failed to connect to DevTools: {}", e)))?;
        let mut connection = DevTools { socket, next_id: 0 };

        let target = connection
            .call(None, "Target.createTarget", json!({ "url": "about:blank" }))
            .await
            .map_err(as_launch)?;
        let target_id = string_field(&target, "targetId").map_err(as_launch)?;

        let attached = connection
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await
            .map_err(as_launch)?;
        let session_id = string_field(&attached, "sessionId").map_err(as_launch)?;

        connection
            .call(Some(&session_id), "Page.enable", json!({}))
            .await
            .map_err(as_launch)?;

        Ok(Box::new(ChromeSession {
            child,
            connection,
            target_id,
            session_id,
            _profile: profile,
        }))
    }
}

/// Read stderr until the DevTools endpoint is announced, then keep draining
/// it in the background so the browser never blocks on a full pipe.
async fn read_devtools_url(stderr: ChildStderr) -> Result<String, PdfError> {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| PdfError::Launch(format!("failed to read browser output: {}", e)))?;
        let Some(line) = line else {
            return Err(PdfError::Launch(
                "browser exited before announcing a DevTools endpoint".into(),
            ));
        };
        if let Some(url) = devtools_url(&line) {
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(line = %line, "browser stderr");
                }
            });
            return Ok(url);
        }
        trace!(line = %line, "browser stderr");
    }
}

fn devtools_url(line: &str) -> Option<String> {
    let (_, rest) = line.split_once(DEVTOOLS_BANNER)?;
    let url = rest.trim();
    url.starts_with("ws://").then(|| url.to_string())
}

fn string_field(value: &Value, name: &str) -> Result<String, PdfError> {
    value
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PdfError::Protocol(format!("response is missing {}", name)))
}

fn as_launch(err: PdfError) -> PdfError {
    match err {
        PdfError::Protocol(message) => PdfError::Launch(message),
        other => other,
    }
}

fn as_navigation(err: PdfError) -> PdfError {
    match err {
        PdfError::Protocol(message) => PdfError::Navigation(message),
        other => other,
    }
}

fn as_print(err: PdfError) -> PdfError {
    match err {
        PdfError::Protocol(message) => PdfError::Print(message),
        other => other,
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Request/response channel over the browser's DevTools WebSocket.
struct DevTools {
    socket: Socket,
    next_id: u64,
}

impl DevTools {
    /// Send one command and wait for its reply, skipping unrelated events.
    async fn call(
        &mut self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, PdfError> {
        self.next_id += 1;
        let id = self.next_id;

        let mut message = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            message["sessionId"] = json!(session_id);
        }
        self.socket
            .send(Message::text(message.to_string()))
            .await
            .map_err(|e| PdfError::Protocol(format!("{}: {}", method, e)))?;

        while let Some(frame) = self.socket.next().await {
            let frame = frame.map_err(|e| PdfError::Protocol(format!("{}: {}", method, e)))?;
            let Message::Text(text) = frame else {
                continue;
            };
            let reply: Value = serde_json::from_str(text.as_str())
                .map_err(|e| PdfError::Protocol(format!("{}: malformed reply: {}", method, e)))?;
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = reply.get("error") {
                let detail = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(PdfError::Protocol(format!("{}: {}", method, detail)));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }

        Err(PdfError::Protocol(format!(
            "{}: DevTools connection closed",
            method
        )))
    }
}

struct ChromeSession {
    child: Child,
    connection: DevTools,
    target_id: String,
    session_id: String,
    // Deleted on drop. `close` reaps the browser first; a session dropped
    // mid-render only signals it, so the profile may outlive the removal
    // attempt while the process exits.
    _profile: TempDir,
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), PdfError> {
        let result = self
            .connection
            .call(Some(&self.session_id), "Page.navigate", json!({ "url": url }))
            .await
            .map_err(as_navigation)?;
        match result.get("errorText").and_then(Value::as_str) {
            Some(error) if !error.is_empty() => Err(PdfError::Navigation(error.to_string())),
            _ => Ok(()),
        }
    }

    async fn wait_ready(&mut self) -> Result<(), PdfError> {
        loop {
            let result = self
                .connection
                .call(
                    Some(&self.session_id),
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                )
                .await
                .map_err(as_navigation)?;
            let state = result
                .pointer("/result/value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if state == "complete" {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn print_to_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, PdfError> {
        let params = serde_json::to_value(options)
            .map_err(|e| PdfError::Print(format!("invalid print options: {}", e)))?;
        let result = self
            .connection
            .call(Some(&self.session_id), "Page.printToPDF", params)
            .await
            .map_err(as_print)?;
        let data = string_field(&result, "data").map_err(as_print)?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| PdfError::Print(format!("invalid PDF data: {}", e)))
    }

    async fn close(&mut self) {
        let target_id = self.target_id.clone();
        if let Err(e) = self
            .connection
            .call(None, "Target.closeTarget", json!({ "targetId": target_id }))
            .await
        {
            debug!(error = %e, "Failed to close page target");
        }
        // The browser may drop the socket before replying.
        let _ = self.connection.call(None, "Browser.close", json!({})).await;

        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to stop browser process");
        }
        info!("Browser session closed");
    }
}
