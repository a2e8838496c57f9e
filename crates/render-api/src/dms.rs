//! Document management system (DMS) upload client
//!
//! Forwards a stored template file to the DMS as a multipart form, with the
//! document metadata as text fields and the shared secret in the
//! `api-secret` header.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::info;

use crate::config::DmsConfig;
use crate::error::{Error, Result};

/// Per-request timeout for DMS calls.
pub const DMS_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_ID_TYPE: &str = "template";
pub const DEFAULT_DOCUMENT_TYPE: &str = "html";
pub const DEFAULT_SOURCE_SYSTEM: &str = "LORA";
pub const DEFAULT_DOCUMENT_SEQUENCE: &str = "1";

/// Metadata sent alongside the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub filename: String,
    pub ref_id: String,
    pub id_type: String,
    pub document_type: String,
    pub source_system: String,
    pub document_sequence: String,
}

impl UploadMetadata {
    /// Fill unset optional fields with their defaults.
    pub fn with_defaults(
        filename: String,
        ref_id: String,
        id_type: Option<String>,
        document_type: Option<String>,
        source_system: Option<String>,
        document_sequence: Option<String>,
    ) -> Self {
        fn or_default(value: Option<String>, default: &str) -> String {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        }

        Self {
            filename,
            ref_id,
            id_type: or_default(id_type, DEFAULT_ID_TYPE),
            document_type: or_default(document_type, DEFAULT_DOCUMENT_TYPE),
            source_system: or_default(source_system, DEFAULT_SOURCE_SYSTEM),
            document_sequence: or_default(document_sequence, DEFAULT_DOCUMENT_SEQUENCE),
        }
    }

    fn into_form(self, content: Vec<u8>) -> Form {
        Form::new()
            .part("file", Part::bytes(content).file_name(self.filename))
            .text("ref_id", self.ref_id)
            .text("id_type", self.id_type)
            .text("document_type", self.document_type)
            .text("source_system", self.source_system)
            .text("document_sequence", self.document_sequence)
    }
}

#[derive(Debug, Clone)]
pub struct DmsClient {
    http: reqwest::Client,
    config: DmsConfig,
}

impl DmsClient {
    pub fn new(config: DmsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DMS_TIMEOUT)
            .build()
            .map_err(Error::DmsRequest)?;
        Ok(Self { http, config })
    }

    /// Upload `content` and return the DMS response body.
    ///
    /// A non-2xx answer becomes [`Error::DmsStatus`] carrying the raw body.
    pub async fn upload(&self, metadata: UploadMetadata, content: Vec<u8>) -> Result<String> {
        let filename = metadata.filename.clone();
        let ref_id = metadata.ref_id.clone();

        let response = self
            .http
            .post(&self.config.api_url)
            .header("api-secret", &self.config.api_secret)
            .multipart(metadata.into_form(content))
            .send()
            .await
            .map_err(Error::DmsRequest)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            info!(filename = %filename, ref_id = %ref_id, "Uploaded template to DMS");
            Ok(body)
        } else {
            Err(Error::DmsStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let metadata = UploadMetadata::with_defaults(
            "a-v1.html".into(),
            "R-1".into(),
            None,
            Some(String::new()),
            Some("ERP".into()),
            None,
        );
        assert_eq!(metadata.id_type, "template");
        assert_eq!(metadata.document_type, "html");
        assert_eq!(metadata.source_system, "ERP");
        assert_eq!(metadata.document_sequence, "1");
    }

    #[tokio::test]
    async fn test_unreachable_dms_is_a_request_error() {
        // Bind and drop a listener to get a port nothing is serving on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DmsClient::new(DmsConfig {
            api_url: format!("http://{}/upload", addr),
            api_secret: "s".into(),
        })
        .unwrap();
        let metadata = UploadMetadata::with_defaults("a.html".into(), "1".into(), None, None, None, None);

        let err = client.upload(metadata, b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::DmsRequest(_)));
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().starts_with("DMS request failed: "));
    }
}
