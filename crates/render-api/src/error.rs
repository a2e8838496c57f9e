//! Error types for render-api

use std::io;
use std::path::PathBuf;

use render_template::TemplateError;

use crate::pdf::PdfError;

/// Broad error classes, used to choose the HTTP status of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed or incomplete
    Validation,
    /// The template failed to parse or execute
    Template,
    /// The template directory could not be read or written
    Storage,
    /// The browser pipeline failed
    RenderPipeline,
    /// The document management system failed or is not configured
    Upstream,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    Validation(String),

    #[error("{}", template_message(.0))]
    Template(#[from] TemplateError),

    #[error("failed to create templates directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read templates directory")]
    List(#[source] io::Error),

    #[error("failed to read template file: {0}")]
    Read(#[source] io::Error),

    #[error("no version number left for template {0:?}")]
    VersionsExhausted(String),

    #[error("failed to read template file: invalid filename {0:?}")]
    InvalidFilename(String),

    #[error("pdf generation error: {0}")]
    Pdf(#[from] PdfError),

    #[error("DMS not configured. Set DMS_API_URL and DMS_API_SECRET in .env")]
    DmsNotConfigured,

    #[error("DMS request failed: {0}")]
    DmsRequest(#[source] reqwest::Error),

    #[error("DMS returned status {status}")]
    DmsStatus { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Server error: {0}")]
    Server(String),
}

fn template_message(err: &TemplateError) -> String {
    if err.is_parse_error() {
        format!("template parse error: {}", err)
    } else {
        format!("template execute error: {}", err)
    }
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidJson(_) | Error::Validation(_) | Error::InvalidFilename(_) => {
                ErrorKind::Validation
            }
            Error::Template(_) => ErrorKind::Template,
            Error::CreateDir { .. }
            | Error::Write { .. }
            | Error::List(_)
            | Error::Read(_)
            | Error::VersionsExhausted(_)
            | Error::Io(_)
            | Error::Server(_) => ErrorKind::Storage,
            Error::Pdf(_) => ErrorKind::RenderPipeline,
            Error::DmsNotConfigured | Error::DmsRequest(_) | Error::DmsStatus { .. } => {
                ErrorKind::Upstream
            }
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Template => 400,
            // A stored artifact that cannot be read is reported against the request.
            ErrorKind::Storage if matches!(self, Error::Read(_)) => 400,
            ErrorKind::Storage | ErrorKind::RenderPipeline => 500,
            ErrorKind::Upstream if matches!(self, Error::DmsNotConfigured) => 500,
            ErrorKind::Upstream => 502,
        }
    }

    /// Raw upstream response body, when the DMS answered with an error status.
    pub fn upstream_body(&self) -> Option<&str> {
        match self {
            Error::DmsStatus { body, .. } => Some(body),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use render_template::SourcePos;

    #[test]
    fn test_template_messages_are_prefixed() {
        let parse: Error = TemplateError::ParseError {
            message: "unexpected {{end}}".into(),
            position: Some(SourcePos {
                offset: 4,
                line: 2,
                column: 5,
            }),
        }
        .into();
        assert_eq!(parse.to_string(), "template parse error: 2:5: unexpected {{end}}");
        assert_eq!(parse.status_code(), 400);

        let exec: Error = TemplateError::ExecError {
            message: "boom".into(),
            position: None,
        }
        .into();
        assert_eq!(exec.to_string(), "template execute error: boom");
        assert_eq!(exec.kind(), ErrorKind::Template);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("name is required").status_code(), 400);
        assert_eq!(Error::InvalidJson("eof".into()).status_code(), 400);
        assert_eq!(
            Error::Read(io::Error::new(io::ErrorKind::NotFound, "gone")).status_code(),
            400
        );
        assert_eq!(
            Error::List(io::Error::new(io::ErrorKind::PermissionDenied, "no")).status_code(),
            500
        );
        assert_eq!(Error::Pdf(PdfError::Timeout).status_code(), 500);
        assert_eq!(Error::DmsNotConfigured.status_code(), 500);
        assert_eq!(
            Error::DmsStatus {
                status: 503,
                body: "down".into()
            }
            .status_code(),
            502
        );
    }
}
