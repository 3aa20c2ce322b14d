use std::path::PathBuf;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Step of multipart form assembly that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartPhase {
    /// Writing a plain text field.
    Field,
    /// Creating the file part header.
    FilePart,
    /// Copying file contents into the form.
    Copy,
    /// Closing the form and handing it to the transport.
    Finish,
}

impl std::fmt::Display for MultipartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Field => "write field",
            Self::FilePart => "create file part",
            Self::Copy => "copy file contents",
            Self::Finish => "finish form",
        };
        f.write_str(s)
    }
}

/// Errors produced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input; nothing was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend could not be reached, or the exchange broke mid-flight.
    #[error("{method} {url}: transport failure: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },

    /// The backend answered with a status outside 200..=299.
    #[error("{method} {url}: HTTP {status}{}", format_message(.message, .body))]
    HttpStatus {
        method: Method,
        url: String,
        status: u16,
        body: Vec<u8>,
        message: Option<String>,
    },

    /// A response body could not be read to the end.
    #[error("failed to read response body: {0}")]
    ReadBody(#[source] std::io::Error),

    /// The response body was not the JSON we expected.
    #[error("failed to decode response JSON: {source}; body: {}", preview(.raw))]
    DecodeFailed {
        raw: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },

    /// Multipart form assembly failed before the request was sent.
    #[error("multipart upload failed to {phase}: {source}")]
    Multipart {
        phase: MultipartPhase,
        #[source]
        source: std::io::Error,
    },

    /// A job-creating call returned no job id.
    #[error("response did not contain a job id; body: {body}")]
    MissingJobId { body: String },

    /// The backend reported `Fail` for the job.
    #[error("job {job_id} failed; response: {body}")]
    JobFailed { job_id: String, body: String },

    /// The backend reported `Error` for the job.
    #[error("job {job_id} errored{}; response: {body}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    JobError {
        job_id: String,
        message: Option<String>,
        body: String,
    },

    /// The backend reported a status this client does not know.
    #[error("job {job_id} reported unknown status \"{status}\"; response: {body}")]
    UnknownStatus {
        job_id: String,
        status: String,
        body: String,
    },

    /// The poll budget ran out before the job finished.
    #[error("job {job_id} never completed after {polls} poll(s)")]
    Timeout { job_id: String, polls: usize },

    /// The caller cancelled the wait.
    #[error("wait for job {job_id} was cancelled")]
    Cancelled { job_id: String },

    /// A finished job's result lacked the field the operation needs.
    #[error("job result is missing {expected}: {result}")]
    UnexpectedResult { expected: &'static str, result: Value },

    /// A download carried no file name, which usually means the ingest broke.
    #[error("file for data id {data_id} is unnamed; probable ingest error. Initial response: {preview}")]
    UnnamedFile { data_id: String, preview: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status code, for `HttpStatus` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response bytes carried by the error, if any.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::HttpStatus { body, .. } => Some(body),
            Self::DecodeFailed { raw, .. } => Some(raw),
            Self::MissingJobId { body }
            | Self::JobFailed { body, .. }
            | Self::JobError { body, .. }
            | Self::UnknownStatus { body, .. } => Some(body.as_bytes()),
            _ => None,
        }
    }

    /// The job id the error is about, for poller errors.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobFailed { job_id, .. }
            | Self::JobError { job_id, .. }
            | Self::UnknownStatus { job_id, .. }
            | Self::Timeout { job_id, .. }
            | Self::Cancelled { job_id } => Some(job_id),
            _ => None,
        }
    }

    /// The backend explicitly said the job went wrong. Retrying the same job
    /// will not help.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::JobFailed { .. } | Self::JobError { .. } | Self::UnknownStatus { .. }
        )
    }

    /// Worth trying again later: the job was still running, the backend was
    /// unreachable, or it answered with a server-side status.
    pub fn is_retryable_later(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } | Self::ReadBody(_) => true,
            Self::HttpStatus { status, .. } => matches!(*status, 500..=599 | 408 | 429),
            _ => false,
        }
    }
}

/// Error payloads the gateway sends with non-2xx responses.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct BackendErrorBody {
    #[serde(default)]
    pub(crate) message: Option<String>,
    // {"error": "..."} is what the services behind the gateway emit
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    #[serde(default)]
    pub(crate) origin: Option<String>,
}

impl BackendErrorBody {
    fn summary(&self) -> Option<String> {
        let head = self
            .message
            .as_deref()
            .or(self.error.as_deref())
            .or(self.title.as_deref())
            .filter(|s| !s.trim().is_empty());
        let detail = self.detail.as_deref().filter(|s| !s.trim().is_empty());

        let mut out = match (head, detail) {
            (Some(h), Some(d)) => format!("{h}: {d}"),
            (Some(h), None) => h.to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => return None,
        };
        if let Some(origin) = self.origin.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(&format!(" (origin: {origin})"));
        }
        Some(out)
    }
}

/// Best-effort extraction of a human-readable message from an error body.
pub(crate) fn extract_backend_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<BackendErrorBody>(body)
        .ok()
        .and_then(|e| e.summary())
}

fn format_message(message: &Option<String>, body: &[u8]) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None if body.is_empty() => String::new(),
        None => format!("\n{}", preview(body)),
    }
}

pub(crate) fn preview(raw: &[u8]) -> String {
    const LIMIT: usize = 512;
    let text = String::from_utf8_lossy(raw);
    if text.is_empty() {
        return "(empty)".to_string();
    }
    if text.len() <= LIMIT {
        return text.into_owned();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_error(status: u16, body: &str) -> Error {
        Error::HttpStatus {
            method: Method::GET,
            url: "http://gw/job/1".to_string(),
            status,
            body: body.as_bytes().to_vec(),
            message: extract_backend_message(body.as_bytes()),
        }
    }

    #[test]
    fn test_extracts_message_shapes() {
        assert_eq!(
            extract_backend_message(br#"{"message":"nope"}"#).as_deref(),
            Some("nope")
        );
        assert_eq!(
            extract_backend_message(br#"{"error":"bad dataId"}"#).as_deref(),
            Some("bad dataId")
        );
        assert_eq!(
            extract_backend_message(br#"{"title":"Forbidden","detail":"no key"}"#).as_deref(),
            Some("Forbidden: no key")
        );
        assert_eq!(
            extract_backend_message(br#"{"message":"x","origin":"pz-ingest"}"#).as_deref(),
            Some("x (origin: pz-ingest)")
        );
        assert_eq!(extract_backend_message(b"<html>502</html>"), None);
        assert_eq!(extract_backend_message(b"{}"), None);
    }

    #[test]
    fn test_http_status_display() {
        let err = http_error(404, r#"{"message":"Job Not Found"}"#);
        assert_eq!(err.to_string(), "GET http://gw/job/1: HTTP 404: Job Not Found");
        assert_eq!(err.status(), Some(404));

        let err = http_error(502, "Bad Gateway");
        assert_eq!(err.to_string(), "GET http://gw/job/1: HTTP 502\nBad Gateway");
    }

    #[test]
    fn test_classification() {
        assert!(http_error(503, "").is_retryable_later());
        assert!(!http_error(400, "").is_retryable_later());

        let timeout = Error::Timeout {
            job_id: "j".to_string(),
            polls: 3,
        };
        assert!(timeout.is_retryable_later());
        assert!(!timeout.is_backend_failure());
        assert_eq!(timeout.job_id(), Some("j"));

        let failed = Error::JobFailed {
            job_id: "j".to_string(),
            body: "{}".to_string(),
        };
        assert!(failed.is_backend_failure());
        assert!(!failed.is_retryable_later());
        assert_eq!(failed.body(), Some(&b"{}"[..]));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(600);
        let p = preview(long.as_bytes());
        assert!(p.ends_with("..."));
        assert!(p.len() <= 515);
        assert_eq!(preview(b""), "(empty)");
    }

    #[test]
    fn test_job_error_display() {
        let err = Error::JobError {
            job_id: "abc".to_string(),
            message: Some("Everything Broken.".to_string()),
            body: "{..}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "job abc errored (Everything Broken.); response: {..}"
        );
    }
}
