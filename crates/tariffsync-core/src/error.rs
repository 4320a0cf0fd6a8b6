//! Failure taxonomy shared by the HTTP layer, the fetcher, and the mirror.
//!
//! A failed external call always ends up as a [`ClassifiedError`]. Callers branch on
//! [`ClassifiedError::kind`] rather than on message text.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Discriminant of a [`ClassifiedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input date or missing credential. Never retried.
    Validation,
    /// HTTP 429 that outlived every attempt.
    RateLimited,
    /// HTTP 5xx that outlived every attempt.
    ServerTransient,
    /// Connection-level failure without an HTTP status. Not retried.
    Network,
    /// Every attempt ran past its deadline.
    Timeout,
    /// Any other non-success status.
    UpstreamRejected,
    /// Payload shape mismatch or a broken retry loop.
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::RateLimited => "rate_limited",
            Self::ServerTransient => "server_transient",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::UpstreamRejected => "upstream_rejected",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error document some upstreams return with a non-success status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamErrorBody {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub code: Option<String>,
    pub request_id: Option<String>,
    pub origin: Option<String>,
    pub timestamp: Option<String>,
    pub status: Option<u16>,
    pub status_text: Option<String>,
}

impl UpstreamErrorBody {
    /// Parse an error body; anything that is not a JSON object carrying at least one
    /// known field yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let body: Self = serde_json::from_str(raw).ok()?;
        (body != Self::default()).then_some(body)
    }
}

/// Tagged failure of one logical external call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    status_text: Option<String>,
    retry_after: Option<Duration>,
    body: Option<UpstreamErrorBody>,
}

impl ClassifiedError {
    fn bare(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            status_text: None,
            retry_after: None,
            body: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::bare(ErrorKind::Validation, message)
    }

    pub fn credential_missing() -> Self {
        Self::validation("tariff API bearer token is not configured")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::bare(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::bare(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::bare(ErrorKind::Internal, message)
    }

    /// Classify a terminal non-success HTTP response.
    pub fn from_status(
        status: u16,
        status_text: impl Into<String>,
        body: Option<UpstreamErrorBody>,
        retry_after: Option<Duration>,
    ) -> Self {
        let status_text = status_text.into();
        let kind = match status {
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::ServerTransient,
            _ => ErrorKind::UpstreamRejected,
        };

        let mut message = format!("HTTP {status} {status_text}").trim_end().to_string();
        if let Some(detail) = body.as_ref().and_then(|body| body.detail.as_deref()) {
            message.push_str(" - ");
            message.push_str(detail);
        }

        Self {
            kind,
            message,
            status: Some(status),
            status_text: Some(status_text),
            retry_after,
            body,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn body(&self) -> Option<&UpstreamErrorBody> {
        self.body.as_ref()
    }

    /// Whether the HTTP layer treats this kind as transient.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimited | ErrorKind::ServerTransient | ErrorKind::Timeout
        )
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation => "http.validation",
            ErrorKind::RateLimited => "http.rate_limited",
            ErrorKind::ServerTransient => "http.server_transient",
            ErrorKind::Network => "http.network",
            ErrorKind::Timeout => "http.timeout",
            ErrorKind::UpstreamRejected => "http.upstream_rejected",
            ErrorKind::Internal => "http.internal",
        }
    }

    /// Multi-line operator summary built from the upstream diagnostic fields.
    ///
    /// Falls back to the status text, then to the message, when the upstream sent no
    /// structured body.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(body) = &self.body {
            let fields = [
                ("Title", &body.title),
                ("Detail", &body.detail),
                ("Request ID", &body.request_id),
                ("Origin", &body.origin),
                ("Code", &body.code),
            ];
            for (label, value) in fields {
                if let Some(value) = value.as_deref().filter(|value| !value.is_empty()) {
                    lines.push(format!("{label}: {value}"));
                }
            }
        }

        if lines.is_empty() {
            let fallback = self
                .status_text
                .as_deref()
                .filter(|text| !text.is_empty())
                .unwrap_or(&self.message);
            lines.push(fallback.to_string());
        }

        lines.join("\n")
    }
}

impl Display for ClassifiedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ClassifiedError {}
