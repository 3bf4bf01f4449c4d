//! Graph API error parsing and classification.
//!
//! Meta returns errors as:
//!
//! ```json
//! {"error": {"message": "...", "type": "OAuthException", "code": 131026,
//!            "error_subcode": 2494055, "error_data": {"details": "..."}, "fbtrace_id": "..."}}
//! ```
//!
//! The numeric `code` decides what the dispatcher does with a failed send.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GraphErrorData {
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
#[error("Graph API error {code}: {message}")]
pub struct GraphError {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    pub code: i64,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub error_data: Option<GraphErrorData>,
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

impl GraphError {
    /// Parse an error response body. Returns `None` for bodies that are not Graph errors.
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str::<GraphErrorEnvelope>(body).ok().map(|e| e.error)
    }

    pub fn kind(&self) -> SendErrorKind {
        classify(self.code)
    }

    /// Message suitable for showing to API callers.
    pub fn user_message(&self) -> String {
        let detail = self
            .error_data
            .as_ref()
            .and_then(|d| d.details.as_deref())
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.message);
        format!("{} ({detail})", self.kind().description())
    }
}

/// What a failed send means for the recipient and the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendErrorKind {
    /// Throughput exceeded; back off and retry
    RateLimited,
    /// Temporary Meta-side failure; retry
    Transient,
    /// This recipient cannot receive the message; fail the row
    Recipient,
    /// The template is unusable; fail the row
    Template,
    /// Credentials or permissions are broken; pause the campaign
    Auth,
    Unknown,
}

impl SendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Recipient => "recipient",
            Self::Template => "template",
            Self::Auth => "auth",
            Self::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::RateLimited => "WhatsApp rate limit reached",
            Self::Transient => "WhatsApp is temporarily unavailable",
            Self::Recipient => "Recipient cannot receive this message",
            Self::Template => "Template cannot be sent",
            Self::Auth => "WhatsApp credentials were rejected",
            Self::Unknown => "WhatsApp request failed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient | Self::Unknown)
    }
}

pub fn classify(code: i64) -> SendErrorKind {
    match code {
        4 | 80007 | 130429 | 131056 => SendErrorKind::RateLimited,
        1 | 2 | 131000 | 131016 => SendErrorKind::Transient,
        131021 | 131026 | 131049 | 131050 | 133010 => SendErrorKind::Recipient,
        132000 | 132001 | 132005 | 132007 | 132012 | 132015 | 132016 => SendErrorKind::Template,
        0 | 3 | 10 | 190 | 200 => SendErrorKind::Auth,
        _ => SendErrorKind::Unknown,
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] GraphError),
    #[error("WhatsApp {0} is not configured")]
    NotConfigured(&'static str),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("WhatsApp request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected WhatsApp response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Classification for the dispatcher. Transport failures and 5xx without a Graph body retry.
    pub fn kind(&self) -> SendErrorKind {
        match self {
            Self::Api(graph) => graph.kind(),
            Self::NotConfigured(_) => SendErrorKind::Auth,
            Self::Status { status, .. } if *status == 429 => SendErrorKind::RateLimited,
            Self::Status { status, .. } if *status == 401 || *status == 403 => SendErrorKind::Auth,
            Self::Status { status, .. } if *status >= 500 => SendErrorKind::Transient,
            Self::Status { .. } => SendErrorKind::Unknown,
            Self::Http(_) => SendErrorKind::Transient,
            Self::Decode(_) => SendErrorKind::Unknown,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api(graph) => Some(graph.code),
            Self::Status { status, .. } => Some(i64::from(*status)),
            _ => None,
        }
    }
}
