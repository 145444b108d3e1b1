use thiserror::Error;

/// Which way a backend failure should be reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    Unavailable,
    RequestError,
}

impl BackendErrorCode {
    /// 502/503/504 mean the inference service itself is down or overloaded;
    /// everything else is a problem with the request we sent.
    pub fn from_status(status: u16) -> Self {
        match status {
            502 | 503 | 504 => BackendErrorCode::Unavailable,
            _ => BackendErrorCode::RequestError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorCode::Unavailable => "BACKEND_UNAVAILABLE",
            BackendErrorCode::RequestError => "BACKEND_REQUEST_ERROR",
        }
    }
}

#[derive(Error, Debug)]
pub enum HosterError {
    #[error("Backend returned {status} {reason}: {body}")]
    Backend {
        code: BackendErrorCode,
        status: u16,
        reason: String,
        body: String,
    },

    #[error("Backend unreachable at {url}: {message}")]
    BackendUnreachable { url: String, message: String },

    #[error("Unsupported request type: {0}")]
    UnsupportedRequestType(String),

    #[error("Malformed stream chunk: {0}")]
    MalformedStreamChunk(String),

    #[error("Transport decode error: {0}")]
    TransportDecode(String),

    #[error("Relay unreachable at {url}: {message}")]
    RelayUnreachable { url: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HosterError {
    /// Stable error code string, used in logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            HosterError::Backend { code, .. } => code.as_str(),
            HosterError::BackendUnreachable { .. } => BackendErrorCode::Unavailable.as_str(),
            HosterError::UnsupportedRequestType(_) => "UNSUPPORTED_REQUEST_TYPE",
            HosterError::MalformedStreamChunk(_) => "MALFORMED_STREAM_CHUNK",
            HosterError::TransportDecode(_) => "TRANSPORT_DECODE_ERROR",
            HosterError::RelayUnreachable { .. } => "RELAY_UNREACHABLE",
            HosterError::Network(_) => "NETWORK_ERROR",
            HosterError::InvalidRequest(_) => "INVALID_REQUEST",
            HosterError::Config(_) => "CONFIGURATION_ERROR",
            HosterError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            HosterError::Backend { code, .. } => *code == BackendErrorCode::Unavailable,
            HosterError::BackendUnreachable { .. }
            | HosterError::RelayUnreachable { .. }
            | HosterError::Network(_) => true,
            _ => false,
        }
    }

    /// HTTP status to surface when this error ends a direct API request.
    pub fn http_status(&self) -> u16 {
        match self {
            HosterError::Backend { status, .. } => *status,
            HosterError::BackendUnreachable { .. } | HosterError::RelayUnreachable { .. } => 503,
            HosterError::UnsupportedRequestType(_)
            | HosterError::InvalidRequest(_)
            | HosterError::TransportDecode(_) => 400,
            HosterError::MalformedStreamChunk(_) => 502,
            _ => 500,
        }
    }

    /// Classify a reqwest failure that happened before any status was received.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            HosterError::BackendUnreachable {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            HosterError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for HosterError {
    fn from(err: anyhow::Error) -> Self {
        HosterError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for HosterError {
    fn from(err: serde_json::Error) -> Self {
        HosterError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HosterError>;
