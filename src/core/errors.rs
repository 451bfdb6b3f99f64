use thiserror::Error;

#[derive(Error, Debug)]
pub enum DavError {
    /// 没有拿到 HTTP 响应（DNS、连接、TLS、CORS 等）
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server responded with status {status}{}", detail_suffix(.detail))]
    HttpStatus {
        status: u16,
        detail: String,
    },

    #[error("Failed to fetch image: HTTP {status}")]
    ImageFetch {
        status: u16,
    },

    #[error("Authentication failed (401): check username and password")]
    Auth,

    #[error("Path not found (404) on the server")]
    NotFound,

    #[error("Host mismatch: server listed folders on '{found}', expected '{expected}'")]
    HostMismatch {
        expected: String,
        found: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Surface '{0}' is no longer reachable")]
    SurfaceUnreachable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Scheduler shutdown")]
    SchedulerShutdown,
}

impl DavError {
    pub fn http_status(status: u16, detail: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            detail: detail.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

/// Error alias
pub type Result<T, E = DavError> = std::result::Result<T, E>;
