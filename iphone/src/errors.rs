use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Automation server unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Automation server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Gesture rejected by the actions endpoint: {0}")]
    GestureRejected(String),

    #[error("Companion app not available: {0}")]
    CompanionNotAvailable(String),

    #[error("Companion request failed with HTTP {status}: {message}")]
    RemoteRequestFailed { status: u16, message: String },

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Service discovery error: {0}")]
    Discovery(String),
}

impl AutomationError {
    /// Maps a transport-level reqwest failure onto the automation server error kinds.
    pub(crate) fn from_transport(url: &str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            AutomationError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            AutomationError::InvalidResponse(format!("{url}: {err}"))
        } else {
            AutomationError::RemoteUnavailable(format!("{url}: {err}"))
        }
    }
}
