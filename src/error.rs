use thiserror::Error;

/// Failures surfaced by the history, diff and relay operations.
///
/// The enum is `Clone` so a throttled result can be handed to every caller
/// that joined the same window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{tool} is not available: {hint}")]
    ToolUnavailable { tool: String, hint: String },

    #[error("`{command}` failed: {stderr}")]
    VcsCommandFailed { command: String, stderr: String },

    #[error("Invalid API credential")]
    InvalidCredential,

    #[error("Invalid API endpoint")]
    InvalidEndpoint,

    #[error("API server rejected the request, check the endpoint and credential")]
    EndpointRejected,

    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("Request timed out: {0}")]
    NetworkTimeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

impl ReviewError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ReviewError::InvalidArgument(_) => "InvalidArgument",
            ReviewError::ToolUnavailable { .. } => "ToolUnavailable",
            ReviewError::VcsCommandFailed { .. } => "VcsCommandFailed",
            ReviewError::InvalidCredential => "InvalidCredential",
            ReviewError::InvalidEndpoint => "InvalidEndpoint",
            ReviewError::EndpointRejected => "EndpointRejected",
            ReviewError::HttpError { .. } => "HttpError",
            ReviewError::NetworkTimeout(_) => "NetworkTimeout",
            ReviewError::ConnectionFailed(_) => "ConnectionFailed",
        }
    }

    pub(crate) fn command_failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        ReviewError::VcsCommandFailed {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Maps a non-success status from the completion endpoint.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ReviewError::InvalidCredential,
            404 => ReviewError::InvalidEndpoint,
            418 => ReviewError::EndpointRejected,
            status => ReviewError::HttpError { status },
        }
    }
}

impl From<reqwest::Error> for ReviewError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReviewError::NetworkTimeout(err.to_string())
        } else {
            ReviewError::ConnectionFailed(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ReviewError::from_status(401), ReviewError::InvalidCredential);
        assert_eq!(ReviewError::from_status(404), ReviewError::InvalidEndpoint);
        assert_eq!(ReviewError::from_status(418), ReviewError::EndpointRejected);
        assert_eq!(
            ReviewError::from_status(500),
            ReviewError::HttpError { status: 500 }
        );
        assert_eq!(ReviewError::from_status(429).kind(), "HttpError");
    }
}
