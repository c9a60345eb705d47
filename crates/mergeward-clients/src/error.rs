//! Error types for the HTTP clients

use mergeward_core::MergewardError;
use thiserror::Error;

/// Errors raised while talking to an external service
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status
    #[error("{service} answered {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not have the expected shape
    #[error("malformed {service} payload: {detail}")]
    Payload {
        service: &'static str,
        detail: String,
    },

    /// The requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// No host project is configured for the request URL
    #[error("no project configured for {0}")]
    Unroutable(String),

    /// Bad token or base URL
    #[error("invalid client setup: {0}")]
    Setup(String),
}

impl ClientError {
    pub(crate) fn payload(service: &'static str, detail: impl std::fmt::Display) -> Self {
        ClientError::Payload {
            service,
            detail: detail.to_string(),
        }
    }

    pub fn tracker(self) -> MergewardError {
        MergewardError::Tracker(self.to_string())
    }

    pub fn source_control(self) -> MergewardError {
        MergewardError::SourceControl(self.to_string())
    }

    pub fn sheet(self) -> MergewardError {
        MergewardError::Sheet(self.to_string())
    }

    pub fn notifier(self) -> MergewardError {
        MergewardError::Notifier(self.to_string())
    }
}

/// Result type for client calls
pub type Result<T> = std::result::Result<T, ClientError>;

/// Pass `response` through when its status is a success, otherwise turn it
/// into [`ClientError::Status`] carrying the body text.
pub(crate) async fn check(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_maps_into_service_variant() {
        let err = ClientError::Status {
            service: "gitlab",
            status: 405,
            body: "Method Not Allowed".into(),
        };
        match err.source_control() {
            MergewardError::SourceControl(msg) => {
                assert!(msg.contains("405"));
                assert!(msg.contains("gitlab"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
