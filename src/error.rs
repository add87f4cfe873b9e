//! Error types for instance detection and characterization.

use thiserror::Error;

use crate::io_setup::IoSetupError;

/// Errors that can occur while detecting or characterizing a cloud instance.
#[derive(Debug, Error)]
pub enum CloudError {
    /// None of the supported cloud providers was detected.
    #[error("unknown cloud provider, only AWS, GCP and Azure are supported")]
    UnknownProvider,

    /// The requested metadata field was not found.
    #[error("metadata not found")]
    MetadataNotFound,

    /// HTTP error with status code.
    #[error("http {0}")]
    Http(u16),

    /// The metadata service could not be reached within the retry budget.
    #[error("metadata service unreachable at {url} after {attempts} attempts")]
    Unreachable {
        url: String,
        attempts: u32,
        #[source]
        source: Box<CloudError>,
    },

    /// The number of devices mounted at `/` does not fit the provider's
    /// root-mount policy.
    #[error("expected a single device mounted at /, found {found}")]
    AmbiguousRootMount { found: usize },

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Base64 decoding failed (Azure customData).
    #[error("base64 decode failed")]
    Base64,

    /// Response was not valid UTF-8.
    #[error("invalid utf-8")]
    Utf8,

    /// JSON deserialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not supported for this provider.
    #[error("operation not supported for this provider")]
    NotSupported,

    /// Response exceeds maximum allowed size.
    #[error("response too large: {0} bytes exceeds limit of {1} bytes")]
    TooLarge(usize, usize),

    /// The IO setup collaborator failed.
    #[error("io setup: {0}")]
    IoSetup(#[from] IoSetupError),
}

impl CloudError {
    /// Whether the error happened below HTTP, before any status was seen.
    ///
    /// Only these errors are retried; a status code from the metadata
    /// service is an answer, not an outage.
    pub fn is_transport(&self) -> bool {
        matches!(self, CloudError::Timeout | CloudError::Request(_))
    }

    /// Whether the metadata service answered with an HTTP-level error.
    pub fn is_http(&self) -> bool {
        matches!(self, CloudError::MetadataNotFound | CloudError::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CloudError::UnknownProvider.to_string(),
            "unknown cloud provider, only AWS, GCP and Azure are supported"
        );
        assert_eq!(CloudError::MetadataNotFound.to_string(), "metadata not found");
        assert_eq!(CloudError::Timeout.to_string(), "request timeout");
        assert_eq!(CloudError::Http(404).to_string(), "http 404");
        assert_eq!(
            CloudError::AmbiguousRootMount { found: 2 }.to_string(),
            "expected a single device mounted at /, found 2"
        );
        assert_eq!(
            CloudError::NotSupported.to_string(),
            "operation not supported for this provider"
        );
    }

    #[test]
    fn test_unreachable_keeps_source() {
        let err = CloudError::Unreachable {
            url: "http://169.254.169.254/latest/".to_string(),
            attempts: 5,
            source: Box::new(CloudError::Timeout),
        };
        assert_eq!(
            err.to_string(),
            "metadata service unreachable at http://169.254.169.254/latest/ after 5 attempts"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "request timeout");
    }

    #[test]
    fn test_classification() {
        assert!(CloudError::Timeout.is_transport());
        assert!(!CloudError::Http(500).is_transport());
        assert!(!CloudError::MetadataNotFound.is_transport());
        assert!(CloudError::MetadataNotFound.is_http());
        assert!(CloudError::Http(403).is_http());
        assert!(!CloudError::UnknownProvider.is_http());
    }
}
