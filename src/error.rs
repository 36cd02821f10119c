//! Error types for the SPP operator

use thiserror::Error;

/// Main error type for SPP operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The SPP control endpoint could not be reached or answered garbage
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// Configuration that cannot be normalized into a canonical form
    ///
    /// Raised instead of defaulting, since a silently defaulted VLAN or
    /// classifier rule would apply a network policy nobody asked for.
    #[error("malformed configuration: {0}")]
    MalformedConfig(String),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an endpoint error with the given message
    pub fn endpoint(msg: impl Into<String>) -> Self {
        Self::Endpoint(msg.into())
    }

    /// Create a malformed configuration error with the given message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedConfig(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether a quick requeue can be expected to make progress.
    ///
    /// Infrastructure failures (API server, endpoint) usually clear up on
    /// their own. Malformed or invalid specs only change when a user edits
    /// the resource.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::Endpoint(_) => true,
            Self::MalformedConfig(_) | Self::Validation(_) | Self::Serialization(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: an unreachable control endpoint surfaces as a retryable error
    ///
    /// The reconcile pass returns it to the controller runtime, which
    /// schedules the whole pass again.
    #[test]
    fn story_endpoint_failures_are_retryable() {
        let err = Error::endpoint("GET http://10.0.0.1:7777/v1/processes: connection refused");
        assert!(err.to_string().contains("endpoint error"));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_retryable());
    }

    /// Story: a VLAN classifier value that cannot be decomposed fails loudly
    #[test]
    fn story_malformed_vlan_is_not_retried_on_a_timer() {
        let err = Error::malformed("vlan classifier value 'abc/FA:16:3E:00:00:01' has no numeric id");
        assert!(err.to_string().contains("malformed configuration"));
        assert!(err.to_string().contains("no numeric id"));
        assert!(!err.is_retryable());

        match Error::malformed("any") {
            Error::MalformedConfig(msg) => assert_eq!(msg, "any"),
            _ => panic!("Expected MalformedConfig variant"),
        }
    }

    /// Story: error helpers accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let spp = "spp-a";
        let err = Error::validation(format!("{} has duplicate nfv identity nfv:1", spp));
        assert!(err.to_string().contains("spp-a"));

        let err = Error::serialization("static message");
        assert!(err.to_string().contains("static message"));
        assert!(!err.is_retryable());
    }
}
